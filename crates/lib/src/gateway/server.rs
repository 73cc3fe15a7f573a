//! Gateway HTTP server: Telegram webhook, health probe, and the inbound relay queue.

use crate::channels::{InboundEvent, TelegramChannel, TelegramUpdate};
use crate::config::{self, Config};
use crate::relay::snapshot::SnapshotStore;
use crate::relay::{ChatId, Relay, RelaySettings, RelayState};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::path::PathBuf;
use subtle::ConstantTimeEq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const INBOUND_QUEUE: usize = 64;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub port: u16,
    /// When Some, webhook POSTs must carry this in X-Telegram-Bot-Api-Secret-Token.
    pub webhook_secret: Option<String>,
    /// Webhook handler pushes here; the processor task drains it one event at a time.
    pub inbound_tx: mpsc::Sender<InboundEvent>,
    pub relay: Arc<Relay>,
}

/// Handle one queued event; failures are logged and the event is dropped.
async fn process_inbound_event(relay: &Relay, event: InboundEvent) {
    log::debug!("inbound: {}", event.describe());
    match relay.handle(&event).await {
        Ok(outcome) => log::debug!("inbound message {}: {:?}", event.message_id, outcome),
        Err(e) => log::warn!(
            "inbound message {} from {} dropped: {}",
            event.message_id,
            event.sender,
            e
        ),
    }
}

/// Run the gateway; binds to config.gateway.bind:config.gateway.port.
/// Requires a bot token and the shared group id (config or env).
/// With a webhook URL the webhook is registered; otherwise getUpdates long-polling is used.
/// Blocks until shutdown (e.g. Ctrl+C).
/// `config_path` is the path to the config file (used to resolve the state file).
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let token = config::resolve_telegram_token(&config).context(
        "telegram bot token not configured (set channels.telegram.botToken or BOT_TOKEN)",
    )?;
    let group = config::resolve_group_chat_id(&config)?.context(
        "shared group not configured (set channels.telegram.groupChatId or GROUP_CHAT_ID)",
    )?;
    let webhook_url = config::resolve_webhook_url(&config);
    let webhook_secret = config::resolve_webhook_secret(&config);
    let port = config.gateway.port;
    let timeout = Duration::from_secs(config.relay.request_timeout_secs.max(1));
    log::info!("shared group: {}", group);

    let telegram = Arc::new(TelegramChannel::new(
        token,
        config::resolve_api_base(&config),
        timeout,
    ));
    let state_path = config::resolve_state_path(&config, &config_path);
    let relay_state = Arc::new(RelayState::open(SnapshotStore::new(state_path)).await);
    let relay = Arc::new(Relay::new(
        RelaySettings {
            shared_group: ChatId(group),
            greeting: config.relay.greeting.clone(),
            topic_label_prefix: config.relay.topic_label_prefix.clone(),
            placeholders: config.relay.placeholders.clone(),
            timeout,
        },
        relay_state,
        telegram.clone(),
        telegram.clone(),
    ));

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundEvent>(INBOUND_QUEUE);
    let processor = {
        let relay = relay.clone();
        tokio::spawn(async move {
            while let Some(event) = inbound_rx.recv().await {
                process_inbound_event(&relay, event).await;
            }
            log::debug!("inbound queue closed");
        })
    };

    let poll_task: Option<JoinHandle<()>> = if let Some(ref url) = webhook_url {
        if let Err(e) = telegram.set_webhook(url, webhook_secret.as_deref()).await {
            log::warn!("telegram set_webhook failed: {}", e);
        } else {
            log::info!("telegram webhook registered: {}", url);
        }
        None
    } else {
        let handle = telegram.clone().start_inbound(inbound_tx.clone());
        log::info!("no webhook url configured; using getUpdates long-poll");
        Some(handle)
    };

    let state = GatewayState {
        port,
        webhook_secret,
        inbound_tx,
        relay,
    };
    let app = Router::new()
        .route("/", get(health_http))
        .route("/telegram/webhook", post(telegram_webhook))
        .route("/webhook", post(telegram_webhook))
        .with_state(state);

    let bind = config.gateway.bind.trim();
    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            telegram,
            webhook_url.is_some(),
            poll_task,
        ))
        .await
        .context("gateway server exited")?;

    // The router (and its queue sender) is gone; let queued events finish.
    if let Err(e) = processor.await {
        log::warn!("inbound processor ended abnormally: {}", e);
    }
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Stops the long-poll loop or removes the webhook, then awaits the poll task.
async fn shutdown_signal(
    telegram: Arc<TelegramChannel>,
    webhook_mode: bool,
    poll_task: Option<JoinHandle<()>>,
) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, stopping telegram channel");

    telegram.stop();
    if webhook_mode {
        if let Err(e) = telegram.delete_webhook().await {
            log::warn!("telegram delete_webhook on shutdown failed: {}", e);
        }
    }
    if let Some(h) = poll_task {
        // a long poll in flight can take up to its timeout to return
        h.abort();
        let _ = h.await;
    }
    log::info!("telegram channel stopped");
}

fn secret_matches(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// POST /telegram/webhook: receives Telegram update JSON; verifies optional secret, enqueues the event.
async fn telegram_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(ref expected) = state.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !secret_matches(provided, expected) {
            log::warn!("webhook: rejecting update with a wrong secret token");
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(e) => {
            log::warn!("webhook: rejecting unparsable update: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };
    let Some(event) = update.message.as_ref().and_then(InboundEvent::from_telegram) else {
        return StatusCode::OK;
    };
    if state.inbound_tx.send(event).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let (topics, correlations) = state.relay.state().counts().await;
    Json(json!({
        "runtime": "running",
        "port": state.port,
        "topics": topics,
        "correlations": correlations,
    }))
}
