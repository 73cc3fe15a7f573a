//! Telegram channel: Bot API calls for topics, text and photos, plus webhook registration
//! and a getUpdates long-poll loop for deployments without a public URL.

use crate::channels::inbound::InboundEvent;
use crate::channels::transport::{Destination, ForumManager, MessageTransport, TransportError};
use crate::relay::ids::{ChatId, MessageId, TopicId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("telegram {method} failed: {description}")]
    Api {
        method: &'static str,
        description: String,
    },
    #[error("telegram {method} returned no {field}")]
    Missing {
        method: &'static str,
        field: &'static str,
    },
}

impl From<TelegramError> for TransportError {
    fn from(e: TelegramError) -> Self {
        match &e {
            TelegramError::Request(inner) => TransportError::Request(inner.to_string()),
            TelegramError::Api { .. } => TransportError::Api(e.to_string()),
            TelegramError::Missing { field, .. } => TransportError::MissingField(*field),
        }
    }
}

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram update payload (getUpdates result item or webhook POST body).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    #[serde(default)]
    pub message_thread_id: Option<i64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
    #[serde(default)]
    pub document: Option<TelegramDocument>,
    #[serde(default)]
    pub reply_to_message: Option<Box<TelegramMessage>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    /// "private", "group", "supergroup" or "channel".
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramDocument {
    pub file_id: String,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ForumTopic {
    #[serde(default)]
    message_thread_id: Option<i64>,
}

/// Telegram Bot API client.
pub struct TelegramChannel {
    api_base: String,
    token: String,
    running: AtomicBool,
    client: reqwest::Client,
}

impl TelegramChannel {
    /// `request_timeout` bounds every call except the long poll, which gets its own.
    pub fn new(token: String, api_base: Option<String>, request_timeout: Duration) -> Self {
        let api_base = api_base
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| TELEGRAM_API_BASE.to_string());
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("telegram: custom http client unavailable ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self {
            api_base,
            token,
            running: AtomicBool::new(false),
            client,
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// POST a Bot API method and unwrap the `{ok, result}` envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        body: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<Option<T>, TelegramError> {
        let mut req = self.client.post(self.method_url(method)).json(&body);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        let res = req.send().await?;
        let status = res.status();
        let text = res.text().await?;
        let data: ApiResponse<T> = match serde_json::from_str(&text) {
            Ok(d) => d,
            Err(_) => {
                return Err(TelegramError::Api {
                    method,
                    description: format!("{} {}", status, text),
                })
            }
        };
        if !data.ok {
            return Err(TelegramError::Api {
                method,
                description: data
                    .description
                    .unwrap_or_else(|| format!("{} (ok: false)", status)),
            });
        }
        Ok(data.result)
    }

    /// Set webhook URL (and optional secret). Telegram then POSTs updates instead of getUpdates.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), TelegramError> {
        let mut body = json!({ "url": url, "allowed_updates": ["message"] });
        if let Some(s) = secret {
            body["secret_token"] = serde_json::Value::String(s.to_string());
        }
        self.call::<serde_json::Value>("setWebhook", body, None).await?;
        Ok(())
    }

    /// Remove webhook so the bot can use getUpdates again.
    pub async fn delete_webhook(&self) -> Result<(), TelegramError> {
        self.call::<serde_json::Value>("deleteWebhook", json!({}), None)
            .await?;
        Ok(())
    }

    /// Long-poll getUpdates. Returns (updates, next_offset).
    async fn get_updates(
        &self,
        offset: Option<i64>,
    ) -> Result<(Vec<TelegramUpdate>, Option<i64>), TelegramError> {
        let mut body = json!({ "timeout": LONG_POLL_TIMEOUT, "allowed_updates": ["message"] });
        if let Some(off) = offset {
            body["offset"] = json!(off);
        }
        let updates: Vec<TelegramUpdate> = self
            .call(
                "getUpdates",
                body,
                Some(Duration::from_secs(LONG_POLL_TIMEOUT + 10)),
            )
            .await?
            .unwrap_or_default();
        let next_offset = updates.iter().map(|u| u.update_id).max().map(|id| id + 1);
        Ok((updates, next_offset))
    }

    pub async fn create_forum_topic(&self, chat: ChatId, name: &str) -> Result<TopicId, TelegramError> {
        let topic: Option<ForumTopic> = self
            .call("createForumTopic", json!({ "chat_id": chat, "name": name }), None)
            .await?;
        topic
            .and_then(|t| t.message_thread_id)
            .map(TopicId)
            .ok_or(TelegramError::Missing {
                method: "createForumTopic",
                field: "message_thread_id",
            })
    }

    pub async fn send_message(
        &self,
        to: Destination,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, TelegramError> {
        let mut body = json!({ "chat_id": to.chat, "text": text });
        if let Some(topic) = to.topic {
            body["message_thread_id"] = json!(topic);
        }
        if let Some(id) = reply_to {
            body["reply_parameters"] =
                json!({ "message_id": id, "allow_sending_without_reply": true });
        }
        self.sent("sendMessage", body).await
    }

    pub async fn send_photo(
        &self,
        to: Destination,
        photo: &str,
        caption: Option<&str>,
    ) -> Result<MessageId, TelegramError> {
        let mut body = json!({ "chat_id": to.chat, "photo": photo });
        if let Some(topic) = to.topic {
            body["message_thread_id"] = json!(topic);
        }
        if let Some(c) = caption {
            body["caption"] = json!(c);
        }
        self.sent("sendPhoto", body).await
    }

    async fn sent(
        &self,
        method: &'static str,
        body: serde_json::Value,
    ) -> Result<MessageId, TelegramError> {
        let msg: Option<SentMessage> = self.call(method, body, None).await?;
        msg.map(|m| MessageId(m.message_id))
            .ok_or(TelegramError::Missing {
                method,
                field: "message_id",
            })
    }

    /// Start the getUpdates long-poll loop feeding the relay queue. Returns a handle to await on shutdown.
    pub fn start_inbound(self: Arc<Self>, inbound_tx: mpsc::Sender<InboundEvent>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop");
        tokio::spawn(async move {
            run_get_updates_loop(self, inbound_tx).await;
        })
    }
}

/// Wait before the next getUpdates after `failures` consecutive errors: 2s, doubling, capped at 60s.
fn poll_backoff(failures: u32) -> Duration {
    let secs = 2u64.saturating_mul(1 << failures.saturating_sub(1).min(5));
    Duration::from_secs(secs.min(60))
}

async fn run_get_updates_loop(channel: Arc<TelegramChannel>, inbound_tx: mpsc::Sender<InboundEvent>) {
    let mut offset: Option<i64> = None;
    let mut failures: u32 = 0;
    while channel.running() {
        match channel.get_updates(offset).await {
            Ok((updates, next)) => {
                if failures > 0 {
                    log::info!("telegram getUpdates recovered after {} failure(s)", failures);
                    failures = 0;
                }
                if next.is_some() {
                    offset = next;
                }
                for u in updates {
                    let Some(event) = u.message.as_ref().and_then(InboundEvent::from_telegram) else {
                        continue;
                    };
                    if inbound_tx.send(event).await.is_err() {
                        log::debug!("telegram: inbound queue closed, stopping loop");
                        return;
                    }
                }
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let wait = poll_backoff(failures);
                // 401 (bad token) and 409 (webhook still set) land here and never heal on their own
                log::warn!(
                    "telegram getUpdates failed ({} in a row, retrying in {:?}): {}",
                    failures,
                    wait,
                    e
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

#[async_trait]
impl ForumManager for TelegramChannel {
    async fn create_topic(&self, chat: ChatId, name: &str) -> Result<TopicId, TransportError> {
        Ok(self.create_forum_topic(chat, name).await?)
    }
}

#[async_trait]
impl MessageTransport for TelegramChannel {
    async fn send_text(
        &self,
        to: Destination,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, TransportError> {
        Ok(self.send_message(to, text, reply_to).await?)
    }

    async fn send_photo(
        &self,
        to: Destination,
        photo: &str,
        caption: Option<&str>,
    ) -> Result<MessageId, TransportError> {
        Ok(TelegramChannel::send_photo(self, to, photo, caption).await?)
    }
}
