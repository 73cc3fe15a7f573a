//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.forumrelay/config.json`); the deployment
//! environment variables override the file so the bot can run from env alone.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Channel settings (Telegram).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Relay behavior and state file.
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Listener bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the webhook and health endpoints (default 3000). Overridden by PORT env.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0"; Telegram must be able to reach the webhook).
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
}

/// Telegram channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by BOT_TOKEN / TELEGRAM_BOT_TOKEN env.
    pub bot_token: Option<String>,
    /// Forum-enabled supergroup holding one topic per user (e.g. -1001234567890). Overridden by GROUP_CHAT_ID env.
    pub group_chat_id: Option<i64>,
    /// When set, webhook mode: Telegram POSTs updates to this URL. If unset, long-poll getUpdates is used. Overridden by WEBHOOK_URL env.
    pub webhook_url: Option<String>,
    /// Optional secret for webhook verification (X-Telegram-Bot-Api-Secret-Token). Overridden by WEBHOOK_SECRET env.
    pub webhook_secret: Option<String>,
    /// Bot API base URL (default https://api.telegram.org). Overridden by TELEGRAM_API_BASE env.
    pub api_base: Option<String>,
}

/// Texts shown in the topic for messages without text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Placeholders {
    pub photo: String,
    pub document: String,
    pub other: String,
}

impl Default for Placeholders {
    fn default() -> Self {
        Self {
            photo: "[Imagen]".to_string(),
            document: "[Documento]".to_string(),
            other: "[Mensaje no textual]".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Sent once to a user on first contact. Empty disables it.
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// Topic name is "<prefix> <user id>".
    #[serde(default = "default_topic_label_prefix")]
    pub topic_label_prefix: String,
    /// Snapshot file. Relative paths are resolved against the config file's parent; default `state.json` there.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    /// Upper bound for every outbound Bot API call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub placeholders: Placeholders,
}

fn default_greeting() -> String {
    "Bonjour, je m'appelle Lia. Souhaiteriez-vous que je vous présente ce poste ?".to_string()
}

fn default_topic_label_prefix() -> String {
    "Customer".to_string()
}

fn default_request_timeout_secs() -> u64 {
    15
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            topic_label_prefix: default_topic_label_prefix(),
            state_path: None,
            request_timeout_secs: default_request_timeout_secs(),
            placeholders: Placeholders::default(),
        }
    }
}

/// Trimmed, non-empty value of an env var.
fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| non_empty(&s))
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

fn config_non_empty(v: &Option<String>) -> Option<String> {
    v.as_deref().and_then(non_empty)
}

/// Env lookup used by the resolvers; tests substitute a fixed map.
type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Resolve the Telegram bot token: env BOT_TOKEN or TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    telegram_token_from(config, &env_non_empty)
}

fn telegram_token_from(config: &Config, env: EnvLookup) -> Option<String> {
    env("BOT_TOKEN")
        .or_else(|| env("TELEGRAM_BOT_TOKEN"))
        .or_else(|| config_non_empty(&config.channels.telegram.bot_token))
}

/// Resolve the shared group id: env GROUP_CHAT_ID overrides config.
pub fn resolve_group_chat_id(config: &Config) -> Result<Option<i64>> {
    group_chat_id_from(config, &env_non_empty)
}

fn group_chat_id_from(config: &Config, env: EnvLookup) -> Result<Option<i64>> {
    match env("GROUP_CHAT_ID") {
        Some(s) => s
            .parse::<i64>()
            .map(Some)
            .with_context(|| format!("GROUP_CHAT_ID is not a chat id: {}", s)),
        None => Ok(config.channels.telegram.group_chat_id),
    }
}

/// Resolve the webhook URL: env WEBHOOK_URL overrides config.
pub fn resolve_webhook_url(config: &Config) -> Option<String> {
    env_non_empty("WEBHOOK_URL").or_else(|| config_non_empty(&config.channels.telegram.webhook_url))
}

/// Resolve the webhook secret: env WEBHOOK_SECRET overrides config.
pub fn resolve_webhook_secret(config: &Config) -> Option<String> {
    env_non_empty("WEBHOOK_SECRET")
        .or_else(|| config_non_empty(&config.channels.telegram.webhook_secret))
}

/// Resolve the Bot API base: env TELEGRAM_API_BASE overrides config.
pub fn resolve_api_base(config: &Config) -> Option<String> {
    env_non_empty("TELEGRAM_API_BASE")
        .or_else(|| config_non_empty(&config.channels.telegram.api_base))
}

/// Resolve the listen port: env PORT overrides config.
pub fn resolve_gateway_port(config: &Config) -> u16 {
    gateway_port_from(config, &env_non_empty)
}

fn gateway_port_from(config: &Config, env: EnvLookup) -> u16 {
    env("PORT")
        .and_then(|p| match p.parse::<u16>() {
            Ok(p) => Some(p),
            Err(_) => {
                log::warn!("ignoring invalid PORT {:?}", p);
                None
            }
        })
        .unwrap_or(config.gateway.port)
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("FORUMRELAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".forumrelay").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the snapshot path: `relay.statePath` (relative to the config file's parent) or `state.json` next to the config.
pub fn resolve_state_path(config: &Config, config_path: &Path) -> PathBuf {
    match &config.relay.state_path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                config_parent(config_path).join(p)
            }
        }
        _ => config_parent(config_path).join("state.json"),
    }
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used (for resolving the state file).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.gateway.port, 3000);
        assert_eq!(c.gateway.bind, "0.0.0.0");
        assert_eq!(c.relay.request_timeout_secs, 15);
        assert_eq!(c.relay.placeholders.photo, "[Imagen]");
        assert!(!c.relay.greeting.is_empty());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: Config = serde_json::from_str(
            r#"{"channels":{"telegram":{"botToken":"t","groupChatId":-1001}},
                "relay":{"placeholders":{"photo":"[Photo]"}}}"#,
        )
        .unwrap();
        assert_eq!(c.channels.telegram.group_chat_id, Some(-1001));
        assert_eq!(c.relay.placeholders.photo, "[Photo]");
        assert_eq!(c.relay.placeholders.document, "[Documento]");
        assert_eq!(c.relay.topic_label_prefix, "Customer");
        assert_eq!(c.gateway.port, 3000);
    }

    #[test]
    fn resolve_state_path_default() {
        let config = Config::default();
        let path = Path::new("/home/user/.forumrelay/config.json");
        assert_eq!(
            resolve_state_path(&config, path),
            PathBuf::from("/home/user/.forumrelay/state.json")
        );
    }

    #[test]
    fn resolve_state_path_override_relative() {
        let mut config = Config::default();
        config.relay.state_path = Some(PathBuf::from("data/relay.json"));
        let path = Path::new("/home/user/.forumrelay/config.json");
        assert_eq!(
            resolve_state_path(&config, path),
            PathBuf::from("/home/user/.forumrelay/data/relay.json")
        );
    }

    #[test]
    fn resolve_state_path_override_absolute() {
        let mut config = Config::default();
        config.relay.state_path = Some(PathBuf::from("/var/lib/forumrelay/state.json"));
        let path = Path::new("config.json");
        assert_eq!(
            resolve_state_path(&config, path),
            PathBuf::from("/var/lib/forumrelay/state.json")
        );
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: std::collections::HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).and_then(|v| non_empty(v))
    }

    #[test]
    fn bot_token_env_precedence() {
        let mut config = Config::default();
        config.channels.telegram.bot_token = Some("from-config".into());

        let env = env_of(&[("BOT_TOKEN", "primary"), ("TELEGRAM_BOT_TOKEN", "secondary")]);
        assert_eq!(telegram_token_from(&config, &env), Some("primary".into()));

        let env = env_of(&[("BOT_TOKEN", "  "), ("TELEGRAM_BOT_TOKEN", "secondary")]);
        assert_eq!(telegram_token_from(&config, &env), Some("secondary".into()));

        let env = env_of(&[]);
        assert_eq!(telegram_token_from(&config, &env), Some("from-config".into()));

        config.channels.telegram.bot_token = None;
        assert_eq!(telegram_token_from(&config, &env), None);
    }

    #[test]
    fn group_chat_id_env_overrides_and_must_be_numeric() {
        let mut config = Config::default();
        config.channels.telegram.group_chat_id = Some(-1001);

        let env = env_of(&[("GROUP_CHAT_ID", " -100200 ")]);
        assert_eq!(group_chat_id_from(&config, &env).unwrap(), Some(-100200));

        let env = env_of(&[]);
        assert_eq!(group_chat_id_from(&config, &env).unwrap(), Some(-1001));

        let env = env_of(&[("GROUP_CHAT_ID", "support-group")]);
        let err = group_chat_id_from(&config, &env).unwrap_err();
        assert!(err.to_string().contains("GROUP_CHAT_ID"));
    }

    #[test]
    fn invalid_port_env_falls_back_to_config() {
        let mut config = Config::default();
        config.gateway.port = 8080;

        assert_eq!(gateway_port_from(&config, &env_of(&[("PORT", "9090")])), 9090);
        assert_eq!(gateway_port_from(&config, &env_of(&[("PORT", "http")])), 8080);
        assert_eq!(gateway_port_from(&config, &env_of(&[("PORT", "70000")])), 8080);
        assert_eq!(gateway_port_from(&config, &env_of(&[])), 8080);
    }

    #[test]
    fn blank_values_count_as_unset() {
        assert_eq!(non_empty("  "), None);
        assert_eq!(config_non_empty(&Some(" tok ".into())), Some("tok".into()));
    }
}
