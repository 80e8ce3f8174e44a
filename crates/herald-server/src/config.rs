//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development. Without bot tokens the chat-network
//! leg is disabled but the REST and relay surfaces still run.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use herald_shared::constants::{
    DEFAULT_BROADCAST_CONCURRENCY, DEFAULT_HTTP_PORT, MAX_UPLOAD_SIZE, TELEGRAM_API_URL,
};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./herald.db`
    pub database_path: PathBuf,

    /// Token of the bot end-users talk to.
    /// Env: `TELEGRAM_BOT_TOKEN`
    pub bot_token: Option<String>,

    /// Token of the bot that posts operational notices.
    /// Env: `TELEGRAM_ADMIN_TOKEN`
    pub admin_token: Option<String>,

    /// Chat the admin bot posts into.
    /// Env: `TELEGRAM_ADMIN_CHAT_ID`
    pub admin_chat_id: Option<i64>,

    /// Env: `TELEGRAM_API_URL`
    /// Default: `https://api.telegram.org`
    pub telegram_api_url: String,

    /// Long-poll timeout for `getUpdates`.
    /// Env: `TELEGRAM_POLL_TIMEOUT_SECS`
    /// Default: 30s
    pub poll_timeout: Duration,

    /// Per-request timeout on outbound sends; expiry is a transient failure.
    /// Env: `SEND_TIMEOUT_SECS`
    /// Default: 15s
    pub send_timeout: Duration,

    /// Sustained outbound rate towards the user bot.
    /// Env: `SEND_RATE_PER_SEC`
    /// Default: 25
    pub send_rate: f64,

    /// Env: `SEND_BURST`
    /// Default: 30
    pub send_burst: f64,

    /// Parallel sends during a broadcast fan-out.
    /// Env: `BROADCAST_CONCURRENCY`
    /// Default: 8
    pub broadcast_concurrency: usize,

    /// imgbb API key. Without it broadcasts with attachments fail.
    /// Env: `IMGBB_API_KEY`
    pub imgbb_api_key: Option<String>,

    /// Static operator key expected in `x-api-key`. Unset disables the check.
    /// Env: `API_KEY`
    pub api_key: Option<String>,

    /// Env: `MAX_UPLOAD_SIZE`
    /// Default: 10 MiB
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./herald.db"),
            bot_token: None,
            admin_token: None,
            admin_chat_id: None,
            telegram_api_url: TELEGRAM_API_URL.to_string(),
            poll_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(15),
            send_rate: 25.0,
            send_burst: 30.0,
            broadcast_concurrency: DEFAULT_BROADCAST_CONCURRENCY,
            imgbb_api_key: None,
            api_key: None,
            max_upload_size: MAX_UPLOAD_SIZE,
        }
    }
}

// Secrets stay out of the startup log.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<set>"))
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<set>"))
            .field("admin_chat_id", &self.admin_chat_id)
            .field("telegram_api_url", &self.telegram_api_url)
            .field("poll_timeout", &self.poll_timeout)
            .field("send_timeout", &self.send_timeout)
            .field("send_rate", &self.send_rate)
            .field("send_burst", &self.send_burst)
            .field("broadcast_concurrency", &self.broadcast_concurrency)
            .field("imgbb_api_key", &self.imgbb_api_key.as_ref().map(|_| "<set>"))
            .field("api_key", &self.api_key.as_ref().map(|_| "<set>"))
            .field("max_upload_size", &self.max_upload_size)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            parse_into(&mut config.http_addr, "HTTP_ADDR", &addr);
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        config.bot_token = non_empty(lookup("TELEGRAM_BOT_TOKEN"));
        config.admin_token = non_empty(lookup("TELEGRAM_ADMIN_TOKEN"));
        config.imgbb_api_key = non_empty(lookup("IMGBB_API_KEY"));
        config.api_key = non_empty(lookup("API_KEY"));

        if let Some(val) = non_empty(lookup("TELEGRAM_ADMIN_CHAT_ID")) {
            match val.trim().parse::<i64>() {
                Ok(id) => config.admin_chat_id = Some(id),
                Err(_) => tracing::warn!(value = %val, "Invalid TELEGRAM_ADMIN_CHAT_ID, ignoring"),
            }
        }

        if let Some(url) = non_empty(lookup("TELEGRAM_API_URL")) {
            config.telegram_api_url = url.trim_end_matches('/').to_string();
        }

        if let Some(val) = lookup("TELEGRAM_POLL_TIMEOUT_SECS") {
            let mut secs = config.poll_timeout.as_secs();
            parse_into(&mut secs, "TELEGRAM_POLL_TIMEOUT_SECS", &val);
            config.poll_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("SEND_TIMEOUT_SECS") {
            let mut secs = config.send_timeout.as_secs();
            parse_into(&mut secs, "SEND_TIMEOUT_SECS", &val);
            config.send_timeout = Duration::from_secs(secs.max(1));
        }

        if let Some(val) = lookup("SEND_RATE_PER_SEC") {
            parse_into(&mut config.send_rate, "SEND_RATE_PER_SEC", &val);
        }

        if let Some(val) = lookup("SEND_BURST") {
            parse_into(&mut config.send_burst, "SEND_BURST", &val);
        }

        if let Some(val) = lookup("BROADCAST_CONCURRENCY") {
            parse_into(&mut config.broadcast_concurrency, "BROADCAST_CONCURRENCY", &val);
            config.broadcast_concurrency = config.broadcast_concurrency.max(1);
        }

        if let Some(val) = lookup("MAX_UPLOAD_SIZE") {
            parse_into(&mut config.max_upload_size, "MAX_UPLOAD_SIZE", &val);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Overwrite `slot` with the parsed value, or warn and keep the default.
fn parse_into<T: FromStr>(slot: &mut T, key: &str, raw: &str) {
    match raw.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.broadcast_concurrency, 8);
        assert!(config.bot_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("TELEGRAM_BOT_TOKEN", "abc"),
            ("TELEGRAM_ADMIN_CHAT_ID", "-100123"),
            ("TELEGRAM_API_URL", "http://localhost:8081/"),
            ("SEND_RATE_PER_SEC", "5"),
            ("BROADCAST_CONCURRENCY", "0"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.bot_token.as_deref(), Some("abc"));
        assert_eq!(config.admin_chat_id, Some(-100123));
        assert_eq!(config.telegram_api_url, "http://localhost:8081");
        assert_eq!(config.send_rate, 5.0);
        assert_eq!(config.broadcast_concurrency, 1);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("SEND_TIMEOUT_SECS", "soon"),
            ("API_KEY", "   "),
        ]);
        assert_eq!(config.http_addr, ServerConfig::default().http_addr);
        assert_eq!(config.send_timeout, Duration::from_secs(15));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = config_from(&[("TELEGRAM_BOT_TOKEN", "super-secret")]);
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
    }
}
