//! Gateway connection configuration.
//!
//! Values come from the environment (see [`GatewayConfig::from_env`]) with
//! defaults matching a local development gateway.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

use overlay_chat_protocol::packet::ENGINE_IO_VERSION;

pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:8081";
pub const DEFAULT_GATEWAY_PATH: &str = "/ws";

// Reconnect defaults
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 2_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_JITTER_FACTOR: f64 = 0.5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid gateway url '{value}': {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported gateway url scheme '{0}' (expected http, https, ws or wss)")]
    UnsupportedScheme(String),
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Reconnection tuning for the gateway supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
    /// Growth factor applied after each attempt
    pub multiplier: f64,
    /// Jitter factor (0.0-1.0): each delay is randomised by up to ± this fraction
    pub jitter_factor: f64,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway address; `http(s)` is mapped to `ws(s)` when connecting.
    pub base_url: Url,
    /// Socket endpoint path on the gateway.
    pub path: String,
    pub reconnect: ReconnectConfig,
    /// Directory received images are written to.
    pub image_dir: PathBuf,
}

impl GatewayConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            path: DEFAULT_GATEWAY_PATH.to_string(),
            reconnect: ReconnectConfig::default(),
            image_dir: default_image_dir(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_image_dir(mut self, image_dir: impl Into<PathBuf>) -> Self {
        self.image_dir = image_dir.into();
        self
    }

    /// Load configuration from `CHAT_*` environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `CHAT_GATEWAY_URL` | `http://localhost:8081` |
    /// | `CHAT_GATEWAY_PATH` | `/ws` |
    /// | `CHAT_RECONNECT_INITIAL_MS` | `2000` |
    /// | `CHAT_RECONNECT_MAX_MS` | `10000` |
    /// | `CHAT_RECONNECT_JITTER` | `0.5` |
    /// | `CHAT_RECONNECT_MAX_ATTEMPTS` | unlimited (`0` also means unlimited) |
    /// | `CHAT_IMAGE_DIR` | `<tmp>/overlay-chat-images` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let url_value = get("CHAT_GATEWAY_URL").unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());
        let base_url = Url::parse(&url_value).map_err(|source| ConfigError::InvalidUrl {
            value: url_value.clone(),
            source,
        })?;

        let mut config = Self::new(base_url);
        if let Some(path) = get("CHAT_GATEWAY_PATH") {
            config.path = path;
        }
        if let Some(dir) = get("CHAT_IMAGE_DIR") {
            config.image_dir = PathBuf::from(dir);
        }

        let reconnect = &mut config.reconnect;
        if let Some(ms) = parse(get("CHAT_RECONNECT_INITIAL_MS"), "CHAT_RECONNECT_INITIAL_MS")? {
            reconnect.initial_delay_ms = ms;
        }
        if let Some(ms) = parse(get("CHAT_RECONNECT_MAX_MS"), "CHAT_RECONNECT_MAX_MS")? {
            reconnect.max_delay_ms = ms;
        }
        if let Some(jitter) = parse::<f64>(get("CHAT_RECONNECT_JITTER"), "CHAT_RECONNECT_JITTER")? {
            if !(0.0..=1.0).contains(&jitter) {
                return Err(ConfigError::InvalidValue {
                    key: "CHAT_RECONNECT_JITTER",
                    value: jitter.to_string(),
                });
            }
            reconnect.jitter_factor = jitter;
        }
        if let Some(attempts) =
            parse::<u32>(get("CHAT_RECONNECT_MAX_ATTEMPTS"), "CHAT_RECONNECT_MAX_ATTEMPTS")?
        {
            reconnect.max_attempts = (attempts > 0).then_some(attempts);
        }

        Ok(config)
    }

    /// The websocket URL of the gateway's Engine.IO endpoint.
    pub fn socket_url(&self) -> Result<Url, ConfigError> {
        let mut url = self.base_url.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::UnsupportedScheme(url.scheme().to_string()))?;

        let trimmed = self.path.trim().trim_matches('/');
        let path = if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{trimmed}/")
        };
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("EIO", ENGINE_IO_VERSION)
            .append_pair("transport", "websocket");
        Ok(url)
    }
}

fn parse<T: FromStr>(value: Option<String>, key: &'static str) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| v.parse().map_err(|_| ConfigError::InvalidValue { key, value: v }))
        .transpose()
}

fn default_image_dir() -> PathBuf {
    std::env::temp_dir().join("overlay-chat-images")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_local_gateway() {
        let config = GatewayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.base_url.as_str(), "http://localhost:8081/");
        assert_eq!(config.path, "/ws");
        assert_eq!(config.reconnect, ReconnectConfig::default());
        assert_eq!(config.reconnect.max_attempts, None);
    }

    #[test]
    fn socket_url_maps_scheme_and_adds_query() {
        let config = GatewayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(
            config.socket_url().unwrap().as_str(),
            "ws://localhost:8081/ws/?EIO=4&transport=websocket"
        );

        let secure = GatewayConfig::new(Url::parse("https://chat.example.com").unwrap())
            .with_path("socket.io");
        assert_eq!(
            secure.socket_url().unwrap().as_str(),
            "wss://chat.example.com/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn rejects_unsupported_scheme() {
        let config = GatewayConfig::new(Url::parse("ftp://example.com").unwrap());
        assert!(matches!(
            config.socket_url(),
            Err(ConfigError::UnsupportedScheme(s)) if s == "ftp"
        ));
    }

    #[test]
    fn reads_overrides() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("CHAT_GATEWAY_URL", "https://gw.example.com"),
            ("CHAT_GATEWAY_PATH", "/chat"),
            ("CHAT_RECONNECT_INITIAL_MS", "500"),
            ("CHAT_RECONNECT_MAX_MS", " 4000 "),
            ("CHAT_RECONNECT_JITTER", "0"),
            ("CHAT_RECONNECT_MAX_ATTEMPTS", "5"),
            ("CHAT_IMAGE_DIR", "/var/tmp/imgs"),
        ]))
        .unwrap();
        assert_eq!(config.base_url.host_str(), Some("gw.example.com"));
        assert_eq!(config.path, "/chat");
        assert_eq!(config.reconnect.initial_delay_ms, 500);
        assert_eq!(config.reconnect.max_delay_ms, 4000);
        assert_eq!(config.reconnect.jitter_factor, 0.0);
        assert_eq!(config.reconnect.max_attempts, Some(5));
        assert_eq!(config.image_dir, PathBuf::from("/var/tmp/imgs"));
    }

    #[test]
    fn zero_max_attempts_means_unlimited() {
        let config =
            GatewayConfig::from_lookup(lookup(&[("CHAT_RECONNECT_MAX_ATTEMPTS", "0")])).unwrap();
        assert_eq!(config.reconnect.max_attempts, None);
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(matches!(
            GatewayConfig::from_lookup(lookup(&[("CHAT_GATEWAY_URL", "not a url")])),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            GatewayConfig::from_lookup(lookup(&[("CHAT_RECONNECT_MAX_MS", "soon")])),
            Err(ConfigError::InvalidValue { key: "CHAT_RECONNECT_MAX_MS", .. })
        ));
        assert!(matches!(
            GatewayConfig::from_lookup(lookup(&[("CHAT_RECONNECT_JITTER", "1.5")])),
            Err(ConfigError::InvalidValue { key: "CHAT_RECONNECT_JITTER", .. })
        ));
    }
}
