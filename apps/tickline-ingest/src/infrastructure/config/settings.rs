//! Settings loaded from environment variables.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::infrastructure::lifecycle::ReconnectConfig;

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    /// An environment variable is set but could not be parsed.
    #[error("invalid value for {name}: {value}")]
    InvalidVar {
        /// Variable name.
        name: String,
        /// The offending value.
        value: String,
    },
}

// =============================================================================
// Secret handling
// =============================================================================

/// A string that redacts itself in `Debug` output.
///
/// Used for API keys and access tokens so that logging a settings struct
/// never leaks a credential.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret value.
    #[must_use]
    pub const fn new(value: String) -> Self {
        Self(value)
    }

    /// Expose the underlying secret.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(\"[REDACTED]\")")
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// =============================================================================
// Per-adapter settings
// =============================================================================

/// Raw authenticated socket adapter settings.
#[derive(Debug, Clone)]
pub struct SocketSettings {
    /// WebSocket endpoint URL.
    pub url: String,
    /// API key appended to the endpoint query string.
    pub api_key: SecretString,
}

/// Chunked HTTP streaming adapter settings.
#[derive(Debug, Clone)]
pub struct ChunkedSettings {
    /// Streaming endpoint URL, without the `instruments` query parameter.
    pub url: String,
    /// Bearer token for the `Authorization` header.
    pub token: SecretString,
}

/// Persistent RPC hub adapter settings.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Market-data hub endpoint URL.
    pub market_url: String,
    /// User/account hub endpoint URL.
    pub user_url: String,
    /// Session access token, appended as a query parameter on connect.
    pub access_token: SecretString,
}

/// Time-series sink settings.
#[derive(Debug, Clone)]
pub struct SinkSettings {
    /// Sink host.
    pub host: String,
    /// Sink ILP port.
    pub port: u16,
    /// Per-write connect/send timeout.
    pub write_timeout: Duration,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9009,
            write_timeout: Duration::from_secs(1),
        }
    }
}

impl SinkSettings {
    /// `host:port` address string for socket connection.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Reconnect policy settings shared by all adapters.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Cap on the backoff delay.
    pub max_delay: Duration,
    /// Jitter fraction applied to each delay.
    pub jitter_factor: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
        }
    }
}

impl From<&ReconnectSettings> for ReconnectConfig {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: settings.initial_delay,
            max_delay: settings.max_delay,
            multiplier: 2.0,
            jitter_factor: settings.jitter_factor,
        }
    }
}

impl ReconnectSettings {
    /// Reconnect configuration for the hub sessions.
    ///
    /// The hub transports retry on their native 5s cadence rather than
    /// the shared initial delay; only the jitter tuning carries over.
    #[must_use]
    pub fn hub_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            jitter_factor: self.jitter_factor,
            ..ReconnectConfig::hub()
        }
    }
}

// =============================================================================
// Top-level settings
// =============================================================================

/// Complete application settings.
///
/// Each adapter's settings are optional: an unset `*_URL` disables that
/// adapter rather than failing startup, so a deployment can run any subset
/// of the three feeds.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Raw socket adapter, if configured.
    pub socket: Option<SocketSettings>,
    /// Chunked HTTP adapter, if configured.
    pub chunked: Option<ChunkedSettings>,
    /// RPC hub adapter, if configured.
    pub hub: Option<HubSettings>,
    /// Time-series sink.
    pub sink: SinkSettings,
    /// Shared reconnect policy.
    pub reconnect: ReconnectSettings,
}

impl IngestSettings {
    /// Load settings from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a configured adapter is missing its
    /// credential, or if a numeric variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let socket = match optional_env("SOCKET_STREAM_URL") {
            Some(url) => Some(SocketSettings {
                url,
                api_key: required_env("SOCKET_API_KEY")?.into(),
            }),
            None => None,
        };

        let chunked = match optional_env("CHUNKED_STREAM_URL") {
            Some(url) => Some(ChunkedSettings {
                url,
                token: required_env("CHUNKED_API_TOKEN")?.into(),
            }),
            None => None,
        };

        let hub = match optional_env("HUB_MARKET_URL") {
            Some(market_url) => Some(HubSettings {
                market_url,
                user_url: required_env("HUB_USER_URL")?,
                access_token: required_env("HUB_ACCESS_TOKEN")?.into(),
            }),
            None => None,
        };

        let sink_defaults = SinkSettings::default();
        let sink = SinkSettings {
            host: optional_env("QUESTDB_HOST").unwrap_or(sink_defaults.host),
            port: parse_env("QUESTDB_PORT")?.unwrap_or(sink_defaults.port),
            write_timeout: parse_env("SINK_WRITE_TIMEOUT_MS")?
                .map_or(sink_defaults.write_timeout, Duration::from_millis),
        };

        let reconnect_defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            initial_delay: parse_env("RECONNECT_INITIAL_DELAY_MS")?
                .map_or(reconnect_defaults.initial_delay, Duration::from_millis),
            max_delay: parse_env("RECONNECT_MAX_DELAY_MS")?
                .map_or(reconnect_defaults.max_delay, Duration::from_millis),
            jitter_factor: parse_env("RECONNECT_JITTER_FACTOR")?
                .unwrap_or(reconnect_defaults.jitter_factor),
        };

        Ok(Self {
            socket,
            chunked,
            hub,
            sink,
            reconnect,
        })
    }
}

// =============================================================================
// Env helpers
// =============================================================================

fn optional_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    optional_env(name).ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match optional_env(name) {
        Some(value) => parse_value(name, value).map(Some),
        None => Ok(None),
    }
}

fn parse_value<T: FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidVar {
        name: name.to_string(),
        value,
    })
}

// =============================================================================
// URL validation
// =============================================================================

/// Validate an absolute `ws`/`wss` endpoint URL.
///
/// Used by the adapters at `connect()` so a malformed URL fails fast
/// instead of being retried forever by the supervisor.
///
/// # Errors
///
/// Returns a description of the problem if the URL does not parse or
/// carries a non-WebSocket scheme.
pub fn validate_ws_url(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("invalid URL {url:?}: {e}"))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(format!("unsupported scheme {other:?} in {url:?}")),
    }
}

/// Validate an absolute `http`/`https` endpoint URL.
///
/// # Errors
///
/// Returns a description of the problem if the URL does not parse or
/// carries a non-HTTP scheme.
pub fn validate_http_url(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("invalid URL {url:?}: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme {other:?} in {url:?}")),
    }
}
