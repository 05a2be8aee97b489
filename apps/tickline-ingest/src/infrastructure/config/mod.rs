//! Configuration
//!
//! Environment-backed settings for every adapter and the sink. All
//! configuration is read once at startup; missing required variables fail
//! fast with a descriptive error rather than surfacing later as a
//! connection failure.

mod settings;

pub use settings::{
    ChunkedSettings, ConfigError, HubSettings, IngestSettings, ReconnectSettings, SecretString,
    SinkSettings, SocketSettings, validate_http_url, validate_ws_url,
};
