//! Structured Logging
//!
//! Configures the `tracing` subscriber for the process. Output goes to
//! stderr as line-oriented structured logs; verbosity is controlled with
//! `RUST_LOG`, defaulting to `info` for this crate and `warn` for
//! dependency noise.
//!
//! # Usage
//!
//! ```ignore
//! use tickline_ingest::infrastructure::telemetry;
//!
//! telemetry::init();
//! tracing::info!(symbol = "ES", "subscribed");
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the global tracing subscriber.
///
/// Safe to call once at startup; a second call is a no-op (the first
/// registration wins).
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("tickline_ingest=info,tokio_tungstenite=warn,tungstenite=warn,hyper=warn")
    });

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
