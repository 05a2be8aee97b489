//! Tickline Ingest Binary
//!
//! Starts the streaming ingestion service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tickline-ingest
//! ```
//!
//! # Environment Variables
//!
//! Each adapter is enabled by setting its URL; at least one must be set.
//!
//! - `SOCKET_STREAM_URL` / `SOCKET_API_KEY`: raw socket feed
//! - `SOCKET_SYMBOLS`: comma-separated symbols for the socket feed
//! - `CHUNKED_STREAM_URL` / `CHUNKED_API_TOKEN`: chunked HTTP feed
//! - `CHUNKED_INSTRUMENTS`: comma-separated instruments for the chunked feed
//! - `HUB_MARKET_URL` / `HUB_USER_URL` / `HUB_ACCESS_TOKEN`: RPC hub
//! - `HUB_CONTRACTS`: comma-separated contract ids for the market hub
//! - `HUB_ACCOUNTS`: comma-separated account ids for the user hub
//! - `QUESTDB_HOST` / `QUESTDB_PORT`: tick sink (default: 127.0.0.1:9009)
//! - `RECONNECT_INITIAL_DELAY_MS` / `RECONNECT_MAX_DELAY_MS` /
//!   `RECONNECT_JITTER_FACTOR`: backoff tuning
//! - `RUST_LOG`: log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use tickline_ingest::infrastructure::config::IngestSettings;
use tickline_ingest::infrastructure::dispatch::DispatchBridge;
use tickline_ingest::infrastructure::lifecycle::ReconnectConfig;
use tickline_ingest::infrastructure::sink::LineProtocolSink;
use tickline_ingest::infrastructure::{metrics, telemetry};
use tickline_ingest::{
    ChunkedSession, MarketHubSession, SocketSession, StaticToken, TickRecorder, UserHubSession,
};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    telemetry::init();
    tracing::info!("Starting Tickline Ingest");

    let _metrics_handle = metrics::init_metrics();

    let settings = IngestSettings::from_env().context("loading configuration")?;
    if settings.socket.is_none() && settings.chunked.is_none() && settings.hub.is_none() {
        anyhow::bail!("no stream configured: set SOCKET_STREAM_URL, CHUNKED_STREAM_URL or HUB_MARKET_URL");
    }

    let reconnect = ReconnectConfig::from(&settings.reconnect);
    let sink: Arc<dyn TickRecorder> = Arc::new(LineProtocolSink::new(settings.sink.clone()));
    let bridge = Arc::new(DispatchBridge::new());

    // The dispatch queue is the primary context: all user callbacks run on
    // this one task, in submission order.
    let queue = bridge.register();
    let dispatch_task = tokio::spawn(queue.run());

    let mut socket_session = None;
    if let Some(socket_settings) = settings.socket.clone() {
        let symbols = list_env("SOCKET_SYMBOLS");
        let session = SocketSession::new(
            socket_settings,
            reconnect.clone(),
            Arc::clone(&sink),
            Arc::clone(&bridge),
        );
        session.on_quote(Arc::new(|tick| {
            tracing::info!(symbol = %tick.symbol, bid = tick.bid, ask = tick.ask, "quote");
        }));
        session
            .connect(&as_strs(&symbols))
            .context("starting socket session")?;
        socket_session = Some(session);
    }

    let mut chunked_session = None;
    if let Some(chunked_settings) = settings.chunked.clone() {
        let instruments = list_env("CHUNKED_INSTRUMENTS");
        let session = ChunkedSession::new(
            chunked_settings,
            reconnect.clone(),
            Arc::clone(&sink),
            Arc::clone(&bridge),
        );
        session.on_quote(Arc::new(|tick| {
            tracing::info!(symbol = %tick.symbol, mid = tick.last, "price");
        }));
        session.on_order(Arc::new(|event| {
            tracing::info!(kind = ?event.kind, order_id = %event.order_id, "transaction");
        }));
        session
            .connect(&as_strs(&instruments))
            .context("starting chunked session")?;
        chunked_session = Some(session);
    }

    let mut market_hub = None;
    let mut user_hub = None;
    if let Some(hub_settings) = settings.hub.clone() {
        let token_source = Arc::new(StaticToken(
            hub_settings.access_token.expose().to_string(),
        ));
        let hub_reconnect = settings.reconnect.hub_config();

        let contracts = list_env("HUB_CONTRACTS");
        if !contracts.is_empty() {
            let session = MarketHubSession::new(
                &hub_settings,
                token_source.clone(),
                hub_reconnect.clone(),
                Arc::clone(&sink),
                Arc::clone(&bridge),
            );
            session.on_quote(Arc::new(|tick| {
                tracing::info!(symbol = %tick.symbol, bid = tick.bid, ask = tick.ask, "hub quote");
            }));
            session.on_trade(Arc::new(|tick| {
                tracing::info!(symbol = %tick.symbol, price = tick.last, "hub trade");
            }));
            session
                .connect(&as_strs(&contracts))
                .context("starting market hub session")?;
            market_hub = Some(session);
        }

        let accounts = list_env("HUB_ACCOUNTS");
        if !accounts.is_empty() {
            let session = UserHubSession::new(
                &hub_settings,
                token_source,
                hub_reconnect,
                Arc::clone(&bridge),
            );
            session.on_order(Arc::new(|event| {
                tracing::info!(kind = ?event.kind, order_id = %event.order_id, "hub order");
            }));
            session
                .connect(&as_strs(&accounts))
                .context("starting user hub session")?;
            user_hub = Some(session);
        }
    }

    tracing::info!("Ingest running");

    await_shutdown().await;

    if let Some(session) = socket_session {
        session.disconnect().await;
    }
    if let Some(session) = chunked_session {
        session.disconnect().await;
    }
    if let Some(session) = market_hub {
        session.disconnect().await;
    }
    if let Some(session) = user_hub {
        session.disconnect().await;
    }

    // Unregister last so every already-dispatched callback drains.
    bridge.unregister();
    let _ = dispatch_task.await;

    tracing::info!("Ingest stopped");
    Ok(())
}

/// Parse a comma-separated environment list.
fn list_env(name: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn as_strs(items: &[String]) -> Vec<&str> {
    items.iter().map(String::as_str).collect()
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
