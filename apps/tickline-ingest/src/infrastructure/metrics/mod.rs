//! Prometheus Metrics Module
//!
//! Exposes ingestion metrics via the Prometheus text format.
//!
//! # Metrics Categories
//!
//! - **Ticks**: Normalized tick counts per stream
//! - **Order events**: Account event counts per stream
//! - **Connections**: Reconnect attempts
//! - **Sink**: Write failures (the sink is fire-and-forget, so this counter
//!   is the only place persistence loss is visible)
//! - **Dispatch**: Work items dropped while no consumer was registered

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Idempotent. The returned handle renders the text exposition format;
/// a serving surface (scrape endpoint, periodic log) calls
/// `handle.render()` on it. This crate installs the recorder and keeps
/// the handle alive but ships no scrape endpoint of its own.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "tickline_ticks_total",
        "Normalized market ticks received, by stream"
    );
    describe_counter!(
        "tickline_order_events_total",
        "Normalized order events received, by stream"
    );
    describe_counter!(
        "tickline_reconnects_total",
        "Stream reconnection attempts across all sessions"
    );
    describe_counter!(
        "tickline_sink_write_errors_total",
        "Tick records dropped because the sink write failed"
    );
    describe_counter!(
        "tickline_dispatch_dropped_total",
        "Dispatched work items dropped with no consumer registered"
    );
    describe_gauge!(
        "tickline_subscriptions_active",
        "Currently tracked subscription keys, by stream"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for the three stream adapters.
#[derive(Debug, Clone, Copy)]
pub enum StreamKind {
    /// Raw authenticated socket feed.
    Socket,
    /// Chunked HTTP feed.
    Chunked,
    /// RPC hub market session.
    HubMarket,
    /// RPC hub user session.
    HubUser,
}

impl StreamKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::Chunked => "chunked",
            Self::HubMarket => "hub_market",
            Self::HubUser => "hub_user",
        }
    }
}

/// Record a normalized tick.
pub fn record_tick(stream: StreamKind) {
    counter!(
        "tickline_ticks_total",
        "stream" => stream.as_str()
    )
    .increment(1);
}

/// Record a normalized order event.
pub fn record_order_event(stream: StreamKind) {
    counter!(
        "tickline_order_events_total",
        "stream" => stream.as_str()
    )
    .increment(1);
}

/// Record a failed sink write.
pub fn record_sink_error() {
    counter!("tickline_sink_write_errors_total").increment(1);
}

/// Record work items dropped because no dispatch consumer was registered.
pub fn record_dispatch_dropped(count: u64) {
    counter!("tickline_dispatch_dropped_total").increment(count);
}

/// Update the tracked subscription count for a stream.
pub fn set_subscriptions(stream: StreamKind, count: f64) {
    gauge!(
        "tickline_subscriptions_active",
        "stream" => stream.as_str()
    )
    .set(count);
}

// =============================================================================
// Tests
// =============================================================================
