#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Tickline Ingest - Streaming Market Data Ingestion
//!
//! Maintains supervised connections to three kinds of upstream feeds,
//! normalizes their frames into canonical ticks and order events, writes
//! ticks best-effort to a time-series sink, and forwards events to user
//! callbacks through a single-consumer dispatch bridge.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Transport-free value types
//!   - `market`: `MarketTick` / `OrderEvent` and their invariants
//!   - `subscription`: Channel-keyed subscription sets
//!
//! - **Application**: Port definitions
//!   - `ports`: Sink recorder, bearer-token source, callback aliases
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `socket`: Raw authenticated WebSocket tick feed
//!   - `chunked`: Chunked-HTTP newline-delimited JSON feed
//!   - `hub`: Persistent RPC hub (market + user sessions)
//!   - `lifecycle`: Reconnect supervision with exponential backoff
//!   - `dispatch`: Cross-context callback hand-off
//!   - `sink`: Line-protocol tick persistence
//!   - `config` / `telemetry` / `metrics`: operational concerns
//!
//! # Data Flow
//!
//! ```text
//! socket WS ──┐
//!             │    ┌───────────┐    ┌──────────┐
//! chunked ────┼───►│ normalize │─┬─►│ dispatch │──► callbacks
//!             │    └───────────┘ │  └──────────┘
//! hub WS ─────┘                  └─► sink (fire-and-forget)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core value types with no external dependencies.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{MarketTick, OrderEvent, OrderEventKind, OrderSide};
pub use domain::subscription::{Channel, SubscriptionKey, SubscriptionSet};

// Ports
pub use application::ports::{
    NullRecorder, OrderHandler, QuoteHandler, StaticToken, TickRecorder, TokenSource, TradeHandler,
};

// Infrastructure config
pub use infrastructure::config::{
    ChunkedSettings, ConfigError, HubSettings, IngestSettings, ReconnectSettings, SecretString,
    SinkSettings, SocketSettings,
};

// Sessions (for integration tests)
pub use infrastructure::chunked::{ChunkedError, ChunkedSession, LineBuffer};
pub use infrastructure::hub::{HubError, MarketHubSession, UserHubSession};
pub use infrastructure::socket::{SocketError, SocketSession};

// Lifecycle
pub use infrastructure::lifecycle::{
    ReconnectConfig, ReconnectPolicy, SessionState, Supervisor,
};

// Dispatch
pub use infrastructure::dispatch::{DispatchBridge, DispatchQueue};

// Sink
pub use infrastructure::sink::{LineProtocolSink, line_protocol};

// Metrics
pub use infrastructure::metrics::{StreamKind as MetricsStreamKind, init_metrics};

// Telemetry
pub use infrastructure::telemetry::init as init_telemetry;
