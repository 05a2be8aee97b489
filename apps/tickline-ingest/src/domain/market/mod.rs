//! Canonical Market Data Types
//!
//! Every protocol adapter decodes its wire shapes into these two types.
//! They are the only currency between adapters, the sink writer, and
//! user callbacks. Values are immutable after creation; the sink and each
//! dispatched callback receive their own clone, never a shared mutable
//! reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Market Tick
// =============================================================================

/// One normalized market data observation for an instrument.
///
/// Invariant: `symbol` is non-empty and at least one of `bid`/`ask`/`last`
/// is non-zero. Adapters enforce this at decode time by dropping frames
/// that cannot produce a valid tick (see [`MarketTick::is_valid`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTick {
    /// Instrument identifier as the source venue reports it.
    pub symbol: String,
    /// Best bid price (0.0 when the source carries no bid).
    pub bid: f64,
    /// Best ask price (0.0 when the source carries no ask).
    pub ask: f64,
    /// Last traded price, or a derived mid for quote-only sources.
    pub last: f64,
    /// Traded volume associated with this observation (0.0 for quotes).
    pub volume: f64,
    /// Receipt time. Sources do not guarantee an exchange timestamp, so
    /// receipt time is the defined semantics for ordering and persistence.
    pub observed_at: DateTime<Utc>,
}

impl MarketTick {
    /// Create a tick observed now.
    #[must_use]
    pub fn new(symbol: impl Into<String>, bid: f64, ask: f64, last: f64, volume: f64) -> Self {
        Self {
            symbol: symbol.into(),
            bid,
            ask,
            last,
            volume,
            observed_at: Utc::now(),
        }
    }

    /// Check the tick invariant: non-empty symbol and at least one
    /// non-zero price among bid/ask/last.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.symbol.is_empty() && (self.bid != 0.0 || self.ask != 0.0 || self.last != 0.0)
    }

    /// Midpoint of bid/ask, or `None` when either side is missing.
    #[must_use]
    pub fn mid(&self) -> Option<f64> {
        if self.bid != 0.0 && self.ask != 0.0 {
            Some((self.bid + self.ask) / 2.0)
        } else {
            None
        }
    }
}

// =============================================================================
// Order Events
// =============================================================================

/// Lifecycle stage of an order event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEventKind {
    /// Order accepted by the venue.
    New,
    /// Order completely filled.
    Fill,
    /// Order partially filled.
    PartialFill,
    /// Order cancelled.
    Cancelled,
    /// Order expired.
    Expired,
    /// Order rejected by the venue.
    Rejected,
    /// Any event the model does not yet distinguish.
    Other,
}

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    /// Buy-side order.
    Buy,
    /// Sell-side order.
    Sell,
}

/// One normalized order/trade lifecycle event.
///
/// `raw` retains every source-specific field that is not yet modeled, for
/// forward compatibility with downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    /// Normalized event kind.
    pub kind: OrderEventKind,
    /// Venue order identifier (empty when the venue sends none).
    pub order_id: String,
    /// Instrument the order targets.
    pub symbol: String,
    /// Order direction, when the source reports one.
    pub side: Option<OrderSide>,
    /// Quantity filled by this event (0.0 for non-fill events).
    pub filled_qty: f64,
    /// Price filled at (0.0 for non-fill events).
    pub filled_price: f64,
    /// Unmodeled source fields, verbatim.
    pub raw: serde_json::Map<String, serde_json::Value>,
}

impl OrderEvent {
    /// Create an event with no fill details and an empty raw map.
    #[must_use]
    pub fn new(kind: OrderEventKind, order_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            kind,
            order_id: order_id.into(),
            symbol: symbol.into(),
            side: None,
            filled_qty: 0.0,
            filled_price: 0.0,
            raw: serde_json::Map::new(),
        }
    }

    /// Whether this event carries fill details.
    #[must_use]
    pub const fn is_fill(&self) -> bool {
        matches!(self.kind, OrderEventKind::Fill | OrderEventKind::PartialFill)
    }
}
