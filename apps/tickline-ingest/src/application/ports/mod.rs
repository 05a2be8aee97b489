//! Port Interfaces
//!
//! ## Driven Ports (Outbound)
//!
//! - [`TickRecorder`]: best-effort persistence of normalized ticks. The
//!   contract is deliberately infallible from the caller's point of view:
//!   implementations log and swallow their own failures so an adapter's
//!   read loop never observes a sink outage.
//! - [`TokenSource`]: read-only accessor for a rotating bearer token.
//!   Authentication/refresh is an external collaborator; adapters read the
//!   token lazily per connection attempt and never cache it beyond one
//!   connection's lifetime.
//!
//! ## Callback Slots (Inbound)
//!
//! Sessions accept shared handlers for quote, trade, and order events.
//! Handlers run on the primary context via the dispatch bridge, so they
//! must be `Send + Sync`; a handler that panics is contained at the bridge.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::domain::market::{MarketTick, OrderEvent};

/// Best-effort sink for normalized ticks.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TickRecorder: Send + Sync {
    /// Record one tick. Never fails from the caller's perspective;
    /// implementations handle and log their own errors.
    async fn record(&self, tick: &MarketTick);
}

/// Read-only accessor for the current bearer token.
pub trait TokenSource: Send + Sync {
    /// The token to present on the next connection attempt, if any.
    fn current_token(&self) -> Option<String>;
}

/// A fixed token, for venues whose credential does not rotate and for tests.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    fn current_token(&self) -> Option<String> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.0.clone())
        }
    }
}

/// Handler for normalized quote ticks.
pub type QuoteHandler = Arc<dyn Fn(MarketTick) + Send + Sync>;

/// Handler for normalized trade ticks.
pub type TradeHandler = Arc<dyn Fn(MarketTick) + Send + Sync>;

/// Handler for normalized order events.
pub type OrderHandler = Arc<dyn Fn(OrderEvent) + Send + Sync>;

/// A recorder that drops everything, for sessions run without a sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecorder;

#[async_trait]
impl TickRecorder for NullRecorder {
    async fn record(&self, _tick: &MarketTick) {}
}
