//! Market hub session.
//!
//! Server events `GatewayQuote` / `GatewayTrade` / `GatewayDepth`, each
//! with arguments `[contract_id, payload]`. Quotes become full ticks
//! (sink + quote callback); trade prints become last/volume ticks on the
//! trade callback only, so the sink is not double-fed for the same
//! instrument; depth updates are logged and dropped.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;

use crate::application::ports::{QuoteHandler, TickRecorder, TokenSource, TradeHandler};
use crate::domain::market::MarketTick;
use crate::domain::subscription::{Channel, SubscriptionKey, SubscriptionSet};
use crate::infrastructure::config::HubSettings;
use crate::infrastructure::dispatch::DispatchBridge;
use crate::infrastructure::lifecycle::{ReconnectConfig, SessionState};
use crate::infrastructure::metrics::{self, StreamKind};

use super::protocol::Invocation;
use super::{EventHandler, HubCore, HubError, ReplayFn};

const SUBSCRIBE_QUOTES: &str = "SubscribeContractQuotes";
const SUBSCRIBE_TRADES: &str = "SubscribeContractTrades";
const SUBSCRIBE_DEPTH: &str = "SubscribeContractMarketDepth";

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotePayload {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    best_bid: Option<f64>,
    #[serde(default)]
    best_ask: Option<f64>,
    #[serde(default)]
    last_price: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradePayload {
    #[serde(default)]
    symbol_id: Option<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

// =============================================================================
// Session
// =============================================================================

/// Supervised market hub connection with quote/trade/depth subscriptions.
pub struct MarketHubSession {
    core: HubCore,
    subscriptions: Arc<RwLock<SubscriptionSet>>,
    quote_handler: Arc<RwLock<Option<QuoteHandler>>>,
    trade_handler: Arc<RwLock<Option<TradeHandler>>>,
    sink: Arc<dyn TickRecorder>,
    bridge: Arc<DispatchBridge>,
}

impl MarketHubSession {
    /// Create a session against the market hub endpoint.
    #[must_use]
    pub fn new(
        settings: &HubSettings,
        token_source: Arc<dyn TokenSource>,
        reconnect: ReconnectConfig,
        sink: Arc<dyn TickRecorder>,
        bridge: Arc<DispatchBridge>,
    ) -> Self {
        Self {
            core: HubCore::new(settings.market_url.clone(), token_source, reconnect),
            subscriptions: Arc::new(RwLock::new(SubscriptionSet::new())),
            quote_handler: Arc::new(RwLock::new(None)),
            trade_handler: Arc::new(RwLock::new(None)),
            sink,
            bridge,
        }
    }

    /// Register the quote callback.
    pub fn on_quote(&self, handler: QuoteHandler) {
        *self.quote_handler.write() = Some(handler);
    }

    /// Register the trade-print callback.
    pub fn on_trade(&self, handler: TradeHandler) {
        *self.trade_handler.write() = Some(handler);
    }

    /// Observe lifecycle state transitions.
    #[must_use]
    pub fn state(&self) -> tokio::sync::watch::Receiver<SessionState> {
        self.core.state()
    }

    /// Start the supervised connection, subscribing each contract to
    /// quotes, trades and depth.
    ///
    /// # Errors
    ///
    /// [`HubError::InvalidConfig`] for an empty contract list, or
    /// [`HubError::MissingToken`] when the token source is empty.
    pub fn connect(&self, contract_ids: &[&str]) -> Result<(), HubError> {
        if contract_ids.is_empty() {
            return Err(HubError::InvalidConfig(
                "at least one contract id is required".to_string(),
            ));
        }

        {
            let mut subs = self.subscriptions.write();
            for id in contract_ids {
                let _ = subs.insert(SubscriptionKey::new(Channel::Quote, *id));
                let _ = subs.insert(SubscriptionKey::new(Channel::Trade, *id));
                let _ = subs.insert(SubscriptionKey::new(Channel::Depth, *id));
            }
            #[allow(clippy::cast_precision_loss)]
            metrics::set_subscriptions(StreamKind::HubMarket, subs.len() as f64);
        }

        let replay = replay_fn(Arc::clone(&self.subscriptions));
        let on_event = event_handler(
            Arc::clone(&self.quote_handler),
            Arc::clone(&self.trade_handler),
            Arc::clone(&self.sink),
            Arc::clone(&self.bridge),
        );
        self.core.connect(replay, on_event)
    }

    /// Subscribe a contract's quote channel. Idempotent.
    pub fn subscribe_quotes(&self, contract_id: &str) -> bool {
        self.subscribe_channel(Channel::Quote, SUBSCRIBE_QUOTES, contract_id)
    }

    /// Subscribe a contract's trade-print channel. Idempotent.
    pub fn subscribe_trades(&self, contract_id: &str) -> bool {
        self.subscribe_channel(Channel::Trade, SUBSCRIBE_TRADES, contract_id)
    }

    /// Subscribe a contract's depth channel. Idempotent.
    pub fn subscribe_depth(&self, contract_id: &str) -> bool {
        self.subscribe_channel(Channel::Depth, SUBSCRIBE_DEPTH, contract_id)
    }

    /// Stop the session and wait for the connection task to exit.
    pub async fn disconnect(&self) {
        self.core.disconnect().await;
    }

    fn subscribe_channel(&self, channel: Channel, target: &str, contract_id: &str) -> bool {
        let inserted = self
            .subscriptions
            .write()
            .insert(SubscriptionKey::new(channel, contract_id));
        if inserted {
            #[allow(clippy::cast_precision_loss)]
            metrics::set_subscriptions(
                StreamKind::HubMarket,
                self.subscriptions.read().len() as f64,
            );
            self.core
                .invoke(Invocation::new(target, vec![contract_id.into()]));
        }
        inserted
    }
}

// =============================================================================
// Event plumbing
// =============================================================================

fn replay_fn(subscriptions: Arc<RwLock<SubscriptionSet>>) -> ReplayFn {
    Arc::new(move || {
        let subs = subscriptions.read();
        let mut invocations = Vec::new();
        for (channel, target) in [
            (Channel::Quote, SUBSCRIBE_QUOTES),
            (Channel::Trade, SUBSCRIBE_TRADES),
            (Channel::Depth, SUBSCRIBE_DEPTH),
        ] {
            for id in subs.keys_on(channel) {
                invocations.push(Invocation::new(target, vec![id.into()]));
            }
        }
        invocations
    })
}

fn event_handler(
    quote_handler: Arc<RwLock<Option<QuoteHandler>>>,
    trade_handler: Arc<RwLock<Option<TradeHandler>>>,
    sink: Arc<dyn TickRecorder>,
    bridge: Arc<DispatchBridge>,
) -> EventHandler {
    Arc::new(move |target, args| match target {
        "GatewayQuote" => {
            if let Some(tick) = normalize_quote(args) {
                metrics::record_tick(StreamKind::HubMarket);

                let sink = Arc::clone(&sink);
                let record = tick.clone();
                tokio::spawn(async move {
                    sink.record(&record).await;
                });

                if let Some(handler) = quote_handler.read().clone() {
                    let _ = bridge.submit(move || handler(tick));
                }
            }
        }
        "GatewayTrade" => {
            for tick in normalize_trades(args) {
                metrics::record_tick(StreamKind::HubMarket);
                if let Some(handler) = trade_handler.read().clone() {
                    let _ = bridge.submit(move || handler(tick));
                }
            }
        }
        "GatewayDepth" => {
            tracing::debug!("depth update");
        }
        other => {
            tracing::trace!(target = other, "unhandled market hub event");
        }
    })
}

fn contract_id(args: &[Value]) -> Option<&str> {
    args.first().and_then(Value::as_str)
}

fn normalize_quote(args: &[Value]) -> Option<MarketTick> {
    let payload: QuotePayload = serde_json::from_value(args.get(1)?.clone()).ok()?;
    let symbol = payload
        .symbol
        .filter(|s| !s.is_empty())
        .or_else(|| contract_id(args).map(str::to_string))?;

    let tick = MarketTick {
        symbol,
        bid: payload.best_bid.unwrap_or(0.0),
        ask: payload.best_ask.unwrap_or(0.0),
        last: payload.last_price.unwrap_or(0.0),
        volume: payload.volume.unwrap_or(0.0),
        observed_at: Utc::now(),
    };
    tick.is_valid().then_some(tick)
}

/// Trade events may carry one payload object or a batch array.
fn normalize_trades(args: &[Value]) -> Vec<MarketTick> {
    let Some(payload) = args.get(1) else {
        return Vec::new();
    };

    let payloads: Vec<TradePayload> = match payload {
        Value::Array(_) => serde_json::from_value(payload.clone()).unwrap_or_default(),
        _ => serde_json::from_value::<TradePayload>(payload.clone())
            .map(|p| vec![p])
            .unwrap_or_default(),
    };

    let fallback = contract_id(args).map(str::to_string);
    payloads
        .into_iter()
        .filter_map(|p| {
            let symbol = p
                .symbol_id
                .filter(|s| !s.is_empty())
                .or_else(|| fallback.clone())?;
            let tick = MarketTick {
                symbol,
                bid: 0.0,
                ask: 0.0,
                last: p.price.unwrap_or(0.0),
                volume: p.volume.unwrap_or(0.0),
                observed_at: Utc::now(),
            };
            tick.is_valid().then_some(tick)
        })
        .collect()
}
