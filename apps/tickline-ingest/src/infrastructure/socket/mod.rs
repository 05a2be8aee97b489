//! Raw Socket Adapter
//!
//! Tick feed over an authenticated WebSocket. The protocol is minimal: the
//! client sends one subscribe frame carrying its credential and the full
//! symbol snapshot, then receives one JSON object per text frame. An
//! application-level `{"action":"ping"}` every 20 seconds keeps
//! intermediaries from idling out the connection.
//!
//! The session runs under the lifecycle supervisor; each reconnect replays
//! the current subscription snapshot in the handshake frame.

mod messages;

pub use messages::{InboundFrame, PingFrame, SubscribeFrame, TickerFrame};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message;

use crate::application::ports::{QuoteHandler, TickRecorder};
use crate::domain::market::MarketTick;
use crate::domain::subscription::{Channel, SubscriptionKey, SubscriptionSet};
use crate::infrastructure::config::{SocketSettings, validate_ws_url};
use crate::infrastructure::dispatch::DispatchBridge;
use crate::infrastructure::lifecycle::{ReconnectConfig, SessionState, Supervisor};
use crate::infrastructure::metrics::{self, StreamKind};

/// Interval between application-level pings.
const PING_INTERVAL: Duration = Duration::from_secs(20);

// =============================================================================
// Error Type
// =============================================================================

/// Errors from the socket session.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// Fatal configuration problem, surfaced from `connect()`.
    #[error("invalid socket configuration: {0}")]
    InvalidConfig(String),

    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame serialization failed.
    #[error("frame encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Server closed the connection.
    #[error("connection closed by server")]
    ConnectionClosed,
}

// =============================================================================
// Session
// =============================================================================

/// One supervised socket connection with its subscription state.
pub struct SocketSession {
    settings: SocketSettings,
    supervisor: Supervisor,
    subscriptions: Arc<RwLock<SubscriptionSet>>,
    resubscribe: Arc<Notify>,
    quote_handler: Arc<RwLock<Option<QuoteHandler>>>,
    sink: Arc<dyn TickRecorder>,
    bridge: Arc<DispatchBridge>,
}

impl SocketSession {
    /// Create a session. No connection is made until [`SocketSession::connect`].
    #[must_use]
    pub fn new(
        settings: SocketSettings,
        reconnect: ReconnectConfig,
        sink: Arc<dyn TickRecorder>,
        bridge: Arc<DispatchBridge>,
    ) -> Self {
        Self {
            settings,
            supervisor: Supervisor::new(reconnect),
            subscriptions: Arc::new(RwLock::new(SubscriptionSet::new())),
            resubscribe: Arc::new(Notify::new()),
            quote_handler: Arc::new(RwLock::new(None)),
            sink,
            bridge,
        }
    }

    /// Register the quote callback. Replaces any previous handler.
    pub fn on_quote(&self, handler: QuoteHandler) {
        *self.quote_handler.write() = Some(handler);
    }

    /// Observe lifecycle state transitions.
    #[must_use]
    pub fn state(&self) -> tokio::sync::watch::Receiver<SessionState> {
        self.supervisor.state()
    }

    /// Start the supervised connection for the given symbols.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::InvalidConfig`] for an empty symbol list, an
    /// empty symbol, a missing credential, or a malformed stream URL.
    /// Transport failures are not surfaced here; the supervisor retries
    /// them.
    pub fn connect(&self, symbols: &[&str]) -> Result<(), SocketError> {
        if symbols.is_empty() {
            return Err(SocketError::InvalidConfig(
                "at least one symbol is required".to_string(),
            ));
        }
        if symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(SocketError::InvalidConfig("empty symbol".to_string()));
        }
        if self.settings.api_key.is_empty() {
            return Err(SocketError::InvalidConfig("missing API key".to_string()));
        }
        validate_ws_url(&self.settings.url).map_err(SocketError::InvalidConfig)?;

        {
            let mut subs = self.subscriptions.write();
            for symbol in symbols {
                let _ = subs.insert(SubscriptionKey::new(Channel::Quote, *symbol));
            }
            #[allow(clippy::cast_precision_loss)]
            metrics::set_subscriptions(StreamKind::Socket, subs.len() as f64);
        }

        let settings = self.settings.clone();
        let subscriptions = Arc::clone(&self.subscriptions);
        let resubscribe = Arc::clone(&self.resubscribe);
        let quote_handler = Arc::clone(&self.quote_handler);
        let sink = Arc::clone(&self.sink);
        let bridge = Arc::clone(&self.bridge);

        self.supervisor.start(move |ctx| {
            run_attempt(
                ctx,
                settings.clone(),
                Arc::clone(&subscriptions),
                Arc::clone(&resubscribe),
                Arc::clone(&quote_handler),
                Arc::clone(&sink),
                Arc::clone(&bridge),
            )
        });

        Ok(())
    }

    /// Add a quote subscription.
    ///
    /// Idempotent: returns `false` and sends nothing if the symbol is
    /// already tracked. A new symbol triggers a fresh subscribe frame on a
    /// live connection; across a reconnect the snapshot replay covers it.
    pub fn subscribe(&self, symbol: &str) -> bool {
        let inserted = self
            .subscriptions
            .write()
            .insert(SubscriptionKey::new(Channel::Quote, symbol));
        if inserted {
            #[allow(clippy::cast_precision_loss)]
            metrics::set_subscriptions(StreamKind::Socket, self.subscriptions.read().len() as f64);
            self.resubscribe.notify_one();
        }
        inserted
    }

    /// Stop the session and wait for the connection task to exit.
    pub async fn disconnect(&self) {
        self.supervisor.stop().await;
    }
}

// =============================================================================
// Per-attempt connection loop
// =============================================================================

#[allow(clippy::too_many_lines)]
async fn run_attempt(
    ctx: crate::infrastructure::lifecycle::AttemptContext,
    settings: SocketSettings,
    subscriptions: Arc<RwLock<SubscriptionSet>>,
    resubscribe: Arc<Notify>,
    quote_handler: Arc<RwLock<Option<QuoteHandler>>>,
    sink: Arc<dyn TickRecorder>,
    bridge: Arc<DispatchBridge>,
) -> Result<(), SocketError> {
    tracing::info!(url = %settings.url, "connecting to socket stream");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(&settings.url).await?;
    let (mut write, mut read) = ws_stream.split();

    send_subscribe(&mut write, &settings, &subscriptions).await?;
    ctx.mark_connected();
    tracing::info!("socket stream connected");

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; consume it so pings start one
    // interval after connect.
    ping_interval.tick().await;

    loop {
        tokio::select! {
            () = ctx.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = ping_interval.tick() => {
                let ping = serde_json::to_string(&PingFrame::new())?;
                write.send(Message::Text(ping.into())).await?;
            }
            () = resubscribe.notified() => {
                send_subscribe(&mut write, &settings, &subscriptions).await?;
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, &subscriptions, &quote_handler, &sink, &bridge);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("server sent close frame");
                        return Err(SocketError::ConnectionClosed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        tracing::info!("socket stream ended");
                        return Err(SocketError::ConnectionClosed);
                    }
                }
            }
        }
    }
}

async fn send_subscribe<W>(
    write: &mut W,
    settings: &SocketSettings,
    subscriptions: &RwLock<SubscriptionSet>,
) -> Result<(), SocketError>
where
    W: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let symbols = subscriptions.read().keys_on(Channel::Quote);
    let frame = SubscribeFrame::new(settings.api_key.expose().to_string(), symbols);
    let json = serde_json::to_string(&frame)?;

    tracing::debug!("sending subscribe frame");
    write.send(Message::Text(json.into())).await?;
    Ok(())
}

/// Decode one inbound text frame and fan out the tick.
///
/// Malformed JSON and frames that fail tick validation are dropped; the
/// read loop never ends on bad data.
fn handle_frame(
    text: &str,
    subscriptions: &RwLock<SubscriptionSet>,
    quote_handler: &RwLock<Option<QuoteHandler>>,
    sink: &Arc<dyn TickRecorder>,
    bridge: &DispatchBridge,
) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed socket frame");
            return;
        }
    };

    let InboundFrame::Ticker(ticker) = frame else {
        return;
    };

    let Some(tick) = normalize_ticker(ticker, subscriptions) else {
        return;
    };

    metrics::record_tick(StreamKind::Socket);

    let sink = Arc::clone(sink);
    let record = tick.clone();
    tokio::spawn(async move {
        sink.record(&record).await;
    });

    if let Some(handler) = quote_handler.read().clone() {
        let _ = bridge.submit(move || handler(tick));
    }
}

/// Build a validated tick from a ticker frame.
///
/// A frame without a symbol is attributed to the single subscribed symbol
/// when exactly one is tracked; with zero or several subscriptions the
/// attribution is ambiguous and the frame is dropped.
fn normalize_ticker(
    ticker: TickerFrame,
    subscriptions: &RwLock<SubscriptionSet>,
) -> Option<MarketTick> {
    let symbol = match ticker.symbol {
        Some(symbol) if !symbol.is_empty() => symbol,
        _ => {
            let subscribed = subscriptions.read().keys_on(Channel::Quote);
            if subscribed.len() == 1 {
                subscribed.into_iter().next()?
            } else {
                tracing::debug!(
                    subscribed = subscribed.len(),
                    "dropping symbol-less ticker frame"
                );
                return None;
            }
        }
    };

    let tick = MarketTick {
        symbol,
        bid: ticker.bid.unwrap_or(0.0),
        ask: ticker.ask.unwrap_or(0.0),
        last: ticker.last.unwrap_or(0.0),
        volume: ticker.vol.unwrap_or(0.0),
        observed_at: Utc::now(),
    };

    tick.is_valid().then_some(tick)
}
