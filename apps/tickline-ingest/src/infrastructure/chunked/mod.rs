//! Chunked HTTP Adapter
//!
//! Long-lived streaming GET over `reqwest`. The server emits one JSON
//! object per newline; chunk boundaries fall anywhere, so lines are
//! reassembled by [`LineBuffer`] before decoding. Price lines become mid
//! ticks, `TRANSACTION` envelopes carrying one of the four watched
//! transaction kinds become order events, and everything else is
//! filtered at the decode layer.
//!
//! Subscription keys are encoded into the request URL, so a `subscribe()`
//! while connected takes effect at the next (re)connect rather than
//! immediately.

mod messages;

pub use messages::{
    HeartbeatMessage, PriceLevel, PriceMessage, StreamLine, TransactionEnvelope,
    TransactionLine, TransactionMessage,
};

use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use parking_lot::RwLock;

use crate::application::ports::{OrderHandler, QuoteHandler, TickRecorder};
use crate::domain::market::{MarketTick, OrderEventKind};
use crate::domain::subscription::{Channel, SubscriptionKey, SubscriptionSet};
use crate::infrastructure::config::{ChunkedSettings, validate_http_url};
use crate::infrastructure::dispatch::DispatchBridge;
use crate::infrastructure::lifecycle::{ReconnectConfig, SessionState, Supervisor};
use crate::infrastructure::metrics::{self, StreamKind};

// =============================================================================
// Error Type
// =============================================================================

/// Errors from the chunked session.
#[derive(Debug, thiserror::Error)]
pub enum ChunkedError {
    /// Fatal configuration problem, surfaced from `connect()`.
    #[error("invalid chunked-stream configuration: {0}")]
    InvalidConfig(String),

    /// HTTP transport error (connect, status, or mid-stream).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server ended the stream. Treated as a connection error so the
    /// supervisor re-establishes it.
    #[error("stream ended by server")]
    StreamEnded,
}

// =============================================================================
// Line reassembly
// =============================================================================

/// Incremental newline framing over arbitrary chunk boundaries.
///
/// Bytes are buffered until a `\n` arrives; only complete lines are
/// released. Operates on bytes so a UTF-8 sequence split across chunks
/// is never corrupted.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return any lines it completed.
    ///
    /// Blank lines are dropped; trailing `\r` is stripped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.trim_end_matches('\r').trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Bytes held without a terminating newline.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

// =============================================================================
// Session
// =============================================================================

/// One supervised chunked-stream connection.
pub struct ChunkedSession {
    settings: ChunkedSettings,
    client: reqwest::Client,
    supervisor: Supervisor,
    subscriptions: Arc<RwLock<SubscriptionSet>>,
    quote_handler: Arc<RwLock<Option<QuoteHandler>>>,
    order_handler: Arc<RwLock<Option<OrderHandler>>>,
    sink: Arc<dyn TickRecorder>,
    bridge: Arc<DispatchBridge>,
}

impl ChunkedSession {
    /// Create a session. No connection is made until [`ChunkedSession::connect`].
    #[must_use]
    pub fn new(
        settings: ChunkedSettings,
        reconnect: ReconnectConfig,
        sink: Arc<dyn TickRecorder>,
        bridge: Arc<DispatchBridge>,
    ) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
            supervisor: Supervisor::new(reconnect),
            subscriptions: Arc::new(RwLock::new(SubscriptionSet::new())),
            quote_handler: Arc::new(RwLock::new(None)),
            order_handler: Arc::new(RwLock::new(None)),
            sink,
            bridge,
        }
    }

    /// Register the quote callback.
    pub fn on_quote(&self, handler: QuoteHandler) {
        *self.quote_handler.write() = Some(handler);
    }

    /// Register the order-event callback.
    pub fn on_order(&self, handler: OrderHandler) {
        *self.order_handler.write() = Some(handler);
    }

    /// Observe lifecycle state transitions.
    #[must_use]
    pub fn state(&self) -> tokio::sync::watch::Receiver<SessionState> {
        self.supervisor.state()
    }

    /// Start the supervised stream for the given instruments.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkedError::InvalidConfig`] for an empty instrument
    /// list, a missing bearer token, or a malformed stream URL.
    pub fn connect(&self, instruments: &[&str]) -> Result<(), ChunkedError> {
        if instruments.is_empty() {
            return Err(ChunkedError::InvalidConfig(
                "at least one instrument is required".to_string(),
            ));
        }
        if self.settings.token.is_empty() {
            return Err(ChunkedError::InvalidConfig(
                "missing bearer token".to_string(),
            ));
        }
        validate_http_url(&self.settings.url).map_err(ChunkedError::InvalidConfig)?;

        {
            let mut subs = self.subscriptions.write();
            for instrument in instruments {
                let _ = subs.insert(SubscriptionKey::new(Channel::Quote, *instrument));
            }
            #[allow(clippy::cast_precision_loss)]
            metrics::set_subscriptions(StreamKind::Chunked, subs.len() as f64);
        }

        let settings = self.settings.clone();
        let client = self.client.clone();
        let subscriptions = Arc::clone(&self.subscriptions);
        let quote_handler = Arc::clone(&self.quote_handler);
        let order_handler = Arc::clone(&self.order_handler);
        let sink = Arc::clone(&self.sink);
        let bridge = Arc::clone(&self.bridge);

        self.supervisor.start(move |ctx| {
            run_attempt(
                ctx,
                settings.clone(),
                client.clone(),
                Arc::clone(&subscriptions),
                Arc::clone(&quote_handler),
                Arc::clone(&order_handler),
                Arc::clone(&sink),
                Arc::clone(&bridge),
            )
        });

        Ok(())
    }

    /// Add an instrument subscription.
    ///
    /// Idempotent. The instrument list is baked into the request URL, so
    /// a new key takes effect at the next reconnect.
    pub fn subscribe(&self, instrument: &str) -> bool {
        let inserted = self
            .subscriptions
            .write()
            .insert(SubscriptionKey::new(Channel::Quote, instrument));
        if inserted {
            #[allow(clippy::cast_precision_loss)]
            metrics::set_subscriptions(StreamKind::Chunked, self.subscriptions.read().len() as f64);
            tracing::info!(instrument, "instrument added, effective at next reconnect");
        }
        inserted
    }

    /// Stop the session and wait for the stream task to exit.
    pub async fn disconnect(&self) {
        self.supervisor.stop().await;
    }
}

// =============================================================================
// Per-attempt stream loop
// =============================================================================

#[allow(clippy::too_many_arguments)]
async fn run_attempt(
    ctx: crate::infrastructure::lifecycle::AttemptContext,
    settings: ChunkedSettings,
    client: reqwest::Client,
    subscriptions: Arc<RwLock<SubscriptionSet>>,
    quote_handler: Arc<RwLock<Option<QuoteHandler>>>,
    order_handler: Arc<RwLock<Option<OrderHandler>>>,
    sink: Arc<dyn TickRecorder>,
    bridge: Arc<DispatchBridge>,
) -> Result<(), ChunkedError> {
    let instruments = subscriptions.read().keys_on(Channel::Quote).join(",");
    tracing::info!(url = %settings.url, %instruments, "connecting to chunked stream");

    // Response scoped to this function: every exit path releases the
    // connection.
    let response = client
        .get(&settings.url)
        .query(&[("instruments", instruments.as_str())])
        .bearer_auth(settings.token.expose())
        .send()
        .await?
        .error_for_status()?;

    ctx.mark_connected();
    tracing::info!("chunked stream connected");

    let mut stream = response.bytes_stream();
    let mut buffer = LineBuffer::new();

    loop {
        tokio::select! {
            () = ctx.cancelled() => return Ok(()),
            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        for line in buffer.push(&bytes) {
                            handle_line(&line, &quote_handler, &order_handler, &sink, &bridge);
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        tracing::info!("chunked stream ended");
                        return Err(ChunkedError::StreamEnded);
                    }
                }
            }
        }
    }
}

/// Decode one stream line and fan out the result.
///
/// Malformed lines are skipped so one bad record never costs a reconnect.
fn handle_line(
    line: &str,
    quote_handler: &RwLock<Option<QuoteHandler>>,
    order_handler: &RwLock<Option<OrderHandler>>,
    sink: &Arc<dyn TickRecorder>,
    bridge: &DispatchBridge,
) {
    let decoded: StreamLine = match serde_json::from_str(line) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed stream line");
            return;
        }
    };

    match decoded {
        StreamLine::Heartbeat(hb) => {
            tracing::debug!(
                time = hb.time.as_deref().unwrap_or(""),
                cursor = hb.last_transaction_id.as_deref().unwrap_or(""),
                "stream heartbeat"
            );
        }
        StreamLine::Price(price) => {
            if let Some(tick) = normalize_price(&price) {
                metrics::record_tick(StreamKind::Chunked);

                let sink = Arc::clone(sink);
                let record = tick.clone();
                tokio::spawn(async move {
                    sink.record(&record).await;
                });

                if let Some(handler) = quote_handler.read().clone() {
                    let _ = bridge.submit(move || handler(tick));
                }
            }
        }
        StreamLine::Transaction(envelope) => match envelope.transaction {
            TransactionLine::OrderFill(tx) => {
                emit_order(tx, OrderEventKind::Fill, order_handler, bridge);
            }
            TransactionLine::MarketOrder(tx) | TransactionLine::LimitOrder(tx) => {
                emit_order(tx, OrderEventKind::New, order_handler, bridge);
            }
            TransactionLine::OrderCancel(tx) => {
                emit_order(tx, OrderEventKind::Cancelled, order_handler, bridge);
            }
            TransactionLine::Unwatched => {}
        },
        StreamLine::Unknown => {}
    }
}

/// Mid-price tick from a price line, or `None` for a one-sided book.
fn normalize_price(price: &PriceMessage) -> Option<MarketTick> {
    let (bid, ask) = price.top_of_book()?;
    let tick = MarketTick {
        symbol: price.instrument.clone(),
        bid,
        ask,
        last: f64::midpoint(bid, ask),
        volume: 0.0,
        observed_at: Utc::now(),
    };
    tick.is_valid().then_some(tick)
}

fn emit_order(
    tx: TransactionMessage,
    kind: OrderEventKind,
    order_handler: &RwLock<Option<OrderHandler>>,
    bridge: &DispatchBridge,
) {
    metrics::record_order_event(StreamKind::Chunked);
    let event = tx.into_order_event(kind);
    tracing::debug!(kind = ?event.kind, order_id = %event.order_id, "order event");

    if let Some(handler) = order_handler.read().clone() {
        let _ = bridge.submit(move || handler(event));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use crate::application::ports::NullRecorder;
    use crate::domain::market::OrderEvent;
    use crate::infrastructure::config::SecretString;

    use super::*;

    struct Harness {
        quote_handler: Arc<RwLock<Option<QuoteHandler>>>,
        order_handler: Arc<RwLock<Option<OrderHandler>>>,
        sink: Arc<dyn TickRecorder>,
        bridge: Arc<DispatchBridge>,
        ticks: Arc<Mutex<Vec<MarketTick>>>,
        orders: Arc<Mutex<Vec<OrderEvent>>>,
    }

    impl Harness {
        fn new() -> (Self, crate::infrastructure::dispatch::DispatchQueue) {
            let ticks = Arc::new(Mutex::new(Vec::new()));
            let orders = Arc::new(Mutex::new(Vec::new()));
            let bridge = Arc::new(DispatchBridge::new());
            let queue = bridge.register();

            let tick_log = Arc::clone(&ticks);
            let order_log = Arc::clone(&orders);
            let harness = Self {
                quote_handler: Arc::new(RwLock::new(Some(Arc::new(move |tick| {
                    tick_log.lock().push(tick);
                }) as QuoteHandler))),
                order_handler: Arc::new(RwLock::new(Some(Arc::new(move |event| {
                    order_log.lock().push(event);
                }) as OrderHandler))),
                sink: Arc::new(NullRecorder),
                bridge,
                ticks,
                orders,
            };
            (harness, queue)
        }

        fn feed(&self, line: &str) {
            handle_line(
                line,
                &self.quote_handler,
                &self.order_handler,
                &self.sink,
                &self.bridge,
            );
        }
    }

    #[test]
    fn line_buffer_reassembles_across_chunks() {
        let mut buffer = LineBuffer::new();

        assert!(buffer.push(b"{\"type\":\"HEART").is_empty());
        let lines = buffer.push(b"BEAT\"}\n{\"type\":\"PRICE\"}\n{\"par");
        assert_eq!(lines, vec![r#"{"type":"HEARTBEAT"}"#, r#"{"type":"PRICE"}"#]);
        assert_eq!(buffer.pending(), 6);

        let lines = buffer.push(b"tial\":1}\r\n");
        assert_eq!(lines, vec![r#"{"partial":1}"#]);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn line_buffer_drops_blank_lines() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"\n\r\n  \n").is_empty());
    }

    #[test]
    fn mid_price_is_exact() {
        let price: PriceMessage = serde_json::from_str(
            r#"{"instrument":"XAU_USD","bids":[{"price":"1900.10"}],"asks":[{"price":"1900.50"}]}"#,
        )
        .unwrap();
        let tick = normalize_price(&price).unwrap();
        assert!((tick.last - 1900.30).abs() < 1e-9);
        assert_eq!(tick.bid, 1900.10);
        assert_eq!(tick.ask, 1900.50);
    }

    #[tokio::test]
    async fn empty_asks_produce_no_tick() {
        let (harness, mut queue) = Harness::new();
        harness.feed(r#"{"type":"PRICE","instrument":"EUR_USD","bids":[{"price":"1.1"}],"asks":[]}"#);

        assert!(!queue.run_one());
        assert!(harness.ticks.lock().is_empty());
    }

    #[tokio::test]
    async fn transaction_allow_list_is_enforced() {
        let (harness, mut queue) = Harness::new();

        harness.feed(
            r#"{"type":"TRANSACTION","transaction":{"type":"ORDER_FILL","id":"1","orderID":"9","units":"10","price":"1.2"}}"#,
        );
        harness.feed(r#"{"type":"TRANSACTION","transaction":{"type":"MARKET_ORDER","id":"2","units":"10"}}"#);
        harness.feed(r#"{"type":"TRANSACTION","transaction":{"type":"LIMIT_ORDER","id":"3","units":"-5"}}"#);
        harness.feed(r#"{"type":"TRANSACTION","transaction":{"type":"ORDER_CANCEL","id":"4","orderID":"2"}}"#);
        harness.feed(r#"{"type":"TRANSACTION","transaction":{"type":"ORDER_REJECT","id":"5"}}"#);
        harness.feed(r#"{"type":"TRANSACTION","transaction":{"type":"TRADE_CLOSE","id":"6"}}"#);

        while queue.run_one() {}

        let orders = harness.orders.lock();
        assert_eq!(orders.len(), 4);
        assert_eq!(orders[0].kind, OrderEventKind::Fill);
        assert_eq!(orders[1].kind, OrderEventKind::New);
        assert_eq!(orders[2].kind, OrderEventKind::New);
        assert_eq!(orders[3].kind, OrderEventKind::Cancelled);
    }

    #[tokio::test]
    async fn bare_transaction_kinds_outside_an_envelope_are_ignored() {
        let (harness, mut queue) = Harness::new();
        harness.feed(r#"{"type":"ORDER_FILL","id":"1","orderID":"9","units":"10","price":"1.2"}"#);

        assert!(!queue.run_one());
        assert!(harness.orders.lock().is_empty());
    }

    #[tokio::test]
    async fn malformed_line_is_skipped() {
        let (harness, mut queue) = Harness::new();
        harness.feed("{truncated");
        harness.feed(r#"{"type":"PRICE","instrument":"EUR_USD","bids":[{"price":"1.1"}],"asks":[{"price":"1.2"}]}"#);

        assert!(queue.run_one());
        assert_eq!(harness.ticks.lock().len(), 1);
    }

    #[tokio::test]
    async fn heartbeat_produces_nothing() {
        let (harness, mut queue) = Harness::new();
        harness.feed(r#"{"type":"HEARTBEAT","time":"t","lastTransactionID":"1"}"#);
        assert!(!queue.run_one());
        assert!(harness.ticks.lock().is_empty());
        assert!(harness.orders.lock().is_empty());
    }

    #[tokio::test]
    async fn connect_rejects_malformed_url() {
        for url in ["::not-a-url::", "ws://127.0.0.1:1/stream"] {
            let session = ChunkedSession::new(
                ChunkedSettings {
                    url: url.to_string(),
                    token: SecretString::new("tok".to_string()),
                },
                ReconnectConfig::default(),
                Arc::new(NullRecorder),
                Arc::new(DispatchBridge::new()),
            );
            assert!(
                matches!(
                    session.connect(&["EUR_USD"]),
                    Err(ChunkedError::InvalidConfig(_))
                ),
                "{url}"
            );
        }
    }

    #[tokio::test]
    async fn connect_rejects_missing_token() {
        let session = ChunkedSession::new(
            ChunkedSettings {
                url: "http://127.0.0.1:1/stream".to_string(),
                token: SecretString::new(String::new()),
            },
            ReconnectConfig::default(),
            Arc::new(NullRecorder),
            Arc::new(DispatchBridge::new()),
        );
        assert!(matches!(
            session.connect(&["EUR_USD"]),
            Err(ChunkedError::InvalidConfig(_))
        ));

        let _ = session.subscribe("EUR_USD");

        let counter = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&counter);
        session.on_quote(Arc::new(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
