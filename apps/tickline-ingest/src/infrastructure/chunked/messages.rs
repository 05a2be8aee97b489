//! Wire types for the chunked streaming feed.
//!
//! Each line is a JSON object discriminated by its `type` field. Order
//! activity arrives wrapped: a `TRANSACTION` line carries the actual
//! record under a `transaction` key, and that inner object's own `type`
//! names the kind. Price levels arrive as decimal strings; we parse to
//! `f64` at the boundary. Transaction kinds outside the four watched
//! here decode to `Unwatched` and are skipped.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::market::{OrderEvent, OrderEventKind, OrderSide};

/// One line of the stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StreamLine {
    /// Liveness marker, carries the transaction cursor.
    #[serde(rename = "HEARTBEAT")]
    Heartbeat(HeartbeatMessage),
    /// Top-of-book price update.
    #[serde(rename = "PRICE")]
    Price(PriceMessage),
    /// Envelope around one account transaction.
    #[serde(rename = "TRANSACTION")]
    Transaction(TransactionEnvelope),
    /// Everything else on the stream is out of scope.
    #[serde(other)]
    Unknown,
}

/// `TRANSACTION` payload: the record itself sits under `transaction`.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionEnvelope {
    /// The wrapped transaction record.
    pub transaction: TransactionLine,
}

/// The watched transaction kinds, discriminated by the inner `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum TransactionLine {
    /// An order was filled.
    #[serde(rename = "ORDER_FILL")]
    OrderFill(TransactionMessage),
    /// A market order was accepted.
    #[serde(rename = "MARKET_ORDER")]
    MarketOrder(TransactionMessage),
    /// A limit order was accepted.
    #[serde(rename = "LIMIT_ORDER")]
    LimitOrder(TransactionMessage),
    /// An order was cancelled.
    #[serde(rename = "ORDER_CANCEL")]
    OrderCancel(TransactionMessage),
    /// Any transaction kind outside the watched set.
    #[serde(other)]
    Unwatched,
}

/// `HEARTBEAT` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HeartbeatMessage {
    /// Server timestamp.
    #[serde(default)]
    pub time: Option<String>,
    /// Cursor of the last transaction seen by the server.
    #[serde(default, rename = "lastTransactionID")]
    pub last_transaction_id: Option<String>,
}

/// `PRICE` payload: best-first ladders per side.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceMessage {
    /// Instrument name.
    pub instrument: String,
    /// Bid ladder, best first.
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    /// Ask ladder, best first.
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

/// One ladder level.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceLevel {
    /// Decimal string price.
    pub price: String,
}

impl PriceMessage {
    /// Best bid and ask as floats, if both sides have a level that parses.
    ///
    /// An empty side (or an unparseable level) yields `None`: a one-sided
    /// book must not produce a partial tick.
    #[must_use]
    pub fn top_of_book(&self) -> Option<(f64, f64)> {
        let bid = self.bids.first()?.price.parse::<f64>().ok()?;
        let ask = self.asks.first()?.price.parse::<f64>().ok()?;
        Some((bid, ask))
    }
}

/// Common shape of the modeled transaction kinds. Fields the model does
/// not name are retained in `raw` for downstream consumers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionMessage {
    /// Transaction id.
    #[serde(default)]
    pub id: Option<String>,
    /// Id of the order this transaction refers to, when distinct.
    #[serde(default, rename = "orderID")]
    pub order_id: Option<String>,
    /// Instrument name.
    #[serde(default)]
    pub instrument: Option<String>,
    /// Signed unit count; positive buys, negative sells.
    #[serde(default)]
    pub units: Option<String>,
    /// Fill or order price.
    #[serde(default)]
    pub price: Option<String>,
    /// Source fields not modeled above.
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

impl TransactionMessage {
    /// Normalize into an [`OrderEvent`] of the given kind.
    #[must_use]
    pub fn into_order_event(self, kind: OrderEventKind) -> OrderEvent {
        let units = self
            .units
            .as_deref()
            .and_then(|u| u.parse::<f64>().ok())
            .unwrap_or(0.0);
        let side = if units > 0.0 {
            Some(OrderSide::Buy)
        } else if units < 0.0 {
            Some(OrderSide::Sell)
        } else {
            None
        };

        OrderEvent {
            kind,
            order_id: self.order_id.or(self.id).unwrap_or_default(),
            symbol: self.instrument.unwrap_or_default(),
            side,
            filled_qty: units.abs(),
            filled_price: self
                .price
                .as_deref()
                .and_then(|p| p.parse::<f64>().ok())
                .unwrap_or(0.0),
            raw: self.raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_line_decodes() {
        let line: StreamLine = serde_json::from_str(
            r#"{"type":"HEARTBEAT","time":"2026-08-29T12:00:00Z","lastTransactionID":"42"}"#,
        )
        .unwrap();
        let StreamLine::Heartbeat(hb) = line else {
            panic!("expected heartbeat");
        };
        assert_eq!(hb.last_transaction_id.as_deref(), Some("42"));
    }

    #[test]
    fn price_top_of_book_takes_best_level() {
        let msg: PriceMessage = serde_json::from_str(
            r#"{"instrument":"EUR_USD",
                "bids":[{"price":"1.1000"},{"price":"1.0999"}],
                "asks":[{"price":"1.1002"},{"price":"1.1003"}]}"#,
        )
        .unwrap();
        assert_eq!(msg.top_of_book(), Some((1.1, 1.1002)));
    }

    #[test]
    fn price_with_empty_side_has_no_top() {
        let msg: PriceMessage =
            serde_json::from_str(r#"{"instrument":"EUR_USD","bids":[{"price":"1.1"}],"asks":[]}"#)
                .unwrap();
        assert!(msg.top_of_book().is_none());
    }

    #[test]
    fn unwatched_transaction_kinds_decode_but_carry_nothing() {
        for raw in [
            r#"{"type":"TRANSACTION","transaction":{"type":"ORDER_REJECT","id":"7"}}"#,
            r#"{"type":"TRANSACTION","transaction":{"type":"TAKE_PROFIT_ORDER","id":"8"}}"#,
            r#"{"type":"TRANSACTION","transaction":{"type":"CLIENT_CONFIGURE","id":"9"}}"#,
        ] {
            let line: StreamLine = serde_json::from_str(raw).unwrap();
            let StreamLine::Transaction(envelope) = line else {
                panic!("expected transaction envelope: {raw}");
            };
            assert!(matches!(envelope.transaction, TransactionLine::Unwatched), "{raw}");
        }
    }

    #[test]
    fn unrecognized_top_level_types_are_unknown() {
        for raw in [
            r#"{"type":"STATUS","id":"7"}"#,
            r#"{"type":"ORDER_FILL","id":"8"}"#,
        ] {
            let line: StreamLine = serde_json::from_str(raw).unwrap();
            assert!(matches!(line, StreamLine::Unknown), "{raw}");
        }
    }

    #[test]
    fn fill_transaction_normalizes() {
        let line: StreamLine = serde_json::from_str(
            r#"{"type":"TRANSACTION","transaction":
                {"type":"ORDER_FILL","id":"101","orderID":"95","instrument":"EUR_USD",
                 "units":"-250","price":"1.1002","reason":"MARKET_ORDER"}}"#,
        )
        .unwrap();
        let StreamLine::Transaction(TransactionEnvelope {
            transaction: TransactionLine::OrderFill(tx),
        }) = line
        else {
            panic!("expected fill");
        };

        let event = tx.into_order_event(OrderEventKind::Fill);
        assert_eq!(event.kind, OrderEventKind::Fill);
        assert_eq!(event.order_id, "95");
        assert_eq!(event.symbol, "EUR_USD");
        assert_eq!(event.side, Some(OrderSide::Sell));
        assert_eq!(event.filled_qty, 250.0);
        assert_eq!(event.filled_price, 1.1002);
        assert_eq!(
            event.raw.get("reason").and_then(Value::as_str),
            Some("MARKET_ORDER")
        );
    }

    #[test]
    fn order_event_falls_back_to_transaction_id() {
        let tx = TransactionMessage {
            id: Some("7".to_string()),
            units: Some("100".to_string()),
            ..Default::default()
        };
        let event = tx.into_order_event(OrderEventKind::New);
        assert_eq!(event.order_id, "7");
        assert_eq!(event.side, Some(OrderSide::Buy));
    }
}
