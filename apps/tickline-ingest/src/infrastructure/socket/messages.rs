//! Wire types for the raw socket feed.
//!
//! One JSON object per text frame in both directions.

use serde::{Deserialize, Serialize};

/// Outbound subscribe frame.
///
/// Carries the credential and the full subscription snapshot; the server
/// treats each frame as a replacement, so re-sending it after a change or
/// a reconnect restores state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubscribeFrame {
    action: &'static str,
    key: String,
    symbol: Vec<String>,
}

impl SubscribeFrame {
    /// Build a subscribe frame for the given snapshot.
    #[must_use]
    pub const fn new(key: String, symbol: Vec<String>) -> Self {
        Self {
            action: "subscribe",
            key,
            symbol,
        }
    }
}

/// Outbound application-level liveness frame.
#[derive(Debug, Clone, Serialize)]
pub struct PingFrame {
    action: &'static str,
}

impl PingFrame {
    /// The ping frame.
    #[must_use]
    pub const fn new() -> Self {
        Self { action: "ping" }
    }
}

impl Default for PingFrame {
    fn default() -> Self {
        Self::new()
    }
}

/// Inbound frame, discriminated by the `type` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundFrame {
    /// Top-of-book snapshot.
    #[serde(rename = "ticker")]
    Ticker(TickerFrame),
    /// Anything we do not model.
    #[serde(other)]
    Unknown,
}

/// Payload of a `ticker` frame. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TickerFrame {
    /// Instrument, absent on some venue firehoses.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Best bid.
    #[serde(default)]
    pub bid: Option<f64>,
    /// Best ask.
    #[serde(default)]
    pub ask: Option<f64>,
    /// Last trade price.
    #[serde(default)]
    pub last: Option<f64>,
    /// Traded volume.
    #[serde(default, rename = "vol", alias = "volume")]
    pub vol: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_serializes_action_first() {
        let frame = SubscribeFrame::new("k1".to_string(), vec!["ES".to_string()]);
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"action":"subscribe","key":"k1","symbol":["ES"]}"#);
    }

    #[test]
    fn ping_frame_shape() {
        let json = serde_json::to_string(&PingFrame::new()).unwrap();
        assert_eq!(json, r#"{"action":"ping"}"#);
    }

    #[test]
    fn ticker_frame_decodes() {
        let frame: InboundFrame = serde_json::from_str(
            r#"{"type":"ticker","symbol":"ES","bid":1900.25,"ask":1900.5,"last":1900.25,"vol":3}"#,
        )
        .unwrap();

        let InboundFrame::Ticker(ticker) = frame else {
            panic!("expected ticker frame");
        };
        assert_eq!(ticker.symbol.as_deref(), Some("ES"));
        assert_eq!(ticker.bid, Some(1900.25));
        assert_eq!(ticker.vol, Some(3.0));
    }

    #[test]
    fn unknown_frame_type_is_tolerated() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"status","detail":"connected"}"#).unwrap();
        assert!(matches!(frame, InboundFrame::Unknown));
    }

    #[test]
    fn ticker_frame_accepts_volume_alias() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"ticker","symbol":"NQ","last":101.5,"volume":7}"#)
                .unwrap();
        let InboundFrame::Ticker(ticker) = frame else {
            panic!("expected ticker frame");
        };
        assert_eq!(ticker.vol, Some(7.0));
        assert!(ticker.bid.is_none());
    }
}
