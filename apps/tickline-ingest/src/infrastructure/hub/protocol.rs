//! Hub wire protocol.
//!
//! JSON records terminated by the 0x1E record separator, carried over
//! WebSocket text frames. After the `{"protocol":"json","version":1}`
//! handshake, every record carries a numeric `type`: 1 invocation,
//! 3 completion, 6 ping, 7 close.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Record separator between JSON payloads.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Record type: a target invocation with positional arguments.
pub const TYPE_INVOCATION: u8 = 1;
/// Record type: completion of a client invocation.
pub const TYPE_COMPLETION: u8 = 3;
/// Record type: keep-alive ping (either direction).
pub const TYPE_PING: u8 = 6;
/// Record type: server is closing the connection.
pub const TYPE_CLOSE: u8 = 7;

// =============================================================================
// Outbound
// =============================================================================

/// The protocol negotiation record, sent first on every connection.
#[must_use]
pub fn handshake_request() -> String {
    format!(r#"{{"protocol":"json","version":1}}{RECORD_SEPARATOR}"#)
}

/// The keep-alive record.
#[must_use]
pub fn ping_record() -> String {
    format!(r#"{{"type":{TYPE_PING}}}{RECORD_SEPARATOR}"#)
}

/// A fire-and-forget hub invocation. No invocation id is attached, so the
/// server sends no completion back.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Invocation {
    #[serde(rename = "type")]
    kind: u8,
    target: String,
    arguments: Vec<Value>,
}

impl Invocation {
    /// Build an invocation of `target` with positional `arguments`.
    #[must_use]
    pub fn new(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            kind: TYPE_INVOCATION,
            target: target.into(),
            arguments,
        }
    }

    /// Invocation target name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Encode as a separator-terminated record.
    ///
    /// # Errors
    ///
    /// Returns the underlying error if serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{json}{RECORD_SEPARATOR}"))
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// One decoded inbound record.
///
/// A record without a `type` is the handshake acknowledgement; its `error`
/// field, when present, carries the negotiation failure reason.
#[derive(Debug, Clone, Deserialize)]
pub struct HubRecord {
    /// Record type code, absent on the handshake ack.
    #[serde(rename = "type")]
    pub kind: Option<u8>,
    /// Invocation target, for type 1.
    #[serde(default)]
    pub target: Option<String>,
    /// Positional invocation arguments, for type 1.
    #[serde(default)]
    pub arguments: Vec<Value>,
    /// Error message, on a failed handshake or a close record.
    #[serde(default)]
    pub error: Option<String>,
}

/// Split a text frame into its separator-terminated records.
///
/// Tolerates a frame carrying several records and ignores a trailing
/// empty segment after the final separator.
pub fn split_records(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split(RECORD_SEPARATOR)
        .filter(|segment| !segment.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_is_separator_terminated() {
        let hs = handshake_request();
        assert_eq!(hs, "{\"protocol\":\"json\",\"version\":1}\u{1e}");
    }

    #[test]
    fn invocation_encodes_with_type_code() {
        let inv = Invocation::new("SubscribeContractQuotes", vec!["CON.F.US.EP".into()]);
        let encoded = inv.encode().unwrap();
        assert_eq!(
            encoded,
            "{\"type\":1,\"target\":\"SubscribeContractQuotes\",\"arguments\":[\"CON.F.US.EP\"]}\u{1e}"
        );
    }

    #[test]
    fn splits_multiple_records_per_frame() {
        let frame = "{\"type\":6}\u{1e}{\"type\":1,\"target\":\"GatewayQuote\",\"arguments\":[]}\u{1e}";
        let records: Vec<&str> = split_records(frame).collect();
        assert_eq!(records.len(), 2);

        let ping: HubRecord = serde_json::from_str(records[0]).unwrap();
        assert_eq!(ping.kind, Some(TYPE_PING));

        let invocation: HubRecord = serde_json::from_str(records[1]).unwrap();
        assert_eq!(invocation.kind, Some(TYPE_INVOCATION));
        assert_eq!(invocation.target.as_deref(), Some("GatewayQuote"));
    }

    #[test]
    fn handshake_ack_has_no_type() {
        let ack: HubRecord = serde_json::from_str("{}").unwrap();
        assert_eq!(ack.kind, None);
        assert!(ack.error.is_none());

        let failed: HubRecord =
            serde_json::from_str(r#"{"error":"unsupported protocol"}"#).unwrap();
        assert_eq!(failed.error.as_deref(), Some("unsupported protocol"));
    }
}
