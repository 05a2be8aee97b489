//! User hub session.
//!
//! Account-scoped events: `GatewayUserAccount`, `GatewayUserOrder`,
//! `GatewayUserPosition`, `GatewayUserTrade`. Subscribing an account
//! issues four invocations (`SubscribeAccounts`, `SubscribeOrders`,
//! `SubscribePositions`, `SubscribeTrades`) exactly once; the replay set
//! re-issues them after every reconnect.
//!
//! Order and trade events normalize to [`OrderEvent`]; account and
//! position snapshots are logged and dropped.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::application::ports::{OrderHandler, TokenSource};
use crate::domain::market::{OrderEvent, OrderEventKind, OrderSide};
use crate::domain::subscription::{Channel, SubscriptionKey, SubscriptionSet};
use crate::infrastructure::config::HubSettings;
use crate::infrastructure::dispatch::DispatchBridge;
use crate::infrastructure::lifecycle::{ReconnectConfig, SessionState};
use crate::infrastructure::metrics::{self, StreamKind};

use super::protocol::Invocation;
use super::{EventHandler, HubCore, HubError, ReplayFn};

const SUBSCRIBE_ACCOUNTS: &str = "SubscribeAccounts";
const SUBSCRIBE_ORDERS: &str = "SubscribeOrders";
const SUBSCRIBE_POSITIONS: &str = "SubscribePositions";
const SUBSCRIBE_TRADES: &str = "SubscribeTrades";

// =============================================================================
// Payloads
// =============================================================================

/// Order status codes on the wire.
mod status {
    pub const OPEN: i64 = 1;
    pub const FILLED: i64 = 2;
    pub const CANCELLED: i64 = 3;
    pub const EXPIRED: i64 = 4;
    pub const REJECTED: i64 = 5;
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderPayload {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    contract_id: Option<String>,
    #[serde(default)]
    status: Option<i64>,
    #[serde(default)]
    side: Option<i64>,
    #[serde(default)]
    size: Option<f64>,
    #[serde(default)]
    fill_volume: Option<f64>,
    #[serde(default)]
    filled_price: Option<f64>,
    #[serde(flatten)]
    raw: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserTradePayload {
    #[serde(default)]
    order_id: Option<Value>,
    #[serde(default)]
    contract_id: Option<String>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    size: Option<f64>,
    #[serde(default)]
    side: Option<i64>,
    #[serde(flatten)]
    raw: Map<String, Value>,
}

// =============================================================================
// Session
// =============================================================================

/// Supervised user hub connection with per-account subscriptions.
pub struct UserHubSession {
    core: HubCore,
    accounts: Arc<RwLock<SubscriptionSet>>,
    order_handler: Arc<RwLock<Option<OrderHandler>>>,
    bridge: Arc<DispatchBridge>,
}

impl UserHubSession {
    /// Create a session against the user hub endpoint.
    #[must_use]
    pub fn new(
        settings: &HubSettings,
        token_source: Arc<dyn TokenSource>,
        reconnect: ReconnectConfig,
        bridge: Arc<DispatchBridge>,
    ) -> Self {
        Self {
            core: HubCore::new(settings.user_url.clone(), token_source, reconnect),
            accounts: Arc::new(RwLock::new(SubscriptionSet::new())),
            order_handler: Arc::new(RwLock::new(None)),
            bridge,
        }
    }

    /// Register the order-event callback.
    pub fn on_order(&self, handler: OrderHandler) {
        *self.order_handler.write() = Some(handler);
    }

    /// Observe lifecycle state transitions.
    #[must_use]
    pub fn state(&self) -> tokio::sync::watch::Receiver<SessionState> {
        self.core.state()
    }

    /// Start the supervised connection for the given accounts.
    ///
    /// # Errors
    ///
    /// [`HubError::InvalidConfig`] for an empty account list, or
    /// [`HubError::MissingToken`] when the token source is empty.
    pub fn connect(&self, account_ids: &[&str]) -> Result<(), HubError> {
        if account_ids.is_empty() {
            return Err(HubError::InvalidConfig(
                "at least one account id is required".to_string(),
            ));
        }

        {
            let mut accounts = self.accounts.write();
            for id in account_ids {
                let _ = accounts.insert(SubscriptionKey::new(Channel::OrderUpdates, *id));
            }
            #[allow(clippy::cast_precision_loss)]
            metrics::set_subscriptions(StreamKind::HubUser, accounts.len() as f64);
        }

        let replay = replay_fn(Arc::clone(&self.accounts));
        let on_event = event_handler(Arc::clone(&self.order_handler), Arc::clone(&self.bridge));
        self.core.connect(replay, on_event)
    }

    /// Track an account, issuing its four subscribe invocations on the
    /// live connection. Idempotent: a known account sends nothing.
    pub fn subscribe(&self, account_id: &str) -> bool {
        let inserted = self
            .accounts
            .write()
            .insert(SubscriptionKey::new(Channel::OrderUpdates, account_id));
        if inserted {
            #[allow(clippy::cast_precision_loss)]
            metrics::set_subscriptions(StreamKind::HubUser, self.accounts.read().len() as f64);
            for invocation in account_invocations(account_id) {
                self.core.invoke(invocation);
            }
        }
        inserted
    }

    /// Stop the session and wait for the connection task to exit.
    pub async fn disconnect(&self) {
        self.core.disconnect().await;
    }
}

// =============================================================================
// Event plumbing
// =============================================================================

/// Account ids are numeric on the wire when they parse as integers.
fn account_arg(account_id: &str) -> Value {
    account_id
        .parse::<i64>()
        .map_or_else(|_| Value::String(account_id.to_string()), Value::from)
}

fn account_invocations(account_id: &str) -> Vec<Invocation> {
    let arg = account_arg(account_id);
    vec![
        Invocation::new(SUBSCRIBE_ACCOUNTS, vec![]),
        Invocation::new(SUBSCRIBE_ORDERS, vec![arg.clone()]),
        Invocation::new(SUBSCRIBE_POSITIONS, vec![arg.clone()]),
        Invocation::new(SUBSCRIBE_TRADES, vec![arg]),
    ]
}

fn replay_fn(accounts: Arc<RwLock<SubscriptionSet>>) -> ReplayFn {
    Arc::new(move || {
        accounts
            .read()
            .keys_on(Channel::OrderUpdates)
            .iter()
            .flat_map(|id| account_invocations(id))
            .collect()
    })
}

fn event_handler(
    order_handler: Arc<RwLock<Option<OrderHandler>>>,
    bridge: Arc<DispatchBridge>,
) -> EventHandler {
    Arc::new(move |target, args| {
        let event = match target {
            "GatewayUserOrder" => normalize_order(args),
            "GatewayUserTrade" => normalize_user_trade(args),
            "GatewayUserAccount" => {
                tracing::debug!("account snapshot");
                None
            }
            "GatewayUserPosition" => {
                tracing::debug!("position update");
                None
            }
            other => {
                tracing::trace!(target = other, "unhandled user hub event");
                None
            }
        };

        if let Some(event) = event {
            metrics::record_order_event(StreamKind::HubUser);
            tracing::debug!(kind = ?event.kind, order_id = %event.order_id, "order event");
            if let Some(handler) = order_handler.read().clone() {
                let _ = bridge.submit(move || handler(event));
            }
        }
    })
}

/// The payload rides in the last argument; some servers prefix the
/// account id.
fn payload_arg(args: &[Value]) -> Option<&Value> {
    args.iter().rev().find(|v| v.is_object())
}

fn id_string(id: Option<Value>) -> String {
    match id {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn side_from_code(code: Option<i64>) -> Option<OrderSide> {
    match code {
        Some(0) => Some(OrderSide::Buy),
        Some(1) => Some(OrderSide::Sell),
        _ => None,
    }
}

fn normalize_order(args: &[Value]) -> Option<OrderEvent> {
    let payload: OrderPayload = serde_json::from_value(payload_arg(args)?.clone()).ok()?;

    let size = payload.size.unwrap_or(0.0);
    let filled = payload.fill_volume.unwrap_or(0.0);
    let kind = match payload.status {
        Some(status::OPEN) => OrderEventKind::New,
        Some(status::FILLED) => {
            if filled > 0.0 && filled < size {
                OrderEventKind::PartialFill
            } else {
                OrderEventKind::Fill
            }
        }
        Some(status::CANCELLED) => OrderEventKind::Cancelled,
        Some(status::EXPIRED) => OrderEventKind::Expired,
        Some(status::REJECTED) => OrderEventKind::Rejected,
        _ => OrderEventKind::Other,
    };

    Some(OrderEvent {
        kind,
        order_id: id_string(payload.id),
        symbol: payload.contract_id.unwrap_or_default(),
        side: side_from_code(payload.side),
        filled_qty: if filled > 0.0 { filled } else { size },
        filled_price: payload.filled_price.unwrap_or(0.0),
        raw: payload.raw,
    })
}

fn normalize_user_trade(args: &[Value]) -> Option<OrderEvent> {
    let payload: UserTradePayload = serde_json::from_value(payload_arg(args)?.clone()).ok()?;

    Some(OrderEvent {
        kind: OrderEventKind::Fill,
        order_id: id_string(payload.order_id),
        symbol: payload.contract_id.unwrap_or_default(),
        side: side_from_code(payload.side),
        filled_qty: payload.size.unwrap_or(0.0),
        filled_price: payload.price.unwrap_or(0.0),
        raw: payload.raw,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use crate::application::ports::StaticToken;
    use crate::infrastructure::config::SecretString;

    use super::*;

    fn session() -> UserHubSession {
        UserHubSession::new(
            &HubSettings {
                market_url: "ws://127.0.0.1:1/hubs/market".to_string(),
                user_url: "ws://127.0.0.1:1/hubs/user".to_string(),
                access_token: SecretString::new("t".to_string()),
            },
            Arc::new(StaticToken("t".to_string())),
            ReconnectConfig::hub(),
            Arc::new(DispatchBridge::new()),
        )
    }

    #[test_case(1, OrderEventKind::New; "open maps to new")]
    #[test_case(2, OrderEventKind::Fill; "filled maps to fill")]
    #[test_case(3, OrderEventKind::Cancelled; "cancelled")]
    #[test_case(4, OrderEventKind::Expired; "expired")]
    #[test_case(5, OrderEventKind::Rejected; "rejected")]
    #[test_case(99, OrderEventKind::Other; "unknown status")]
    fn order_status_mapping(code: i64, expected: OrderEventKind) {
        let args = vec![json!({"id": 7, "contractId": "CON.F.US.EP", "status": code})];
        let event = normalize_order(&args).unwrap();
        assert_eq!(event.kind, expected);
        assert_eq!(event.order_id, "7");
        assert_eq!(event.symbol, "CON.F.US.EP");
    }

    #[test]
    fn partial_fill_detected_from_volumes() {
        let args = vec![json!({
            "id": 7, "status": 2, "size": 10.0, "fillVolume": 4.0, "filledPrice": 1900.25
        })];
        let event = normalize_order(&args).unwrap();
        assert_eq!(event.kind, OrderEventKind::PartialFill);
        assert_eq!(event.filled_qty, 4.0);
        assert_eq!(event.filled_price, 1900.25);
    }

    #[test_case(0, Some(OrderSide::Buy); "zero is buy")]
    #[test_case(1, Some(OrderSide::Sell); "one is sell")]
    #[test_case(2, None; "unknown side")]
    fn order_side_mapping(code: i64, expected: Option<OrderSide>) {
        let args = vec![json!({"id": 7, "status": 1, "side": code})];
        let event = normalize_order(&args).unwrap();
        assert_eq!(event.side, expected);
    }

    #[test]
    fn user_trade_becomes_fill() {
        let args = vec![
            json!(12345),
            json!({"orderId": 9, "contractId": "CON.F.US.EP", "price": 1900.5, "size": 2.0, "side": 1}),
        ];
        let event = normalize_user_trade(&args).unwrap();
        assert_eq!(event.kind, OrderEventKind::Fill);
        assert_eq!(event.order_id, "9");
        assert_eq!(event.filled_qty, 2.0);
        assert_eq!(event.side, Some(OrderSide::Sell));
    }

    #[test]
    fn unmodeled_fields_survive_in_raw() {
        let args = vec![json!({"id": 7, "status": 1, "creationTimestamp": "2026-08-29T12:00:00Z"})];
        let event = normalize_order(&args).unwrap();
        assert_eq!(
            event.raw.get("creationTimestamp").and_then(Value::as_str),
            Some("2026-08-29T12:00:00Z")
        );
    }

    #[test]
    fn numeric_account_ids_are_sent_as_numbers() {
        assert_eq!(account_arg("12345"), json!(12345));
        assert_eq!(account_arg("ACC-1"), json!("ACC-1"));
    }

    #[tokio::test]
    async fn subscribe_issues_four_invocations_once() {
        let session = session();

        assert!(session.subscribe("12345"));
        assert!(!session.subscribe("12345"));

        let mut rx = session.core.invoke_rx.lock().await;
        let targets: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|i| i.target().to_string())
            .collect();
        assert_eq!(
            targets,
            vec![
                SUBSCRIBE_ACCOUNTS,
                SUBSCRIBE_ORDERS,
                SUBSCRIBE_POSITIONS,
                SUBSCRIBE_TRADES
            ]
        );
    }

    #[test]
    fn connect_requires_accounts() {
        let session = session();
        assert!(matches!(
            session.connect(&[]),
            Err(HubError::InvalidConfig(_))
        ));
    }
}
