//! Persistent RPC Hub Adapter
//!
//! SignalR-style JSON hub over WebSocket: the client invokes named
//! subscription methods, the server pushes named events. Two independent
//! sessions share the transport core here: [`market::MarketHubSession`]
//! for price/trade/depth events and [`user::UserHubSession`] for account
//! and order events.
//!
//! Both sessions run under the lifecycle supervisor; the hub has no
//! transport-native reconnect. Instead, every successful handshake replays
//! the session's full subscription set as fresh invocations, so recovered
//! state is identical to first-connect state.

pub mod market;
pub mod protocol;
pub mod user;

pub use market::MarketHubSession;
pub use protocol::Invocation;
pub use user::UserHubSession;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::application::ports::TokenSource;
use crate::infrastructure::config::validate_ws_url;
use crate::infrastructure::lifecycle::{
    AttemptContext, ReconnectConfig, SessionState, Supervisor,
};
use protocol::{HubRecord, TYPE_CLOSE, TYPE_COMPLETION, TYPE_INVOCATION, TYPE_PING};

/// Interval between outbound keep-alive pings.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10);

// =============================================================================
// Error Type
// =============================================================================

/// Errors from a hub session.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The token source yielded no token. Fatal from `connect()`.
    #[error("no access token available")]
    MissingToken,

    /// Fatal configuration problem, surfaced from `connect()`.
    #[error("invalid hub configuration: {0}")]
    InvalidConfig(String),

    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Server rejected the protocol negotiation.
    #[error("hub handshake failed: {0}")]
    Handshake(String),

    /// Record serialization failed.
    #[error("record encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Server closed the hub.
    #[error("hub closed by server")]
    Closed,
}

// =============================================================================
// Shared transport core
// =============================================================================

/// Server-event callback: target name plus positional arguments.
pub(crate) type EventHandler = Arc<dyn Fn(&str, &[serde_json::Value]) + Send + Sync>;

/// Produces the invocations that restore the session's subscriptions.
pub(crate) type ReplayFn = Arc<dyn Fn() -> Vec<Invocation> + Send + Sync>;

/// Transport state shared by the market and user sessions.
pub(crate) struct HubCore {
    url: String,
    token_source: Arc<dyn TokenSource>,
    supervisor: Supervisor,
    invoke_tx: mpsc::UnboundedSender<Invocation>,
    invoke_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Invocation>>>,
}

impl HubCore {
    pub(crate) fn new(
        url: String,
        token_source: Arc<dyn TokenSource>,
        reconnect: ReconnectConfig,
    ) -> Self {
        let (invoke_tx, invoke_rx) = mpsc::unbounded_channel();
        Self {
            url,
            token_source,
            supervisor: Supervisor::new(reconnect),
            invoke_tx,
            invoke_rx: Arc::new(tokio::sync::Mutex::new(invoke_rx)),
        }
    }

    pub(crate) fn state(&self) -> tokio::sync::watch::Receiver<SessionState> {
        self.supervisor.state()
    }

    /// Queue an invocation for the live connection.
    ///
    /// Items queued while disconnected are discarded at the next handshake;
    /// the replay set already covers them.
    pub(crate) fn invoke(&self, invocation: Invocation) {
        let _ = self.invoke_tx.send(invocation);
    }

    /// Start the supervised hub connection.
    ///
    /// Fatal if no token is currently available or the hub URL is
    /// malformed; each attempt re-reads the token afterwards so rotation
    /// works across reconnects.
    pub(crate) fn connect(&self, replay: ReplayFn, on_event: EventHandler) -> Result<(), HubError> {
        if self.token_source.current_token().is_none() {
            return Err(HubError::MissingToken);
        }
        validate_ws_url(&self.url).map_err(HubError::InvalidConfig)?;

        let url = self.url.clone();
        let token_source = Arc::clone(&self.token_source);
        let invoke_rx = Arc::clone(&self.invoke_rx);

        self.supervisor.start(move |ctx| {
            run_attempt(
                ctx,
                url.clone(),
                Arc::clone(&token_source),
                Arc::clone(&invoke_rx),
                Arc::clone(&replay),
                Arc::clone(&on_event),
            )
        });

        Ok(())
    }

    pub(crate) async fn disconnect(&self) {
        self.supervisor.stop().await;
    }
}

// =============================================================================
// Per-attempt connection loop
// =============================================================================

async fn run_attempt(
    ctx: AttemptContext,
    url: String,
    token_source: Arc<dyn TokenSource>,
    invoke_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Invocation>>>,
    replay: ReplayFn,
    on_event: EventHandler,
) -> Result<(), HubError> {
    let token = token_source.current_token().ok_or(HubError::MissingToken)?;
    let connect_url = format!("{url}?access_token={token}");

    tracing::info!(url = %url, "connecting to hub");
    let (ws_stream, _response) = tokio_tungstenite::connect_async(&connect_url).await?;
    let (mut write, mut read) = ws_stream.split();

    write
        .send(Message::Text(protocol::handshake_request().into()))
        .await?;
    await_handshake_ack(&mut read).await?;

    let mut rx = invoke_rx.lock().await;
    // Invocations queued while disconnected are stale: the replay set below
    // restores the full subscription state, so draining them here avoids
    // duplicate subscribe calls.
    while rx.try_recv().is_ok() {}

    for invocation in replay() {
        tracing::debug!(target = invocation.target(), "replaying subscription");
        write.send(Message::Text(invocation.encode()?.into())).await?;
    }

    ctx.mark_connected();
    tracing::info!("hub connected");

    let mut keep_alive = tokio::time::interval(KEEP_ALIVE_INTERVAL);
    keep_alive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    keep_alive.tick().await;

    loop {
        tokio::select! {
            () = ctx.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = keep_alive.tick() => {
                write.send(Message::Text(protocol::ping_record().into())).await?;
            }
            invocation = rx.recv() => {
                if let Some(invocation) = invocation {
                    write.send(Message::Text(invocation.encode()?.into())).await?;
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, &on_event)?;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("hub sent close frame");
                        return Err(HubError::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        tracing::info!("hub stream ended");
                        return Err(HubError::Closed);
                    }
                }
            }
        }
    }
}

async fn await_handshake_ack<R>(read: &mut R) -> Result<(), HubError>
where
    R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    match read.next().await {
        Some(Ok(Message::Text(text))) => {
            let Some(record) = protocol::split_records(&text).next() else {
                return Err(HubError::Handshake("empty handshake response".to_string()));
            };
            let ack: HubRecord = serde_json::from_str(record)?;
            match ack.error {
                Some(error) => Err(HubError::Handshake(error)),
                None => Ok(()),
            }
        }
        Some(Ok(other)) => Err(HubError::Handshake(format!(
            "unexpected handshake frame: {other:?}"
        ))),
        Some(Err(e)) => Err(e.into()),
        None => Err(HubError::Closed),
    }
}

/// Decode the records of one text frame and route invocation events.
fn handle_frame(text: &str, on_event: &EventHandler) -> Result<(), HubError> {
    for record in protocol::split_records(text) {
        let decoded: HubRecord = match serde_json::from_str(record) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!(error = %e, "skipping malformed hub record");
                continue;
            }
        };

        match decoded.kind {
            Some(TYPE_INVOCATION) => {
                if let Some(target) = decoded.target.as_deref() {
                    on_event(target, &decoded.arguments);
                }
            }
            Some(TYPE_PING) => {
                tracing::trace!("hub ping");
            }
            Some(TYPE_COMPLETION) => {
                tracing::trace!("hub completion");
            }
            Some(TYPE_CLOSE) => {
                tracing::info!(
                    error = decoded.error.as_deref().unwrap_or(""),
                    "hub close record"
                );
                return Err(HubError::Closed);
            }
            _ => {}
        }
    }
    Ok(())
}
