//! Lifecycle properties observed through a real session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::net::TcpListener;

use tickline_ingest::infrastructure::config::{SecretString, SocketSettings};
use tickline_ingest::{
    DispatchBridge, NullRecorder, ReconnectConfig, SessionState, SocketSession,
};

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn session_reconnects_after_server_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accepts = Arc::new(Mutex::new(0usize));
    let server_accepts = Arc::clone(&accepts);
    let server = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            *server_accepts.lock() += 1;
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            // Read the subscribe frame, then drop the connection.
            let _ = ws.next().await;
        }
    });

    let session = SocketSession::new(
        SocketSettings {
            url: format!("ws://{addr}/stream"),
            api_key: SecretString::new("k1".to_string()),
        },
        ReconnectConfig {
            initial_delay: Duration::from_millis(50),
            ..Default::default()
        },
        Arc::new(NullRecorder),
        Arc::new(DispatchBridge::new()),
    );

    session.connect(&["ES"]).unwrap();

    let mut state = session.state();
    assert!(
        wait_until(Duration::from_secs(5), || *accepts.lock() >= 3).await,
        "expected repeated reconnects, got {}",
        *accepts.lock()
    );
    // The session cycled through Reconnecting at least once along the way.
    assert_ne!(*state.borrow_and_update(), SessionState::Stopped);

    session.disconnect().await;
    assert_eq!(*session.state().borrow(), SessionState::Stopped);

    server.abort();
}

#[tokio::test]
async fn stop_during_backoff_is_prompt() {
    // Nothing listens here: every attempt fails instantly and the session
    // spends its time in backoff sleeps.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let session = SocketSession::new(
        SocketSettings {
            url: format!("ws://{addr}/stream"),
            api_key: SecretString::new("k1".to_string()),
        },
        ReconnectConfig {
            initial_delay: Duration::from_secs(30),
            ..Default::default()
        },
        Arc::new(NullRecorder),
        Arc::new(DispatchBridge::new()),
    );

    session.connect(&["ES"]).unwrap();

    let mut state = session.state();
    assert!(
        wait_until(Duration::from_secs(5), || {
            *state.borrow_and_update() == SessionState::Reconnecting
        })
        .await,
        "session never entered backoff"
    );

    let started = Instant::now();
    session.disconnect().await;
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "stop waited out the backoff: {:?}",
        started.elapsed()
    );
    assert_eq!(*session.state().borrow(), SessionState::Stopped);
}
