//! Connection Lifecycle Supervision
//!
//! Keeps a session's physical connection alive under a uniform retry policy,
//! independent of protocol. A [`Supervisor`] wraps a "connect once and read
//! until the connection ends" function with exponential backoff and
//! clean-stop semantics; [`ReconnectPolicy`] owns the delay sequence.
//!
//! All three protocol adapters run under this supervisor, including the
//! persistent-hub adapter, which replays its subscriptions explicitly after
//! each successful handshake instead of leaning on a transport-native
//! reconnect.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Reconnect Policy
// =============================================================================

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (2.0 doubles the delay).
    pub multiplier: f64,
    /// Jitter factor as a fraction (0.1 = ±10% randomization).
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectConfig {
    /// Configuration matching the hub transports' historical reconnect
    /// cadence (5s between attempts, effectively unbounded).
    #[must_use]
    pub const fn hub() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

/// Reconnection policy implementing capped exponential backoff.
///
/// `next_delay` returns the current delay and advances the sequence;
/// `reset` restores the initial delay after a successful connection.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Get the next delay duration, applying exponential backoff with
    /// jitter. Attempts are unlimited; the stream degrades gracefully and
    /// self-heals rather than giving up.
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        self.attempt_count += 1;

        let delay_with_jitter = self.apply_jitter(self.current_delay);

        // Advance the sequence for subsequent calls.
        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        delay_with_jitter
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Get the current attempt count since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of a supervised stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Not yet started.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Handshake succeeded; the read loop is live.
    Connected,
    /// Last attempt failed; waiting out the backoff delay.
    Reconnecting,
    /// Terminal. No further connect attempts occur.
    Stopped,
}

// =============================================================================
// Attempt Context
// =============================================================================

/// Handle passed to each connect attempt.
///
/// The attempt calls [`AttemptContext::mark_connected`] once its
/// protocol-specific handshake succeeds (this is what resets the backoff),
/// and selects on [`AttemptContext::cancelled`] to unblock its read loop
/// when the session stops.
pub struct AttemptContext {
    cancel: CancellationToken,
    state_tx: watch::Sender<SessionState>,
    connected: Arc<AtomicBool>,
}

impl AttemptContext {
    /// Record that the handshake succeeded.
    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.state_tx.send(SessionState::Connected);
    }

    /// Resolves when the session is stopping.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Whether the session is stopping.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Retry-wraps one session's connect/read function.
///
/// `Disconnected → Connecting → Connected → (on error) Reconnecting →
/// Connecting …`, with a terminal absorbing `Stopped` reachable from any
/// state via [`Supervisor::stop`]. Attempt failures are logged and
/// swallowed here; callers observe connectivity through the state channel
/// or, indirectly, through the absence of ticks.
pub struct Supervisor {
    config: ReconnectConfig,
    state_tx: watch::Sender<SessionState>,
    cancel: CancellationToken,
    started: AtomicBool,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Create a supervisor in the `Disconnected` state.
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            config,
            state_tx,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            handle: parking_lot::Mutex::new(None),
        }
    }

    /// Observe session state transitions.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Current session state.
    #[must_use]
    pub fn current_state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Spawn the retry-wrapped run loop. Idempotent: calling `start` while
    /// already running (or after `stop`) is a no-op.
    pub fn start<F, Fut, E>(&self, mut attempt: F)
    where
        F: FnMut(AttemptContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let state_tx = self.state_tx.clone();
        let cancel = self.cancel.clone();
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            let mut policy = ReconnectPolicy::new(config);

            loop {
                if cancel.is_cancelled() {
                    break;
                }

                let _ = state_tx.send(SessionState::Connecting);

                let connected = Arc::new(AtomicBool::new(false));
                let ctx = AttemptContext {
                    cancel: cancel.child_token(),
                    state_tx: state_tx.clone(),
                    connected: Arc::clone(&connected),
                };

                match attempt(ctx).await {
                    Ok(()) => {
                        // The attempt only returns Ok when it observed the
                        // stop signal itself.
                        break;
                    }
                    Err(e) => {
                        if cancel.is_cancelled() {
                            break;
                        }

                        if connected.load(Ordering::SeqCst) {
                            policy.reset();
                        }

                        let delay = policy.next_delay();
                        let attempt_no = policy.attempt_count();
                        tracing::warn!(
                            error = %e,
                            attempt = attempt_no,
                            delay_ms = delay.as_millis(),
                            "stream connection ended, reconnecting"
                        );
                        metrics::counter!("tickline_reconnects_total").increment(1);

                        let _ = state_tx.send(SessionState::Reconnecting);

                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }

            let _ = state_tx.send(SessionState::Stopped);
        });

        *self.handle.lock() = Some(task);
    }

    /// Stop the session and wait for the run loop to exit. Interrupts an
    /// in-progress backoff sleep immediately; safe to call concurrently
    /// with an in-flight read.
    pub async fn stop(&self) {
        self.cancel.cancel();
        // Absorbing: a later start() must not respawn the loop.
        self.started.store(true, Ordering::SeqCst);

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::debug!(error = %e, "supervised task join failed");
            }
        }
        let _ = self.state_tx.send(SessionState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    use super::*;

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
    }

    #[test]
    fn backoff_sequence_doubles_to_cap() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());

        let expected = [1u64, 2, 4, 8, 16, 32, 60, 60, 60];
        for secs in expected {
            assert_eq!(policy.next_delay(), Duration::from_secs(secs));
        }
    }

    #[test]
    fn reset_restores_initial_delay() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), 2);

        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                initial_delay: Duration::from_millis(1000),
                jitter_factor: 0.1,
                ..Default::default()
            });

            let millis = policy.next_delay().as_millis();
            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[tokio::test]
    async fn stop_interrupts_backoff_sleep() {
        let supervisor = Supervisor::new(ReconnectConfig {
            initial_delay: Duration::from_secs(5),
            ..Default::default()
        });

        supervisor.start(|_ctx| async { Err::<(), _>("connect refused") });

        // Give the first attempt time to fail and enter the backoff sleep.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut state = supervisor.state();
        assert_eq!(*state.borrow(), SessionState::Reconnecting);

        let started = Instant::now();
        supervisor.stop().await;
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "stop() waited out the backoff: {:?}",
            started.elapsed()
        );

        state.mark_changed();
        assert_eq!(*state.borrow_and_update(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let attempts = Arc::new(AtomicU32::new(0));
        let supervisor = Supervisor::new(ReconnectConfig::default());

        let counter = Arc::clone(&attempts);
        supervisor.start(move |ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                ctx.cancelled().await;
                Ok::<(), String>(())
            }
        });

        let counter = Arc::clone(&attempts);
        supervisor.start(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), String>(()) }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn successful_handshake_resets_backoff() {
        let attempts = Arc::new(AtomicU32::new(0));
        let supervisor = Supervisor::new(ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            ..Default::default()
        });

        // Every attempt "connects" then drops. With reset-on-success the
        // delay never grows past the initial 20ms, so many attempts fit in
        // the observation window; without the reset it would double away.
        let counter = Arc::clone(&attempts);
        supervisor.start(move |ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                ctx.mark_connected();
                Err::<(), _>("connection dropped")
            }
        });

        tokio::time::sleep(Duration::from_millis(400)).await;
        supervisor.stop().await;

        assert!(
            attempts.load(Ordering::SeqCst) >= 5,
            "expected repeated fast retries, got {}",
            attempts.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn stop_before_start_is_terminal() {
        let supervisor = Supervisor::new(ReconnectConfig::default());
        supervisor.stop().await;
        assert_eq!(supervisor.current_state(), SessionState::Stopped);

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        supervisor.start(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), String>(()) }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}
