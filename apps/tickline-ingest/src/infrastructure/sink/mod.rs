//! Time-Series Sink
//!
//! Fire-and-forget persistence of normalized ticks over the InfluxDB line
//! protocol (the ingestion wire QuestDB speaks on port 9009). Each write
//! opens a short-lived TCP connection, sends one line, and closes; a
//! failure is logged and counted but never surfaces to the hot path, so a
//! down sink degrades persistence without touching live callbacks.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::application::ports::TickRecorder;
use crate::domain::market::MarketTick;
use crate::infrastructure::config::SinkSettings;
use crate::infrastructure::metrics;

/// Measurement name for tick rows.
const MEASUREMENT: &str = "market_data";

// =============================================================================
// Line protocol encoding
// =============================================================================

/// Encode one tick as an ILP line, without trailing newline.
///
/// Spaces and commas in the symbol are escaped per the line-protocol tag
/// rules; prices are emitted with Rust's shortest-roundtrip float
/// formatting. The server assigns the row timestamp on receipt.
#[must_use]
pub fn line_protocol(tick: &MarketTick) -> String {
    let symbol = escape_tag(&tick.symbol);
    format!(
        "{MEASUREMENT},symbol={symbol} bid={},ask={},last={},volume={}",
        tick.bid, tick.ask, tick.last, tick.volume
    )
}

fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | ' ' | '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// =============================================================================
// Sink adapter
// =============================================================================

/// [`TickRecorder`] backed by a line-protocol TCP endpoint.
pub struct LineProtocolSink {
    settings: SinkSettings,
}

impl LineProtocolSink {
    /// Create a sink for the given endpoint.
    #[must_use]
    pub const fn new(settings: SinkSettings) -> Self {
        Self { settings }
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let connect = TcpStream::connect(self.settings.address());
        let mut stream = tokio::time::timeout(self.settings.write_timeout, connect)
            .await
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;

        let payload = format!("{line}\n");
        tokio::time::timeout(
            self.settings.write_timeout,
            stream.write_all(payload.as_bytes()),
        )
        .await
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;

        stream.shutdown().await
    }
}

#[async_trait]
impl TickRecorder for LineProtocolSink {
    async fn record(&self, tick: &MarketTick) {
        let line = line_protocol(tick);
        if let Err(e) = self.write_line(&line).await {
            metrics::record_sink_error();
            tracing::warn!(
                error = %e,
                symbol = %tick.symbol,
                endpoint = %self.settings.address(),
                "tick sink write failed, dropping record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    fn sample_tick() -> MarketTick {
        MarketTick {
            symbol: "ES".to_string(),
            bid: 1900.25,
            ask: 1900.5,
            last: 1900.25,
            volume: 3.0,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn line_protocol_shape() {
        let line = line_protocol(&sample_tick());
        assert_eq!(line, "market_data,symbol=ES bid=1900.25,ask=1900.5,last=1900.25,volume=3");
    }

    #[test]
    fn line_protocol_escapes_tag_characters() {
        let mut tick = sample_tick();
        tick.symbol = "EUR USD,x=y".to_string();
        let line = line_protocol(&tick);
        assert!(line.starts_with(r"market_data,symbol=EUR\ USD\,x\=y "));
    }

    #[tokio::test]
    async fn record_sends_one_newline_terminated_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            socket.read_to_string(&mut received).await.unwrap();
            received
        });

        let sink = LineProtocolSink::new(SinkSettings {
            host: addr.ip().to_string(),
            port: addr.port(),
            write_timeout: Duration::from_secs(1),
        });
        sink.record(&sample_tick()).await;

        let received = server.await.unwrap();
        assert_eq!(
            received,
            "market_data,symbol=ES bid=1900.25,ask=1900.5,last=1900.25,volume=3\n"
        );
    }

    #[tokio::test]
    async fn record_swallows_connection_failure() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = LineProtocolSink::new(SinkSettings {
            host: addr.ip().to_string(),
            port: addr.port(),
            write_timeout: Duration::from_millis(200),
        });

        // Must return normally; failure is logged, not raised.
        sink.record(&sample_tick()).await;
    }
}
