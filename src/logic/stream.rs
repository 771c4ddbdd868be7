//! Alert Stream Client
//!
//! Maintains the server-push connection to the detection backend,
//! parses Server-Sent Events into alerts and forwards them into the
//! ingest channel. Transport failures are never fatal: the client
//! reconnects forever on a fixed delay.

use super::alert::Alert;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Connection state published for the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

pub type SharedStreamStatus = Arc<RwLock<StreamStatus>>;

/// Reconnect policy. The observed behavior is a fixed delay with no
/// growth and no cap; `max_attempts` exists for tests and deliberate
/// deviations, not for production parity.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl BackoffPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Delay before the given reconnect attempt. Fixed for now; the
    /// seam where jitter or growth would plug in.
    pub fn delay_for(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(2))
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("stream endpoint returned status {0}")]
    Status(u16),
}

enum StreamExit {
    Ended,
    Shutdown,
}

pub struct StreamClient {
    http: reqwest::Client,
    url: String,
    backoff: BackoffPolicy,
    status: SharedStreamStatus,
}

impl StreamClient {
    pub fn new(url: String, backoff: BackoffPolicy, status: SharedStreamStatus) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            backoff,
            status,
        }
    }

    fn set_status(&self, status: StreamStatus) {
        *self.status.write() = status;
    }

    /// Run until shutdown. Consumes the sender so the ingest channel
    /// closes when the client stops.
    pub async fn run(self, tx: mpsc::Sender<Alert>, mut shutdown: watch::Receiver<bool>) {
        let mut attempts = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_status(StreamStatus::Connecting);
            match self.consume_stream(&tx, &mut shutdown).await {
                Ok(StreamExit::Shutdown) => break,
                Ok(StreamExit::Ended) => log::warn!("Alert stream ended, reconnecting..."),
                Err(e) => log::warn!("Alert stream error: {} - reconnecting...", e),
            }

            self.set_status(StreamStatus::Reconnecting);
            attempts += 1;
            if let Some(max) = self.backoff.max_attempts {
                if attempts >= max {
                    log::info!("Giving up after {} reconnect attempts", attempts);
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.backoff.delay_for(attempts)) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.set_status(StreamStatus::Disconnected);
    }

    /// One connection lifetime: open the push channel, then forward
    /// every well-formed alert until the transport drops.
    async fn consume_stream(
        &self,
        tx: &mpsc::Sender<Alert>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StreamExit, StreamError> {
        let request = self
            .http
            .get(&self.url)
            .header("Accept", "text/event-stream")
            .send();

        let mut response = tokio::select! {
            response = request => response?,
            _ = shutdown.changed() => return Ok(StreamExit::Shutdown),
        };

        if !response.status().is_success() {
            return Err(StreamError::Status(response.status().as_u16()));
        }

        self.set_status(StreamStatus::Connected);
        log::info!("Connected to alert stream: {}", self.url);

        let mut parser = SseParser::new();

        loop {
            let chunk = tokio::select! {
                chunk = response.chunk() => chunk?,
                _ = shutdown.changed() => return Ok(StreamExit::Shutdown),
            };

            let Some(bytes) = chunk else {
                return Ok(StreamExit::Ended);
            };

            for payload in parser.push(&bytes) {
                match serde_json::from_str::<Alert>(&payload) {
                    Ok(alert) => {
                        if tx.send(alert).await.is_err() {
                            // Ingest side is gone; nothing left to do.
                            return Ok(StreamExit::Shutdown);
                        }
                    }
                    Err(e) => log::debug!("Discarding malformed alert: {}", e),
                }
            }
        }
    }
}

/// Incremental Server-Sent-Events parser. Accumulates `data:` lines
/// until the blank line that terminates an event; other fields and
/// comments are ignored.
///
/// Buffers raw bytes and splits on byte newlines, so a multi-byte
/// UTF-8 sequence straddling two transport chunks stays intact.
struct SseParser {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseParser {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Feed a transport chunk, returning every completed event payload.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let decoded = String::from_utf8_lossy(&raw);
            let line = decoded.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
            // "event:", "id:", "retry:" and comment lines carry
            // nothing we render; skip them.
        }

        events
    }
}

/// Fetch the recent-alerts listing once and replay the newest `limit`
/// entries through the given sender, oldest first, so the dashboard
/// does not start from an empty globe.
pub async fn preload_recent(
    http: &reqwest::Client,
    url: &str,
    limit: usize,
    tx: &mpsc::Sender<Alert>,
) -> Result<usize, StreamError> {
    let response = http.get(url).send().await?;
    if !response.status().is_success() {
        return Err(StreamError::Status(response.status().as_u16()));
    }

    let alerts: Vec<Alert> = response.json().await?;
    let skip = alerts.len().saturating_sub(limit);

    let mut sent = 0;
    for alert in alerts.into_iter().skip(skip) {
        if tx.send(alert).await.is_err() {
            break;
        }
        sent += 1;
    }

    Ok(sent)
}
