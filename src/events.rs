use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::status_stream_url;
use crate::config::BackendConfig;
use crate::model::{CrawlJobProgress, StreamEvent};

/// One parsed `text/event-stream` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE wire parser. Feed raw body chunks, get dispatched frames.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                // id/retry are not used by this consumer
                _ => {}
            }
        }
        frames
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        Some(SseFrame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    BackingOff,
    /// Terminal: the retry attempts are exhausted and the watcher has stopped.
    GaveUp,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::BackingOff => "backing off",
            Self::GaveUp => "gave up",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatchUpdate {
    State { state: ConnectionState },
    Event { event: StreamEvent },
}

/// Reconnect policy. Backoff doubles from `initial_backoff` up to
/// `max_backoff`; `max_attempts` consecutive failures without a decoded
/// event end the watcher in `GaveUp`.
#[derive(Debug, Clone, Copy)]
pub struct WatchPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for WatchPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(3),
            max_backoff: Duration::from_secs(60),
            max_attempts: 8,
        }
    }
}

impl WatchPolicy {
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

/// Handle to a crawler's status-stream consumer. Dropping the handle cancels
/// the stream; `close` waits for the task to finish.
#[derive(Debug)]
pub struct StatusWatcher {
    cancel: CancellationToken,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl StatusWatcher {
    pub fn spawn(
        config: &BackendConfig,
        crawler_id: i64,
        policy: WatchPolicy,
    ) -> anyhow::Result<(Self, mpsc::Receiver<WatchUpdate>)> {
        // No total request timeout: the stream stays open between events.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("build status stream http client")?;

        let stream_url = status_stream_url(&config.base_url, crawler_id);
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(64);

        let handle = tokio::spawn(watch_loop(client, stream_url, policy, cancel.clone(), tx));
        Ok((
            Self {
                cancel,
                handle: Some(handle),
            },
            rx,
        ))
    }

    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for StatusWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn watch_loop(
    client: reqwest::Client,
    stream_url: String,
    policy: WatchPolicy,
    cancel: CancellationToken,
    tx: mpsc::Sender<WatchUpdate>,
) {
    let mut attempts: u32 = 0;

    loop {
        if !send_state(&tx, ConnectionState::Connecting).await {
            return;
        }

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = client
                .get(&stream_url)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .send() => result,
        };

        match connected {
            Ok(response) if response.status().is_success() => {
                if !send_state(&tx, ConnectionState::Connected).await {
                    return;
                }
                read_stream(response, &cancel, &tx, &mut attempts).await;
                if cancel.is_cancelled() {
                    return;
                }
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), url = %stream_url, "status stream rejected");
            }
            Err(err) => {
                tracing::warn!(?err, url = %stream_url, "status stream connect failed");
            }
        }

        if !send_state(&tx, ConnectionState::Disconnected).await {
            return;
        }

        attempts += 1;
        if attempts >= policy.max_attempts {
            let _ = send_state(&tx, ConnectionState::GaveUp).await;
            return;
        }

        if !send_state(&tx, ConnectionState::BackingOff).await {
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(policy.backoff_delay(attempts)) => {}
        }
    }
}

async fn read_stream(
    mut response: reqwest::Response,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<WatchUpdate>,
    attempts: &mut u32,
) {
    let mut parser = SseParser::default();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = response.chunk() => chunk,
        };
        match chunk {
            Ok(Some(chunk)) => {
                for frame in parser.feed(&chunk) {
                    if frame.data.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<StreamEvent>(&frame.data) {
                        Ok(event) => {
                            *attempts = 0;
                            if tx.send(WatchUpdate::Event { event }).await.is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(?err, data = %frame.data, "skip undecodable stream event");
                        }
                    }
                }
            }
            // Each reconnect starts a fresh stream; there is no offset resume.
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(?err, "status stream read failed");
                return;
            }
        }
    }
}

async fn send_state(tx: &mpsc::Sender<WatchUpdate>, state: ConnectionState) -> bool {
    tx.send(WatchUpdate::State { state }).await.is_ok()
}

/// What a status view displays; applying the same update twice is a no-op.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LiveStatus {
    pub connection: ConnectionState,
    pub job: Option<CrawlJobProgress>,
    pub items_processed: u64,
    pub current_url: Option<String>,
    pub last_error: Option<String>,
}

impl LiveStatus {
    pub fn apply(&mut self, update: &WatchUpdate) {
        match update {
            WatchUpdate::State { state } => self.connection = *state,
            WatchUpdate::Event {
                event:
                    StreamEvent::CrawlJobUpdate {
                        crawl_job,
                        items_processed,
                        current_url,
                        ..
                    },
            } => {
                self.job = Some(crawl_job.clone());
                self.items_processed = *items_processed;
                self.current_url = current_url.clone();
            }
            WatchUpdate::Event {
                event: StreamEvent::Error { message, .. },
            } => {
                self.last_error = Some(message.clone());
            }
        }
    }
}
