//! Stream task model and manager
//!
//! A [`StreamTask`] is the shared record for one live ingest job: its status,
//! webhook targets, cancellation scope, and the bounded updates channel its
//! lifecycle transitions are published on. The [`TaskManager`] owns the
//! registry of tasks and spawns one runtime plus one webhook consumer per
//! stream.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::metrics::global_metrics;
use crate::{runtime, webhook};

/// Capacity of the per-task updates channel
const UPDATES_CAPACITY: usize = 4;

/// Webhook POST timeout
const WEBHOOK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Lifecycle state of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamStatus {
    /// Registered, no listener yet
    Initialised,

    /// Listening, awaiting a broadcaster
    Ready,

    /// Broadcaster connected and a playback URL has been published
    Streaming,

    /// Terminal
    Stopped,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamStatus::Initialised => "INITIALISED",
            StreamStatus::Ready => "READY",
            StreamStatus::Streaming => "STREAMING",
            StreamStatus::Stopped => "STOPPED",
        };
        write!(f, "{s}")
    }
}

/// Why a stream's cancellation scope was closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Stop requested through the control API
    UserRequest,

    /// The runtime returned and the manager is cleaning up
    RuntimeExit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::UserRequest => write!(f, "user initiated request"),
            StopReason::RuntimeExit => write!(f, "stream finished"),
        }
    }
}

/// One lifecycle transition, as delivered to webhooks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    #[serde(rename = "Status")]
    pub status: StreamStatus,

    #[serde(rename = "Update")]
    pub message: String,
}

struct TaskInner {
    status: StreamStatus,
    /// Present until the runtime closes the channel; `None` afterwards, so a
    /// late producer degrades to a no-op instead of a send-after-close.
    updates: Option<mpsc::Sender<UpdateEvent>>,
}

/// Shared per-stream record
pub struct StreamTask {
    pub id: String,

    /// Webhook URLs notified of every transition, in order
    pub webhooks: Vec<String>,

    /// Adaptive-ladder vs single-rendition encoding
    pub abr: bool,

    pub started_at: DateTime<Utc>,

    cancel: CancellationToken,
    stop_cause: OnceLock<StopReason>,
    playback_url: OnceLock<String>,
    inner: tokio::sync::Mutex<TaskInner>,
}

impl StreamTask {
    /// Create a task and the receiving half of its updates channel
    pub fn new(
        id: String,
        webhooks: Vec<String>,
        abr: bool,
    ) -> (Arc<Self>, mpsc::Receiver<UpdateEvent>) {
        let (tx, rx) = mpsc::channel(UPDATES_CAPACITY);

        let task = Arc::new(Self {
            id,
            webhooks,
            abr,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
            stop_cause: OnceLock::new(),
            playback_url: OnceLock::new(),
            inner: tokio::sync::Mutex::new(TaskInner {
                status: StreamStatus::Initialised,
                updates: Some(tx),
            }),
        });

        (task, rx)
    }

    /// Record a transition and publish it on the updates channel
    ///
    /// The per-task mutex serializes producers, so events arrive at the
    /// consumer in the order their transitions were made.
    pub async fn update_status(&self, status: StreamStatus, message: impl Into<String>) {
        let message = message.into();
        let mut inner = self.inner.lock().await;
        inner.status = status;

        if let Some(tx) = &inner.updates {
            let event = UpdateEvent { status, message };
            if tx.send(event).await.is_err() {
                tracing::warn!(stream_id = %self.id, "updates consumer gone, dropping event");
            }
        }
    }

    pub async fn status(&self) -> StreamStatus {
        self.inner.lock().await.status
    }

    /// Close the task's scope, recording the first cause
    pub fn cancel(&self, reason: StopReason) {
        let _ = self.stop_cause.set(reason);
        self.cancel.cancel();
    }

    /// Cause recorded by [`cancel`](Self::cancel), if any
    pub fn stop_cause(&self) -> StopReason {
        self.stop_cause
            .get()
            .cloned()
            .unwrap_or(StopReason::RuntimeExit)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Latch the playback URL; `true` only for the first caller
    pub fn set_playback_url(&self, url: String) -> bool {
        self.playback_url.set(url).is_ok()
    }

    pub fn playback_url(&self) -> Option<&str> {
        self.playback_url.get().map(String::as_str)
    }

    /// Drop the sending half of the updates channel
    ///
    /// Called once by the runtime after every producer has returned; the
    /// webhook consumer drains the remaining events and exits.
    pub async fn close_updates(&self) {
        self.inner.lock().await.updates.take();
    }
}

/// Stream counts by lifecycle bucket, for the metrics endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamCounts {
    pub active: u64,
    pub idle: u64,
    pub stopped: u64,
}

/// Registry of live stream tasks
pub struct TaskManager {
    registry: Mutex<HashMap<String, Arc<StreamTask>>>,
    config: Arc<Config>,
    http: reqwest::Client,
}

impl TaskManager {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();

        Arc::new(Self {
            registry: Mutex::new(HashMap::new()),
            config,
            http,
        })
    }

    /// Register a stream and spawn its runtime and webhook consumer
    ///
    /// Starting an id that is already registered is logged and ignored.
    pub fn start(self: &Arc<Self>, id: &str, webhooks: Vec<String>, abr: bool) {
        let (task, updates_rx) = {
            let mut registry = self.registry.lock().unwrap();
            if registry.contains_key(id) {
                tracing::error!(stream_id = %id, "stream already registered");
                return;
            }

            let (task, rx) = StreamTask::new(id.to_string(), webhooks, abr);
            registry.insert(id.to_string(), task.clone());
            (task, rx)
        };

        global_metrics().stream_started();

        tokio::spawn(webhook::fanout(task.clone(), updates_rx, self.http.clone()));

        let manager = self.clone();
        let config = self.config.clone();
        let stream_id = id.to_string();
        tokio::spawn(async move {
            runtime::run(task, config).await;
            manager.stop(&stream_id, StopReason::RuntimeExit);
        });
    }

    /// Cancel a stream's scope with the given cause
    ///
    /// Idempotent; the entry stays in the registry so late status queries
    /// still resolve. Stopping an unknown id is a logged no-op.
    pub fn stop(&self, id: &str, reason: StopReason) {
        let registry = self.registry.lock().unwrap();
        match registry.get(id) {
            Some(task) => task.cancel(reason),
            None => tracing::error!(stream_id = %id, "stop requested for unknown stream"),
        }
    }

    /// Current status of a stream, or `None` if the id was never registered
    pub async fn status(&self, id: &str) -> Option<StreamStatus> {
        let task = self.registry.lock().unwrap().get(id).cloned();
        match task {
            Some(task) => Some(task.status().await),
            None => None,
        }
    }

    /// Count streams by bucket in a single registry pass
    pub async fn counts(&self) -> StreamCounts {
        let tasks: Vec<Arc<StreamTask>> =
            self.registry.lock().unwrap().values().cloned().collect();

        let mut counts = StreamCounts {
            active: 0,
            idle: 0,
            stopped: 0,
        };
        for task in tasks {
            match task.status().await {
                StreamStatus::Streaming => counts.active += 1,
                StreamStatus::Stopped => counts.stopped += 1,
                _ => counts.idle += 1,
            }
        }
        counts
    }

    /// Number of registered streams, including stopped ones
    pub fn registered(&self) -> usize {
        self.registry.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_status() {
        let (task, _rx) = StreamTask::new("s1".to_string(), Vec::new(), false);
        assert_eq!(task.status().await, StreamStatus::Initialised);
    }

    #[tokio::test]
    async fn test_updates_arrive_in_producer_order() {
        let (task, mut rx) = StreamTask::new("s1".to_string(), Vec::new(), false);

        task.update_status(StreamStatus::Ready, "listening").await;
        task.update_status(StreamStatus::Streaming, "live").await;

        assert_eq!(rx.recv().await.unwrap().status, StreamStatus::Ready);
        assert_eq!(rx.recv().await.unwrap().status, StreamStatus::Streaming);
        assert_eq!(task.status().await, StreamStatus::Streaming);
    }

    #[tokio::test]
    async fn test_close_updates_ends_consumer() {
        let (task, mut rx) = StreamTask::new("s1".to_string(), Vec::new(), false);

        task.update_status(StreamStatus::Ready, "listening").await;
        task.close_updates().await;

        assert_eq!(rx.recv().await.unwrap().status, StreamStatus::Ready);
        assert!(rx.recv().await.is_none());

        // A late producer must not panic or resurrect the channel.
        task.update_status(StreamStatus::Stopped, "late").await;
        assert_eq!(task.status().await, StreamStatus::Stopped);
    }

    #[tokio::test]
    async fn test_playback_url_latches_once() {
        let (task, _rx) = StreamTask::new("s1".to_string(), Vec::new(), true);

        assert!(task.set_playback_url("https://cdn/s1/a.m3u8".to_string()));
        assert!(!task.set_playback_url("https://cdn/s1/b.m3u8".to_string()));
        assert_eq!(task.playback_url(), Some("https://cdn/s1/a.m3u8"));
    }

    #[tokio::test]
    async fn test_cancel_records_first_cause() {
        let (task, _rx) = StreamTask::new("s1".to_string(), Vec::new(), false);

        task.cancel(StopReason::UserRequest);
        task.cancel(StopReason::RuntimeExit);

        assert!(task.cancel_token().is_cancelled());
        assert_eq!(task.stop_cause(), StopReason::UserRequest);
    }

    #[test]
    fn test_update_event_json_shape() {
        let event = UpdateEvent {
            status: StreamStatus::Streaming,
            message: "Live link generated : https://cdn/s1/s1.m3u8".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"Status\":\"STREAMING\""));
        assert!(json.contains("\"Update\":\"Live link generated"));

        let parsed: UpdateEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_status_display_matches_wire_format() {
        for status in [
            StreamStatus::Initialised,
            StreamStatus::Ready,
            StreamStatus::Streaming,
            StreamStatus::Stopped,
        ] {
            let display = status.to_string();
            let wire = serde_json::to_string(&status).unwrap();
            assert_eq!(wire, format!("\"{display}\""));
        }
    }
}
