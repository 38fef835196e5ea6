//! SRT accept loop
//!
//! Waits for broadcaster connections on an already-bound listener, checks the
//! presented stream key, and hands each accepted connection to the encoder
//! supervisor. The loop survives broadcaster disconnects (reconnects restart
//! the encoder) and exits on cancellation or after the idle deadline.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use srt_protocol::packet::{CoreRejectReason, RejectReason};
use srt_tokio::SrtIncoming;

use crate::config::ServerConfig;
use crate::encoder::{self, EncoderError};
use crate::streamkey::StreamKeys;
use crate::task::{StreamStatus, StreamTask};

/// How long to wait for a broadcaster before stopping the stream
pub const ACCEPT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Pause after a rejected handshake, so a misconfigured client cannot spin
/// the accept loop
const REJECT_BACKOFF: Duration = Duration::from_millis(300);

/// Authenticating accept loop for one stream's listener
pub struct SrtAcceptor {
    keys: StreamKeys,
    idle_timeout: Duration,
}

impl SrtAcceptor {
    pub fn new(keys: StreamKeys) -> Self {
        Self {
            keys,
            idle_timeout: ACCEPT_IDLE_TIMEOUT,
        }
    }

    /// Override the idle deadline (tests)
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Run until cancellation, idle timeout, or listener closure
    ///
    /// The deadline is re-armed for every wait: after a rejected handshake
    /// and after a broadcaster disconnect the stream gets a fresh window.
    pub async fn run(&self, task: &Arc<StreamTask>, incoming: &mut SrtIncoming, server: &ServerConfig) {
        let token = task.cancel_token();
        let mut requests = incoming.incoming();

        loop {
            if token.is_cancelled() {
                publish_stopped(task).await;
                return;
            }

            let request = tokio::select! {
                _ = token.cancelled() => {
                    publish_stopped(task).await;
                    return;
                }
                _ = tokio::time::sleep(self.idle_timeout) => {
                    task.update_status(StreamStatus::Stopped, "TIMEOUT").await;
                    return;
                }
                maybe = requests.next() => match maybe {
                    Some(request) => request,
                    None => {
                        task.update_status(StreamStatus::Stopped, "SRT listener closed")
                            .await;
                        return;
                    }
                }
            };

            let presented = request
                .stream_id()
                .map(|s| s.to_string())
                .unwrap_or_default();

            if !self.keys.verify(&task.id, &presented) {
                tracing::warn!(stream_id = %task.id, "rejecting broadcaster with bad stream key");
                if let Err(e) = request
                    .reject(RejectReason::Core(CoreRejectReason::BadSecret))
                    .await
                {
                    tracing::error!(stream_id = %task.id, error = %e, "failed to reject connection");
                }
                tokio::time::sleep(REJECT_BACKOFF).await;
                continue;
            }

            let socket = match request.accept(None).await {
                Ok(socket) => socket,
                Err(e) => {
                    task.update_status(StreamStatus::Ready, format!("Accept failed: {e}"))
                        .await;
                    continue;
                }
            };

            tracing::info!(stream_id = %task.id, "broadcaster connected");

            match encoder::run(&token, socket, task, server).await {
                Err(EncoderError::Cancelled) => {
                    // The supervisor already published the terminal STOPPED;
                    // returning here keeps the stop single-fire.
                    return;
                }
                Err(e) => {
                    if !token.is_cancelled() {
                        task.update_status(StreamStatus::Ready, format!("Processing error: {e}"))
                            .await;
                    }
                }
                Ok(()) => {}
            }
        }
    }
}

async fn publish_stopped(task: &StreamTask) {
    task.update_status(
        StreamStatus::Stopped,
        format!("Stream stopped: {}", task.stop_cause()),
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::StopReason;
    use srt_tokio::SrtListener;
    use std::net::SocketAddr;

    async fn bind_listener() -> (srt_tokio::SrtListener, SrtIncoming) {
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        SrtListener::builder().bind(addr).await.unwrap()
    }

    #[tokio::test]
    async fn test_idle_timeout_stops_stream() {
        let (_listener, mut incoming) = bind_listener().await;
        let (task, mut rx) = StreamTask::new("s1".to_string(), Vec::new(), false);

        let acceptor = SrtAcceptor::new(StreamKeys::new("secret"))
            .with_idle_timeout(Duration::from_millis(150));
        acceptor
            .run(&task, &mut incoming, &ServerConfig::default())
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.status, StreamStatus::Stopped);
        assert_eq!(event.message, "TIMEOUT");
        assert_eq!(task.status().await, StreamStatus::Stopped);
    }

    #[tokio::test]
    async fn test_cancellation_stops_with_cause() {
        let (_listener, mut incoming) = bind_listener().await;
        let (task, mut rx) = StreamTask::new("s1".to_string(), Vec::new(), false);

        task.cancel(StopReason::UserRequest);

        let acceptor = SrtAcceptor::new(StreamKeys::new("secret"));
        acceptor
            .run(&task, &mut incoming, &ServerConfig::default())
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.status, StreamStatus::Stopped);
        assert!(event.message.contains("user initiated request"));
    }
}
