//! Webhook fanout
//!
//! Drains a task's updates channel and POSTs each event to every configured
//! webhook URL. Delivery is sequential per event, so a single endpoint sees
//! transitions in the order they were produced. Failures are logged and
//! skipped; they never stall the stream beyond the channel's capacity.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::metrics::global_metrics;
use crate::task::{StreamTask, UpdateEvent};

/// Consume a task's updates until the runtime closes the channel
pub async fn fanout(
    task: Arc<StreamTask>,
    mut updates: mpsc::Receiver<UpdateEvent>,
    client: reqwest::Client,
) {
    while let Some(event) = updates.recv().await {
        tracing::info!(
            stream_id = %task.id,
            status = %event.status,
            "{}",
            event.message
        );

        for url in &task.webhooks {
            global_metrics().webhook_attempted();
            match client.post(url).json(&event).send().await {
                Ok(response) => {
                    if !response.status().is_success() {
                        tracing::warn!(
                            stream_id = %task.id,
                            url = %url,
                            status = response.status().as_u16(),
                            "webhook endpoint returned non-success"
                        );
                    }
                    // Drain the body so the connection can be reused.
                    let _ = response.bytes().await;
                }
                Err(e) => {
                    global_metrics().webhook_failed();
                    tracing::error!(
                        stream_id = %task.id,
                        url = %url,
                        error = %e,
                        "failed to deliver webhook"
                    );
                }
            }
        }
    }

    tracing::debug!(stream_id = %task.id, "updates channel closed, webhook fanout done");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{StreamStatus, StreamTask};

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Mutex;

    type Received = Arc<Mutex<Vec<UpdateEvent>>>;

    async fn record(State(received): State<Received>, Json(event): Json<UpdateEvent>) {
        received.lock().unwrap().push(event);
    }

    async fn spawn_sink() -> (String, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/hook", post(record))
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/hook"), received)
    }

    #[tokio::test]
    async fn test_events_delivered_in_order() {
        let (url, received) = spawn_sink().await;

        let (task, rx) = StreamTask::new("s1".to_string(), vec![url], false);
        let worker = tokio::spawn(fanout(task.clone(), rx, reqwest::Client::new()));

        task.update_status(StreamStatus::Ready, "listening").await;
        task.update_status(StreamStatus::Stopped, "TIMEOUT").await;
        task.close_updates().await;
        worker.await.unwrap();

        let events = received.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, StreamStatus::Ready);
        assert_eq!(events[1].status, StreamStatus::Stopped);
        assert_eq!(events[1].message, "TIMEOUT");
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_skipped() {
        let (good_url, received) = spawn_sink().await;
        let bad_url = "http://127.0.0.1:9/unreachable".to_string();

        let (task, rx) = StreamTask::new("s1".to_string(), vec![bad_url, good_url], false);
        let worker = tokio::spawn(fanout(task.clone(), rx, reqwest::Client::new()));

        task.update_status(StreamStatus::Ready, "listening").await;
        task.close_updates().await;
        worker.await.unwrap();

        // The failing URL must not prevent delivery to the next one.
        assert_eq!(received.lock().unwrap().len(), 1);
    }
}
