//! Per-stream runtime
//!
//! Composes the listener, stream key, publisher, and accept loop for one
//! stream under its cancellation scope, publishing every lifecycle transition
//! on the task's updates channel. The runtime is the sole closer of that
//! channel and only closes it after the accept loop and the publisher have
//! returned.

use std::net::SocketAddr;
use std::sync::Arc;

use srt_tokio::SrtListener;

use crate::acceptor::SrtAcceptor;
use crate::config::Config;
use crate::publisher::{DirectoryPublisher, PlaybackHook};
use crate::streamkey::StreamKeys;
use crate::task::{StreamStatus, StreamTask};
use crate::uploader::{ObjectStore, R2Uploader};

/// Drive one stream from listener setup to channel close
pub async fn run(task: Arc<StreamTask>, config: Arc<Config>) {
    run_stream(&task, &config).await;
    task.close_updates().await;
    tracing::info!(stream_id = %task.id, "stream runtime finished");
}

async fn run_stream(task: &Arc<StreamTask>, config: &Config) {
    let port = match free_port().await {
        Ok(port) => port,
        Err(e) => {
            task.update_status(StreamStatus::Stopped, format!("PORT error: {e}"))
                .await;
            return;
        }
    };

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let (_listener, mut incoming) = match SrtListener::builder().bind(addr).await {
        Ok(bound) => bound,
        Err(e) => {
            task.update_status(StreamStatus::Stopped, format!("SRT listener error: {e}"))
                .await;
            return;
        }
    };

    let Some(secret) = config.auth.hmac_secret.clone() else {
        task.update_status(
            StreamStatus::Stopped,
            "StreamKey error: HMAC secret not configured",
        )
        .await;
        return;
    };
    let keys = StreamKeys::new(secret);

    let stream_key = match keys.issue(&task.id) {
        Ok(key) => key,
        Err(e) => {
            task.update_status(StreamStatus::Stopped, format!("StreamKey error: {e}"))
                .await;
            return;
        }
    };

    let connect_url = format!(
        "srt://{}:{}?streamid={}",
        local_ip(),
        port,
        stream_key
    );
    task.update_status(
        StreamStatus::Ready,
        format!("The stream is ready! URL -> {connect_url}"),
    )
    .await;

    let Some(credentials) = config.storage.credentials() else {
        task.update_status(StreamStatus::Stopped, "Failed to initialise secrets")
            .await;
        return;
    };

    let (Some(bucket), Some(public_base)) = (
        config.storage.bucket.clone(),
        config.storage.public_base_url.clone(),
    ) else {
        task.update_status(StreamStatus::Stopped, "Failed to initialise storage")
            .await;
        return;
    };

    let uploader: Arc<dyn ObjectStore> = Arc::new(R2Uploader::new(
        &credentials.account_id,
        &credentials.access_key,
        &credentials.secret_key,
    ));

    let stream_dir = config.server.output_dir.join(&task.id);
    if let Err(e) = tokio::fs::create_dir_all(&stream_dir).await {
        task.update_status(
            StreamStatus::Stopped,
            format!("Failed to create upload directory: {e}"),
        )
        .await;
        return;
    }

    // The ABR ladder writes under its own directory; a single rendition
    // shares the output root with an id-prefixed filename.
    let watch_dir = if task.abr {
        stream_dir
    } else {
        config.server.output_dir.clone()
    };

    let publisher = DirectoryPublisher::new(
        uploader,
        bucket,
        task.id.clone(),
        public_base,
        task.abr,
    );

    // Child token: the publisher must also wind down when the accept loop
    // returns without the task's scope being cancelled (idle timeout).
    let publisher_cancel = task.cancel_token().child_token();
    let publisher_handle = tokio::spawn(publisher.run(
        publisher_cancel.clone(),
        watch_dir,
        playback_hook(task),
    ));

    let acceptor = SrtAcceptor::new(keys);
    acceptor.run(task, &mut incoming, &config.server).await;

    publisher_cancel.cancel();
    if let Err(e) = publisher_handle.await {
        tracing::error!(stream_id = %task.id, error = %e, "publisher task panicked");
    }
}

/// Hook that latches the playback URL and promotes the stream to STREAMING
///
/// The latch makes the promotion idempotent regardless of how many playlist
/// uploads match the publisher's filter.
fn playback_hook(task: &Arc<StreamTask>) -> PlaybackHook {
    let task = task.clone();
    Arc::new(move |url: String| {
        let task = task.clone();
        Box::pin(async move {
            if task.set_playback_url(url.clone()) {
                task.update_status(
                    StreamStatus::Streaming,
                    format!("Live link generated : {url}"),
                )
                .await;
            }
        })
    })
}

/// Reserve an ephemeral port by probing a TCP bind on `:0`
///
/// The port is released before the SRT bind, which tolerates the small race.
async fn free_port() -> std::io::Result<u16> {
    let probe = tokio::net::TcpListener::bind(("0.0.0.0", 0)).await?;
    Ok(probe.local_addr()?.port())
}

/// Best-effort non-loopback IPv4 for the advertised connect URL
fn local_ip() -> String {
    let discovered = std::net::UdpSocket::bind("0.0.0.0:0").ok().and_then(|s| {
        s.connect("8.8.8.8:80").ok()?;
        let addr = s.local_addr().ok()?;
        Some(addr.ip().to_string())
    });
    discovered.unwrap_or_else(|| "127.0.0.1".to_string())
}
