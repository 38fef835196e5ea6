//! Encoder supervision
//!
//! Runs one ffmpeg invocation per accepted SRT connection: bytes received
//! from the broadcaster are pumped into the encoder's stdin, and the encoder
//! writes HLS artifacts for the publisher to pick up. The child and the
//! socket never outlive a single invocation.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use srt_tokio::SrtSocket;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::task::{StreamStatus, StreamTask};

/// Grace period between the soft interrupt and a hard kill
const EXIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("failed to create output directory: {0}")]
    OutputDir(std::io::Error),

    #[error("ffmpeg start error: {0}")]
    Spawn(std::io::Error),

    #[error("ffmpeg stdin unavailable")]
    Stdin,

    #[error("SRT read error: {0}")]
    Read(String),

    #[error("ffmpeg write error: {0}")]
    Write(std::io::Error),

    #[error("broadcaster disconnected")]
    Disconnected,

    #[error("stream cancelled")]
    Cancelled,
}

/// ffmpeg argument vector for a stream
///
/// Single rendition writes `<root>/<id>_%03d.ts` + `<root>/<id>.m3u8`; the
/// adaptive ladder writes three keyframe-aligned variants plus a master
/// playlist under `<root>/<id>/`.
pub fn encoder_args(stream_id: &str, abr: bool, output_root: &Path) -> Vec<String> {
    let root = output_root.display();

    let mut args: Vec<String> = [
        "-f",
        "mpegts",
        "-i",
        "pipe:0",
        "-c:v",
        "libx264",
        "-preset",
        "veryfast",
        "-tune",
        "zerolatency",
        "-crf",
        "23",
        "-g",
        "60",
        "-keyint_min",
        "60",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    if abr {
        args.extend(
            [
                "-sc_threshold",
                "0",
                "-c:a",
                "aac",
                "-ar",
                "48000",
                "-b:a",
                "128k",
                "-map",
                "0:v:0",
                "-map",
                "0:a:0",
                "-b:v:0",
                "5000k",
                "-s:v:0",
                "1920x1080",
                "-map",
                "0:v:0",
                "-map",
                "0:a:0",
                "-b:v:1",
                "3000k",
                "-s:v:1",
                "1280x720",
                "-map",
                "0:v:0",
                "-map",
                "0:a:0",
                "-b:v:2",
                "1500k",
                "-s:v:2",
                "854x480",
            ]
            .into_iter()
            .map(String::from),
        );
    } else {
        args.extend(["-c:a", "aac", "-b:a", "128k"].into_iter().map(String::from));
    }

    args.extend(
        [
            "-f",
            "hls",
            "-hls_time",
            "4",
            "-hls_list_size",
            "10",
            "-hls_flags",
            "delete_segments+independent_segments+append_list",
            "-hls_segment_type",
            "mpegts",
            "-hls_allow_cache",
            "1",
        ]
        .into_iter()
        .map(String::from),
    );

    if abr {
        args.extend([
            "-var_stream_map".to_string(),
            "v:0,a:0 v:1,a:1 v:2,a:2".to_string(),
            "-master_pl_name".to_string(),
            format!("{stream_id}_master.m3u8"),
            "-hls_segment_filename".to_string(),
            format!("{root}/{stream_id}/{stream_id}_%v_%03d.ts"),
            format!("{root}/{stream_id}/{stream_id}_%v.m3u8"),
        ]);
    } else {
        args.extend([
            "-hls_segment_filename".to_string(),
            format!("{root}/{stream_id}_%03d.ts"),
            format!("{root}/{stream_id}.m3u8"),
        ]);
    }

    args
}

/// Pump one connection into one encoder until error or cancellation
///
/// Always returns an error so the accept loop can decide between reconnect
/// and shutdown; stdin and the socket are closed and the child reaped on
/// every path.
pub async fn run(
    cancel: &CancellationToken,
    mut socket: SrtSocket,
    task: &StreamTask,
    server: &ServerConfig,
) -> Result<(), EncoderError> {
    tokio::fs::create_dir_all(server.output_dir.join(&task.id))
        .await
        .map_err(EncoderError::OutputDir)?;

    let mut child = Command::new(&server.encoder_binary)
        .args(encoder_args(&task.id, task.abr, &server.output_dir))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(EncoderError::Spawn)?;

    let mut stdin = child.stdin.take().ok_or(EncoderError::Stdin)?;

    tracing::info!(stream_id = %task.id, abr = task.abr, "encoder started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                task.update_status(StreamStatus::Stopped, "User stopped the stream!")
                    .await;
                drop(stdin);
                let _ = socket.close().await;
                interrupt(&child);
                await_exit(&mut child).await;
                return Err(EncoderError::Cancelled);
            }
            received = socket.next() => match received {
                Some(Ok((_, data))) => {
                    if let Err(e) = stdin.write_all(&data).await {
                        drop(stdin);
                        let _ = socket.close().await;
                        await_exit(&mut child).await;
                        return Err(EncoderError::Write(e));
                    }
                }
                Some(Err(e)) => {
                    drop(stdin);
                    let _ = socket.close().await;
                    await_exit(&mut child).await;
                    return Err(EncoderError::Read(e.to_string()));
                }
                None => {
                    drop(stdin);
                    let _ = socket.close().await;
                    await_exit(&mut child).await;
                    return Err(EncoderError::Disconnected);
                }
            }
        }
    }
}

/// Ask the encoder to stop so it can flush its last segment
#[cfg(unix)]
fn interrupt(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
            tracing::warn!(error = %e, "failed to interrupt encoder");
        }
    }
}

#[cfg(not(unix))]
fn interrupt(_child: &Child) {}

async fn await_exit(child: &mut Child) {
    match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => {
            if !status.success() {
                tracing::warn!(status = %status, "encoder exited with error");
            }
        }
        Ok(Err(e)) => tracing::error!(error = %e, "failed to reap encoder"),
        Err(_) => {
            tracing::warn!("encoder ignored shutdown, killing");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}
