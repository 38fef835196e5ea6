//! Directory publisher
//!
//! Watches the encoder's output directory and mirrors new HLS artifacts to
//! the object store. Segments are uploaded at most once; playlists are
//! re-uploaded on every write because the encoder rewrites them in place.
//! The first successful upload of the canonical playlist produces the public
//! playback URL.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Event, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::metrics::global_metrics;
use crate::uploader::{content_type_for, ObjectStore, UploadError};

/// Delay before reading a freshly reported file, so the encoder can finish
/// flushing it
const SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Attempts per artifact before the upload is dropped
const UPLOAD_ATTEMPTS: u32 = 3;

/// Invoked with the public playback URL after the canonical playlist lands
pub type PlaybackHook = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Mirrors one stream's output directory to the object store
pub struct DirectoryPublisher {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    task_id: String,
    public_base: String,
    abr: bool,
}

impl DirectoryPublisher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: String,
        task_id: String,
        public_base: String,
        abr: bool,
    ) -> Self {
        Self {
            store,
            bucket,
            task_id,
            public_base,
            abr,
        }
    }

    /// Watch `output_dir` until the token fires, then drain in-flight uploads
    ///
    /// A watcher-registration failure is logged and ends the publisher; the
    /// stream keeps ingesting without uploads.
    pub async fn run(
        self,
        cancel: CancellationToken,
        output_dir: PathBuf,
        on_playback: PlaybackHook,
    ) {
        let (tx, rx) = mpsc::channel(256);

        let mut watcher =
            match notify::recommended_watcher(move |res: notify::Result<Event>| {
                let _ = tx.blocking_send(res);
            }) {
                Ok(w) => w,
                Err(e) => {
                    tracing::error!(error = %e, "failed to create filesystem watcher");
                    return;
                }
            };

        if let Err(e) = watcher.watch(&output_dir, RecursiveMode::NonRecursive) {
            tracing::error!(
                error = %e,
                dir = %output_dir.display(),
                "failed to watch output directory"
            );
            return;
        }

        self.event_loop(cancel, rx, on_playback).await;
    }

    async fn event_loop(
        &self,
        cancel: CancellationToken,
        mut events: mpsc::Receiver<notify::Result<Event>>,
        on_playback: PlaybackHook,
    ) {
        let mut seen_segments: HashSet<PathBuf> = HashSet::new();
        let mut uploads = JoinSet::new();
        let published = Arc::new(AtomicBool::new(false));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = events.recv() => match maybe {
                    None => {
                        tracing::warn!(stream_id = %self.task_id, "watcher channel closed");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!(stream_id = %self.task_id, error = %e, "watcher error");
                    }
                    Some(Ok(event)) => self.handle_event(
                        event,
                        &mut seen_segments,
                        &mut uploads,
                        &on_playback,
                        &published,
                    ),
                }
            }
        }

        // No new events past this point, but every spawned upload finishes.
        while uploads.join_next().await.is_some() {}
        tracing::info!(stream_id = %self.task_id, "publisher stopped after in-flight uploads");
    }

    fn handle_event(
        &self,
        event: Event,
        seen_segments: &mut HashSet<PathBuf>,
        uploads: &mut JoinSet<()>,
        on_playback: &PlaybackHook,
        published: &Arc<AtomicBool>,
    ) {
        for path in &event.paths {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // The single-rendition layout shares the output root between
            // streams, so only react to this stream's files.
            if !belongs_to_stream(name, &self.task_id) {
                continue;
            }

            if name.ends_with(".ts") && is_create(&event.kind) {
                if !seen_segments.insert(path.clone()) {
                    continue;
                }
                self.spawn_upload(uploads, path.clone(), false, on_playback, published);
            } else if name.ends_with(".m3u8") && (is_create(&event.kind) || is_write(&event.kind))
            {
                self.spawn_upload(uploads, path.clone(), true, on_playback, published);
            }
        }
    }

    fn spawn_upload(
        &self,
        uploads: &mut JoinSet<()>,
        path: PathBuf,
        playlist: bool,
        on_playback: &PlaybackHook,
        published: &Arc<AtomicBool>,
    ) {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };

        let key = format!("{}/{}", self.task_id, name);
        let content_type = content_type_for(&key);
        let url = format!("{}/{}", self.public_base.trim_end_matches('/'), key);
        let canonical = playlist && (!self.abr || name.to_lowercase().contains("master"));

        let store = self.store.clone();
        let bucket = self.bucket.clone();
        let on_playback = on_playback.clone();
        let published = published.clone();

        uploads.spawn(async move {
            tokio::time::sleep(SETTLE_DELAY).await;

            for attempt in 1..=UPLOAD_ATTEMPTS {
                match store.put(&bucket, &key, &path, content_type).await {
                    Ok(()) => {
                        global_metrics().upload_succeeded();
                        tracing::info!(key = %key, "upload successful");
                        if canonical && !published.swap(true, Ordering::SeqCst) {
                            on_playback(url).await;
                        }
                        return;
                    }
                    Err(e @ UploadError::Open { .. }) => {
                        global_metrics().upload_failed();
                        tracing::error!(error = %e, "failed to open file for upload");
                        return;
                    }
                    Err(e) => {
                        global_metrics().upload_failed();
                        tracing::error!(
                            key = %key,
                            attempt,
                            error = %e,
                            "upload failed, retrying"
                        );
                        if attempt < UPLOAD_ATTEMPTS {
                            tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                        }
                    }
                }
            }

            tracing::error!(key = %key, attempts = UPLOAD_ATTEMPTS, "dropping upload");
        });
    }
}

/// Whether a file name matches the `<id>.m3u8` / `<id>_*` layout of a stream
fn belongs_to_stream(name: &str, stream_id: &str) -> bool {
    match name.strip_prefix(stream_id) {
        Some(rest) => rest.starts_with('_') || rest.starts_with('.'),
        None => false,
    }
}

fn is_create(kind: &EventKind) -> bool {
    // Encoders that write through a temp file surface the final name as a
    // rename, not a create.
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    )
}

fn is_write(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any)
    )
}
