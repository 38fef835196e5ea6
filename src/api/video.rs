//! Local HLS artifact serving
//!
//! Streams files from the output directory with the HLS content types and
//! single-range support, so local playback works while segments are still
//! being uploaded.

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio_util::io::ReaderStream;

use super::streams::ApiResponse;
use super::AppState;
use crate::uploader::content_type_for;

/// `GET /video/*path`
pub async fn serve_video(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    if path.split('/').any(|part| part == "..") {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err("Error accessing file")),
        )
            .into_response();
    }

    let file_path = state.config.server.output_dir.join(&path);
    let mut file = match File::open(&file_path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(path = %file_path.display(), error = %e, "failed to open video chunk");
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::err("Error accessing file")),
            )
                .into_response();
        }
    };

    let len = match file.metadata().await {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            tracing::error!(path = %file_path.display(), error = %e, "failed to stat video chunk");
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::err("Error accessing file")),
            )
                .into_response();
        }
    };

    let content_type = content_type_for(&path);

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| parse_range(h, len));

    match range {
        Some((start, end)) => {
            if file.seek(SeekFrom::Start(start)).await.is_err() {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::err("Error accessing file")),
                )
                    .into_response();
            }

            let stream = ReaderStream::new(file.take(end - start + 1));
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{len}"))
                .header(header::CONTENT_LENGTH, end - start + 1)
                .body(Body::from_stream(stream))
                .unwrap()
        }
        None => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CONTENT_LENGTH, len)
            .body(Body::from_stream(ReaderStream::new(file)))
            .unwrap(),
    }
}

/// Parse a single `bytes=start-end` range against a known length
///
/// Suffix ranges (`bytes=-N`) are honored; anything malformed or
/// unsatisfiable yields `None` and the full file is served instead.
fn parse_range(header: &str, len: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start_s, end_s) = spec.split_once('-')?;

    if start_s.is_empty() {
        let suffix: u64 = end_s.parse().ok()?;
        if suffix == 0 || len == 0 {
            return None;
        }
        let suffix = suffix.min(len);
        return Some((len - suffix, len - 1));
    }

    let start: u64 = start_s.parse().ok()?;
    let end: u64 = if end_s.is_empty() {
        len.checked_sub(1)?
    } else {
        end_s.parse().ok()?
    };

    if start > end || end >= len {
        return None;
    }
    Some((start, end))
}
