//! Object-store uploads
//!
//! [`ObjectStore`] is the seam between the directory publisher and the
//! storage backend; the production implementation targets Cloudflare R2
//! through the S3 API. One call, one PutObject; retry policy belongs to the
//! caller.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;

/// MIME type for HLS playlists
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// MIME type for MPEG-TS segments
pub const SEGMENT_CONTENT_TYPE: &str = "video/MP2T";

/// Errors from a single upload attempt
///
/// `Open` means the local file could not be read and retrying is pointless;
/// `Put` is a storage-side failure the caller may retry.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("failed to open {path}: {message}")]
    Open { path: PathBuf, message: String },

    #[error("failed to put {key}: {message}")]
    Put { key: String, message: String },
}

/// A destination for HLS artifacts
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `path` to `bucket` under `key`
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), UploadError>;
}

/// Cloudflare R2 client (S3-compatible)
pub struct R2Uploader {
    client: aws_sdk_s3::Client,
}

impl R2Uploader {
    /// Build a client for the account's R2 endpoint with static credentials
    pub fn new(account_id: &str, access_key: &str, secret_key: &str) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "r2-static");
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("auto"))
            .endpoint_url(format!("https://{account_id}.r2.cloudflarestorage.com"))
            .credentials_provider(credentials)
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(config),
        }
    }
}

#[async_trait]
impl ObjectStore for R2Uploader {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), UploadError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| UploadError::Open {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| UploadError::Put {
                key: key.to_string(),
                message: DisplayErrorContext(e).to_string(),
            })?;

        Ok(())
    }
}

/// Content type for an object key, derived from its extension
pub fn content_type_for(key: &str) -> &'static str {
    if key.ends_with(".m3u8") {
        PLAYLIST_CONTENT_TYPE
    } else if key.ends_with(".ts") {
        SEGMENT_CONTENT_TYPE
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for_playlists() {
        assert_eq!(content_type_for("s1/s1.m3u8"), PLAYLIST_CONTENT_TYPE);
        assert_eq!(
            content_type_for("s1/s1_master.m3u8"),
            PLAYLIST_CONTENT_TYPE
        );
    }

    #[test]
    fn test_content_type_for_segments() {
        assert_eq!(content_type_for("s1/s1_000.ts"), SEGMENT_CONTENT_TYPE);
    }

    #[test]
    fn test_content_type_fallback() {
        assert_eq!(content_type_for("s1/thumb.jpg"), "application/octet-stream");
    }

    #[test]
    fn test_upload_error_display() {
        let err = UploadError::Put {
            key: "s1/s1.m3u8".to_string(),
            message: "access denied".to_string(),
        };
        assert!(err.to_string().contains("s1/s1.m3u8"));
        assert!(err.to_string().contains("access denied"));
    }
}
