//! Stream-key issuance and verification
//!
//! A stream key is an HMAC-SHA-256 of the stream id under the process secret,
//! hex-encoded, carried in the SRT `streamid` handshake field. Verification is
//! constant-time and bound to the exact stream id the key was issued for.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Errors raised while issuing a stream key
#[derive(Debug, thiserror::Error)]
pub enum StreamKeyError {
    #[error("invalid HMAC key material")]
    InvalidKey,
}

/// Issues and verifies stream keys for broadcaster authentication
#[derive(Clone)]
pub struct StreamKeys {
    secret: Vec<u8>,
}

impl StreamKeys {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Issue the key a broadcaster must present for `stream_id`
    pub fn issue(&self, stream_id: &str) -> Result<String, StreamKeyError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| StreamKeyError::InvalidKey)?;
        mac.update(stream_id.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Check a presented key against the one issued for `stream_id`
    ///
    /// Returns `false` for malformed tokens and for keys issued for any other
    /// stream id. The digest comparison is constant-time.
    pub fn verify(&self, stream_id: &str, token: &str) -> bool {
        let Ok(digest) = hex::decode(token) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return false;
        };
        mac.update(stream_id.as_bytes());
        mac.verify_slice(&digest).is_ok()
    }
}
