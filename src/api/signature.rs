//! Request-signature middleware
//!
//! Every control endpoint requires an `LT-SIGNATURE` header carrying the
//! hex-encoded HMAC-SHA-256 of the raw request body under the shared secret.
//! Missing header means 400, bad signature 403, unconfigured secret 500.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the request signature
pub const SIGNATURE_HEADER: &str = "LT-SIGNATURE";

/// Largest request body the middleware will buffer
const MAX_BODY_BYTES: usize = 64 * 1024;

pub async fn verify_request(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(signature) = request
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
    else {
        return (
            StatusCode::BAD_REQUEST,
            "Missing Header for Verification!",
        )
            .into_response();
    };

    let (parts, body) = request.into_parts();
    let body_bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, "Error reading request body").into_response();
        }
    };

    let Some(secret) = state.config.auth.hmac_secret.as_deref() else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
    };

    if !verify_hmac(&body_bytes, secret.as_bytes(), &signature) {
        return (StatusCode::FORBIDDEN, "Invalid Request").into_response();
    }

    // Hand the buffered body back to the handler.
    let request = Request::from_parts(parts, Body::from(body_bytes));
    next.run(request).await
}

/// Constant-time check of a hex signature against the body digest
pub fn verify_hmac(body: &[u8], secret: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Signature a client must send for `body` (also used by tests)
pub fn sign(body: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_then_verify() {
        let body = br#"{"stream_id":"s1"}"#;
        let signature = sign(body, b"secret");
        assert!(verify_hmac(body, b"secret", &signature));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let signature = sign(br#"{"stream_id":"s1"}"#, b"secret");
        assert!(!verify_hmac(br#"{"stream_id":"s2"}"#, b"secret", &signature));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = br#"{"stream_id":"s1"}"#;
        let signature = sign(body, b"secret");
        assert!(!verify_hmac(body, b"other", &signature));
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        assert!(!verify_hmac(b"{}", b"secret", "zz-not-hex"));
    }
}
