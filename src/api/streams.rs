//! Stream control endpoints

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::task::StopReason;

/// Envelope every control endpoint responds with
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ApiResponse {
    pub(crate) fn ok(data: impl Into<String>) -> Self {
        Self {
            success: true,
            error: None,
            data: Some(data.into()),
        }
    }

    pub(crate) fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            data: None,
        }
    }
}

/// Request body shared by the stream endpoints
#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub stream_id: String,

    #[serde(default)]
    pub webhook_urls: Vec<String>,

    #[serde(default)]
    pub abr: bool,
}

fn parse_body(body: &Bytes) -> Result<StreamRequest, Response> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::error!(error = %e, "failed to decode stream request body");
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err("Cannot read Request body!")),
        )
            .into_response()
    })
}

/// `POST /api/start`
pub async fn start_stream(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    tracing::info!(
        stream_id = %request.stream_id,
        webhooks = request.webhook_urls.len(),
        abr = request.abr,
        "received start stream request"
    );

    state
        .manager
        .start(&request.stream_id, request.webhook_urls, request.abr);

    Json(ApiResponse::ok("Stream launching!")).into_response()
}

/// `POST /api/stop`
pub async fn stop_stream(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    tracing::info!(stream_id = %request.stream_id, "received stop stream request");

    state.manager.stop(&request.stream_id, StopReason::UserRequest);

    Json(ApiResponse::ok("Stream stopped!")).into_response()
}

/// `POST /api/status`
pub async fn stream_status(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match state.manager.status(&request.stream_id).await {
        Some(status) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::ok(format!("Status: {status}"))),
        )
            .into_response(),
        None => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err("Task not found")),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_request_defaults() {
        let request: StreamRequest = serde_json::from_str(r#"{"stream_id":"s1"}"#).unwrap();
        assert_eq!(request.stream_id, "s1");
        assert!(request.webhook_urls.is_empty());
        assert!(!request.abr);
    }

    #[test]
    fn test_stream_request_full() {
        let request: StreamRequest = serde_json::from_str(
            r#"{"stream_id":"s2","webhook_urls":["http://hook"],"abr":true}"#,
        )
        .unwrap();
        assert_eq!(request.webhook_urls, vec!["http://hook"]);
        assert!(request.abr);
    }

    #[test]
    fn test_response_envelope_omits_empty_fields() {
        let ok = serde_json::to_string(&ApiResponse::ok("done")).unwrap();
        assert_eq!(ok, r#"{"success":true,"data":"done"}"#);

        let err = serde_json::to_string(&ApiResponse::err("bad")).unwrap();
        assert_eq!(err, r#"{"success":false,"error":"bad"}"#);
    }
}
