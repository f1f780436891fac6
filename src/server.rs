use crate::backend::BackendConfig;
use crate::config::force_stream_from_env;
use crate::error::{ProxyError, Result};
use crate::proxy::{Relay, RelayReply, RelayStream};
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Header carrying the base64 backend descriptor.
pub const BACKEND_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/v1/messages/count_tokens", post(handle_count_tokens))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match relay_messages(&state, &headers, &body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn relay_messages(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<Response> {
    let backend = backend_from_headers(headers)?;

    let request: MessagesRequest = serde_json::from_slice(body).map_err(|e| {
        tracing::warn!(error = %e, "Failed to parse request");
        ProxyError::invalid_request(format!("Invalid request body: {e}"))
    })?;

    let reply = state
        .relay
        .handle(backend, request, force_stream_from_env())
        .await?;

    match reply {
        RelayReply::Message(message) => Ok(Json(message).into_response()),
        RelayReply::Stream(stream) => sse_response(stream),
    }
}

fn backend_from_headers(headers: &HeaderMap) -> Result<BackendConfig> {
    let value = headers
        .get(BACKEND_HEADER)
        .ok_or_else(|| ProxyError::authentication("Missing x-api-key header"))?;
    let value = value
        .to_str()
        .map_err(|_| ProxyError::invalid_request("x-api-key header is not valid ASCII"))?;
    BackendConfig::decode(value).ok_or_else(|| {
        ProxyError::invalid_request(
            "x-api-key must be base64-encoded JSON with non-empty \"url\" and \"key\"",
        )
    })
}

fn sse_response(stream: RelayStream) -> Result<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream))
        .map_err(|e| ProxyError::internal(format!("Failed to build stream response: {e}")))
}

async fn handle_count_tokens(body: Bytes) -> Response {
    match serde_json::from_slice::<Value>(&body) {
        Ok(request) => Json(json!({ "input_tokens": estimate_tokens(&request) })).into_response(),
        Err(e) => ProxyError::invalid_request(format!("Invalid request body: {e}")).into_response(),
    }
}

/// Rough estimate: a quarter of the byte length, rounded up, per system
/// prompt and per message.
pub fn estimate_tokens(request: &Value) -> u64 {
    fn quarter_bytes(value: &Value) -> u64 {
        let len = match value {
            Value::String(s) => s.len(),
            other => other.to_string().len(),
        };
        (len as u64).div_ceil(4)
    }

    let system = request
        .get("system")
        .filter(|s| !s.is_null())
        .map_or(0, quarter_bytes);
    let messages: u64 = request
        .get("messages")
        .and_then(Value::as_array)
        .map_or(0, |msgs| msgs.iter().map(quarter_bytes).sum());
    system + messages
}

async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        let request = json!({
            "system": "abcde",
            "messages": [{"role": "user", "content": "hi"}]
        });
        let message_len = json!({"role": "user", "content": "hi"}).to_string().len() as u64;
        assert_eq!(estimate_tokens(&request), 2 + message_len.div_ceil(4));
        assert_eq!(estimate_tokens(&json!({})), 0);
    }

    #[test]
    fn test_backend_header_errors() {
        let headers = HeaderMap::new();
        assert_eq!(backend_from_headers(&headers).unwrap_err().status(), 401);

        let mut headers = HeaderMap::new();
        headers.insert(BACKEND_HEADER, "not-base64!".parse().unwrap());
        assert_eq!(backend_from_headers(&headers).unwrap_err().status(), 400);

        let mut headers = HeaderMap::new();
        let encoded = BackendConfig::new("https://api.example.com/v1/chat/completions", "sk-1").encode();
        headers.insert(BACKEND_HEADER, encoded.parse().unwrap());
        assert_eq!(backend_from_headers(&headers).unwrap().key, "sk-1");
    }

    #[test]
    fn test_error_envelope() {
        let response = ProxyError::rate_limited("slow down").into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
