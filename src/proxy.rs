// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

// HTTP surface
//
// Responsibilities:
// - Catch-all handler: every method and path goes to the injected Relay
// - Request body limit
// - Error responses (403 plain text, 500 JSON)
// - Upstream response header hygiene
// - Permissive CORS

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, Method, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::{Json, Router};
use bytes::Bytes;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Largest inbound body accepted.
pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Inbound request handed to the relay.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Response returned to the caller.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl ProxyResponse {
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: Body::from(body.into()),
        }
    }
}

/// Errors surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Authorization failure. The message is returned verbatim.
    #[error("{0}")]
    Forbidden(String),

    #[error("upstream request failed: {0}")]
    UpstreamFailure(String),

    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(String),

    #[error("request body is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("failed to read request body: {0}")]
    BodyRead(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        if let ProxyError::Forbidden(message) = &self {
            return (StatusCode::FORBIDDEN, message.clone()).into_response();
        }
        let body = serde_json::json!({ "error": self.to_string() });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Trait: Relay (dependency injection point)
// ---------------------------------------------------------------------------

/// Handles one inbound request end to end.
///
/// Implementations must be Send + Sync so they can be shared across request
/// handlers via `Arc`.
#[async_trait::async_trait]
pub trait Relay: Send + Sync {
    async fn relay(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError>;
}

// ---------------------------------------------------------------------------
// Header hygiene
// ---------------------------------------------------------------------------

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove headers that describe the upstream connection or body encoding
/// rather than the content: hop-by-hop headers, plus `Content-Length` and
/// `Content-Encoding`, which no longer hold once the body is re-framed.
pub fn strip_upstream_headers(headers: &mut HeaderMap) {
    let keys_to_remove: Vec<HeaderName> = headers
        .keys()
        .filter(|name| {
            HOP_BY_HOP.contains(&name.as_str())
                || **name == header::CONTENT_LENGTH
                || **name == header::CONTENT_ENCODING
        })
        .cloned()
        .collect();

    for key in keys_to_remove {
        headers.remove(&key);
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Shared state injected into axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<dyn Relay>,
}

/// Catch-all handler: read the body and hand the request to the relay.
pub async fn proxy_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> axum::response::Response {
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => return ProxyError::BodyRead(e.to_string()).into_response(),
    };

    let proxy_req = ProxyRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
    };

    match state.relay.relay(proxy_req).await {
        Ok(resp) => {
            let mut response = Response::new(resp.body);
            *response.status_mut() = resp.status;
            *response.headers_mut() = resp.headers;
            response
        }
        Err(e) => e.into_response(),
    }
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Build the axum router. Every path is proxied; CORS allows any origin.
pub fn build_router(relay: Arc<dyn Relay>) -> Router {
    let state = AppState { relay };

    Router::new()
        .fallback(proxy_handler)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
