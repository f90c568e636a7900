// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

// Relay driver
//
// Per request:
// - Authorize the caller before anything leaves the process
// - Strip proxy-only fields and forward upstream with the resolved key
// - Streaming: pipe the upstream body through the moderation relay
// - Single-shot: moderate the whole message once, replace on block
// - Meter inbound and outbound tokens without waiting on the sink

use crate::auth::{self, AccessPolicy, Credential};
use crate::config::{Config, ModerationProvider};
use crate::message::{self, InboundRequest};
use crate::metering::{self, CounterSink, MeterKey, TokenMeter};
use crate::moderation::{self, Decision, ModerationPolicy, Moderator, TencentModerator};
use crate::proxy::{self, ProxyError, ProxyRequest, ProxyResponse, Relay};
use crate::stream::RelayProcessor;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use futures_util::TryStreamExt;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Paths whose `stream: true` requests are relayed as event streams.
const STREAMING_ROUTES: &[&str] = &["/v1/chat/completions", "/v1/completions"];

// ---------------------------------------------------------------------------
// Request context for structured logging
// ---------------------------------------------------------------------------

/// Everything about one inbound call that outlives body parsing.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// `code` header, empty when absent.
    pub caller: String,
    pub model: String,
    /// Set when the caller asked for moderation and a classifier is configured.
    pub moderation: Option<ModerationPolicy>,
    /// Milliseconds since the epoch, unique within the process.
    pub request_ts: i64,
}

impl RequestContext {
    fn meter_key(&self) -> MeterKey {
        MeterKey {
            caller: self.caller.clone(),
            model: self.model.clone(),
            request_ts: self.request_ts,
        }
    }
}

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

/// Sends HTTP requests upstream.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

// ---------------------------------------------------------------------------
// Transport types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Bound on the wait for response headers. The body is not bounded.
    pub timeout_ms: u64,
    pub stream: bool,
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>>;

pub enum HttpBody {
    Full(Bytes),
    Stream(ByteStream),
}

pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: HttpBody,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream request timed out: {0}")]
    Timeout(String),
}

impl From<HttpError> for ProxyError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout(msg) => ProxyError::UpstreamTimeout(msg),
            HttpError::Transport(msg) => ProxyError::UpstreamFailure(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Relay dependencies
// ---------------------------------------------------------------------------

pub struct RelayDeps {
    pub config: Arc<Config>,
    pub http: Arc<dyn HttpSender>,
    /// `None` when no classifier is configured; moderation requests are then
    /// relayed unmoderated.
    pub moderator: Option<Arc<dyn Moderator>>,
    /// `None` disables metering.
    pub counters: Option<Arc<dyn CounterSink>>,
}

// ---------------------------------------------------------------------------
// RelayEngine
// ---------------------------------------------------------------------------

pub struct RelayEngine {
    deps: RelayDeps,
    access: AccessPolicy,
}

impl RelayEngine {
    pub fn new_with(deps: RelayDeps) -> Self {
        let access = AccessPolicy::new(deps.config.upstream.clone(), deps.config.access.clone());
        Self { deps, access }
    }
}

#[async_trait]
impl Relay for RelayEngine {
    async fn relay(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let request_id = Uuid::new_v4().to_string();
        let caller = auth::caller_code(&request.headers);

        // 1) Authorize: credential first, so a missing one is 403 whatever the body.
        let Some(credential) = Credential::from_headers(&request.headers) else {
            tracing::info!(
                request_id = %request_id,
                method = %request.method,
                path = request.uri.path(),
                "rejected: missing bearer credential"
            );
            return Err(ProxyError::Forbidden("Forbidden".to_string()));
        };

        let inbound = InboundRequest::parse(&request.body)
            .map_err(|e| ProxyError::MalformedJson(e.to_string()))?;
        let model = inbound.model.clone().unwrap_or_default();

        let target = match self.access.authorize(Some(&credential), caller.as_deref(), &model) {
            Ok(target) => target,
            Err(e) => {
                tracing::info!(
                    request_id = %request_id,
                    model = %model,
                    caller = caller.as_deref().unwrap_or(""),
                    "rejected: {e}"
                );
                return Err(ProxyError::Forbidden(e.public_message().to_string()));
            }
        };

        let ctx = RequestContext {
            request_id,
            caller: caller.unwrap_or_default(),
            model: if model.is_empty() {
                "unknown".to_string()
            } else {
                model
            },
            moderation: self.moderation_policy(&inbound),
            request_ts: metering::next_request_ts(),
        };

        // 2) Meter inbound
        let mut meter = self
            .deps
            .counters
            .clone()
            .map(|sink| TokenMeter::new(sink, ctx.meter_key(), ctx.request_id.clone()));
        if let Some(meter) = &meter {
            meter.record_inbound(inbound.message_contents.iter().map(String::as_str));
        }

        // 3) Dispatch
        let streaming = inbound.stream && is_streaming_route(request.uri.path());
        let http_req = HttpRequest {
            method: request.method.clone(),
            url: upstream_url(&target.base_url, &request),
            headers: upstream_headers(&target.api_key)?,
            body: inbound.forward_body.clone().unwrap_or_default(),
            timeout_ms: self.deps.config.upstream.timeout_ms,
            stream: streaming,
        };

        let start = Instant::now();
        let upstream = self.deps.http.send(http_req).await.map_err(|e| {
            tracing::warn!(request_id = %ctx.request_id, model = %ctx.model, "upstream error: {e}");
            ProxyError::from(e)
        })?;

        tracing::info!(
            request_id = %ctx.request_id,
            model = %ctx.model,
            caller = %ctx.caller,
            mode = if streaming { "stream" } else { "single" },
            moderated = ctx.moderation.is_some(),
            status = upstream.status.as_u16(),
            latency_ms = start.elapsed().as_secs_f64() * 1000.0,
            "upstream responded"
        );

        if streaming && upstream.status.is_success() {
            return Ok(self.handle_streaming_response(upstream, meter, &ctx));
        }

        self.handle_full_response(upstream, meter.as_mut(), &ctx).await
    }
}

impl RelayEngine {
    /// Moderation settings for this request, if moderation applies.
    fn moderation_policy(&self, inbound: &InboundRequest) -> Option<ModerationPolicy> {
        if !inbound.options.moderation {
            return None;
        }
        if self.deps.moderator.is_none() {
            tracing::warn!("moderation requested but no classifier is configured");
            return None;
        }
        Some(ModerationPolicy {
            level: inbound.options.moderation_level,
            on_failure: self.deps.config.moderation.on_failure,
        })
    }

    fn handle_streaming_response(
        &self,
        upstream: HttpResponse,
        meter: Option<TokenMeter>,
        ctx: &RequestContext,
    ) -> ProxyResponse {
        let input: ByteStream = match upstream.body {
            HttpBody::Stream(s) => s,
            HttpBody::Full(b) => Box::pin(futures_util::stream::once(async move { Ok(b) })),
        };

        let (moderator, policy) = match ctx.moderation {
            Some(policy) => (self.deps.moderator.clone(), policy),
            None => (
                None,
                ModerationPolicy {
                    level: Default::default(),
                    on_failure: self.deps.config.moderation.on_failure,
                },
            ),
        };
        let processor = RelayProcessor::new(
            moderator,
            policy,
            self.deps.config.moderation.redaction_message.clone(),
        );
        let output = processor.process(
            input,
            meter,
            CancellationToken::new(),
            ctx.request_id.clone(),
        );

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));

        ProxyResponse {
            status: StatusCode::OK,
            headers,
            body: Body::from_stream(output.map(Ok::<_, Infallible>)),
        }
    }

    /// Single-shot responses, and streaming requests the upstream refused.
    async fn handle_full_response(
        &self,
        upstream: HttpResponse,
        meter: Option<&mut TokenMeter>,
        ctx: &RequestContext,
    ) -> Result<ProxyResponse, ProxyError> {
        let status = upstream.status;
        let mut headers = upstream.headers;
        proxy::strip_upstream_headers(&mut headers);

        let body = match upstream.body {
            HttpBody::Full(b) => b,
            HttpBody::Stream(s) => collect_body(s).await?,
        };

        let Ok(mut json) = serde_json::from_slice::<serde_json::Value>(&body) else {
            return Ok(ProxyResponse::from_bytes(status, headers, body));
        };
        let Some(content) = message::response_content(&json).map(String::from) else {
            return Ok(ProxyResponse::from_bytes(status, headers, body));
        };

        if let Some(meter) = meter {
            meter.record_outbound(&content);
        }

        let (Some(policy), Some(moderator)) = (ctx.moderation, &self.deps.moderator) else {
            return Ok(ProxyResponse::from_bytes(status, headers, body));
        };
        if content.is_empty() {
            return Ok(ProxyResponse::from_bytes(status, headers, body));
        }

        match moderation::review(moderator.as_ref(), &policy, &content, &ctx.request_id).await {
            Decision::Allow => Ok(ProxyResponse::from_bytes(status, headers, body)),
            Decision::Block => {
                tracing::info!(
                    request_id = %ctx.request_id,
                    model = %ctx.model,
                    "response blocked, content replaced"
                );
                message::replace_response_content(
                    &mut json,
                    &self.deps.config.moderation.redaction_message,
                );
                Ok(ProxyResponse::from_bytes(status, headers, json.to_string()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reqwest HTTP sender
// ---------------------------------------------------------------------------

pub struct ReqwestHttpSender {
    client: reqwest::Client,
}

impl ReqwestHttpSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpSender for ReqwestHttpSender {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let req = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body);

        // Only the wait for headers is bounded; streamed bodies may run long.
        let timeout = Duration::from_millis(request.timeout_ms);
        let resp = tokio::time::timeout(timeout, req.send())
            .await
            .map_err(|_| {
                HttpError::Timeout(format!("no response within {}ms", request.timeout_ms))
            })?
            .map_err(|e| {
                if e.is_timeout() {
                    HttpError::Timeout(e.to_string())
                } else {
                    HttpError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        let headers = resp.headers().clone();

        if request.stream {
            let stream = resp
                .bytes_stream()
                .map_err(|e| HttpError::Transport(e.to_string()));
            Ok(HttpResponse {
                status,
                headers,
                body: HttpBody::Stream(Box::pin(stream)),
            })
        } else {
            let body = resp
                .bytes()
                .await
                .map_err(|e| HttpError::Transport(e.to_string()))?;
            Ok(HttpResponse {
                status,
                headers,
                body: HttpBody::Full(body),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Public factory for the default relay
// ---------------------------------------------------------------------------

/// Build the production relay: reqwest transport, classifier from config,
/// and the given counter sink.
pub fn build_relay(config: Arc<Config>, counters: Option<Arc<dyn CounterSink>>) -> RelayEngine {
    let client = reqwest::Client::new();
    let moderator = build_moderator(&config, client.clone());

    RelayEngine::new_with(RelayDeps {
        config,
        http: Arc::new(ReqwestHttpSender::new(client)),
        moderator,
        counters,
    })
}

fn build_moderator(config: &Config, client: reqwest::Client) -> Option<Arc<dyn Moderator>> {
    match &config.moderation.provider {
        ModerationProvider::None => None,
        ModerationProvider::Tencent(tencent) if !tencent.has_credentials() => {
            tracing::warn!("tencent moderation selected without credentials; moderation disabled");
            None
        }
        ModerationProvider::Tencent(tencent) => Some(Arc::new(TencentModerator::new(
            client,
            tencent.clone(),
            Duration::from_millis(config.moderation.timeout_ms),
        ))),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_streaming_route(path: &str) -> bool {
    STREAMING_ROUTES.iter().any(|route| path.starts_with(route))
}

fn upstream_url(base_url: &str, request: &ProxyRequest) -> String {
    let base = base_url.trim_end_matches('/');
    let path_and_query = request
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(request.uri.path());
    format!("{base}{path_and_query}")
}

/// Fresh upstream headers: only the content type and the resolved key.
fn upstream_headers(api_key: &str) -> Result<HeaderMap, ProxyError> {
    let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|_| ProxyError::Forbidden("Forbidden".to_string()))?;
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::AUTHORIZATION, bearer);
    Ok(headers)
}

async fn collect_body(mut stream: ByteStream) -> Result<Bytes, ProxyError> {
    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        collected.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(collected))
}
