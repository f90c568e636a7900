// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

// Caller authorization
//
// Responsibilities:
// - Extract the bearer credential and split `key[:proxy_key]`
// - Gate elevated models behind an identified caller
// - Resolve the upstream key (server override or caller key) and base URL
// - Enforce the shared proxy key when one is configured

use crate::config::{AccessConfig, UpstreamConfig};
use axum::http::HeaderMap;

/// MD5 of the empty string. Clients that hash an empty caller code send
/// this, and it is treated the same as no code at all.
pub const EMPTY_CODE_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Header identifying the caller for metering and elevated access.
pub const CALLER_CODE_HEADER: &str = "code";

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// Bearer token split into the upstream API key and the proxy access key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub upstream_key: String,
    pub proxy_key: Option<String>,
}

impl Credential {
    /// Split `key[:proxy_key]` on the first colon.
    pub fn parse(token: &str) -> Self {
        match token.split_once(':') {
            Some((key, proxy)) => Self {
                upstream_key: key.to_string(),
                proxy_key: Some(proxy.to_string()).filter(|p| !p.is_empty()),
            },
            None => Self {
                upstream_key: token.to_string(),
                proxy_key: None,
            },
        }
    }

    /// Read `Authorization: <scheme> <token>`. Returns `None` when the header
    /// is missing, not UTF-8, or carries no token.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
        let token = value.split(' ').nth(1)?.trim();
        if token.is_empty() {
            return None;
        }
        Some(Self::parse(token))
    }
}

/// Caller code from the `code` header, if present and non-empty.
pub fn caller_code(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CALLER_CODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

// ---------------------------------------------------------------------------
// Access policy
// ---------------------------------------------------------------------------

/// Why a caller was refused. Every variant maps to HTTP 403.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer credential")]
    MissingCredential,

    #[error("model \"{model}\" requires an identified caller")]
    ElevatedModel { model: String, message: String },

    #[error("no upstream key available")]
    MissingUpstreamKey,

    #[error("proxy key mismatch")]
    ProxyKeyMismatch,
}

impl AuthError {
    /// Plain-text body returned to the caller.
    pub fn public_message(&self) -> &str {
        match self {
            AuthError::ElevatedModel { message, .. } => message,
            _ => "Forbidden",
        }
    }
}

/// Where an authorized request goes and with which key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub api_key: String,
    pub base_url: String,
}

/// Authorization rules derived from config.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    upstream: UpstreamConfig,
    access: AccessConfig,
}

impl AccessPolicy {
    pub fn new(upstream: UpstreamConfig, access: AccessConfig) -> Self {
        Self { upstream, access }
    }

    fn is_elevated(&self, model: &str) -> bool {
        self.access
            .elevated_model_prefixes
            .iter()
            .any(|p| model.starts_with(p.as_str()))
    }

    /// Decide whether the caller may proceed, and resolve the upstream.
    pub fn authorize(
        &self,
        credential: Option<&Credential>,
        caller: Option<&str>,
        model: &str,
    ) -> Result<UpstreamTarget, AuthError> {
        let credential = credential.ok_or(AuthError::MissingCredential)?;

        let identified = matches!(caller, Some(c) if !c.is_empty() && c != EMPTY_CODE_MD5);
        if self.is_elevated(model) && !identified {
            return Err(AuthError::ElevatedModel {
                model: model.to_string(),
                message: self.access.forbidden_message.clone(),
            });
        }

        let api_key = self
            .upstream
            .api_key
            .clone()
            .unwrap_or_else(|| credential.upstream_key.clone());
        if api_key.is_empty() {
            return Err(AuthError::MissingUpstreamKey);
        }

        let base_url = match &self.upstream.alternate {
            Some(alt) if api_key.starts_with(alt.key_prefix.as_str()) => alt.base_url.clone(),
            _ => self.upstream.base_url.clone(),
        };

        if let Some(expected) = &self.access.proxy_key {
            if credential.proxy_key.as_deref() != Some(expected.as_str()) {
                return Err(AuthError::ProxyKeyMismatch);
            }
        }

        Ok(UpstreamTarget { api_key, base_url })
    }
}
