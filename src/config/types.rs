// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

use super::defaults::*;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level parsed and validated relayguard config.
#[derive(Debug, Clone)]
pub struct Config {
    /// Config version. Always "v1".
    pub version: String,
    /// Environment label (e.g. "staging", "production").
    pub environment: String,
    pub upstream: UpstreamConfig,
    pub access: AccessConfig,
    pub moderation: ModerationConfig,
    pub metering: MeteringConfig,
    /// SHA256 hash of the raw YAML: "sha256:{hex}".
    pub contract_hash: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            environment: String::new(),
            upstream: UpstreamConfig::default(),
            access: AccessConfig::default(),
            moderation: ModerationConfig::default(),
            metering: MeteringConfig::default(),
            contract_hash: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

/// Where and how requests are forwarded.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL, without trailing slash.
    pub base_url: String,
    /// Server-side key used instead of the caller's key when set.
    pub api_key: Option<String>,
    /// Bound on the wait for response headers, in milliseconds.
    pub timeout_ms: u64,
    /// Reroute for keys carrying a known prefix.
    pub alternate: Option<AlternateUpstream>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            api_key: None,
            timeout_ms: DEFAULT_UPSTREAM_TIMEOUT_MS,
            alternate: None,
        }
    }
}

/// Keys starting with `key_prefix` are sent to `base_url` instead.
#[derive(Debug, Clone, PartialEq)]
pub struct AlternateUpstream {
    pub key_prefix: String,
    pub base_url: String,
}

// ---------------------------------------------------------------------------
// Access
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AccessConfig {
    /// Shared secret callers must append to their bearer token (`key:proxy_key`).
    pub proxy_key: Option<String>,
    /// Models whose name starts with one of these need an identified caller.
    pub elevated_model_prefixes: Vec<String>,
    pub forbidden_message: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            proxy_key: None,
            elevated_model_prefixes: DEFAULT_ELEVATED_MODEL_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            forbidden_message: DEFAULT_FORBIDDEN_MESSAGE.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Moderation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ModerationConfig {
    pub provider: ModerationProvider,
    /// What a classifier error means for the sentence under review.
    pub on_failure: FailureMode,
    pub redaction_message: String,
    /// Bound on a single classifier call, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            provider: ModerationProvider::None,
            on_failure: FailureMode::Closed,
            redaction_message: DEFAULT_REDACTION_MESSAGE.to_string(),
            timeout_ms: DEFAULT_MODERATION_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModerationProvider {
    /// No classifier; moderation requests are relayed unmoderated.
    None,
    Tencent(TencentConfig),
}

/// Credentials and endpoint for the Tencent Cloud text moderation API.
#[derive(Debug, Clone, PartialEq)]
pub struct TencentConfig {
    pub secret_id: String,
    pub secret_key: String,
    pub region: String,
    pub endpoint: String,
}

impl TencentConfig {
    pub fn has_credentials(&self) -> bool {
        !self.secret_id.is_empty() && !self.secret_key.is_empty()
    }
}

/// Classifier failure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Treat the sentence as passing.
    Open,
    /// Treat the sentence as blocked.
    Closed,
}

// ---------------------------------------------------------------------------
// Metering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MeteringConfig {
    pub backend: MeteringBackend,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum MeteringBackend {
    #[default]
    None,
    /// Process-local map. Useful for tests and single-node trials.
    Memory,
    Redis {
        url: String,
    },
}
