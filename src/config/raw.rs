// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

// Raw YAML deserialization types (internal)
// These are separate from the public Config structs because:
// 1. Variable interpolation and enum validation happen between raw and public
// 2. Optional sections collapse into concrete defaults on the public side
// 3. Keeps the public API clean

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub relayguard: String,
    pub environment: Option<String>,
    pub upstream: Option<RawUpstreamConfig>,
    pub access: Option<RawAccessConfig>,
    pub moderation: Option<RawModerationConfig>,
    pub metering: Option<RawMeteringConfig>,
}

#[derive(Debug, Deserialize)]
pub struct RawUpstreamConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub alternate: Option<RawAlternateUpstream>,
}

#[derive(Debug, Deserialize)]
pub struct RawAlternateUpstream {
    pub key_prefix: String,
    pub base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct RawAccessConfig {
    pub proxy_key: Option<String>,
    pub elevated_models: Option<RawElevatedModels>,
}

#[derive(Debug, Deserialize)]
pub struct RawElevatedModels {
    #[serde(default)]
    pub prefixes: Vec<String>,
    pub forbidden_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawModerationConfig {
    pub provider: Option<String>,
    pub on_failure: Option<String>,
    pub redaction_message: Option<String>,
    pub timeout_ms: Option<u64>,
    pub tencent: Option<RawTencentConfig>,
}

#[derive(Debug, Deserialize)]
pub struct RawTencentConfig {
    pub secret_id: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawMeteringConfig {
    pub backend: Option<String>,
    pub redis_url: Option<String>,
}
