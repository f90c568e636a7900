// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

use sha2::{Digest, Sha256};

use super::defaults::*;
use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate a relayguard config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Compute SHA256 contract hash
/// 3. Parse YAML into raw deserialization types
/// 4. Validate version, enums and numeric bounds
/// 5. Resolve variable interpolation in string fields
/// 6. Build typed Config struct, filling omitted sections with defaults
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let contract_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.relayguard != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported config version \"{}\", expected \"v1\"",
            raw.relayguard
        )));
    }

    let upstream = build_upstream_config(raw.upstream)?;
    let access = build_access_config(raw.access)?;
    let moderation = build_moderation_config(raw.moderation)?;
    let metering = build_metering_config(raw.metering)?;

    Ok(Config {
        version: raw.relayguard,
        environment: raw.environment.unwrap_or_default(),
        upstream,
        access,
        moderation,
        metering,
        contract_hash,
    })
}

pub fn compute_hash(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    let hash = hasher.finalize();
    format!("sha256:{:x}", hash)
}

fn build_upstream_config(raw: Option<raw::RawUpstreamConfig>) -> Result<UpstreamConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(UpstreamConfig::default());
    };

    let base_url = match raw.base_url {
        Some(url) => validate_base_url("upstream.base_url", &resolve_variables(&url)?)?,
        None => DEFAULT_UPSTREAM_BASE_URL.to_string(),
    };

    let timeout_ms = raw.timeout_ms.unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "upstream.timeout_ms must be > 0".into(),
        ));
    }

    let alternate = raw
        .alternate
        .map(|alt| {
            let key_prefix = resolve_variables(&alt.key_prefix)?;
            if key_prefix.is_empty() {
                return Err(ConfigError::Validation(
                    "upstream.alternate.key_prefix must not be empty".into(),
                ));
            }
            let base_url =
                validate_base_url("upstream.alternate.base_url", &resolve_variables(&alt.base_url)?)?;
            Ok(AlternateUpstream { key_prefix, base_url })
        })
        .transpose()?;

    Ok(UpstreamConfig {
        base_url,
        api_key: resolve_optional(raw.api_key)?,
        timeout_ms,
        alternate,
    })
}

fn build_access_config(raw: Option<raw::RawAccessConfig>) -> Result<AccessConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(AccessConfig::default());
    };
    let defaults = AccessConfig::default();

    let (elevated_model_prefixes, forbidden_message) = match raw.elevated_models {
        Some(elevated) => {
            let message = match elevated.forbidden_message {
                Some(m) => resolve_variables(&m)?,
                None => defaults.forbidden_message,
            };
            (elevated.prefixes, message)
        }
        None => (defaults.elevated_model_prefixes, defaults.forbidden_message),
    };

    Ok(AccessConfig {
        proxy_key: resolve_optional(raw.proxy_key)?,
        elevated_model_prefixes,
        forbidden_message,
    })
}

fn build_moderation_config(
    raw: Option<raw::RawModerationConfig>,
) -> Result<ModerationConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(ModerationConfig::default());
    };

    let on_failure = match raw.on_failure.as_deref() {
        None | Some("closed") => FailureMode::Closed,
        Some("open") => FailureMode::Open,
        Some(other) => {
            return Err(ConfigError::Validation(format!(
                "unknown moderation.on_failure \"{other}\", expected \"open\" or \"closed\""
            )))
        }
    };

    let provider = match raw.provider.as_deref() {
        None | Some("none") => ModerationProvider::None,
        Some("tencent") => {
            let tencent = raw.tencent.unwrap_or(raw::RawTencentConfig {
                secret_id: None,
                secret_key: None,
                region: None,
                endpoint: None,
            });
            ModerationProvider::Tencent(TencentConfig {
                secret_id: resolve_optional(tencent.secret_id)?.unwrap_or_default(),
                secret_key: resolve_optional(tencent.secret_key)?.unwrap_or_default(),
                region: resolve_optional(tencent.region)?
                    .unwrap_or_else(|| DEFAULT_TENCENT_REGION.to_string()),
                endpoint: resolve_optional(tencent.endpoint)?
                    .unwrap_or_else(|| DEFAULT_TENCENT_ENDPOINT.to_string()),
            })
        }
        Some(other) => {
            return Err(ConfigError::Validation(format!(
                "unknown moderation.provider \"{other}\", expected \"tencent\" or \"none\""
            )))
        }
    };

    let timeout_ms = raw.timeout_ms.unwrap_or(DEFAULT_MODERATION_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "moderation.timeout_ms must be > 0".into(),
        ));
    }

    let redaction_message = match raw.redaction_message {
        Some(m) => resolve_variables(&m)?,
        None => DEFAULT_REDACTION_MESSAGE.to_string(),
    };

    Ok(ModerationConfig {
        provider,
        on_failure,
        redaction_message,
        timeout_ms,
    })
}

fn build_metering_config(raw: Option<raw::RawMeteringConfig>) -> Result<MeteringConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(MeteringConfig::default());
    };

    let backend = match raw.backend.as_deref() {
        None | Some("none") => MeteringBackend::None,
        Some("memory") => MeteringBackend::Memory,
        Some("redis") => {
            let url = resolve_optional(raw.redis_url)?
                .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                return Err(ConfigError::Validation(format!(
                    "metering.redis_url must start with redis:// or rediss://, got \"{url}\""
                )));
            }
            MeteringBackend::Redis { url }
        }
        Some(other) => {
            return Err(ConfigError::Validation(format!(
                "unknown metering.backend \"{other}\", expected \"redis\", \"memory\" or \"none\""
            )))
        }
    };

    Ok(MeteringConfig { backend })
}

/// Interpolate an optional string field; empty results collapse to `None`.
fn resolve_optional(value: Option<String>) -> Result<Option<String>, ConfigError> {
    match value {
        Some(v) => {
            let resolved = resolve_variables(&v)?;
            Ok(Some(resolved).filter(|s| !s.is_empty()))
        }
        None => Ok(None),
    }
}

fn validate_base_url(field: &str, url: &str) -> Result<String, ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{field} must start with http:// or https://, got \"{url}\""
        )));
    }
    Ok(url.trim_end_matches('/').to_string())
}
