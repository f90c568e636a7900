// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

// Built-in defaults applied when a config section or field is omitted.

/// Upstream chat-completion API.
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://api.openai.com";

/// Bound on the wait for upstream response headers.
pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 30_000;

/// Bound on a single classifier call.
pub const DEFAULT_MODERATION_TIMEOUT_MS: u64 = 10_000;

/// Substitute content written in place of a blocked sentence.
pub const DEFAULT_REDACTION_MESSAGE: &str = "这个话题不适合讨论，换个话题吧。";

/// Model name prefixes that require an identified caller.
pub const DEFAULT_ELEVATED_MODEL_PREFIXES: &[&str] = &["gpt-4"];

/// 403 body returned when an anonymous caller asks for an elevated model.
pub const DEFAULT_FORBIDDEN_MESSAGE: &str = "GPT-4 API access forbidden";

pub const DEFAULT_TENCENT_ENDPOINT: &str = "tms.tencentcloudapi.com";
pub const DEFAULT_TENCENT_REGION: &str = "ap-singapore";

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
