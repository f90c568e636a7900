// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

// Content moderation
//
// Responsibilities:
// - Verdict and sensitivity level types
// - The blocking rule shared by streaming and single-shot relays
// - Moderator trait (dependency injection point for classifiers)
// - Failure policy applied when the classifier errors

pub mod tencent;

pub use tencent::TencentModerator;

use crate::config::FailureMode;
use async_trait::async_trait;
use std::time::Instant;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Classifier verdict for one piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Review,
    Block,
    /// Any suggestion the classifier returns that we do not know by name.
    Other(String),
}

impl Verdict {
    /// Map a classifier suggestion string onto a verdict. Matching is exact.
    pub fn from_suggestion(suggestion: &str) -> Self {
        match suggestion {
            "Pass" => Verdict::Pass,
            "Review" => Verdict::Review,
            "Block" => Verdict::Block,
            other => Verdict::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Verdict::Pass => "Pass",
            Verdict::Review => "Review",
            Verdict::Block => "Block",
            Verdict::Other(s) => s,
        }
    }
}

/// Caller-selected moderation sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModerationLevel {
    #[default]
    Normal,
    High,
}

impl ModerationLevel {
    /// `"high"` selects [`ModerationLevel::High`]; anything else, including
    /// absence, is [`ModerationLevel::Normal`].
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("high") => ModerationLevel::High,
            _ => ModerationLevel::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationLevel::Normal => "normal",
            ModerationLevel::High => "high",
        }
    }
}

/// Whether `verdict` blocks content at `level`.
///
/// `High` blocks everything that is not exactly `Pass`. `Normal` blocks only
/// an explicit `Block`; `Review` and unknown verdicts pass.
pub fn is_blocking(level: ModerationLevel, verdict: &Verdict) -> bool {
    match level {
        ModerationLevel::High => *verdict != Verdict::Pass,
        ModerationLevel::Normal => *verdict == Verdict::Block,
    }
}

/// Errors a classifier call can produce.
#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("moderation request failed: {0}")]
    Transport(String),

    #[error("moderation request timed out: {0}")]
    Timeout(String),

    #[error("moderation service returned {code}: {message}")]
    Api { code: String, message: String },

    #[error("moderation response could not be parsed: {0}")]
    InvalidResponse(String),
}

// ---------------------------------------------------------------------------
// Trait: Moderator
// ---------------------------------------------------------------------------

/// A black-box text classifier.
///
/// Implementations are shared across requests via `Arc` and must not hold
/// per-request state.
#[async_trait]
pub trait Moderator: Send + Sync {
    async fn moderate(&self, text: &str) -> Result<Verdict, ModerationError>;
}

// ---------------------------------------------------------------------------
// Policy evaluation
// ---------------------------------------------------------------------------

/// Final outcome for one reviewed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block,
}

/// Per-request moderation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModerationPolicy {
    pub level: ModerationLevel,
    pub on_failure: FailureMode,
}

impl ModerationPolicy {
    /// Decision taken when the classifier could not produce a verdict.
    pub fn failure_decision(&self) -> Decision {
        match self.on_failure {
            FailureMode::Open => Decision::Allow,
            FailureMode::Closed => Decision::Block,
        }
    }
}

/// Submit `text` to the classifier once and apply the policy.
pub async fn review(
    moderator: &dyn Moderator,
    policy: &ModerationPolicy,
    text: &str,
    request_id: &str,
) -> Decision {
    let start = Instant::now();
    let result = moderator.moderate(text).await;
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    match result {
        Ok(verdict) => {
            let blocked = is_blocking(policy.level, &verdict);
            tracing::info!(
                request_id = %request_id,
                level = policy.level.as_str(),
                verdict = verdict.as_str(),
                blocked,
                chars = text.chars().count(),
                latency_ms,
                "moderation verdict"
            );
            if blocked {
                Decision::Block
            } else {
                Decision::Allow
            }
        }
        Err(e) => {
            let decision = policy.failure_decision();
            tracing::warn!(
                request_id = %request_id,
                on_failure = ?policy.on_failure,
                decision = ?decision,
                latency_ms,
                "moderation failed: {e}"
            );
            decision
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedModerator(Result<Verdict, ()>);

    #[async_trait]
    impl Moderator for FixedModerator {
        async fn moderate(&self, _text: &str) -> Result<Verdict, ModerationError> {
            self.0
                .clone()
                .map_err(|_| ModerationError::Transport("connection reset".to_string()))
        }
    }

    fn policy(level: ModerationLevel, on_failure: FailureMode) -> ModerationPolicy {
        ModerationPolicy { level, on_failure }
    }

    #[test]
    fn high_level_blocks_anything_but_pass() {
        assert!(!is_blocking(ModerationLevel::High, &Verdict::Pass));
        assert!(is_blocking(ModerationLevel::High, &Verdict::Review));
        assert!(is_blocking(ModerationLevel::High, &Verdict::Block));
        assert!(is_blocking(
            ModerationLevel::High,
            &Verdict::Other("Unknown".into())
        ));
    }

    #[test]
    fn normal_level_blocks_only_block() {
        assert!(!is_blocking(ModerationLevel::Normal, &Verdict::Pass));
        assert!(!is_blocking(ModerationLevel::Normal, &Verdict::Review));
        assert!(!is_blocking(
            ModerationLevel::Normal,
            &Verdict::Other("Unknown".into())
        ));
        assert!(is_blocking(ModerationLevel::Normal, &Verdict::Block));
    }

    #[test]
    fn suggestion_matching_is_exact() {
        assert_eq!(Verdict::from_suggestion("Pass"), Verdict::Pass);
        assert_eq!(Verdict::from_suggestion("pass"), Verdict::Other("pass".into()));
        assert_eq!(Verdict::from_suggestion("Block").as_str(), "Block");
    }

    #[test]
    fn level_parse_defaults_to_normal() {
        assert_eq!(ModerationLevel::parse(Some("high")), ModerationLevel::High);
        assert_eq!(ModerationLevel::parse(Some("normal")), ModerationLevel::Normal);
        assert_eq!(ModerationLevel::parse(Some("HIGH")), ModerationLevel::Normal);
        assert_eq!(ModerationLevel::parse(None), ModerationLevel::Normal);
    }

    #[tokio::test]
    async fn review_applies_level() {
        let m = FixedModerator(Ok(Verdict::Review));
        let normal = policy(ModerationLevel::Normal, FailureMode::Closed);
        let high = policy(ModerationLevel::High, FailureMode::Closed);

        assert_eq!(review(&m, &normal, "text", "req").await, Decision::Allow);
        assert_eq!(review(&m, &high, "text", "req").await, Decision::Block);
    }

    #[tokio::test]
    async fn review_failure_follows_policy() {
        let m = FixedModerator(Err(()));
        let closed = policy(ModerationLevel::Normal, FailureMode::Closed);
        let open = policy(ModerationLevel::High, FailureMode::Open);

        assert_eq!(review(&m, &closed, "text", "req").await, Decision::Block);
        assert_eq!(review(&m, &open, "text", "req").await, Decision::Allow);
    }
}
