// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

// Stream types
//
// Units handed between pipeline stages: decoded events, event units,
// sentence units, and the downstream framing.

use crate::message;
use bytes::Bytes;
use serde_json::Value;

/// Literal terminal payload of an OpenAI-style event stream.
pub const DONE: &str = "[DONE]";

/// A fragment ending in one of these closes the current sentence.
pub const SENTENCE_BOUNDARIES: &[char] = &['。', '？', '！', '\n'];

/// Frame a payload for the downstream event stream: `data: <payload>\n\n`.
pub fn frame(payload: &str) -> Bytes {
    let mut out = String::with_capacity(payload.len() + 8);
    out.push_str("data: ");
    out.push_str(payload);
    out.push_str("\n\n");
    Bytes::from(out)
}

// ---------------------------------------------------------------------------
// Decoded events
// ---------------------------------------------------------------------------

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, when the upstream names its events.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// A streamed chunk that parsed as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaEvent {
    pub envelope: Value,
    /// Payload exactly as received.
    pub raw: String,
    /// Content fragment, if the chunk carries one.
    pub fragment: Option<String>,
}

impl DeltaEvent {
    pub fn new(envelope: Value, raw: impl Into<String>) -> Self {
        let fragment = message::delta_fragment(&envelope).map(String::from);
        Self {
            envelope,
            raw: raw.into(),
            fragment,
        }
    }

    /// Fragment text; empty when absent.
    pub fn fragment(&self) -> &str {
        self.fragment.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventUnit {
    Delta(DeltaEvent),
    Terminal,
}

// ---------------------------------------------------------------------------
// Sentence units
// ---------------------------------------------------------------------------

/// Accumulated text plus the envelope it is re-embedded into on output.
#[derive(Debug, Clone, PartialEq)]
pub struct Sentence {
    pub envelope: Value,
    pub text: String,
    /// Upstream payload when the sentence is exactly one unmodified chunk.
    pub raw: Option<String>,
}

impl Sentence {
    /// A sentence that is one upstream chunk, forwarded as received.
    pub fn verbatim(delta: DeltaEvent) -> Self {
        let text = delta.fragment().to_string();
        Self {
            envelope: delta.envelope,
            text,
            raw: Some(delta.raw),
        }
    }

    /// Payload as it goes on the wire.
    pub fn payload(&self) -> String {
        match &self.raw {
            Some(raw) => raw.clone(),
            None => message::with_delta_content(&self.envelope, &self.text).to_string(),
        }
    }

    /// A new sentence in the same envelope carrying `message` instead.
    pub fn redacted(&self, message: &str) -> Self {
        Self {
            envelope: self.envelope.clone(),
            text: message.to_string(),
            raw: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SentenceUnit {
    Sentence(Sentence),
    Terminal,
}

impl SentenceUnit {
    pub fn to_frame(&self) -> Bytes {
        match self {
            SentenceUnit::Sentence(s) => frame(&s.payload()),
            SentenceUnit::Terminal => frame(DONE),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("event payload is not JSON ({reason}): {excerpt}")]
    Malformed { excerpt: String, reason: String },
}
