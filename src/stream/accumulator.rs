// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

use super::types::{DeltaEvent, EventUnit, Sentence, SentenceUnit, SENTENCE_BOUNDARIES};
use crate::message;
use serde_json::Value;

/// Groups streamed fragments into sentences.
///
/// A sentence closes when a fragment ends with a boundary character, or when
/// the stream terminates with text still pending. A sentence that is exactly
/// one upstream chunk keeps that chunk's payload so it can be relayed
/// unchanged.
///
/// Chunks without a `choices[0]` (the usage chunk, for one) carry no content
/// and cannot hold any. They close the pending sentence and then pass
/// through as their own unit.
#[derive(Debug, Default)]
pub struct SentenceAccumulator {
    buffer: String,
    last_envelope: Option<Value>,
    pending_raw: Option<String>,
}

impl SentenceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text accumulated since the last emitted sentence.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn push(&mut self, unit: EventUnit) -> Vec<SentenceUnit> {
        match unit {
            EventUnit::Delta(delta) if !message::has_choice(&delta.envelope) => {
                let mut out: Vec<SentenceUnit> = self.flush().into_iter().collect();
                out.push(SentenceUnit::Sentence(Sentence::verbatim(delta)));
                out
            }
            EventUnit::Delta(delta) => self.push_delta(delta).into_iter().collect(),
            EventUnit::Terminal => {
                let mut out: Vec<SentenceUnit> = self.flush().into_iter().collect();
                out.push(SentenceUnit::Terminal);
                out
            }
        }
    }

    /// Close the pending sentence, if any, in the last content envelope.
    fn flush(&mut self) -> Option<SentenceUnit> {
        if self.buffer.is_empty() {
            return None;
        }
        let envelope = self.last_envelope.take()?;
        Some(self.emit(envelope))
    }

    fn push_delta(&mut self, delta: DeltaEvent) -> Option<SentenceUnit> {
        let DeltaEvent {
            envelope,
            raw,
            fragment,
        } = delta;
        let fragment = fragment.unwrap_or_default();

        self.pending_raw = if self.buffer.is_empty() {
            Some(raw)
        } else {
            None
        };
        self.buffer.push_str(&fragment);

        if fragment.ends_with(SENTENCE_BOUNDARIES) {
            self.last_envelope = None;
            Some(self.emit(envelope))
        } else {
            self.last_envelope = Some(envelope);
            None
        }
    }

    fn emit(&mut self, envelope: Value) -> SentenceUnit {
        SentenceUnit::Sentence(Sentence {
            envelope,
            text: std::mem::take(&mut self.buffer),
            raw: self.pending_raw.take(),
        })
    }
}
