// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

// Streaming moderation relay
//
// Responsibilities:
// - Decode upstream event streams split at arbitrary byte boundaries
// - Group content fragments into sentences (。？！ and newline)
// - Moderate sentences one at a time, in order, per request
// - Redact and terminate the stream on a blocked sentence
// - Cancel the upstream read on halt or downstream disconnect
// - Tap every delta for outbound token metering

mod accumulator;
mod decoder;
mod gate;
mod processor;
mod types;

pub use accumulator::SentenceAccumulator;
pub use decoder::{decode_unit, EventDecoder};
pub use gate::{GateOutcome, GateState, ModerationGate};
pub use processor::RelayProcessor;
pub use types::{
    frame, DecodeError, DeltaEvent, EventUnit, Sentence, SentenceUnit, SseEvent, DONE,
    SENTENCE_BOUNDARIES,
};
