// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

// Moderation gate
//
// Serial FIFO over one request's sentence units. The queue is an unbounded
// channel filled by the upstream reader; the gate takes the next unit only
// after the previous one is written, so at most one unit is ever with the
// classifier and output order equals arrival order.

use super::types::{frame, Sentence, SentenceUnit, DONE};
use crate::moderation::{self, Decision, ModerationPolicy, Moderator};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Per-request gate state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateState {
    /// A sentence is with the classifier.
    pub in_flight: bool,
    /// A sentence was blocked; nothing further is processed.
    pub halted: bool,
    /// Frames written downstream.
    pub forwarded: usize,
}

/// How a gate run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Terminal unit forwarded.
    Completed,
    /// A sentence was blocked; redaction and terminal forwarded.
    Halted,
    /// The request was aborted elsewhere.
    Cancelled,
    /// The downstream receiver went away.
    Disconnected,
    /// The reader stopped without a terminal unit (upstream transport error).
    UpstreamClosed,
}

pub struct ModerationGate {
    /// `None` forwards every unit unchanged.
    moderator: Option<Arc<dyn Moderator>>,
    policy: ModerationPolicy,
    redaction_message: String,
    request_id: String,
    cancel: CancellationToken,
    state: GateState,
}

impl ModerationGate {
    pub fn new(
        moderator: Option<Arc<dyn Moderator>>,
        policy: ModerationPolicy,
        redaction_message: impl Into<String>,
        request_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            moderator,
            policy,
            redaction_message: redaction_message.into(),
            request_id: request_id.into(),
            cancel,
            state: GateState::default(),
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Drain `queue` into `out` until the stream terminates, halts, or the
    /// request goes away. Every exit other than `Completed` and
    /// `UpstreamClosed` cancels the request token.
    pub async fn run(
        &mut self,
        mut queue: mpsc::UnboundedReceiver<SentenceUnit>,
        out: mpsc::Sender<Bytes>,
    ) -> GateOutcome {
        let outcome = self.drain(&mut queue, &out).await;
        queue.close();
        match outcome {
            GateOutcome::Halted | GateOutcome::Disconnected => self.cancel.cancel(),
            _ => {}
        }
        outcome
    }

    async fn drain(
        &mut self,
        queue: &mut mpsc::UnboundedReceiver<SentenceUnit>,
        out: &mpsc::Sender<Bytes>,
    ) -> GateOutcome {
        let cancel = self.cancel.clone();
        loop {
            let unit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return GateOutcome::Cancelled,
                _ = out.closed() => return GateOutcome::Disconnected,
                unit = queue.recv() => unit,
            };

            let sentence = match unit {
                None => return GateOutcome::UpstreamClosed,
                Some(SentenceUnit::Terminal) => {
                    return match self.forward(out, frame(DONE)).await {
                        Ok(()) => GateOutcome::Completed,
                        Err(outcome) => outcome,
                    };
                }
                Some(SentenceUnit::Sentence(sentence)) => sentence,
            };

            let decision = tokio::select! {
                biased;
                _ = cancel.cancelled() => return GateOutcome::Cancelled,
                _ = out.closed() => return GateOutcome::Disconnected,
                decision = self.review(&sentence) => decision,
            };

            match decision {
                Decision::Allow => {
                    let frame = SentenceUnit::Sentence(sentence).to_frame();
                    if let Err(outcome) = self.forward(out, frame).await {
                        return outcome;
                    }
                }
                Decision::Block => {
                    self.state.halted = true;
                    tracing::info!(
                        request_id = %self.request_id,
                        forwarded = self.state.forwarded,
                        "sentence blocked, halting stream"
                    );
                    let redacted = SentenceUnit::Sentence(sentence.redacted(&self.redaction_message));
                    if let Err(outcome) = self.forward(out, redacted.to_frame()).await {
                        return outcome;
                    }
                    if let Err(outcome) = self.forward(out, frame(DONE)).await {
                        return outcome;
                    }
                    return GateOutcome::Halted;
                }
            }
        }
    }

    async fn review(&mut self, sentence: &Sentence) -> Decision {
        let Some(moderator) = &self.moderator else {
            return Decision::Allow;
        };
        if sentence.text.is_empty() {
            return Decision::Allow;
        }

        self.state.in_flight = true;
        let decision = moderation::review(
            moderator.as_ref(),
            &self.policy,
            &sentence.text,
            &self.request_id,
        )
        .await;
        self.state.in_flight = false;
        decision
    }

    async fn forward(&mut self, out: &mpsc::Sender<Bytes>, frame: Bytes) -> Result<(), GateOutcome> {
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GateOutcome::Cancelled),
            sent = out.send(frame) => match sent {
                Ok(()) => {
                    self.state.forwarded += 1;
                    Ok(())
                }
                Err(_) => Err(GateOutcome::Disconnected),
            },
        }
    }
}
