// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

// Relay processor
//
// Wires decoder, accumulator, meter tap and gate for one streamed response.
// Two tasks per request: a reader that turns upstream bytes into sentence
// units, and the gate that moderates and writes them. The reader never waits
// on the gate, so a slow classifier does not stall the upstream read.

use super::accumulator::SentenceAccumulator;
use super::decoder::{decode_unit, EventDecoder};
use super::gate::{GateOutcome, ModerationGate};
use super::types::{EventUnit, Sentence, SentenceUnit, SseEvent};
use crate::metering::TokenMeter;
use crate::moderation::{ModerationPolicy, Moderator};
use bytes::Bytes;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

const DOWNSTREAM_BUFFER: usize = 64;

/// Streams one upstream response through the moderation pipeline.
///
/// With a moderator, fragments are grouped into sentences and each sentence
/// is reviewed before it is written. Without one, every upstream chunk is
/// relayed as it arrives.
pub struct RelayProcessor {
    moderator: Option<Arc<dyn Moderator>>,
    policy: ModerationPolicy,
    redaction_message: String,
}

impl RelayProcessor {
    pub fn new(
        moderator: Option<Arc<dyn Moderator>>,
        policy: ModerationPolicy,
        redaction_message: impl Into<String>,
    ) -> Self {
        Self {
            moderator,
            policy,
            redaction_message: redaction_message.into(),
        }
    }

    /// Process an upstream byte stream, producing framed downstream bytes.
    ///
    /// `cancel` is the request's abort token: it is cancelled when the gate
    /// halts or the downstream receiver is dropped, and cancelling it from
    /// outside stops both tasks and drops `input`.
    pub fn process<S, E>(
        &self,
        input: S,
        meter: Option<TokenMeter>,
        cancel: CancellationToken,
        request_id: impl Into<String>,
    ) -> impl Stream<Item = Bytes>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let request_id = request_id.into();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<SentenceUnit>();
        let (out_tx, out_rx) = mpsc::channel::<Bytes>(DOWNSTREAM_BUFFER);

        let reader = UpstreamReader {
            accumulator: self.moderator.is_some().then(SentenceAccumulator::new),
            meter,
            queue: queue_tx,
            request_id: request_id.clone(),
        };
        tokio::spawn(reader.run(input, cancel.clone()));

        let mut gate = ModerationGate::new(
            self.moderator.clone(),
            self.policy,
            self.redaction_message.clone(),
            request_id.clone(),
            cancel,
        );
        tokio::spawn(async move {
            let outcome = gate.run(queue_rx, out_tx).await;
            let state = gate.state();
            match outcome {
                GateOutcome::Completed | GateOutcome::Halted => tracing::info!(
                    request_id = %request_id,
                    outcome = ?outcome,
                    forwarded = state.forwarded,
                    "stream finished"
                ),
                _ => tracing::warn!(
                    request_id = %request_id,
                    outcome = ?outcome,
                    forwarded = state.forwarded,
                    "stream ended early"
                ),
            }
        });

        ReceiverStream::new(out_rx)
    }
}

// ---------------------------------------------------------------------------
// Upstream reader
// ---------------------------------------------------------------------------

struct UpstreamReader {
    /// `None` relays each chunk as its own unit.
    accumulator: Option<SentenceAccumulator>,
    meter: Option<TokenMeter>,
    queue: mpsc::UnboundedSender<SentenceUnit>,
    request_id: String,
}

/// Whether the reader should keep going after staging an event.
enum Flow {
    Continue,
    Stop,
}

impl UpstreamReader {
    async fn run<S, E>(mut self, mut input: S, cancel: CancellationToken)
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let mut decoder = EventDecoder::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(request_id = %self.request_id, "upstream read cancelled");
                    return;
                }
                next = input.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    for event in decoder.feed(&chunk) {
                        if let Flow::Stop = self.stage(&event) {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(request_id = %self.request_id, "upstream stream failed: {e}");
                    return;
                }
                None => break,
            }
        }

        for event in decoder.finish() {
            if let Flow::Stop = self.stage(&event) {
                return;
            }
        }

        tracing::debug!(
            request_id = %self.request_id,
            "upstream closed without terminal marker, synthesizing one"
        );
        self.accept(EventUnit::Terminal);
    }

    fn stage(&mut self, event: &SseEvent) -> Flow {
        match decode_unit(event) {
            Ok(unit) => self.accept(unit),
            Err(e) => {
                tracing::warn!(request_id = %self.request_id, "dropping stream event: {e}");
                Flow::Continue
            }
        }
    }

    fn accept(&mut self, unit: EventUnit) -> Flow {
        let terminal = matches!(unit, EventUnit::Terminal);

        if let (EventUnit::Delta(delta), Some(meter)) = (&unit, self.meter.as_mut()) {
            meter.observe_outbound(delta.fragment());
        }

        let units = match (&mut self.accumulator, unit) {
            (Some(acc), unit) => acc.push(unit),
            (None, EventUnit::Delta(delta)) => vec![SentenceUnit::Sentence(Sentence::verbatim(delta))],
            (None, EventUnit::Terminal) => vec![SentenceUnit::Terminal],
        };
        for unit in units {
            if self.queue.send(unit).is_err() {
                // Gate is gone: halted, cancelled or disconnected.
                return Flow::Stop;
            }
        }

        if terminal {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}
