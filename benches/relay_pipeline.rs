// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

//! Streaming relay benchmarks.
//!
//! Measures:
//! - Event decoding plus sentence accumulation over a synthetic upstream body
//! - The full relay pipeline with and without a (zero-latency) classifier
//!
//! Run: cargo bench --bench relay_pipeline

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use relayguard::config::FailureMode;
use relayguard::moderation::{
    ModerationError, ModerationLevel, ModerationPolicy, Moderator, Verdict,
};
use relayguard::stream::{decode_unit, EventDecoder, RelayProcessor, SentenceAccumulator};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const FRAGMENTS: &[&str] = &["今天", "天气", "很好。", "We went ", "outside", "!\n", "你呢？"];

/// An upstream body of `deltas` chunks, cut into network-sized pieces that do
/// not respect event or character boundaries.
fn upstream_body(deltas: usize, piece: usize) -> Vec<Bytes> {
    let mut raw = String::new();
    for i in 0..deltas {
        let chunk = serde_json::json!({
            "id": "chatcmpl-bench",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": FRAGMENTS[i % FRAGMENTS.len()]}}]
        });
        raw.push_str(&format!("data: {chunk}\n\n"));
    }
    raw.push_str("data: [DONE]\n\n");
    raw.as_bytes()
        .chunks(piece)
        .map(Bytes::copy_from_slice)
        .collect()
}

struct InstantModerator;

#[async_trait]
impl Moderator for InstantModerator {
    async fn moderate(&self, _text: &str) -> Result<Verdict, ModerationError> {
        Ok(Verdict::Pass)
    }
}

fn policy() -> ModerationPolicy {
    ModerationPolicy {
        level: ModerationLevel::Normal,
        on_failure: FailureMode::Closed,
    }
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_decode_accumulate(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_accumulate");

    for deltas in [16usize, 256] {
        let body = upstream_body(deltas, 61);
        group.bench_with_input(BenchmarkId::from_parameter(deltas), &body, |b, body| {
            b.iter(|| {
                let mut decoder = EventDecoder::new();
                let mut accumulator = SentenceAccumulator::new();
                let mut sentences = 0usize;
                for piece in body {
                    for event in decoder.feed(black_box(piece)) {
                        if let Ok(unit) = decode_unit(&event) {
                            sentences += accumulator.push(unit).len();
                        }
                    }
                }
                sentences
            });
        });
    }

    group.finish();
}

fn bench_relay(c: &mut Criterion) {
    let mut group = c.benchmark_group("relay");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let body = upstream_body(256, 512);
    let cases: [(&str, Option<Arc<dyn Moderator>>); 2] = [
        ("passthrough", None),
        ("moderated", Some(Arc::new(InstantModerator))),
    ];

    for (name, moderator) in cases {
        let processor = RelayProcessor::new(moderator, policy(), "redacted".to_string());
        group.bench_function(name, |b| {
            b.iter(|| {
                rt.block_on(async {
                    let input = futures_util::stream::iter(
                        body.clone().into_iter().map(Ok::<_, std::io::Error>),
                    );
                    let output = processor.process(
                        input,
                        None,
                        CancellationToken::new(),
                        "bench".to_string(),
                    );
                    output.count().await
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode_accumulate, bench_relay);
criterion_main!(benches);
