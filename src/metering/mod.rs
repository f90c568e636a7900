// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

// Token metering
//
// Responsibilities:
// - Approximate token counts (GPT-2 / r50k BPE)
// - Counter keys: <caller>:<model>:<request_ts>:<req_token|resp_token>
// - Per-request meter whose writes never block the relay
// - CounterSink trait (dependency injection point for the key-value store)

mod sink;

pub use sink::{InMemoryCounterSink, RedisCounterSink};

use crate::config::{MeteringBackend, MeteringConfig};
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// Trait: CounterSink
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MeterError {
    #[error("counter sink unavailable: {0}")]
    Connect(String),

    #[error("counter sink write failed: {0}")]
    Write(String),
}

/// Shared key-value store that holds the latest count per key.
///
/// `set` overwrites; it never accumulates.
#[async_trait]
pub trait CounterSink: Send + Sync {
    async fn set(&self, key: &str, value: u64) -> Result<(), MeterError>;
}

/// Build the sink selected in config. `None` disables metering.
pub async fn build_sink(
    config: &MeteringConfig,
) -> Result<Option<Arc<dyn CounterSink>>, MeterError> {
    match &config.backend {
        MeteringBackend::None => Ok(None),
        MeteringBackend::Memory => Ok(Some(Arc::new(InMemoryCounterSink::new()))),
        MeteringBackend::Redis { url } => {
            let sink = RedisCounterSink::connect(url).await?;
            Ok(Some(Arc::new(sink)))
        }
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    fn suffix(self) -> &'static str {
        match self {
            Direction::Request => "req_token",
            Direction::Response => "resp_token",
        }
    }
}

/// Identity of one request's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeterKey {
    pub caller: String,
    pub model: String,
    pub request_ts: i64,
}

impl MeterKey {
    pub fn key(&self, direction: Direction) -> String {
        format!(
            "{}:{}:{}:{}",
            self.caller,
            self.model,
            self.request_ts,
            direction.suffix()
        )
    }
}

static LAST_REQUEST_TS: AtomicI64 = AtomicI64::new(0);

/// Wall-clock milliseconds, bumped so that no two calls in this process
/// ever return the same value.
pub fn next_request_ts() -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    let mut last = LAST_REQUEST_TS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_REQUEST_TS.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(observed) => last = observed,
        }
    }
}

// ---------------------------------------------------------------------------
// Token counting
// ---------------------------------------------------------------------------

/// Approximate token count of `text`.
pub fn count_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    tiktoken_rs::r50k_base_singleton()
        .encode_with_special_tokens(text)
        .len() as u64
}

/// The BPE tables take a while to build and load lazily. Call at start-up so
/// the first request does not pay for it.
pub fn preload_tokenizer() {
    let _ = tiktoken_rs::r50k_base_singleton();
}

// ---------------------------------------------------------------------------
// TokenMeter
// ---------------------------------------------------------------------------

/// Running token counts for one request.
///
/// Inbound is written once. Outbound totals are published on a watch channel
/// to a writer task that always writes the newest total. Writes land in
/// order, a slow sink only ever holds one pending value, and the caller never
/// waits on the sink.
pub struct TokenMeter {
    key: MeterKey,
    sink: Arc<dyn CounterSink>,
    request_id: String,
    outbound: u64,
    writer: Option<watch::Sender<u64>>,
}

impl TokenMeter {
    pub fn new(sink: Arc<dyn CounterSink>, key: MeterKey, request_id: impl Into<String>) -> Self {
        Self {
            key,
            sink,
            request_id: request_id.into(),
            outbound: 0,
            writer: None,
        }
    }

    /// Total outbound tokens observed so far.
    pub fn outbound(&self) -> u64 {
        self.outbound
    }

    /// Count tokens across the request's message contents and write the total.
    pub fn record_inbound<'a>(&self, contents: impl IntoIterator<Item = &'a str>) -> u64 {
        let total: u64 = contents.into_iter().map(count_tokens).sum();
        let sink = self.sink.clone();
        let key = self.key.key(Direction::Request);
        let request_id = self.request_id.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.set(&key, total).await {
                tracing::warn!(request_id = %request_id, key = %key, "metering write failed: {e}");
            }
        });
        total
    }

    /// Add one streamed fragment to the outbound total and queue the new total.
    pub fn observe_outbound(&mut self, fragment: &str) -> u64 {
        self.outbound += count_tokens(fragment);
        let total = self.outbound;
        let writer = self.writer.get_or_insert_with(|| {
            spawn_writer(
                self.sink.clone(),
                self.key.key(Direction::Response),
                self.request_id.clone(),
            )
        });
        if writer.send(total).is_err() {
            tracing::warn!(request_id = %self.request_id, "metering writer stopped");
        }
        total
    }

    /// Record a complete (non-streamed) response in one write.
    pub fn record_outbound(&mut self, text: &str) -> u64 {
        self.observe_outbound(text)
    }
}

fn spawn_writer(sink: Arc<dyn CounterSink>, key: String, request_id: String) -> watch::Sender<u64> {
    let (tx, mut rx) = watch::channel(0u64);
    tokio::spawn(async move {
        // Totals published while a write is in progress collapse into the
        // newest one. A final unseen total is still written after the meter
        // is dropped.
        while rx.changed().await.is_ok() {
            let value = *rx.borrow_and_update();
            if let Err(e) = sink.set(&key, value).await {
                tracing::warn!(request_id = %request_id, key = %key, value, "metering write failed: {e}");
            }
        }
    });
    tx
}
