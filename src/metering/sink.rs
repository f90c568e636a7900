// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

use super::{CounterSink, MeterError};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;

// ---------------------------------------------------------------------------
// In-memory sink
// ---------------------------------------------------------------------------

/// Process-local counters. Values are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryCounterSink {
    values: DashMap<String, u64>,
}

impl InMemoryCounterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.values.get(key).map(|v| *v)
    }

    /// All counters, sorted by key.
    pub fn entries(&self) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> = self
            .values
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl CounterSink for InMemoryCounterSink {
    async fn set(&self, key: &str, value: u64) -> Result<(), MeterError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Redis sink
// ---------------------------------------------------------------------------

/// Counters stored as plain Redis strings (`SET key value`).
///
/// The connection manager reconnects on its own after the initial connect.
#[derive(Clone)]
pub struct RedisCounterSink {
    conn: redis::aio::ConnectionManager,
}

impl RedisCounterSink {
    pub async fn connect(url: &str) -> Result<Self, MeterError> {
        let client = redis::Client::open(url).map_err(|e| MeterError::Connect(e.to_string()))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| MeterError::Connect(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CounterSink for RedisCounterSink {
    async fn set(&self, key: &str, value: u64) -> Result<(), MeterError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| MeterError::Write(e.to_string()))
    }
}
