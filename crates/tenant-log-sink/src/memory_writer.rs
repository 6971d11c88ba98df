// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory [`BatchWriter`] that keeps every written row-set.
//!
//! Useful to embed the sink without a database and to observe what the dispatcher
//! writes. Targets can be marked as failing to simulate an outage.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::errors::WriteError;
use crate::rowset::RowSet;
use crate::writer::{BatchWriter, DestinationHandle};

#[derive(Debug, Default)]
struct State {
    written: Vec<(String, RowSet)>,
    failing: HashSet<String>,
    attempts: usize,
    releases: usize,
}

#[derive(Debug, Default, Clone)]
pub struct MemoryWriter {
    state: Arc<Mutex<State>>,
    latency: Option<Duration>,
}

impl MemoryWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every write by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every write to `target` fail until [`Self::recover_target`] is called.
    pub fn fail_target(&self, target: impl Into<String>) {
        self.lock().failing.insert(target.into());
    }

    pub fn recover_target(&self, target: &str) {
        self.lock().failing.remove(target);
    }

    /// Successful writes, in completion order.
    #[must_use]
    pub fn writes(&self) -> Vec<(String, RowSet)> {
        self.lock().written.clone()
    }

    /// Row-sets successfully written to `target`.
    #[must_use]
    pub fn rows_for(&self, target: &str) -> Vec<RowSet> {
        self.lock()
            .written
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, rows)| rows.clone())
            .collect()
    }

    #[must_use]
    pub fn total_writes(&self) -> usize {
        self.lock().written.len()
    }

    /// Writes attempted, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Destination handles closed after being opened.
    #[must_use]
    pub fn releases(&self) -> usize {
        self.lock().releases
    }
}

#[async_trait]
impl BatchWriter for MemoryWriter {
    async fn destination(
        &self,
        target: &str,
    ) -> Result<Box<dyn DestinationHandle>, WriteError> {
        Ok(Box::new(MemoryDestination {
            writer: self.clone(),
            target: target.to_string(),
            open: false,
        }))
    }
}

struct MemoryDestination {
    writer: MemoryWriter,
    target: String,
    open: bool,
}

#[async_trait]
impl DestinationHandle for MemoryDestination {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self) -> Result<(), WriteError> {
        self.open = true;
        Ok(())
    }

    async fn write(&mut self, rows: &RowSet) -> Result<(), WriteError> {
        if let Some(latency) = self.writer.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.writer.lock();
        state.attempts += 1;
        if state.failing.contains(&self.target) {
            return Err(WriteError::Connect(format!(
                "destination {} is unavailable",
                self.target
            )));
        }
        state.written.push((self.target.clone(), rows.clone()));
        Ok(())
    }

    async fn close(&mut self) {
        if self.open {
            self.writer.lock().releases += 1;
        }
        self.open = false;
    }
}
