// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock writers for integration tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tenant_log_sink::rowset::RowSet;
use tenant_log_sink::writer::{BatchWriter, DestinationHandle};
use tenant_log_sink::WriteError;

/// Writer handing out handles that are already open, like a connection pool would.
/// Records how often handles get opened and closed.
#[allow(dead_code)]
#[derive(Default, Clone)]
pub struct PooledWriter {
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub written: Arc<Mutex<Vec<(String, usize)>>>,
}

#[async_trait]
impl BatchWriter for PooledWriter {
    async fn destination(
        &self,
        target: &str,
    ) -> Result<Box<dyn DestinationHandle>, WriteError> {
        Ok(Box::new(PooledHandle {
            writer: self.clone(),
            target: target.to_string(),
            open: true,
        }))
    }
}

struct PooledHandle {
    writer: PooledWriter,
    target: String,
    open: bool,
}

#[async_trait]
impl DestinationHandle for PooledHandle {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self) -> Result<(), WriteError> {
        self.writer.opens.fetch_add(1, Ordering::SeqCst);
        self.open = true;
        Ok(())
    }

    async fn write(&mut self, rows: &RowSet) -> Result<(), WriteError> {
        self.writer
            .written
            .lock()
            .unwrap()
            .push((self.target.clone(), rows.len()));
        Ok(())
    }

    async fn close(&mut self) {
        self.writer.closes.fetch_add(1, Ordering::SeqCst);
        self.open = false;
    }
}

/// Writer whose destinations cannot be created at all.
#[allow(dead_code)]
pub struct UnreachableWriter;

#[async_trait]
impl BatchWriter for UnreachableWriter {
    async fn destination(
        &self,
        target: &str,
    ) -> Result<Box<dyn DestinationHandle>, WriteError> {
        Err(WriteError::Connect(format!("{target} is unreachable")))
    }
}
