// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background flush loop.
//!
//! ```text
//!        ┌──────────┐   tick    ┌──────────────────────┐
//!   ┌───▶│   Idle   │──────────▶│ Draining/Dispatching │
//!   │    └──────────┘           └──────────┬───────────┘
//!   │         ▲                            │ all dispatches joined
//!   │         └────── sleep(interval) ─────┘
//!   │
//!   └── cancelled ──▶ Stopped
//! ```
//!
//! Every tick drains each tenant queue into one batch and dispatches all batches
//! concurrently, one task per tenant, then waits for the whole group before sleeping.
//! A tenant therefore never has two dispatches in flight.
//!
//! A failed write for a tenant is turned into an error [`LogMessage`] on the default
//! queue and the batch is dropped; a tenant dispatch that panics is handled the same
//! way. A failed or panicked dispatch for the default queue is returned from
//! [`Dispatcher::run`], ending the loop.

use hashbrown::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::SinkConfig;
use crate::errors::{SinkError, WriteError};
use crate::level::LogLevel;
use crate::message::{LogMessage, Tenant};
use crate::queue::{TenantKey, TenantQueues};
use crate::rowset::RowSet;
use crate::writer::{write_rows, BatchWriter};

/// What happened to one tenant's batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Written { rows: usize },
    /// No connection target for the tenant; the batch was dropped.
    NoDestination { rows: usize },
    /// The write failed and an error message was queued in its place.
    Failed { rows: usize },
}

/// Totals for one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub batches: usize,
    pub written: usize,
    pub dropped: usize,
    pub failed: usize,
}

impl TickSummary {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Written { rows } => self.written += rows,
            DispatchOutcome::NoDestination { rows } => self.dropped += rows,
            DispatchOutcome::Failed { rows } => self.failed += rows,
        }
    }
}

/// State shared by the dispatcher and every dispatch task.
struct Shared {
    config: Arc<SinkConfig>,
    queues: Arc<TenantQueues>,
    writer: Arc<dyn BatchWriter>,
}

pub struct Dispatcher {
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        config: Arc<SinkConfig>,
        queues: Arc<TenantQueues>,
        writer: Arc<dyn BatchWriter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                queues,
                writer,
            }),
            cancel,
        }
    }

    /// Runs ticks until cancelled. Cancellation is observed before each drain and
    /// during the delay; a tick that has started always completes.
    pub async fn run(self) -> Result<(), SinkError> {
        debug!("Log dispatcher started");
        let interval = self.shared.config.flush_interval;

        while !self.cancel.is_cancelled() {
            self.tick().await?;

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        debug!("Log dispatcher stopped");
        Ok(())
    }

    /// Drains every queue once and dispatches the resulting batches concurrently.
    ///
    /// Returns after every dispatch of this tick has finished. If the default queue's
    /// batch could not be written, that error is returned once the other tenants'
    /// dispatches are done. Tenant dispatches that panic are reported like failed
    /// writes.
    pub async fn tick(&self) -> Result<TickSummary, SinkError> {
        let evicted = self.shared.queues.take_evicted();
        if evicted > 0 {
            warn!("Evicted {evicted} queued log messages to respect the maximum queue depth");
        }

        let batches = self.shared.queues.drain_all();
        let mut summary = TickSummary {
            batches: batches.len(),
            ..TickSummary::default()
        };
        if batches.is_empty() {
            return Ok(summary);
        }
        debug!("Dispatching {} batches", batches.len());

        let mut set = JoinSet::new();
        let mut in_flight: HashMap<task::Id, (TenantKey, usize), fnv::FnvBuildHasher> =
            HashMap::default();
        for (tenant, batch) in batches {
            let shared = Arc::clone(&self.shared);
            let rows = batch.len();
            let handle = set.spawn(async move { shared.dispatch(tenant, batch).await });
            in_flight.insert(handle.id(), (tenant, rows));
        }

        let mut default_fault = None;
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((_, Ok(outcome))) => summary.record(outcome),
                Ok((_, Err(e))) => default_fault = Some(e),
                Err(e) => match in_flight.remove(&e.id()) {
                    Some((Some(tenant), rows)) => {
                        error!("Log dispatch for tenant {tenant} failed: {e}");
                        self.shared.queues.enqueue(self.shared.failure_message(
                            tenant,
                            rows,
                            &format!("dispatch task failed: {e}"),
                        ));
                        summary.record(DispatchOutcome::Failed { rows });
                    }
                    _ => {
                        error!("Log dispatch to the default destination failed: {e}");
                        if default_fault.is_none() {
                            default_fault = Some(SinkError::Join(e));
                        }
                    }
                },
            }
        }

        match default_fault {
            Some(e) => Err(e),
            None => {
                debug!(
                    "Dispatched {} rows, dropped {}, failed {}",
                    summary.written, summary.dropped, summary.failed
                );
                Ok(summary)
            }
        }
    }
}

impl Shared {
    async fn dispatch(
        &self,
        tenant: TenantKey,
        batch: Vec<LogMessage>,
    ) -> Result<DispatchOutcome, SinkError> {
        let rows = RowSet::from_batch(&self.config, &batch);
        let count = rows.len();
        if rows.is_empty() {
            return Ok(DispatchOutcome::Written { rows: 0 });
        }

        let Some(target) = (self.config.connection_resolver)(tenant.as_ref()) else {
            debug!(
                "No destination for tenant {}, dropping {count} messages",
                display_tenant(tenant.as_ref())
            );
            return Ok(DispatchOutcome::NoDestination { rows: count });
        };

        match self.write(&target, &rows).await {
            Ok(()) => Ok(DispatchOutcome::Written { rows: count }),
            Err(e) => match tenant {
                Some(tenant) => {
                    error!("Failed to write {count} log messages for tenant {tenant}: {e}");
                    self.queues.enqueue(self.failure_message(tenant, count, &e));
                    Ok(DispatchOutcome::Failed { rows: count })
                }
                None => {
                    error!("Failed to write {count} log messages to the default destination: {e}");
                    Err(SinkError::DefaultDestination {
                        batch_size: count,
                        source: e,
                    })
                }
            },
        }
    }

    async fn write(&self, target: &str, rows: &RowSet) -> Result<(), WriteError> {
        let mut handle = self.writer.destination(target).await?;
        write_rows(handle.as_mut(), rows).await
    }

    /// Message describing a failed tenant write, routed to the default destination.
    fn failure_message(
        &self,
        tenant: Tenant,
        batch_size: usize,
        error: &dyn Display,
    ) -> LogMessage {
        LogMessage::new(
            None,
            self.config.source_name.clone(),
            LogLevel::Error,
            format!(
                "Failed to write a batch of {batch_size} log messages for tenant {tenant}: {error}"
            ),
            self.config.mappings.defaults(),
        )
    }
}

fn display_tenant(tenant: Option<&Tenant>) -> &str {
    tenant.map_or("<default>", Tenant::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingTable, MetaMapping};
    use crate::memory_writer::MemoryWriter;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn config() -> SinkConfig {
        SinkConfig::default()
            .with_connection_resolver(|tenant| {
                Some(tenant.map_or("db://default".to_string(), |t| format!("db://{t}")))
            })
            .with_mappings(MappingTable::new(vec![
                MetaMapping::nullable("PostId"),
                MetaMapping::not_null("FilterId", 0),
            ]))
    }

    fn message(tenant: Option<&str>, text: &str) -> LogMessage {
        LogMessage::new(
            tenant.map(Tenant::new),
            "app",
            LogLevel::Information,
            text,
            vec![Value::Null, json!(0)],
        )
    }

    fn dispatcher(
        config: SinkConfig,
        writer: Arc<dyn BatchWriter>,
    ) -> (Dispatcher, Arc<TenantQueues>) {
        let queues = Arc::new(TenantQueues::default());
        let dispatcher = Dispatcher::new(
            Arc::new(config),
            Arc::clone(&queues),
            writer,
            CancellationToken::new(),
        );
        (dispatcher, queues)
    }

    #[tokio::test]
    async fn test_tick_writes_one_batch_per_tenant() {
        let writer = Arc::new(MemoryWriter::new());
        let (dispatcher, queues) = dispatcher(config(), writer.clone());

        queues.enqueue(message(Some("a"), "a1"));
        queues.enqueue(message(Some("b"), "b1"));
        queues.enqueue(message(Some("a"), "a2"));
        queues.enqueue(message(None, "d1"));

        let summary = dispatcher.tick().await.expect("tick failed");
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.written, 4);

        let a = writer.rows_for("db://a");
        assert_eq!(a.len(), 1);
        let texts: Vec<&Value> = a[0].rows.iter().map(|row| &row[1]).collect();
        assert_eq!(texts, vec![&json!("a1"), &json!("a2")]);
        assert_eq!(writer.rows_for("db://b").len(), 1);
        assert_eq!(writer.rows_for("db://default").len(), 1);
    }

    #[tokio::test]
    async fn test_empty_tick_does_not_write() {
        let writer = Arc::new(MemoryWriter::new());
        let (dispatcher, _queues) = dispatcher(config(), writer.clone());

        let summary = dispatcher.tick().await.expect("tick failed");
        assert_eq!(summary, TickSummary::default());
        assert_eq!(writer.total_writes(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_tenant_is_dropped() {
        let writer = Arc::new(MemoryWriter::new());
        let config = config().with_connection_resolver(|tenant| {
            tenant
                .filter(|t| t.as_str() != "unknown")
                .map(|t| format!("db://{t}"))
        });
        let (dispatcher, queues) = dispatcher(config, writer.clone());

        queues.enqueue(message(Some("unknown"), "lost"));
        queues.enqueue(message(Some("known"), "kept"));

        let summary = dispatcher.tick().await.expect("tick failed");
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.written, 1);
        assert_eq!(writer.total_writes(), 1);
        assert!(queues.drain_all().is_empty());
    }

    #[tokio::test]
    async fn test_tenant_failure_becomes_default_queue_message() {
        let writer = Arc::new(MemoryWriter::new());
        writer.fail_target("db://T");
        let (dispatcher, queues) = dispatcher(config(), writer.clone());

        for i in 0..3 {
            queues.enqueue(message(Some("T"), &i.to_string()));
        }

        let summary = dispatcher.tick().await.expect("tick failed");
        assert_eq!(summary.failed, 3);

        let batches = queues.drain_all();
        assert_eq!(batches.len(), 1);
        let (tenant, batch) = &batches[0];
        assert_eq!(*tenant, None);
        assert_eq!(batch.len(), 1);

        let failure = &batch[0];
        assert_eq!(failure.level, LogLevel::Error);
        assert_eq!(failure.source, "tenant_log_sink::dispatcher");
        assert!(failure.text.contains("batch of 3"));
        assert!(failure.text.contains("tenant T"));
        assert_eq!(failure.metadata_values, vec![Value::Null, json!(0)]);
    }

    #[tokio::test]
    async fn test_default_queue_failure_is_returned() {
        let writer = Arc::new(MemoryWriter::new());
        writer.fail_target("db://default");
        let (dispatcher, queues) = dispatcher(config(), writer.clone());

        queues.enqueue(message(None, "d1"));
        queues.enqueue(message(Some("ok"), "fine"));

        let err = dispatcher.tick().await.unwrap_err();
        assert!(matches!(
            err,
            SinkError::DefaultDestination { batch_size: 1, .. }
        ));
        // The failure is not fed back into the pipeline.
        assert!(queues.drain_all().is_empty());
        assert_eq!(writer.rows_for("db://ok").len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_when_cancelled_during_delay() {
        let writer = Arc::new(MemoryWriter::new());
        let queues = Arc::new(TenantQueues::default());
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            Arc::new(config().with_flush_interval(Duration::from_secs(3600))),
            Arc::clone(&queues),
            writer.clone(),
            cancel.clone(),
        );
        queues.enqueue(message(Some("a"), "first tick"));

        let task = tokio::spawn(dispatcher.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("dispatcher did not stop")
            .expect("dispatcher panicked");
        assert!(result.is_ok());
        assert_eq!(writer.total_writes(), 1);
    }

    #[tokio::test]
    async fn test_run_ends_on_default_destination_failure() {
        let writer = Arc::new(MemoryWriter::new());
        writer.fail_target("db://default");
        let queues = Arc::new(TenantQueues::default());
        let dispatcher = Dispatcher::new(
            Arc::new(config().with_flush_interval(Duration::from_millis(10))),
            Arc::clone(&queues),
            writer,
            CancellationToken::new(),
        );
        queues.enqueue(message(None, "doomed"));

        let result = tokio::time::timeout(Duration::from_secs(1), dispatcher.run())
            .await
            .expect("dispatcher did not stop");
        assert!(matches!(result, Err(SinkError::DefaultDestination { .. })));
    }

    #[tokio::test]
    async fn test_tenants_are_dispatched_concurrently() {
        let writer = Arc::new(MemoryWriter::new().with_latency(Duration::from_millis(200)));
        let (dispatcher, queues) = dispatcher(config(), writer.clone());
        for tenant in ["a", "b", "c", "d"] {
            queues.enqueue(message(Some(tenant), "slow"));
        }

        let started = std::time::Instant::now();
        dispatcher.tick().await.expect("tick failed");
        let elapsed = started.elapsed();

        assert_eq!(writer.total_writes(), 4);
        assert!(
            elapsed < Duration::from_millis(700),
            "dispatches ran sequentially: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_failed_tenant_does_not_block_others() {
        let writer = Arc::new(MemoryWriter::new());
        writer.fail_target("db://down");
        let (dispatcher, queues) = dispatcher(config(), writer.clone());
        queues.enqueue(message(Some("down"), "lost"));
        queues.enqueue(message(Some("up"), "kept"));

        dispatcher.tick().await.expect("tick failed");
        assert_eq!(writer.rows_for("db://up").len(), 1);

        // The failure report is written by the following tick.
        dispatcher.tick().await.expect("tick failed");
        let reports = writer.rows_for("db://default");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].len(), 1);
        assert_eq!(writer.rows_for("db://down").len(), 0);
    }

    /// Panics when asked for `target`, delegating every other destination.
    struct PanickingWriter {
        inner: MemoryWriter,
        target: &'static str,
    }

    #[async_trait::async_trait]
    impl BatchWriter for PanickingWriter {
        async fn destination(
            &self,
            target: &str,
        ) -> Result<Box<dyn crate::writer::DestinationHandle>, WriteError> {
            assert_ne!(target, self.target, "writer bug");
            self.inner.destination(target).await
        }
    }

    #[tokio::test]
    async fn test_panicking_tenant_dispatch_is_isolated() {
        let memory = MemoryWriter::new();
        let writer = Arc::new(PanickingWriter {
            inner: memory.clone(),
            target: "db://bad",
        });
        let (dispatcher, queues) = dispatcher(config(), writer);
        queues.enqueue(message(Some("bad"), "1"));
        queues.enqueue(message(Some("bad"), "2"));
        queues.enqueue(message(Some("good"), "kept"));

        let summary = dispatcher.tick().await.expect("tenant panic ended the tick");
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.written, 1);
        assert_eq!(memory.rows_for("db://good").len(), 1);

        let batches = queues.drain_all();
        assert_eq!(batches.len(), 1);
        let (tenant, batch) = &batches[0];
        assert_eq!(*tenant, None);
        assert_eq!(batch.len(), 1);
        assert!(batch[0].text.contains("batch of 2"));
        assert!(batch[0].text.contains("tenant bad"));
    }

    #[tokio::test]
    async fn test_run_survives_panicking_tenant_dispatch() {
        let memory = MemoryWriter::new();
        let writer = Arc::new(PanickingWriter {
            inner: memory.clone(),
            target: "db://bad",
        });
        let queues = Arc::new(TenantQueues::default());
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            Arc::new(config().with_flush_interval(Duration::from_millis(20))),
            Arc::clone(&queues),
            writer,
            cancel.clone(),
        );
        queues.enqueue(message(Some("bad"), "boom"));
        let task = tokio::spawn(dispatcher.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        queues.enqueue(message(Some("good"), "later"));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!task.is_finished());
        assert_eq!(memory.rows_for("db://good").len(), 1);
        assert_eq!(memory.rows_for("db://default").len(), 1);

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("dispatcher did not stop")
            .expect("dispatcher panicked");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_panicking_default_dispatch_is_returned() {
        let writer = Arc::new(PanickingWriter {
            inner: MemoryWriter::new(),
            target: "db://default",
        });
        let (dispatcher, queues) = dispatcher(config(), writer);
        queues.enqueue(message(None, "d1"));

        let err = dispatcher.tick().await.unwrap_err();
        assert!(matches!(err, SinkError::Join(_)));
        assert!(queues.drain_all().is_empty());
    }
}
