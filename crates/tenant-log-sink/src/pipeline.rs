// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline handle tying loggers, tenant queues and the dispatcher together.
//!
//! The dispatcher task is spawned on the runtime that built the pipeline, either by
//! [`SinkPipeline::start`] or lazily by the first logger or enqueued message.
//! [`SinkPipeline::shutdown`] cancels it and waits at most one flush interval. A tick
//! still running after that is left to finish in the background; its writes are never
//! interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SinkConfig;
use crate::dispatcher::Dispatcher;
use crate::errors::SinkError;
use crate::logger::Logger;
use crate::message::LogMessage;
use crate::queue::TenantQueues;
use crate::resolver::MetadataResolver;
use crate::writer::BatchWriter;

enum Lifecycle {
    Idle,
    Running {
        handle: JoinHandle<Result<(), SinkError>>,
        cancel: CancellationToken,
    },
    Stopped,
}

struct Inner {
    config: Arc<SinkConfig>,
    queues: Arc<TenantQueues>,
    writer: Arc<dyn BatchWriter>,
    resolver: MetadataResolver,
    runtime: Handle,
    lifecycle: Mutex<Lifecycle>,
    /// Set once the lifecycle has left `Idle`; lets producers skip the lock.
    started: AtomicBool,
}

/// Cheaply cloneable handle to one sink pipeline.
#[derive(Clone)]
pub struct SinkPipeline {
    inner: Arc<Inner>,
}

impl SinkPipeline {
    /// Builds a pipeline bound to the current tokio runtime. The dispatcher is not
    /// started yet.
    pub fn new(config: SinkConfig, writer: Arc<dyn BatchWriter>) -> Result<Self, SinkError> {
        let runtime = Handle::try_current().map_err(|_| SinkError::NoRuntime)?;
        let resolver =
            MetadataResolver::new(Arc::clone(&config.mappings), config.tenant_key.clone());
        let queues = Arc::new(TenantQueues::new(config.max_queue_depth));

        Ok(Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                queues,
                writer,
                resolver,
                runtime,
                lifecycle: Mutex::new(Lifecycle::Idle),
                started: AtomicBool::new(false),
            }),
        })
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn config(&self) -> &SinkConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn queues(&self) -> &Arc<TenantQueues> {
        &self.inner.queues
    }

    /// Spawns the dispatcher if it is not running yet. Has no effect once the pipeline
    /// has been shut down.
    pub fn start(&self) {
        if self.inner.started.load(Ordering::Acquire) {
            return;
        }
        let mut lifecycle = self.lifecycle();
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return;
        }

        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.inner.config),
            Arc::clone(&self.inner.queues),
            Arc::clone(&self.inner.writer),
            cancel.clone(),
        );
        let handle = self.inner.runtime.spawn(dispatcher.run());
        info!(
            "Log sink started, flushing every {:?}",
            self.inner.config.flush_interval
        );
        *lifecycle = Lifecycle::Running { handle, cancel };
        self.inner.started.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        match &*self.lifecycle() {
            Lifecycle::Running { handle, .. } => !handle.is_finished(),
            Lifecycle::Idle | Lifecycle::Stopped => false,
        }
    }

    /// Appends `message` to its tenant's queue. Never blocks on I/O and never fails.
    pub fn enqueue(&self, message: LogMessage) {
        self.start();
        self.inner.queues.enqueue(message);
    }

    #[must_use]
    pub fn logger(&self, name: &str) -> Logger {
        self.start();
        Logger::new(name, self.clone(), self.inner.resolver.clone())
    }

    /// Stops the dispatcher. Waits for the current tick to finish for at most one flush
    /// interval; past that the task is detached and completes its tick on its own.
    /// Calling it again does nothing.
    pub async fn shutdown(&self) {
        let previous = {
            let mut lifecycle = self.lifecycle();
            self.inner.started.store(true, Ordering::Release);
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        };
        let Lifecycle::Running { mut handle, cancel } = previous else {
            debug!("Log sink is not running, nothing to shut down");
            return;
        };

        cancel.cancel();
        let wait = self.inner.config.flush_interval;
        match tokio::time::timeout(wait, &mut handle).await {
            Ok(Ok(Ok(()))) => info!("Log sink stopped"),
            Ok(Ok(Err(e))) => error!("Log dispatcher ended with an error: {e}"),
            Ok(Err(e)) => error!("Log dispatcher task failed: {e}"),
            Err(_) => {
                warn!("Log dispatcher did not stop within {wait:?}, detaching it");
                drop(handle);
            }
        }

        let pending: usize = self
            .inner
            .queues
            .snapshot()
            .iter()
            .map(|(_, queue)| queue.len())
            .sum();
        if pending > 0 {
            warn!("{pending} log messages were still queued at shutdown");
        }
    }
}

impl std::fmt::Debug for SinkPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkPipeline")
            .field("config", &self.inner.config)
            .field("tenants", &self.inner.queues.tenant_count())
            .field("running", &self.is_running())
            .finish()
    }
}
