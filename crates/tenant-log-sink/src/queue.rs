// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-tenant message queues.
//!
//! Producers append to the queue of the message's tenant from any thread; the
//! dispatcher drains every queue once per tick. A queue is created the first time a
//! tenant is seen and is never removed.
//!
//! Queues are unbounded unless a maximum depth is configured. With a maximum depth a
//! full queue evicts its oldest message to make room and counts the eviction.

use hashbrown::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::message::{LogMessage, Tenant};

/// Queue routing key. `None` is the default, tenant-less queue.
pub type TenantKey = Option<Tenant>;

/// FIFO queue for one tenant.
#[derive(Debug, Default)]
pub struct TenantQueue {
    messages: Mutex<VecDeque<LogMessage>>,
}

impl TenantQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<LogMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a message, returning how many messages were evicted to respect
    /// `max_depth`.
    fn push(&self, message: LogMessage, max_depth: Option<usize>) -> usize {
        let mut messages = self.lock();
        messages.push_back(message);
        let Some(max_depth) = max_depth else {
            return 0;
        };
        let excess = messages.len().saturating_sub(max_depth.max(1));
        messages.drain(..excess);
        excess
    }

    /// Removes every message currently queued, in enqueue order.
    pub fn drain(&self) -> Vec<LogMessage> {
        Vec::from(std::mem::take(&mut *self.lock()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// All tenant queues, keyed by tenant.
#[derive(Debug)]
pub struct TenantQueues {
    queues: RwLock<HashMap<TenantKey, Arc<TenantQueue>, fnv::FnvBuildHasher>>,
    max_depth: Option<usize>,
    evicted: AtomicU64,
}

impl TenantQueues {
    #[must_use]
    pub fn new(max_depth: Option<usize>) -> Self {
        Self {
            queues: RwLock::new(HashMap::default()),
            max_depth,
            evicted: AtomicU64::new(0),
        }
    }

    /// Appends `message` to its tenant's queue, creating the queue on first sight.
    pub fn enqueue(&self, message: LogMessage) {
        let queue = self.queue_for(message.tenant);
        let evicted = queue.push(message, self.max_depth);
        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    /// Returns the queue for `tenant`. Concurrent first lookups for the same tenant all
    /// observe the same queue.
    pub fn queue_for(&self, tenant: TenantKey) -> Arc<TenantQueue> {
        {
            let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(queue) = queues.get(&tenant) {
                return Arc::clone(queue);
            }
        }
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(queues.entry(tenant).or_default())
    }

    /// Current set of queues, including ones created since the last snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(TenantKey, Arc<TenantQueue>)> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(tenant, queue)| (*tenant, Arc::clone(queue)))
            .collect()
    }

    /// Drains every non-empty queue into one batch per tenant.
    #[must_use]
    pub fn drain_all(&self) -> Vec<(TenantKey, Vec<LogMessage>)> {
        self.snapshot()
            .into_iter()
            .filter_map(|(tenant, queue)| {
                let batch = queue.drain();
                (!batch.is_empty()).then_some((tenant, batch))
            })
            .collect()
    }

    /// Number of tenants seen so far, the default queue included once used.
    #[must_use]
    pub fn tenant_count(&self) -> usize {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Messages evicted since the last call.
    pub fn take_evicted(&self) -> u64 {
        self.evicted.swap(0, Ordering::Relaxed)
    }
}

impl Default for TenantQueues {
    fn default() -> Self {
        Self::new(None)
    }
}
