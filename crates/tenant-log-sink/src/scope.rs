// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stack of active logging scopes.
//!
//! Opening a scope pushes its state and returns a [`ScopeGuard`]. Dropping the guard
//! removes exactly the entry it pushed. Scopes are expected to be released in reverse
//! order of opening; releasing out of order still removes only the matching entry,
//! leaving the others in place, and is reported with a warning.
//!
//! Each execution flow has its own chain: the current tokio task when there is one,
//! otherwise the current thread. A logger shared between flows never applies the
//! scopes of one flow to calls made on another. Spawned tasks start with an empty
//! chain.

use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tracing::warn;

use crate::state::LogState;

/// Execution flow owning a scope chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Flow {
    Task(tokio::task::Id),
    Thread(ThreadId),
}

impl Flow {
    fn current() -> Self {
        tokio::task::try_id().map_or_else(|| Self::Thread(thread::current().id()), Self::Task)
    }
}

struct ScopeEntry {
    id: u64,
    state: Arc<dyn LogState>,
}

type Chains = HashMap<Flow, Vec<ScopeEntry>, fnv::FnvBuildHasher>;

#[derive(Default)]
struct Inner {
    chains: Mutex<Chains>,
    next_id: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Chains> {
        // Every mutation is a single push or remove, so a poisoned map is still valid.
        self.chains.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handle to the scope chains of one logger. Clones refer to the same chains.
#[derive(Clone, Default)]
pub struct ScopeStack {
    inner: Arc<Inner>,
}

impl ScopeStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `state` as the new innermost scope of the current flow.
    #[must_use = "the scope is closed as soon as the guard is dropped"]
    pub fn push(&self, state: Arc<dyn LogState>) -> ScopeGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let flow = Flow::current();
        self.inner
            .lock()
            .entry(flow)
            .or_default()
            .push(ScopeEntry { id, state });
        ScopeGuard {
            stack: Arc::clone(&self.inner),
            flow,
            id,
        }
    }

    /// Returns the scope states active in the current flow, outermost first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn LogState>> {
        self.inner
            .lock()
            .get(&Flow::current())
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| Arc::clone(&entry.state))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of scopes open in the current flow.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner
            .lock()
            .get(&Flow::current())
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for ScopeStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScopeStack(depth={})", self.depth())
    }
}

/// Keeps a scope open until dropped. The scope is removed from the flow that opened
/// it, wherever the guard is dropped.
pub struct ScopeGuard {
    stack: Arc<Inner>,
    flow: Flow,
    id: u64,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let mut chains = self.stack.lock();
        let Some(entries) = chains.get_mut(&self.flow) else {
            return;
        };
        let Some(position) = entries.iter().rposition(|entry| entry.id == self.id) else {
            return;
        };
        if position + 1 != entries.len() {
            warn!(
                "Scope released out of order ({} newer scopes still open)",
                entries.len() - position - 1
            );
        }
        entries.remove(position);
        if entries.is_empty() {
            chains.remove(&self.flow);
        }
    }
}

impl std::fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScopeGuard({})", self.id)
    }
}
