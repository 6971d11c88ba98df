// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structured state attached to log calls and scopes.
//!
//! Any value can be used as a scope or call-site state. Only states that expose an
//! ordered key/value view through [`LogState::fields`] contribute metadata; everything
//! else is carried along opaquely and ignored by the resolver.

use serde_json::Value;

/// State attached to a log call or a scope.
pub trait LogState: Send + Sync {
    /// The ordered key/value view of this state, if it has one.
    fn fields(&self) -> Option<&Fields> {
        None
    }
}

/// Ordered key/value collection.
///
/// Keys may repeat; when they do, later entries win during resolution, the same way an
/// inner scope wins over an outer one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    entries: Vec<(String, Value)>,
}

impl Fields {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Returns the last value recorded for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LogState for Fields {
    fn fields(&self) -> Option<&Fields> {
        Some(self)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Fields {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

/// A plain message scope such as `"processing order"`. Carries no metadata.
impl LogState for String {}

impl LogState for &'static str {}

impl LogState for () {}
