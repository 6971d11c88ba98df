// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mapping of template keys onto destination columns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Describes how one destination column is filled from the resolved metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaMapping {
    /// Destination column name.
    pub column: String,
    /// Template keys checked in order; the first present key wins.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Value used when none of the keys resolve. `Value::Null` stores an explicit null.
    #[serde(default)]
    pub default: Value,
}

impl MetaMapping {
    /// Mapping whose only template key is the column name itself.
    #[must_use]
    pub fn new(column: impl Into<String>, default: impl Into<Value>) -> Self {
        let column = column.into();
        Self {
            keys: vec![column.clone()],
            column,
            default: default.into(),
        }
    }

    /// Column that stores null when no key resolves.
    #[must_use]
    pub fn nullable(column: impl Into<String>) -> Self {
        Self::new(column, Value::Null)
    }

    /// Column that falls back to `default` when no key resolves.
    #[must_use]
    pub fn not_null(column: impl Into<String>, default: impl Into<Value>) -> Self {
        Self::new(column, default)
    }

    /// Replaces the template keys.
    #[must_use]
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Keys to look up, falling back to the column name when none are configured.
    pub(crate) fn lookup_keys(&self) -> impl Iterator<Item = &str> {
        let fallback = self.keys.is_empty().then_some(self.column.as_str());
        self.keys.iter().map(String::as_str).chain(fallback)
    }
}

/// Ordered list of column mappings. Declaration order is the column order of every
/// row-set and the position of every metadata value in a
/// [`LogMessage`](crate::message::LogMessage).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingTable {
    mappings: Vec<MetaMapping>,
}

impl MappingTable {
    #[must_use]
    pub fn new(mappings: Vec<MetaMapping>) -> Self {
        Self { mappings }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MetaMapping> {
        self.mappings.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Metadata values for a message that resolved nothing.
    #[must_use]
    pub fn defaults(&self) -> Vec<Value> {
        self.mappings.iter().map(|m| m.default.clone()).collect()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.mappings.iter().map(|m| m.column.as_str())
    }
}

impl FromIterator<MetaMapping> for MappingTable {
    fn from_iter<I: IntoIterator<Item = MetaMapping>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a MappingTable {
    type Item = &'a MetaMapping;
    type IntoIter = std::slice::Iter<'a, MetaMapping>;

    fn into_iter(self) -> Self::IntoIter {
        self.mappings.iter()
    }
}
