// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metadata resolution from the scope chain and call-site state.
//!
//! Resolution flattens every key/value-shaped state into one mapping. Scopes are folded
//! from outermost to innermost and the call-site state is folded last, so for any key
//! present in more than one layer:
//!
//! ```text
//!   outer scope  <  inner scope  <  call-site state
//! ```
//!
//! Each mapping table entry then picks the first of its keys present in the flattened
//! mapping, falling back to the entry's default. Resolution never fails.

use hashbrown::HashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::mapping::MappingTable;
use crate::message::Tenant;
use crate::state::LogState;

/// Flat key/value view of all layers. Iteration follows first-insertion order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FlatMetadata {
    index: HashMap<String, usize, fnv::FnvBuildHasher>,
    entries: Vec<(String, Value)>,
}

impl FlatMetadata {
    fn set(&mut self, key: &str, value: &Value) {
        match self.index.get(key) {
            Some(&position) => self.entries[position].1 = value.clone(),
            None => {
                self.index.insert(key.to_string(), self.entries.len());
                self.entries.push((key.to_string(), value.clone()));
            }
        }
    }

    fn fold(&mut self, state: &dyn LogState) {
        if let Some(fields) = state.fields() {
            for (key, value) in fields.iter() {
                self.set(key, value);
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&position| &self.entries[position].1)
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

/// Flattens `scopes` (outermost first) and then `state` into one mapping.
#[must_use]
pub fn flatten(state: &dyn LogState, scopes: &[Arc<dyn LogState>]) -> FlatMetadata {
    let mut flat = FlatMetadata::default();
    for scope in scopes {
        flat.fold(scope.as_ref());
    }
    flat.fold(state);
    flat
}

/// Metadata extracted for one log call.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub tenant: Option<Tenant>,
    /// One value per mapping table entry.
    pub values: Vec<Value>,
}

/// Resolves mapping table values and the tenant for log calls.
#[derive(Debug, Clone)]
pub struct MetadataResolver {
    mappings: Arc<MappingTable>,
    tenant_key: String,
}

impl MetadataResolver {
    #[must_use]
    pub fn new(mappings: Arc<MappingTable>, tenant_key: impl Into<String>) -> Self {
        Self {
            mappings,
            tenant_key: tenant_key.into(),
        }
    }

    #[must_use]
    pub fn resolve(&self, state: &dyn LogState, scopes: &[Arc<dyn LogState>]) -> Resolved {
        let flat = flatten(state, scopes);
        self.resolve_flat(&flat)
    }

    #[must_use]
    pub fn resolve_flat(&self, flat: &FlatMetadata) -> Resolved {
        let values = self
            .mappings
            .iter()
            .map(|mapping| {
                mapping
                    .lookup_keys()
                    .find_map(|key| flat.get(key))
                    .unwrap_or(&mapping.default)
                    .clone()
            })
            .collect();
        let tenant = flat.get(&self.tenant_key).and_then(Tenant::from_value);
        Resolved { tenant, values }
    }
}
