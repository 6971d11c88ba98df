// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Positional materialization of a batch.
//!
//! Column layout, the one contract shared with the destination schema:
//!
//! ```text
//!   source | text | level | mapping[0] | mapping[1] | ...
//! ```

use serde::Serialize;
use serde_json::Value;

use crate::config::SinkConfig;
use crate::message::LogMessage;

/// Rows ready for a bulk write, with the destination columns they bind to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowSet {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    /// Builds the row-set for `batch`, keeping the batch order.
    #[must_use]
    pub fn from_batch(config: &SinkConfig, batch: &[LogMessage]) -> Self {
        let mut columns = Vec::with_capacity(3 + config.mappings.len());
        columns.push(config.source_column.clone());
        columns.push(config.message_column.clone());
        columns.push(config.level_column.clone());
        columns.extend(config.mappings.columns().map(str::to_string));

        let rows = batch
            .iter()
            .map(|message| {
                let mut row = Vec::with_capacity(columns.len());
                row.push(Value::from(message.source.as_str()));
                row.push(Value::from(message.text.as_str()));
                row.push((config.level_mapper)(message.level));
                row.extend(message.metadata_values.iter().cloned());
                // Keep rows positionally aligned even if a message was built by hand
                // with the wrong number of values.
                row.resize(columns.len(), Value::Null);
                row
            })
            .collect();

        Self {
            table: config.table_name.clone(),
            columns,
            rows,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
