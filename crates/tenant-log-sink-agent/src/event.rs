// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line-delimited JSON log events read from stdin.
//!
//! ```json
//! {"tenant": "acme", "source": "orders", "level": "warn", "message": "Order {Id} late", "fields": {"Id": 7}}
//! ```
//!
//! Only `message` is required.

use serde::Deserialize;
use serde_json::{Map, Value};
use tenant_log_sink::{Fields, LogLevel};
use tracing::warn;

pub const DEFAULT_SOURCE: &str = "stdin";

#[derive(Debug, Deserialize, PartialEq)]
pub struct LogEvent {
    #[serde(default)]
    pub tenant: Option<Value>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    pub message: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl LogEvent {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn source(&self) -> &str {
        self.source.as_deref().unwrap_or(DEFAULT_SOURCE)
    }

    /// Unknown levels are logged and recorded as `Information`.
    pub fn level(&self) -> LogLevel {
        match self.level.as_deref().map(str::parse::<LogLevel>) {
            None => LogLevel::Information,
            Some(Ok(level)) => level,
            Some(Err(e)) => {
                warn!("{e}, recording the event as Information");
                LogLevel::Information
            }
        }
    }

    /// Call-site fields. The `tenant` attribute, when present, is stored under
    /// `tenant_key` after the event's own fields so it takes precedence.
    pub fn fields(&self, tenant_key: &str) -> Fields {
        let mut fields: Fields = self
            .fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        if let Some(tenant) = &self.tenant {
            fields.insert(tenant_key, tenant.clone());
        }
        fields
    }
}
