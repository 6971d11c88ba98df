// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sink configuration.
//!
//! Settings are built in code and can be overlaid from environment variables:
//!
//! | Variable                      | Setting             |
//! |-------------------------------|---------------------|
//! | `LOG_SINK_FLUSH_INTERVAL_MS`  | `flush_interval`    |
//! | `LOG_SINK_TABLE`              | `table_name`        |
//! | `LOG_SINK_SOURCE_COLUMN`      | `source_column`     |
//! | `LOG_SINK_MESSAGE_COLUMN`     | `message_column`    |
//! | `LOG_SINK_LEVEL_COLUMN`       | `level_column`      |
//! | `LOG_SINK_TENANT_KEY`         | `tenant_key`        |
//! | `LOG_SINK_MAX_QUEUE_DEPTH`    | `max_queue_depth`   |
//! | `LOG_SINK_SOURCE_NAME`        | `source_name`       |
//!
//! Invalid numeric values are logged and ignored.

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::level::{ordinal_level_mapper, LevelMapper};
use crate::mapping::MappingTable;
use crate::message::Tenant;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_TENANT_KEY: &str = "TenantId";
pub const DEFAULT_SOURCE_NAME: &str = "tenant_log_sink::dispatcher";

/// Resolves a tenant to its connection target. `None` means the tenant has no
/// destination and its batches are dropped.
pub type ConnectionResolverFn = Arc<dyn Fn(Option<&Tenant>) -> Option<String> + Send + Sync>;

#[derive(Clone)]
pub struct SinkConfig {
    pub connection_resolver: ConnectionResolverFn,
    /// Delay between two dispatcher ticks. Also bounds how long shutdown waits.
    pub flush_interval: Duration,
    pub table_name: String,
    pub source_column: String,
    pub message_column: String,
    pub level_column: String,
    pub mappings: Arc<MappingTable>,
    /// Metadata key naming the tenant of a log call.
    pub tenant_key: String,
    pub level_mapper: LevelMapper,
    /// Per-queue bound; `None` leaves queues unbounded.
    pub max_queue_depth: Option<usize>,
    /// Source recorded on messages the dispatcher emits about its own failures.
    pub source_name: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            connection_resolver: Arc::new(no_destination),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            table_name: "Logs".to_string(),
            source_column: "Logger".to_string(),
            message_column: "Message".to_string(),
            level_column: "LogLevel".to_string(),
            mappings: Arc::new(MappingTable::default()),
            tenant_key: DEFAULT_TENANT_KEY.to_string(),
            level_mapper: ordinal_level_mapper(),
            max_queue_depth: None,
            source_name: DEFAULT_SOURCE_NAME.to_string(),
        }
    }
}

impl SinkConfig {
    /// Default configuration overlaid with environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().overlay_env()
    }

    /// Overrides the settings that have a matching environment variable.
    #[must_use]
    pub fn overlay_env(mut self) -> Self {
        if let Some(ms) = parse_env::<u64>("LOG_SINK_FLUSH_INTERVAL_MS") {
            if ms == 0 {
                error!("LOG_SINK_FLUSH_INTERVAL_MS must be positive. Ignoring.");
            } else {
                self.flush_interval = Duration::from_millis(ms);
            }
        }
        if let Some(depth) = parse_env::<usize>("LOG_SINK_MAX_QUEUE_DEPTH") {
            self.max_queue_depth = (depth > 0).then_some(depth);
        }
        overlay_string(&mut self.table_name, "LOG_SINK_TABLE");
        overlay_string(&mut self.source_column, "LOG_SINK_SOURCE_COLUMN");
        overlay_string(&mut self.message_column, "LOG_SINK_MESSAGE_COLUMN");
        overlay_string(&mut self.level_column, "LOG_SINK_LEVEL_COLUMN");
        overlay_string(&mut self.tenant_key, "LOG_SINK_TENANT_KEY");
        overlay_string(&mut self.source_name, "LOG_SINK_SOURCE_NAME");
        self
    }

    #[must_use]
    pub fn with_connection_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(Option<&Tenant>) -> Option<String> + Send + Sync + 'static,
    {
        self.connection_resolver = Arc::new(resolver);
        self
    }

    #[must_use]
    pub fn with_mappings(mut self, mappings: MappingTable) -> Self {
        self.mappings = Arc::new(mappings);
        self
    }

    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }
}

impl std::fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkConfig")
            .field("flush_interval", &self.flush_interval)
            .field("table_name", &self.table_name)
            .field("source_column", &self.source_column)
            .field("message_column", &self.message_column)
            .field("level_column", &self.level_column)
            .field("mappings", &self.mappings)
            .field("tenant_key", &self.tenant_key)
            .field("max_queue_depth", &self.max_queue_depth)
            .field("source_name", &self.source_name)
            .finish_non_exhaustive()
    }
}

fn no_destination(_tenant: Option<&Tenant>) -> Option<String> {
    None
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            error!("{name} has an invalid value: '{raw}'. Ignoring.");
            None
        }
    }
}

fn overlay_string(target: &mut String, name: &str) {
    if let Ok(value) = env::var(name) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            *target = trimmed.to_string();
        }
    }
}
