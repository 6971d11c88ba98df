// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Severity levels and the mapping from a level to its stored column value.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

use crate::errors::ParseLevelError;

/// Ordered severity of a log message.
///
/// The discriminants are the values written to the level column by
/// [`ordinal_level_mapper`]. `None` is a sentinel: a logger never records a
/// message at this level.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Information = 2,
    Warning = 3,
    Error = 4,
    Critical = 5,
    None = 6,
}

impl LogLevel {
    #[must_use]
    pub fn ordinal(self) -> i64 {
        self as i64
    }
}

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "information" | "info" => Ok(Self::Information),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" | "fatal" => Ok(Self::Critical),
            "none" | "off" => Ok(Self::None),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Converts a level into the value stored in the level column.
pub type LevelMapper = Arc<dyn Fn(LogLevel) -> Value + Send + Sync>;

/// Default level mapper: the numeric ordinal of the level.
#[must_use]
pub fn ordinal_level_mapper() -> LevelMapper {
    Arc::new(|level: LogLevel| Value::from(level.ordinal()))
}
