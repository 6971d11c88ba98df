// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use derive_more::Display;
use serde_json::Value;
use ustr::Ustr;

use crate::level::LogLevel;

/// Routing key identifying the destination a message belongs to.
///
/// Tenants are interned, so two messages for the same logical tenant always carry
/// equal keys and copying a tenant is free.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tenant(Ustr);

impl Tenant {
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self(Ustr::from(id))
    }

    /// Tenant named by a resolved metadata value. Strings are used verbatim, other
    /// scalars by their JSON rendering, so `42` and `"42"` name the same tenant.
    /// Null yields no tenant.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(Self::new(s)),
            other => Some(Self::new(&other.to_string())),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for Tenant {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One log call, ready to be queued.
#[derive(Debug, Clone, PartialEq)]
pub struct LogMessage {
    /// Destination tenant; `None` routes to the default queue.
    pub tenant: Option<Tenant>,
    /// Name of the emitting logger.
    pub source: String,
    /// Fully rendered text.
    pub text: String,
    pub level: LogLevel,
    /// One value per mapping table entry, in table order.
    pub metadata_values: Vec<Value>,
}

impl LogMessage {
    #[must_use]
    pub fn new(
        tenant: Option<Tenant>,
        source: impl Into<String>,
        level: LogLevel,
        text: impl Into<String>,
        metadata_values: Vec<Value>,
    ) -> Self {
        Self {
            tenant,
            source: source.into(),
            text: text.into(),
            level,
            metadata_values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tenant_from_value() {
        assert_eq!(Tenant::from_value(&json!("acme")), Some(Tenant::new("acme")));
        assert_eq!(Tenant::from_value(&json!(42)), Some(Tenant::new("42")));
        assert_eq!(Tenant::from_value(&json!(42)), Tenant::from_value(&json!("42")));
        assert_eq!(Tenant::from_value(&Value::Null), None);
    }

    #[test]
    fn test_tenant_display() {
        assert_eq!(Tenant::new("acme").to_string(), "acme");
        assert_eq!(Tenant::from("acme").as_str(), "acme");
    }
}
