// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Named loggers feeding a [`SinkPipeline`].
//!
//! A logger owns its scope stack. Each log call renders the message template, resolves
//! metadata from the active scopes and the call-site fields, and enqueues the result.
//! Logging never blocks on I/O and never fails.
//!
//! ```rust,ignore
//! let logger = pipeline.logger("orders");
//! let _scope = logger.begin_scope(Fields::from([("TenantId", "acme"), ("RequestId", 7)]));
//! logger.info("Created order {OrderId}", Fields::from([("OrderId", 42)]));
//! ```

use regex::{Captures, Regex};
use serde_json::Value;
use std::error::Error;
use std::fmt::Write;
use std::sync::{Arc, OnceLock};

use crate::level::LogLevel;
use crate::message::LogMessage;
use crate::pipeline::SinkPipeline;
use crate::resolver::{flatten, MetadataResolver};
use crate::scope::{ScopeGuard, ScopeStack};
use crate::state::{Fields, LogState};

#[derive(Clone)]
pub struct Logger {
    name: Arc<str>,
    pipeline: SinkPipeline,
    resolver: MetadataResolver,
    scopes: ScopeStack,
}

impl Logger {
    pub(crate) fn new(name: &str, pipeline: SinkPipeline, resolver: MetadataResolver) -> Self {
        Self {
            name: Arc::from(name),
            pipeline,
            resolver,
            scopes: ScopeStack::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opens a scope whose fields apply to every call made while the guard is alive.
    #[must_use = "the scope is closed as soon as the guard is dropped"]
    pub fn begin_scope(&self, state: impl LogState + 'static) -> ScopeGuard {
        self.scopes.push(Arc::new(state))
    }

    #[must_use]
    pub fn is_enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::None
    }

    /// Records one message.
    ///
    /// `{Key}` placeholders in `template` are replaced with the call-site values; the
    /// error, if any, is rendered after the message with its chain of sources.
    pub fn log(
        &self,
        level: LogLevel,
        state: &dyn LogState,
        template: &str,
        error: Option<&(dyn Error + 'static)>,
    ) {
        if !self.is_enabled(level) {
            return;
        }

        let scopes = self.scopes.snapshot();
        let flat = flatten(state, &scopes);
        let resolved = self.resolver.resolve_flat(&flat);

        let mut text = render_template(template, state.fields());
        if let Some(error) = error {
            append_error(&mut text, error);
        }

        self.pipeline.enqueue(LogMessage::new(
            resolved.tenant,
            self.name.as_ref(),
            level,
            text,
            resolved.values,
        ));
    }

    pub fn trace(&self, template: &str, fields: Fields) {
        self.log(LogLevel::Trace, &fields, template, None);
    }

    pub fn debug(&self, template: &str, fields: Fields) {
        self.log(LogLevel::Debug, &fields, template, None);
    }

    pub fn info(&self, template: &str, fields: Fields) {
        self.log(LogLevel::Information, &fields, template, None);
    }

    pub fn warn(&self, template: &str, fields: Fields) {
        self.log(LogLevel::Warning, &fields, template, None);
    }

    pub fn error(&self, template: &str, fields: Fields, error: Option<&(dyn Error + 'static)>) {
        self.log(LogLevel::Error, &fields, template, error);
    }

    pub fn critical(
        &self,
        template: &str,
        fields: Fields,
        error: Option<&(dyn Error + 'static)>,
    ) {
        self.log(LogLevel::Critical, &fields, template, error);
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.]*)\}").expect("placeholder pattern is valid")
    })
}

/// Replaces `{Key}` with the value of `Key` in `fields`. Strings are inserted without
/// quotes; unknown placeholders are left as they are.
#[must_use]
pub fn render_template(template: &str, fields: Option<&Fields>) -> String {
    let Some(fields) = fields.filter(|f| !f.is_empty()) else {
        return template.to_string();
    };
    placeholder()
        .replace_all(template, |caps: &Captures<'_>| match fields.get(&caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn append_error(text: &mut String, error: &(dyn Error + 'static)) {
    let _ = write!(text, "\n{error}");
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(text, "\n  caused by: {cause}");
        source = cause.source();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_template() {
        let fields = Fields::from([("PostId", json!(123)), ("User", json!("ada"))]);
        assert_eq!(
            render_template("Hello {PostId} from {User}", Some(&fields)),
            "Hello 123 from ada"
        );
    }

    #[test]
    fn test_render_template_keeps_unknown_placeholders() {
        let fields = Fields::from([("PostId", 1)]);
        assert_eq!(
            render_template("{Missing} and {PostId}", Some(&fields)),
            "{Missing} and 1"
        );
        assert_eq!(render_template("plain {PostId}", None), "plain {PostId}");
    }

    #[derive(Debug, thiserror::Error)]
    #[error("query failed")]
    struct QueryError(#[source] std::io::Error);

    #[test]
    fn test_append_error_chain() {
        let error = QueryError(std::io::Error::other("connection reset"));
        let mut text = "Saving order".to_string();
        append_error(&mut text, &error);
        assert_eq!(
            text,
            "Saving order\nquery failed\n  caused by: connection reset"
        );
    }
}
