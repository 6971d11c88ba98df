// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod event;

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use tenant_log_sink::http_writer::{HttpBatchWriter, HttpWriterConfig};
use tenant_log_sink::{Logger, MappingTable, SinkConfig, SinkPipeline, Tenant};

use crate::event::LogEvent;

const TENANT_PLACEHOLDER: &str = "{tenant}";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOG_SINK_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(&log_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let Ok(url_template) = env::var("LOG_SINK_DESTINATION_URL") else {
        error!("LOG_SINK_DESTINATION_URL is not set. Shutting down.");
        return;
    };
    let default_url = env::var("LOG_SINK_DEFAULT_DESTINATION_URL").ok();
    if default_url.is_none() {
        warn!("LOG_SINK_DEFAULT_DESTINATION_URL is not set, tenant-less events will be dropped");
    }

    let mappings = match env::var("LOG_SINK_MAPPINGS") {
        Ok(raw) => match serde_json::from_str::<MappingTable>(&raw) {
            Ok(mappings) => mappings,
            Err(e) => {
                error!("Invalid LOG_SINK_MAPPINGS: {e}. Shutting down.");
                return;
            }
        },
        Err(_) => MappingTable::default(),
    };

    let compression_level = env::var("LOG_SINK_COMPRESSION_LEVEL")
        .ok()
        .and_then(|val| val.parse::<i32>().ok());
    let https_proxy = env::var("LOG_SINK_PROXY_HTTPS")
        .or_else(|_| env::var("HTTPS_PROXY"))
        .ok();

    let config = SinkConfig::from_env()
        .with_mappings(mappings)
        .with_connection_resolver(destination_resolver(url_template, default_url));

    let writer = match HttpBatchWriter::new(HttpWriterConfig {
        timeout: DEFAULT_HTTP_TIMEOUT,
        compression_level,
        https_proxy,
    }) {
        Ok(writer) => writer,
        Err(e) => {
            error!("Error creating HTTP writer: {e}");
            return;
        }
    };

    let pipeline = match SinkPipeline::new(config, Arc::new(writer)) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Error creating log sink: {e}");
            return;
        }
    };
    pipeline.start();

    let tenant_key = pipeline.config().tenant_key.clone();
    let mut loggers: HashMap<String, Logger> = HashMap::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let event = match LogEvent::parse(&line) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("Skipping malformed event: {e}");
                            continue;
                        }
                    };
                    let logger = loggers
                        .entry(event.source().to_string())
                        .or_insert_with(|| pipeline.logger(event.source()));
                    logger.log(event.level(), &event.fields(&tenant_key), &event.message, None);
                }
                Ok(None) => {
                    info!("Reached end of input");
                    break;
                }
                Err(e) => {
                    error!("Error reading input: {e}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    // One last tick so events read just before the end are not lost.
    tokio::time::sleep(pipeline.config().flush_interval).await;
    pipeline.shutdown().await;
}

/// Filter for the agent's own logs. HTTP client internals are silenced and an
/// unparseable level falls back to `info`.
fn env_filter(log_level: &str) -> EnvFilter {
    const QUIET: &str = "h2=off,hyper=off,rustls=off";
    EnvFilter::try_new(format!("{QUIET},{log_level}"))
        .unwrap_or_else(|_| EnvFilter::new(format!("{QUIET},info")))
}

/// Resolver substituting the tenant into `template`. Tenant-less messages go to
/// `default_url`, or nowhere when it is unset.
fn destination_resolver(
    template: String,
    default_url: Option<String>,
) -> impl Fn(Option<&Tenant>) -> Option<String> + Send + Sync + 'static {
    move |tenant: Option<&Tenant>| match tenant {
        Some(tenant) => Some(template.replace(TENANT_PLACEHOLDER, tenant.as_str())),
        None => default_url.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_resolver() {
        let resolve = destination_resolver(
            "https://logs.example.com/{tenant}/bulk".to_string(),
            Some("https://logs.example.com/default/bulk".to_string()),
        );
        assert_eq!(
            resolve(Some(&Tenant::new("acme"))).as_deref(),
            Some("https://logs.example.com/acme/bulk")
        );
        assert_eq!(
            resolve(None).as_deref(),
            Some("https://logs.example.com/default/bulk")
        );
    }

    #[test]
    fn test_env_filter() {
        assert_eq!(
            env_filter("debug").to_string(),
            EnvFilter::new("h2=off,hyper=off,rustls=off,debug").to_string()
        );
        assert_eq!(
            env_filter("sink=loud").to_string(),
            EnvFilter::new("h2=off,hyper=off,rustls=off,info").to_string()
        );
    }

    #[test]
    fn test_destination_resolver_without_default() {
        let resolve = destination_resolver("http://localhost/{tenant}".to_string(), None);
        assert_eq!(resolve(None), None);
    }
}
