// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use std::time::Duration;
use tenant_log_sink::{SinkConfig, Tenant};
use tokio::time::{sleep, Instant};

/// Connection target used for `tenant`: `db://<tenant>` or `db://default`.
#[allow(dead_code)]
pub fn target_for(tenant: Option<&Tenant>) -> Option<String> {
    Some(format!("db://{}", tenant.map_or("default", Tenant::as_str)))
}

/// Config with a short interval and a destination for every tenant.
#[allow(dead_code)]
pub fn test_config(interval: Duration) -> SinkConfig {
    SinkConfig::default()
        .with_flush_interval(interval)
        .with_connection_resolver(target_for)
}

/// Polls `condition` until it holds or `limit` elapses. Returns whether it held.
#[allow(dead_code)]
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}
