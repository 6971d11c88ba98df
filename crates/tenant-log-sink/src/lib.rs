// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Tenant log sink
//!
//! Buffered, multi-tenant structured log sink. Log calls are routed into one in-memory
//! queue per tenant; a background dispatcher drains every queue on a fixed interval and
//! bulk-writes each tenant's batch to that tenant's destination.
//!
//! ## Overview
//!
//! - [`logger`]: named loggers, scopes and message templates
//! - [`resolver`]: flattening of scope and call-site fields into mapped columns
//! - [`queue`]: per-tenant FIFO queues
//! - [`dispatcher`]: the periodic drain and concurrent fan-out of batches
//! - [`pipeline`]: lifecycle of the dispatcher task
//! - [`writer`], [`http_writer`], [`memory_writer`]: the bulk-write boundary
//!
//! A failed write for a tenant becomes an error message on the tenant-less default
//! queue, so failures surface in the default destination on the next tick.

#![deny(clippy::all)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod http_writer;
pub mod level;
pub mod logger;
pub mod mapping;
pub mod memory_writer;
pub mod message;
pub mod pipeline;
pub mod queue;
pub mod resolver;
pub mod rowset;
pub mod scope;
pub mod state;
pub mod writer;

pub use config::SinkConfig;
pub use errors::{SinkError, WriteError};
pub use level::LogLevel;
pub use logger::Logger;
pub use mapping::{MappingTable, MetaMapping};
pub use message::{LogMessage, Tenant};
pub use pipeline::SinkPipeline;
pub use scope::ScopeGuard;
pub use state::{Fields, LogState};
