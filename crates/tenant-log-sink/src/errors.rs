// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the log sink.

use thiserror::Error;

/// Failure reported by a [`BatchWriter`](crate::writer::BatchWriter) or one of its
/// destination handles.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The destination target could not be reached or is not usable.
    #[error("failed to connect to destination: {0}")]
    Connect(String),
    /// The destination answered but refused the row-set.
    #[error("destination rejected the batch with status {status}: {body}")]
    Rejected { status: u16, body: String },
    /// The request could not be delivered.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The row-set could not be serialized.
    #[error("failed to prepare payload: {0}")]
    Payload(String),
}

/// Errors surfaced by the pipeline itself.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The pipeline was built outside of a tokio runtime.
    #[error("no tokio runtime available to run the dispatcher")]
    NoRuntime,
    /// Writing the tenant-less batch failed. These faults are not converted into log
    /// messages and terminate the dispatcher loop.
    #[error("failed to write {batch_size} messages to the default destination: {source}")]
    DefaultDestination {
        batch_size: usize,
        #[source]
        source: WriteError,
    },
    /// A dispatch task panicked or was cancelled.
    #[error("dispatch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(pub String);
