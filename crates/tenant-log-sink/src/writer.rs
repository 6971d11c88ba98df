// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bulk-write boundary.
//!
//! A [`BatchWriter`] turns a connection target into a [`DestinationHandle`]; the handle
//! performs the physical write of one row-set. Writers are shared by every dispatch of
//! a tick and must accept concurrent use for distinct destinations. A failed write must
//! not have partially applied the row-set.

use async_trait::async_trait;

use crate::errors::WriteError;
use crate::rowset::RowSet;

/// Connection to one destination, used for a single dispatch.
#[async_trait]
pub trait DestinationHandle: Send {
    fn is_open(&self) -> bool;

    async fn open(&mut self) -> Result<(), WriteError>;

    /// Writes every row of `rows` or none of them.
    async fn write(&mut self, rows: &RowSet) -> Result<(), WriteError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Returns a handle for `target`. Handles may come back already open, for example
    /// when the writer pools connections.
    async fn destination(&self, target: &str)
        -> Result<Box<dyn DestinationHandle>, WriteError>;
}

/// Writes `rows` through `handle`, opening it first if it is closed. A handle opened
/// here is closed again whether or not the write succeeds; a handle that was already
/// open is left open.
pub async fn write_rows(
    handle: &mut dyn DestinationHandle,
    rows: &RowSet,
) -> Result<(), WriteError> {
    let opened_here = !handle.is_open();
    if opened_here {
        handle.open().await?;
    }
    let result = handle.write(rows).await;
    if opened_here {
        handle.close().await;
    }
    result
}
