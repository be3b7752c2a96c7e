// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Paging access to the time-partitioned event log.

mod cached;
mod client;

pub use cached::{CachedStreamSource, PARTITION_PAGE_SIZE};
pub use client::{EventPageRequest, NamedId, PartitionPage, PartitionPageRequest, StreamClient};

use async_trait::async_trait;
use core_types::{BoxError, Cursor, CursorError, ResolvedStream, StreamEvent, TimePartition};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {source}")]
    Transport {
        #[source]
        source: BoxError,
    },
    #[error("{kind} {name:?} not found")]
    IdentityNotFound { kind: &'static str, name: String },
    #[error(transparent)]
    InvalidPartition(#[from] CursorError),
}

impl SourceError {
    pub fn transport(err: impl Into<BoxError>) -> Self {
        SourceError::Transport { source: err.into() }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transport { .. })
    }
}

/// Read side of the event log as seen by the pump.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Resolves (and caches) the ids behind the configured stream names.
    async fn resolve_identity(&self) -> Result<ResolvedStream, SourceError>;

    /// Ascending partition keys holding events for the stream.
    ///
    /// Served from cache unless `force_refresh` is set or nothing is cached yet.
    async fn list_time_partitions(
        &self,
        force_refresh: bool,
    ) -> Result<Arc<Vec<TimePartition>>, SourceError>;

    /// Up to `max_count` events strictly after `after`, in log order, within
    /// `after.time_partition`, never past `upper_bound` when given.
    async fn fetch_events(
        &self,
        after: &Cursor,
        max_count: usize,
        upper_bound: Option<&str>,
    ) -> Result<Vec<StreamEvent>, SourceError>;
}
