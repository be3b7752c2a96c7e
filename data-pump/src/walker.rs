// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Walks the ascending time-partition sequence of a stream.

use core_types::{Cursor, CursorError, TimePartition};
use std::sync::Arc;
use stream_source::{SourceError, StreamSource};

/// What the fetch loop should do after a page shorter than requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkStep {
    /// The cursor moved to a later partition; fetch again right away.
    Advanced,
    /// Caught up with an empty page in the current hour; suspend on the notifier.
    WaitLive,
    /// Already live but the page was not empty or the hour rolled over.
    Pace,
    /// Fetch again right away from the same cursor.
    Continue,
}

pub struct CursorWalker {
    partitions: Arc<Vec<TimePartition>>,
    live: bool,
}

impl CursorWalker {
    pub async fn load(source: &dyn StreamSource) -> Result<Self, SourceError> {
        Ok(Self::with_partitions(source.list_time_partitions(false).await?))
    }

    pub fn with_partitions(partitions: Arc<Vec<TimePartition>>) -> Self {
        Self {
            partitions,
            live: false,
        }
    }

    pub async fn refresh(&mut self, source: &dyn StreamSource) -> Result<(), SourceError> {
        self.partitions = source.list_time_partitions(true).await?;
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn set_live(&mut self, live: bool) {
        self.live = live;
    }

    /// Smallest known partition at or after `target` (largest at or before it
    /// when `before`), else the last known one. With nothing known the target
    /// itself is used.
    pub fn closest_partition(&self, target: &str, before: bool) -> Result<TimePartition, CursorError> {
        let target = TimePartition::parse(target)?;
        let found = if before {
            self.partitions.iter().rev().find(|p| **p <= target)
        } else {
            self.partitions.iter().find(|p| **p >= target)
        };
        Ok(found
            .or_else(|| self.partitions.last())
            .cloned()
            .unwrap_or(target))
    }

    pub fn next_partition(&self, current: &TimePartition) -> Option<TimePartition> {
        self.partitions.iter().find(|p| *p > current).cloned()
    }

    /// Snaps a requested cursor onto a real partition. The event id only
    /// survives when the partition itself exists.
    pub fn resolve(&self, requested: &Cursor) -> Result<Cursor, CursorError> {
        let partition = self.closest_partition(requested.time_partition.as_str(), false)?;
        let event_id = if partition == requested.time_partition {
            requested.event_id.clone()
        } else {
            None
        };
        Ok(Cursor::new(partition, event_id))
    }

    /// Decides how to continue after a short page, moving `cursor` when the
    /// walk advances. `now` is the partition of the current hour.
    pub async fn after_short_page(
        &mut self,
        source: &dyn StreamSource,
        cursor: &mut Cursor,
        page_empty: bool,
        now: TimePartition,
    ) -> Result<WalkStep, SourceError> {
        if let Some(next) = self.next_partition(&cursor.time_partition) {
            *cursor = Cursor::new(next, None);
            self.live = false;
            return Ok(WalkStep::Advanced);
        }
        let rolled_over = now > cursor.time_partition;
        if rolled_over {
            // the cached list may predate partitions created since
            self.refresh(source).await?;
            let next = self
                .next_partition(&cursor.time_partition)
                .unwrap_or_else(|| now.clone());
            *cursor = Cursor::new(next, None);
        }
        if !rolled_over && page_empty {
            self.live = true;
            return Ok(WalkStep::WaitLive);
        }
        Ok(if self.live {
            WalkStep::Pace
        } else {
            WalkStep::Continue
        })
    }
}
