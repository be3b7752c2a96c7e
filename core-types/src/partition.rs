// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Hour-aligned time partitions and the consumption cursor.

use crate::uid::cmp_event_ids;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

pub const PARTITION_KEY_LEN: usize = 14;
const PARTITION_FORMAT: &str = "%Y%m%d%H0000";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    #[error("invalid time partition key: {key:?}")]
    InvalidPartition { key: String },
}

/// UTC hour bucket key in `YYYYMMDDHH0000` form.
///
/// All keys have the same width, so lexical order equals chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimePartition(String);

impl TimePartition {
    pub fn parse(key: &str) -> Result<Self, CursorError> {
        if key.len() == PARTITION_KEY_LEN && key.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(key.to_string()))
        } else {
            Err(CursorError::InvalidPartition {
                key: key.to_string(),
            })
        }
    }

    /// Partition holding the given instant.
    pub fn containing(at: DateTime<Utc>) -> Self {
        let hour = at
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(at);
        Self(hour.format(PARTITION_FORMAT).to_string())
    }

    pub fn now() -> Self {
        Self::containing(Utc::now())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TimePartition {
    type Error = CursorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TimePartition> for String {
    fn from(value: TimePartition) -> Self {
        value.0
    }
}

impl fmt::Display for TimePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Consumption progress: a partition plus the last consumed event id inside it.
///
/// An absent event id means "from the start of the partition".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub time_partition: TimePartition,
    #[serde(default)]
    pub event_id: Option<String>,
}

impl Cursor {
    pub fn new(time_partition: TimePartition, event_id: Option<String>) -> Self {
        Self {
            time_partition,
            event_id,
        }
    }

    /// Builds a cursor from a raw partition key, rejecting malformed keys.
    pub fn from_parts(
        time_partition: &str,
        event_id: Option<impl Into<String>>,
    ) -> Result<Self, CursorError> {
        Ok(Self {
            time_partition: TimePartition::parse(time_partition)?,
            event_id: event_id.map(Into::into),
        })
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders by partition first, then by event time (absent sorts first).
impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time_partition
            .cmp(&other.time_partition)
            .then_with(|| match (&self.event_id, &other.event_id) {
                (Some(a), Some(b)) => cmp_event_ids(a, b),
                (a, b) => a.is_some().cmp(&b.is_some()),
            })
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.event_id {
            Some(id) => write!(f, "{}({})", self.time_partition, id),
            None => write!(f, "{}(start)", self.time_partition),
        }
    }
}
