// Copyright (c) James Kassemi, SC, US. All rights reserved.

use crate::partition::TimePartition;
use serde::{Deserialize, Serialize};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One event as paged from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event_id: String,
    pub event_kind: String,
    pub time_partition: TimePartition,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl StreamEvent {
    /// Approximate serialized payload size, used for byte counters.
    pub fn payload_len(&self) -> usize {
        serde_json::to_vec(&self.payload)
            .map(|bytes| bytes.len())
            .unwrap_or_default()
    }
}

/// Names of the logical stream a consumer is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamIdentity {
    pub tenant: String,
    pub collection: String,
    pub sub_collection: String,
    pub event_kinds: Vec<String>,
}

/// Remote ids backing a [`StreamIdentity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIds {
    pub tenant_id: String,
    pub collection_id: String,
    pub sub_collection_id: String,
    pub event_kind_ids: Vec<String>,
}

impl ResolvedIds {
    /// Uses the configured names as ids without any lookup.
    pub fn verbatim(identity: &StreamIdentity) -> Self {
        Self {
            tenant_id: identity.tenant.clone(),
            collection_id: identity.collection.clone(),
            sub_collection_id: identity.sub_collection.clone(),
            event_kind_ids: identity.event_kinds.clone(),
        }
    }
}

/// Stream names together with their resolved ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub identity: StreamIdentity,
    pub ids: ResolvedIds,
}

impl ResolvedStream {
    pub fn wants_kind(&self, event_kind: &str) -> bool {
        self.identity.event_kinds.iter().any(|k| k == event_kind)
    }
}
