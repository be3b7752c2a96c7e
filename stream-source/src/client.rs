// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Wire-level client contract for the log service.

use crate::SourceError;
use async_trait::async_trait;
use core_types::{ResolvedIds, StreamEvent, TimePartition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedId {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct PartitionPageRequest<'a> {
    pub ids: &'a ResolvedIds,
    pub page: Option<u64>,
    pub page_size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PartitionPage {
    pub partitions: Vec<TimePartition>,
    pub next_page: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct EventPageRequest<'a> {
    pub ids: &'a ResolvedIds,
    pub time_partition: &'a TimePartition,
    pub after_event_id: Option<&'a str>,
    pub to_event_id: Option<&'a str>,
    pub page_size: usize,
}

/// Raw calls against the remote service; implemented outside this workspace.
#[async_trait]
pub trait StreamClient: Send + Sync + 'static {
    async fn tenant_id(&self, tenant: &str) -> Result<String, SourceError>;

    async fn collection_id(&self, tenant: &str, collection: &str) -> Result<String, SourceError>;

    async fn sub_collection_id(
        &self,
        collection_id: &str,
        sub_collection: &str,
    ) -> Result<String, SourceError>;

    async fn event_kinds(&self, sub_collection_id: &str) -> Result<Vec<NamedId>, SourceError>;

    async fn time_partition_page(
        &self,
        request: PartitionPageRequest<'_>,
    ) -> Result<PartitionPage, SourceError>;

    async fn events(&self, request: EventPageRequest<'_>) -> Result<Vec<StreamEvent>, SourceError>;
}
