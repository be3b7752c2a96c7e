// Copyright (c) James Kassemi, SC, US. All rights reserved.

use crate::client::{EventPageRequest, PartitionPageRequest, StreamClient};
use crate::{SourceError, StreamSource};
use async_trait::async_trait;
use core_types::retry::RetryPolicy;
use core_types::{Cursor, ResolvedIds, ResolvedStream, StreamEvent, StreamIdentity, TimePartition};
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;

pub const PARTITION_PAGE_SIZE: usize = 10_000;

/// [`StreamSource`] over a [`StreamClient`] that caches resolved ids and the
/// partition list.
pub struct CachedStreamSource<C> {
    client: C,
    identity: StreamIdentity,
    verbatim_ids: bool,
    retry: RetryPolicy,
    resolved: Mutex<Option<ResolvedIds>>,
    partitions: Mutex<Option<Arc<Vec<TimePartition>>>>,
}

impl<C: StreamClient> CachedStreamSource<C> {
    pub fn new(client: C, identity: StreamIdentity) -> Self {
        Self {
            client,
            identity,
            verbatim_ids: false,
            retry: RetryPolicy::source_lookups(),
            resolved: Mutex::new(None),
            partitions: Mutex::new(None),
        }
    }

    /// Skip name lookups and send the configured names as ids.
    pub fn with_verbatim_ids(mut self, verbatim: bool) -> Self {
        self.verbatim_ids = verbatim;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    async fn ids(&self) -> Result<ResolvedIds, SourceError> {
        if let Some(ids) = self.resolved.lock().clone() {
            return Ok(ids);
        }
        let ids = if self.verbatim_ids {
            ResolvedIds::verbatim(&self.identity)
        } else {
            self.retry
                .retry_async_if(|_| self.lookup_ids(), SourceError::is_transient)
                .await?
        };
        *self.resolved.lock() = Some(ids.clone());
        Ok(ids)
    }

    async fn lookup_ids(&self) -> Result<ResolvedIds, SourceError> {
        let identity = &self.identity;
        let tenant_id = self.client.tenant_id(&identity.tenant).await?;
        let collection_id = self
            .client
            .collection_id(&identity.tenant, &identity.collection)
            .await?;
        let sub_collection_id = self
            .client
            .sub_collection_id(&collection_id, &identity.sub_collection)
            .await?;
        let known = self.client.event_kinds(&sub_collection_id).await?;
        let mut event_kind_ids = Vec::with_capacity(identity.event_kinds.len());
        for kind in &identity.event_kinds {
            let found = known
                .iter()
                .find(|candidate| &candidate.name == kind)
                .ok_or_else(|| SourceError::IdentityNotFound {
                    kind: "event kind",
                    name: kind.clone(),
                })?;
            event_kind_ids.push(found.id.clone());
        }
        Ok(ResolvedIds {
            tenant_id,
            collection_id,
            sub_collection_id,
            event_kind_ids,
        })
    }

    async fn load_partitions(&self, ids: &ResolvedIds) -> Result<Vec<TimePartition>, SourceError> {
        let mut partitions = Vec::new();
        let mut page = None;
        loop {
            let result = self
                .retry
                .retry_async_if(
                    |_| {
                        self.client.time_partition_page(PartitionPageRequest {
                            ids,
                            page,
                            page_size: PARTITION_PAGE_SIZE,
                        })
                    },
                    SourceError::is_transient,
                )
                .await?;
            partitions.extend(result.partitions);
            match result.next_page {
                Some(next) => page = Some(next),
                None => break,
            }
        }
        partitions.sort();
        partitions.dedup();
        Ok(partitions)
    }
}

#[async_trait]
impl<C: StreamClient> StreamSource for CachedStreamSource<C> {
    async fn resolve_identity(&self) -> Result<ResolvedStream, SourceError> {
        Ok(ResolvedStream {
            identity: self.identity.clone(),
            ids: self.ids().await?,
        })
    }

    async fn list_time_partitions(
        &self,
        force_refresh: bool,
    ) -> Result<Arc<Vec<TimePartition>>, SourceError> {
        if !force_refresh {
            if let Some(cached) = self.partitions.lock().clone() {
                return Ok(cached);
            }
        }
        let ids = self.ids().await?;
        let partitions = Arc::new(self.load_partitions(&ids).await?);
        debug!(
            "loaded {} time partitions for {}/{}",
            partitions.len(),
            self.identity.collection,
            self.identity.sub_collection
        );
        *self.partitions.lock() = Some(partitions.clone());
        Ok(partitions)
    }

    async fn fetch_events(
        &self,
        after: &Cursor,
        max_count: usize,
        upper_bound: Option<&str>,
    ) -> Result<Vec<StreamEvent>, SourceError> {
        let ids = self.ids().await?;
        let mut events = self
            .client
            .events(EventPageRequest {
                ids: &ids,
                time_partition: &after.time_partition,
                after_event_id: after.event_id.as_deref(),
                to_event_id: upper_bound,
                page_size: max_count,
            })
            .await?;
        events.truncate(max_count);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{NamedId, PartitionPage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeClient {
        lookups: AtomicUsize,
        partition_calls: AtomicUsize,
        flaky_pages: AtomicUsize,
    }

    fn partition(key: &str) -> TimePartition {
        TimePartition::parse(key).unwrap()
    }

    #[async_trait]
    impl StreamClient for Arc<FakeClient> {
        async fn tenant_id(&self, tenant: &str) -> Result<String, SourceError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(format!("t-{tenant}"))
        }

        async fn collection_id(&self, _tenant: &str, collection: &str) -> Result<String, SourceError> {
            Ok(format!("c-{collection}"))
        }

        async fn sub_collection_id(
            &self,
            _collection_id: &str,
            sub_collection: &str,
        ) -> Result<String, SourceError> {
            Ok(format!("s-{sub_collection}"))
        }

        async fn event_kinds(&self, _sub_collection_id: &str) -> Result<Vec<NamedId>, SourceError> {
            Ok(vec![NamedId {
                id: "k-created".to_string(),
                name: "created".to_string(),
            }])
        }

        async fn time_partition_page(
            &self,
            request: PartitionPageRequest<'_>,
        ) -> Result<PartitionPage, SourceError> {
            self.partition_calls.fetch_add(1, Ordering::SeqCst);
            if self.flaky_pages.load(Ordering::SeqCst) > 0 {
                self.flaky_pages.fetch_sub(1, Ordering::SeqCst);
                return Err(SourceError::transport("connection reset"));
            }
            assert_eq!(request.ids.collection_id, "c-orders");
            Ok(match request.page {
                None => PartitionPage {
                    partitions: vec![partition("20240101010000"), partition("20240101000000")],
                    next_page: Some(1),
                },
                Some(_) => PartitionPage {
                    partitions: vec![partition("20240101020000")],
                    next_page: None,
                },
            })
        }

        async fn events(&self, request: EventPageRequest<'_>) -> Result<Vec<StreamEvent>, SourceError> {
            Ok((0..request.page_size + 2)
                .map(|i| StreamEvent {
                    event_id: format!("e{i}"),
                    event_kind: "created".to_string(),
                    time_partition: request.time_partition.clone(),
                    payload: serde_json::Value::Null,
                })
                .collect())
        }
    }

    fn identity(kinds: &[&str]) -> StreamIdentity {
        StreamIdentity {
            tenant: "acme".to_string(),
            collection: "orders".to_string(),
            sub_collection: "order".to_string(),
            event_kinds: kinds.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn resolves_ids_once_and_caches() {
        let client = Arc::new(FakeClient::default());
        let source = CachedStreamSource::new(client.clone(), identity(&["created"]));
        let first = source.resolve_identity().await.unwrap();
        let second = source.resolve_identity().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.ids.event_kind_ids, vec!["k-created".to_string()]);
        assert_eq!(client.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_event_kind_is_not_found() {
        let client = Arc::new(FakeClient::default());
        let source = CachedStreamSource::new(client, identity(&["created", "deleted"]));
        let err = source.resolve_identity().await.unwrap_err();
        assert!(matches!(err, SourceError::IdentityNotFound { name, .. } if name == "deleted"));
    }

    #[tokio::test]
    async fn verbatim_mode_skips_lookups() {
        let client = Arc::new(FakeClient::default());
        let source =
            CachedStreamSource::new(client.clone(), identity(&["created"])).with_verbatim_ids(true);
        let resolved = source.resolve_identity().await.unwrap();
        assert_eq!(resolved.ids.collection_id, "orders");
        assert_eq!(client.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn partitions_are_paged_sorted_and_cached() {
        let client = Arc::new(FakeClient::default());
        let source = CachedStreamSource::new(client.clone(), identity(&["created"]));
        let partitions = source.list_time_partitions(false).await.unwrap();
        let keys: Vec<_> = partitions.iter().map(|p| p.as_str()).collect();
        assert_eq!(keys, vec!["20240101000000", "20240101010000", "20240101020000"]);
        source.list_time_partitions(false).await.unwrap();
        assert_eq!(client.partition_calls.load(Ordering::SeqCst), 2);
        source.list_time_partitions(true).await.unwrap();
        assert_eq!(client.partition_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_partition_errors_are_retried() {
        let client = Arc::new(FakeClient::default());
        client.flaky_pages.store(1, Ordering::SeqCst);
        let source = CachedStreamSource::new(client.clone(), identity(&["created"]));
        let partitions = source.list_time_partitions(false).await.unwrap();
        assert_eq!(partitions.len(), 3);
    }

    #[tokio::test]
    async fn fetch_never_exceeds_requested_count() {
        let client = Arc::new(FakeClient::default());
        let source = CachedStreamSource::new(client, identity(&["created"]));
        let cursor = Cursor::from_parts("20240101000000", None::<String>).unwrap();
        let events = source.fetch_events(&cursor, 3, None).await.unwrap();
        assert_eq!(events.len(), 3);
    }
}
