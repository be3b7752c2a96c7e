// Copyright (c) James Kassemi, SC, US. All rights reserved.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use core_types::config::PumpConfig;
use core_types::uid::{cmp_event_ids, event_id_at};
use core_types::{
    BoxError, Cursor, ResolvedIds, ResolvedStream, StreamEvent, StreamIdentity, TimePartition,
};
use data_pump::{EventHandler, FailedHandler};
use notifier::Notifier;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stream_source::{SourceError, StreamSource};
use tokio_util::sync::CancellationToken;

pub fn identity() -> StreamIdentity {
    StreamIdentity {
        tenant: "acme".to_string(),
        collection: "orders".to_string(),
        sub_collection: "order".to_string(),
        event_kinds: vec!["created".to_string()],
    }
}

pub fn config(capacity: usize, threshold: usize, max_redelivery: i64, ack_timeout_ms: u64) -> PumpConfig {
    let mut config = PumpConfig::new(identity());
    config.label = "test-pump".to_string();
    config.buffer.capacity = capacity;
    config.buffer.threshold = Some(threshold);
    config.buffer.max_redelivery_count = max_redelivery;
    config.buffer.acknowledge_timeout_ms = ack_timeout_ms;
    config
}

pub fn hour_start(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(TimeDelta::hours(1)).unwrap()
}

pub fn partition_start(cursor_partition: &TimePartition) -> Cursor {
    Cursor::new(cursor_partition.clone(), None)
}

pub fn cursor_of(event: &StreamEvent) -> Cursor {
    Cursor::new(event.time_partition.clone(), Some(event.event_id.clone()))
}

pub fn ids(events: &[StreamEvent]) -> Vec<String> {
    events.iter().map(|e| e.event_id.clone()).collect()
}

/// In-memory log: one ordered list of events over a set of partitions.
#[derive(Default)]
pub struct FakeSource {
    missing_kind: bool,
    pub fail_fetches: AtomicBool,
    /// Partition listing takes a while and then errors.
    pub fail_listing_after: Mutex<Option<Duration>>,
    partitions: Mutex<Vec<TimePartition>>,
    events: Mutex<Vec<StreamEvent>>,
    fetches: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A source whose event kind cannot be resolved.
    pub fn missing_identity() -> Arc<Self> {
        Arc::new(Self {
            missing_kind: true,
            ..Self::default()
        })
    }

    /// Appends `count` events one second apart, starting `offset` seconds
    /// into the hour containing `hour`.
    pub fn append(&self, hour: DateTime<Utc>, offset: i64, count: i64) -> Vec<StreamEvent> {
        let start = hour_start(hour);
        let partition = TimePartition::containing(start);
        self.add_partition(partition.clone());
        let added: Vec<StreamEvent> = (offset..offset + count)
            .map(|i| StreamEvent {
                event_id: event_id_at(start + TimeDelta::seconds(i)),
                event_kind: "created".to_string(),
                time_partition: partition.clone(),
                payload: serde_json::json!({ "seq": i }),
            })
            .collect();
        self.events.lock().extend(added.iter().cloned());
        added
    }

    pub fn add_partition(&self, partition: TimePartition) {
        let mut partitions = self.partitions.lock();
        if !partitions.contains(&partition) {
            partitions.push(partition);
            partitions.sort();
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamSource for FakeSource {
    async fn resolve_identity(&self) -> Result<ResolvedStream, SourceError> {
        if self.missing_kind {
            return Err(SourceError::IdentityNotFound {
                kind: "event kind",
                name: "created".to_string(),
            });
        }
        let identity = identity();
        Ok(ResolvedStream {
            ids: ResolvedIds::verbatim(&identity),
            identity,
        })
    }

    async fn list_time_partitions(
        &self,
        _force_refresh: bool,
    ) -> Result<Arc<Vec<TimePartition>>, SourceError> {
        let delay = *self.fail_listing_after.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            return Err(SourceError::transport("listing timed out"));
        }
        Ok(Arc::new(self.partitions.lock().clone()))
    }

    async fn fetch_events(
        &self,
        after: &Cursor,
        max_count: usize,
        upper_bound: Option<&str>,
    ) -> Result<Vec<StreamEvent>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(SourceError::transport("connection refused"));
        }
        let events = self.events.lock();
        Ok(events
            .iter()
            .filter(|e| e.time_partition == after.time_partition)
            .filter(|e| {
                after
                    .event_id
                    .as_deref()
                    .map_or(true, |a| cmp_event_ids(&e.event_id, a) == CmpOrdering::Greater)
            })
            .filter(|e| {
                upper_bound.map_or(true, |u| cmp_event_ids(&e.event_id, u) != CmpOrdering::Greater)
            })
            .take(max_count)
            .cloned()
            .collect())
    }
}

/// Resolves every `period`, like a poll notifier without the one second floor.
pub struct TickNotifier {
    period: Duration,
    waits: AtomicUsize,
}

impl TickNotifier {
    pub fn new(period: Duration) -> Arc<Self> {
        Arc::new(Self {
            period,
            waits: AtomicUsize::new(0),
        })
    }

    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for TickNotifier {
    async fn wait(&self, _stream: &ResolvedStream, cancel: CancellationToken) {
        self.waits.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            _ = tokio::time::sleep(self.period) => {}
            _ = cancel.cancelled() => {}
        }
    }
}

#[derive(Default)]
pub struct RecordingFailed {
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingFailed {
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl FailedHandler for RecordingFailed {
    async fn on_failed(&self, events: Vec<StreamEvent>) -> Result<(), BoxError> {
        self.calls.lock().push(ids(&events));
        Ok(())
    }
}

/// Failed handler that errors or panics on every call, counting calls.
pub struct BrokenFailed {
    panics: bool,
    calls: AtomicUsize,
}

impl BrokenFailed {
    pub fn erroring() -> Arc<Self> {
        Arc::new(Self {
            panics: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn panicking() -> Arc<Self> {
        Arc::new(Self {
            panics: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FailedHandler for BrokenFailed {
    async fn on_failed(&self, _events: Vec<StreamEvent>) -> Result<(), BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("dead letter sink crashed");
        }
        Err("dead letter sink unavailable".into())
    }
}

/// Never finishes handling failed events.
#[derive(Default)]
pub struct StalledFailed;

#[async_trait]
impl FailedHandler for StalledFailed {
    async fn on_failed(&self, _events: Vec<StreamEvent>) -> Result<(), BoxError> {
        std::future::pending().await
    }
}

/// Acknowledges everything, optionally failing the first `fail_first` batches.
#[derive(Default)]
pub struct RecordingHandler {
    pub fail_first: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl RecordingHandler {
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, events: &[StreamEvent]) -> Result<(), BoxError> {
        self.seen.lock().extend(ids(events));
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err("downstream unavailable".into());
        }
        Ok(())
    }
}

/// Polls `check` until it holds or `limit` elapses.
pub async fn eventually(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
