// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

#[derive(Default)]
struct PumpMetricsInner {
    fetches: AtomicU64,
    events_pulled: AtomicU64,
    bytes_pulled: AtomicU64,
    acknowledged: AtomicU64,
    failed: AtomicU64,
    redelivered: AtomicU64,
    exhausted: AtomicU64,
    buffered: AtomicU64,
    reserved: AtomicU64,
}

/// In-process counters; exporting them is left to the embedding service.
#[derive(Clone, Default)]
pub struct PumpMetrics {
    inner: Arc<PumpMetricsInner>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpMetricsSnapshot {
    pub fetches: u64,
    pub events_pulled: u64,
    pub bytes_pulled: u64,
    pub acknowledged: u64,
    pub failed: u64,
    pub redelivered: u64,
    pub exhausted: u64,
    pub buffered: u64,
    pub reserved: u64,
}

impl PumpMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fetch(&self, events: usize, bytes: usize) {
        self.inner.fetches.fetch_add(1, Ordering::Relaxed);
        if events > 0 {
            self.inner
                .events_pulled
                .fetch_add(events as u64, Ordering::Relaxed);
            self.inner
                .bytes_pulled
                .fetch_add(bytes as u64, Ordering::Relaxed);
        }
    }

    pub fn inc_acknowledged(&self, delta: usize) {
        if delta > 0 {
            self.inner
                .acknowledged
                .fetch_add(delta as u64, Ordering::Relaxed);
        }
    }

    pub fn inc_failed(&self, delta: usize) {
        if delta > 0 {
            self.inner.failed.fetch_add(delta as u64, Ordering::Relaxed);
        }
    }

    pub fn inc_redelivered(&self, delta: usize) {
        if delta > 0 {
            self.inner
                .redelivered
                .fetch_add(delta as u64, Ordering::Relaxed);
        }
    }

    pub fn inc_exhausted(&self, delta: usize) {
        if delta > 0 {
            self.inner
                .exhausted
                .fetch_add(delta as u64, Ordering::Relaxed);
        }
    }

    pub fn set_occupancy(&self, buffered: usize, reserved: usize) {
        self.inner
            .buffered
            .store(buffered as u64, Ordering::Relaxed);
        self.inner
            .reserved
            .store(reserved as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PumpMetricsSnapshot {
        PumpMetricsSnapshot {
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            events_pulled: self.inner.events_pulled.load(Ordering::Relaxed),
            bytes_pulled: self.inner.bytes_pulled.load(Ordering::Relaxed),
            acknowledged: self.inner.acknowledged.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            redelivered: self.inner.redelivered.load(Ordering::Relaxed),
            exhausted: self.inner.exhausted.load(Ordering::Relaxed),
            buffered: self.inner.buffered.load(Ordering::Relaxed),
            reserved: self.inner.reserved.load(Ordering::Relaxed),
        }
    }
}
