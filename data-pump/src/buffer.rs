// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Bounded in-memory buffer with reservation bookkeeping.
//!
//! The buffer is plain data; the engine wraps it in its single mutex and owns
//! every wake-up. Entries keep fetch order. Each entry remembers the cursor of
//! the entry fetched just before it, so once the head of the buffer moves the
//! engine knows the position up to which everything has been settled.

use core_types::{Cursor, StreamEvent};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Open,
    Reserved,
}

#[derive(Debug, Clone)]
pub struct BufferedEvent {
    pub event: StreamEvent,
    pub status: DeliveryStatus,
    pub delivery_count: u32,
    pub delivery_id: Option<String>,
    seq: u64,
    predecessor: Option<Cursor>,
}

/// One event handed out by a reservation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservedEvent {
    pub event: StreamEvent,
    pub delivery_id: String,
    pub delivery_count: u32,
}

/// Result of removing entries for any reason (ack, fail, exhaustion).
#[derive(Debug, Default)]
pub struct Removal {
    pub removed: Vec<StreamEvent>,
    /// Set when the removal emptied the buffer: the last event ever fetched.
    pub drained_at: Option<Cursor>,
    /// Set when the head advanced and the buffer is still non-empty: the last
    /// event before the new head.
    pub settled_to: Option<Cursor>,
}

#[derive(Debug, Default)]
pub struct Expiry {
    pub reopened: usize,
    pub exhausted: Removal,
}

pub struct Buffer {
    entries: VecDeque<BufferedEvent>,
    capacity: usize,
    threshold: usize,
    reserved: usize,
    fetch_paused: bool,
    next_seq: u64,
    last_pushed: Option<Cursor>,
}

fn cursor_of(event: &StreamEvent) -> Cursor {
    Cursor::new(event.time_partition.clone(), Some(event.event_id.clone()))
}

impl Buffer {
    pub fn new(capacity: usize, threshold: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            threshold: threshold.min(capacity),
            reserved: 0,
            fetch_paused: false,
            next_seq: 0,
            last_pushed: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reserved(&self) -> usize {
        self.reserved
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> impl Iterator<Item = &BufferedEvent> {
        self.entries.iter()
    }

    /// Occupancy at or below the resume mark.
    pub fn below_threshold(&self) -> bool {
        self.entries.len() <= self.capacity - self.threshold
    }

    /// How many events the next fetch may request, `None` while backpressured.
    ///
    /// Fetching pauses once the buffer is full and stays paused until occupancy
    /// falls to `capacity - threshold`.
    pub fn fetch_budget(&mut self) -> Option<usize> {
        if self.fetch_paused {
            if !self.below_threshold() {
                return None;
            }
            self.fetch_paused = false;
        }
        if self.entries.len() >= self.capacity {
            self.fetch_paused = true;
            return None;
        }
        Some(self.capacity - self.entries.len())
    }

    pub fn push_open(&mut self, events: Vec<StreamEvent>) {
        for event in events {
            let cursor = cursor_of(&event);
            self.entries.push_back(BufferedEvent {
                event,
                status: DeliveryStatus::Open,
                delivery_count: 0,
                delivery_id: None,
                seq: self.next_seq,
                predecessor: self.last_pushed.replace(cursor),
            });
            self.next_seq += 1;
        }
    }

    /// Flips up to `max` open entries, in order, to reserved under `delivery_id`.
    pub fn reserve(&mut self, max: usize, delivery_id: &str) -> Vec<ReservedEvent> {
        let mut reserved = Vec::new();
        for entry in self.entries.iter_mut() {
            if reserved.len() >= max {
                break;
            }
            if entry.status != DeliveryStatus::Open {
                continue;
            }
            entry.status = DeliveryStatus::Reserved;
            entry.delivery_count += 1;
            entry.delivery_id = Some(delivery_id.to_string());
            reserved.push(ReservedEvent {
                event: entry.event.clone(),
                delivery_id: delivery_id.to_string(),
                delivery_count: entry.delivery_count,
            });
        }
        self.reserved += reserved.len();
        reserved
    }

    /// Removes entries with the given ids whatever their status.
    pub fn remove(&mut self, ids: &[String]) -> Removal {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.remove_where(|entry| ids.contains(entry.event.event_id.as_str()))
    }

    /// Handles the redelivery timeout of one reservation batch.
    ///
    /// Entries still reserved under `delivery_id` are dropped once their count
    /// exceeds `limit` and reopened otherwise. Entries that are gone or were
    /// re-reserved since are left alone.
    pub fn expire(&mut self, delivery_id: &str, limit: Option<u32>) -> Expiry {
        let is_batch = |entry: &BufferedEvent| {
            entry.status == DeliveryStatus::Reserved
                && entry.delivery_id.as_deref() == Some(delivery_id)
        };
        let exhausted = self.remove_where(|entry| {
            is_batch(entry) && limit.is_some_and(|limit| entry.delivery_count > limit)
        });
        let mut reopened = 0;
        for entry in self.entries.iter_mut().filter(|entry| is_batch(entry)) {
            entry.status = DeliveryStatus::Open;
            entry.delivery_id = None;
            reopened += 1;
        }
        self.reserved -= reopened;
        Expiry {
            reopened,
            exhausted,
        }
    }

    /// Drops everything without producing a checkpoint.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.reserved = 0;
        self.fetch_paused = false;
        self.last_pushed = None;
    }

    fn remove_where(&mut self, mut matches: impl FnMut(&BufferedEvent) -> bool) -> Removal {
        let head_before = self.entries.front().map(|entry| entry.seq);
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if matches(&entry) {
                if entry.status == DeliveryStatus::Reserved {
                    self.reserved -= 1;
                }
                removed.push(entry.event);
            } else {
                kept.push_back(entry);
            }
        }
        self.entries = kept;
        if removed.is_empty() {
            return Removal::default();
        }
        match self.entries.front() {
            None => Removal {
                removed,
                drained_at: self.last_pushed.clone(),
                settled_to: None,
            },
            Some(head) if Some(head.seq) != head_before => Removal {
                removed,
                drained_at: None,
                settled_to: head.predecessor.clone(),
            },
            Some(_) => Removal {
                removed,
                ..Removal::default()
            },
        }
    }
}
