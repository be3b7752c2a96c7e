// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Pull-based, buffered consumer for a time-partitioned event log.
//!
//! A [`DataPump`] pages events from a [`stream_source::StreamSource`] into a
//! bounded buffer and hands them out with at-least-once semantics: reserved
//! batches come back after the acknowledge timeout until they are
//! acknowledged, failed, or run out of redeliveries. Progress is checkpointed
//! to a [`StateStore`] and never moves past an event that is still buffered.

mod buffer;
mod checkpoint;
mod handler;
mod metrics;
mod pump;
mod state;
mod walker;

pub use buffer::{Buffer, BufferedEvent, DeliveryStatus, Expiry, Removal, ReservedEvent};
pub use handler::{EventHandler, FailedHandler};
pub use metrics::{PumpMetrics, PumpMetricsSnapshot};
pub use pump::{DataPump, DataPumpBuilder};
pub use state::{FileStateStore, MemoryStateStore, StateError, StateStore};
pub use walker::{CursorWalker, WalkStep};
