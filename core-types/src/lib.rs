// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Shared data model, configuration and helpers for the data pump workspace.

pub mod config;
pub mod credentials;
pub mod partition;
pub mod retry;
pub mod types;
pub mod uid;

pub use partition::{Cursor, CursorError, TimePartition};
pub use types::{BoxError, ResolvedIds, ResolvedStream, StreamEvent, StreamIdentity};
