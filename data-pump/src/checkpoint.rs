// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Ordered checkpoint writes.
//!
//! Submissions happen inside the engine's critical section, so the channel
//! order is the order in which removals happened. One task drains it, which
//! keeps `set_state` calls for an engine strictly sequential.

use crate::state::StateStore;
use core_types::Cursor;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

enum Command {
    Write {
        cursor: Cursor,
        done: oneshot::Sender<()>,
    },
    /// Starts a new run: earlier cursors are no longer a floor.
    Reset,
}

/// Resolves once the submitted cursor was written or skipped.
pub type CheckpointTicket = oneshot::Receiver<()>;

pub struct CheckpointWriter {
    tx: mpsc::UnboundedSender<Command>,
}

impl CheckpointWriter {
    pub fn spawn(label: String, store: Arc<dyn StateStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(label, store, rx));
        Self { tx }
    }

    pub fn submit(&self, cursor: Cursor) -> Option<CheckpointTicket> {
        let (done, ticket) = oneshot::channel();
        self.tx.send(Command::Write { cursor, done }).ok()?;
        Some(ticket)
    }

    pub fn reset(&self) {
        let _ = self.tx.send(Command::Reset);
    }
}

async fn run(label: String, store: Arc<dyn StateStore>, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut last_written: Option<Cursor> = None;
    while let Some(command) = rx.recv().await {
        let (cursor, done) = match command {
            Command::Write { cursor, done } => (cursor, done),
            Command::Reset => {
                last_written = None;
                continue;
            }
        };
        if last_written.as_ref().is_some_and(|last| cursor < *last) {
            debug!("[{}] skipping stale checkpoint {}", label, cursor);
        } else {
            match store.set_state(&cursor).await {
                Ok(()) => {
                    debug!("[{}] checkpoint {}", label, cursor);
                    last_written = Some(cursor);
                }
                Err(err) => warn!("[{}] checkpoint {} failed: {}", label, cursor, err),
            }
        }
        let _ = done.send(());
    }
}
