// Copyright (c) James Kassemi, SC, US. All rights reserved.

use async_trait::async_trait;
use chrono::Utc;
use core_types::Cursor;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable home of the pump checkpoint.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_state(&self) -> Result<Option<Cursor>, StateError>;

    /// Stores are free to ignore writes (read-only replays, dry runs).
    async fn set_state(&self, _cursor: &Cursor) -> Result<(), StateError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    cursor: Mutex<Option<Cursor>>,
    history: Mutex<Vec<Cursor>>,
}

impl MemoryStateStore {
    pub fn new(initial: Option<Cursor>) -> Self {
        Self {
            cursor: Mutex::new(initial),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> Option<Cursor> {
        self.cursor.lock().clone()
    }

    /// Every cursor written so far, oldest first.
    pub fn history(&self) -> Vec<Cursor> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_state(&self) -> Result<Option<Cursor>, StateError> {
        Ok(self.current())
    }

    async fn set_state(&self, cursor: &Cursor) -> Result<(), StateError> {
        *self.cursor.lock() = Some(cursor.clone());
        self.history.lock().push(cursor.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointFile {
    cursor: Cursor,
    last_updated_ns: i64,
}

/// Single JSON document on local disk.
pub struct FileStateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent(path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn load(&self) -> Result<Option<Cursor>, StateError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let _guard = self.lock.lock();
        let data = fs::read_to_string(&self.path)?;
        let file: CheckpointFile = serde_json::from_str(&data)?;
        Ok(Some(file.cursor))
    }

    fn persist(&self, cursor: &Cursor) -> Result<(), StateError> {
        Self::ensure_parent(&self.path)?;
        let checkpoint = CheckpointFile {
            cursor: cursor.clone(),
            last_updated_ns: current_time_ns(),
        };
        let tmp_path = self.path.with_extension("json.tmp");
        let _guard = self.lock.lock();
        let mut file = fs::File::create(&tmp_path)?;
        serde_json::to_writer_pretty(&mut file, &checkpoint)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get_state(&self) -> Result<Option<Cursor>, StateError> {
        self.load()
    }

    async fn set_state(&self, cursor: &Cursor) -> Result<(), StateError> {
        self.persist(cursor)
    }
}

fn current_time_ns() -> i64 {
    Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros() * 1_000)
}
