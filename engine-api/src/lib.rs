// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Lifecycle contract, health and error taxonomy shared by pump engines.

use async_trait::async_trait;
use core_types::config::ConfigError;
use core_types::CursorError;
use thiserror::Error;
use tokio::task::JoinHandle;

pub type EngineResult<T> = Result<T, EngineError>;

/// Background task of a started engine; resolves with the run's terminal result.
pub type EngineTask = JoinHandle<EngineResult<()>>;

#[async_trait]
pub trait Engine: Send + Sync {
    async fn start(&self) -> EngineResult<EngineTask>;
    /// Idempotent; releases every suspended caller.
    fn stop(&self);
    fn health(&self) -> EngineHealth;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Starting,
    Ready,
    Failed,
    Stopped,
}

#[derive(Clone, Debug)]
pub struct EngineHealth {
    pub status: HealthStatus,
    pub detail: Option<String>,
}

impl EngineHealth {
    pub fn new(status: HealthStatus, detail: Option<String>) -> Self {
        Self { status, detail }
    }
}

impl Default for EngineHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Stopped,
            detail: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine already running")]
    AlreadyRunning,
    #[error("engine is not running")]
    NotRunning,
    #[error(transparent)]
    InvalidCursor(#[from] CursorError),
    #[error("stream source unavailable: {source}")]
    SourceUnavailable {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("stream identity not found: {name}")]
    IdentityNotFound { name: String },
    #[error("state store failure: {source}")]
    State {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}
