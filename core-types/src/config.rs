// Copyright (c) James Kassemi, SC, US. All rights reserved.

use crate::types::StreamIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "DATA_PUMP";
pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything a data pump instance needs besides its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpConfig {
    #[serde(default = "default_label")]
    pub label: String,
    pub stream: StreamIdentity,
    /// Treat stream names as ids and skip resolution.
    #[serde(default)]
    pub verbatim_ids: bool,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub stop_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub checkpoint: CheckpointMode,
}

fn default_label() -> String {
    "data-pump".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Hysteresis band; defaults to 10% of capacity, rounded up.
    #[serde(default)]
    pub threshold: Option<usize>,
    /// -1 disables the limit.
    #[serde(default = "default_max_redelivery_count")]
    pub max_redelivery_count: i64,
    #[serde(default = "default_acknowledge_timeout_ms")]
    pub acknowledge_timeout_ms: u64,
}

fn default_capacity() -> usize {
    1_000
}

fn default_max_redelivery_count() -> i64 {
    3
}

fn default_acknowledge_timeout_ms() -> u64 {
    5_000
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            threshold: None,
            max_redelivery_count: default_max_redelivery_count(),
            acknowledge_timeout_ms: default_acknowledge_timeout_ms(),
        }
    }
}

impl BufferConfig {
    pub fn threshold(&self) -> usize {
        self.threshold
            .unwrap_or_else(|| self.capacity.div_ceil(10))
    }

    pub fn acknowledge_timeout(&self) -> Duration {
        Duration::from_millis(self.acknowledge_timeout_ms)
    }

    /// Highest delivery count still eligible for redelivery, `None` when unlimited.
    pub fn redelivery_limit(&self) -> Option<u32> {
        if self.max_redelivery_count < 0 {
            None
        } else {
            Some(u32::try_from(self.max_redelivery_count).unwrap_or(u32::MAX))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    1
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

/// Wake-up strategy used once the pump has caught up with the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierConfig {
    Subscribe {
        #[serde(default = "default_notify_timeout_ms")]
        timeout_ms: u64,
    },
    Channel {
        #[serde(default = "default_notify_timeout_ms")]
        timeout_ms: u64,
    },
    Poll {
        interval_ms: u64,
    },
}

fn default_notify_timeout_ms() -> u64 {
    20_000
}

impl Default for NotifierConfig {
    fn default() -> Self {
        NotifierConfig::Channel {
            timeout_ms: default_notify_timeout_ms(),
        }
    }
}

/// When the pump writes checkpoints while events are still buffered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointMode {
    /// Only when a removal drains the buffer.
    #[default]
    OnDrain,
    /// Also when the head of the buffer advances past a settled prefix.
    SettledPrefix,
}

impl PumpConfig {
    pub fn new(stream: StreamIdentity) -> Self {
        Self {
            label: default_label(),
            stream,
            verbatim_ids: false,
            buffer: BufferConfig::default(),
            stop_at: None,
            processor: ProcessorConfig::default(),
            notifier: NotifierConfig::default(),
            checkpoint: CheckpointMode::default(),
        }
    }

    /// Layers an optional TOML file under `DATA_PUMP__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("stream.event_kinds")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let buffer = &self.buffer;
        if buffer.capacity == 0 {
            return Err(ConfigError::Invalid("buffer.capacity must be at least 1".into()));
        }
        if buffer.threshold() > buffer.capacity {
            return Err(ConfigError::Invalid(format!(
                "buffer.threshold {} exceeds capacity {}",
                buffer.threshold(),
                buffer.capacity
            )));
        }
        if buffer.max_redelivery_count < -1 {
            return Err(ConfigError::Invalid(
                "buffer.max_redelivery_count must be -1 or greater".into(),
            ));
        }
        if buffer.acknowledge_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "buffer.acknowledge_timeout_ms must be positive".into(),
            ));
        }
        if self.processor.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "processor.concurrency must be at least 1".into(),
            ));
        }
        if self.stream.event_kinds.is_empty() {
            return Err(ConfigError::Invalid(
                "stream.event_kinds must name at least one kind".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn identity() -> StreamIdentity {
        StreamIdentity {
            tenant: "acme".into(),
            collection: "orders".into(),
            sub_collection: "order".into(),
            event_kinds: vec!["created".into()],
        }
    }

    #[test]
    fn defaults_follow_documented_values() {
        let cfg = PumpConfig::new(identity());
        assert_eq!(cfg.buffer.capacity, 1_000);
        assert_eq!(cfg.buffer.threshold(), 100);
        assert_eq!(cfg.buffer.redelivery_limit(), Some(3));
        assert_eq!(cfg.buffer.acknowledge_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.processor.concurrency, 1);
        assert_eq!(cfg.checkpoint, CheckpointMode::OnDrain);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn threshold_rounds_up_for_small_buffers() {
        let buffer = BufferConfig {
            capacity: 15,
            ..BufferConfig::default()
        };
        assert_eq!(buffer.threshold(), 2);
    }

    #[test]
    fn negative_redelivery_count_means_unlimited() {
        let buffer = BufferConfig {
            max_redelivery_count: -1,
            ..BufferConfig::default()
        };
        assert_eq!(buffer.redelivery_limit(), None);
    }

    #[test]
    fn validate_rejects_threshold_above_capacity() {
        let mut cfg = PumpConfig::new(identity());
        cfg.buffer.capacity = 10;
        cfg.buffer.threshold = Some(11);
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn subscribe_strategy_needs_only_a_timeout() {
        let mut cfg = PumpConfig::new(identity());
        cfg.notifier = serde_json::from_str(r#"{"type":"subscribe"}"#).unwrap();
        assert_eq!(cfg.notifier, NotifierConfig::Subscribe { timeout_ms: 20_000 });
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_reads_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
label = "orders-pump"
stop_at = "2024-05-01T00:00:00Z"

[stream]
tenant = "acme"
collection = "orders"
sub_collection = "order"
event_kinds = ["created", "cancelled"]

[buffer]
capacity = 50
max_redelivery_count = -1

[notifier]
type = "poll"
interval_ms = 2500
"#
        )
        .unwrap();
        let cfg = PumpConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.label, "orders-pump");
        assert_eq!(cfg.stream.event_kinds.len(), 2);
        assert_eq!(cfg.buffer.capacity, 50);
        assert_eq!(cfg.buffer.threshold(), 5);
        assert_eq!(cfg.buffer.redelivery_limit(), None);
        assert_eq!(cfg.notifier, NotifierConfig::Poll { interval_ms: 2500 });
        assert!(cfg.stop_at.is_some());
    }
}
