// Copyright (c) James Kassemi, SC, US. All rights reserved.

use crate::Notifier;
use async_trait::async_trait;
use core_types::config::MIN_POLL_INTERVAL_MS;
use core_types::ResolvedStream;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Fixed-interval wake-up; never below one second.
#[derive(Debug, Clone)]
pub struct PollNotifier {
    interval: Duration,
}

impl PollNotifier {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(MIN_POLL_INTERVAL_MS)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl Notifier for PollNotifier {
    async fn wait(&self, _stream: &ResolvedStream, cancel: CancellationToken) {
        tokio::select! {
            _ = sleep(self.interval) => {}
            _ = cancel.cancelled() => {}
        }
    }
}
