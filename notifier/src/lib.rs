// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Wake-up strategies used by a pump that has caught up with the log.
//!
//! Every strategy honours the same contract: [`Notifier::wait`] returns once
//! new data might exist, on its safety-net timeout, or as soon as the cancel
//! token fires. It never fails; transport trouble degrades to the timeout.

mod channel;
mod poll;
mod subscribe;

pub use channel::{ChannelFilter, ChannelNotifier, Notification, NotificationTransport};
pub use poll::PollNotifier;
pub use subscribe::{notify_subject, BusMessage, BusSubscription, MessageBus, SubscribeNotifier};

use async_trait::async_trait;
use core_types::config::NotifierConfig;
use core_types::credentials::Credentials;
use core_types::{BoxError, ResolvedStream};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("subscribe to {subject} failed: {source}")]
    Subscribe {
        subject: String,
        #[source]
        source: BoxError,
    },
    #[error("push channel connect failed: {source}")]
    Connect {
        #[source]
        source: BoxError,
    },
    #[error("credentials unavailable: {source}")]
    Credentials {
        #[source]
        source: BoxError,
    },
    #[error("{0} notifier configured without its transport")]
    MissingTransport(&'static str),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn wait(&self, stream: &ResolvedStream, cancel: CancellationToken);
}

/// Transports the configured strategy may need; the bus and channel clients
/// live outside this crate.
#[derive(Default)]
pub struct Transports {
    pub bus: Option<Arc<dyn MessageBus>>,
    pub channel: Option<(Arc<dyn NotificationTransport>, Credentials)>,
}

/// Builds the strategy selected in configuration.
pub fn from_config(
    config: &NotifierConfig,
    transports: Transports,
) -> Result<Arc<dyn Notifier>, NotifierError> {
    Ok(match config {
        NotifierConfig::Subscribe { timeout_ms } => {
            let bus = transports
                .bus
                .ok_or(NotifierError::MissingTransport("subscribe"))?;
            Arc::new(SubscribeNotifier::new(bus).with_timeout(Duration::from_millis(*timeout_ms)))
        }
        NotifierConfig::Channel { timeout_ms } => {
            let (transport, credentials) = transports
                .channel
                .ok_or(NotifierError::MissingTransport("channel"))?;
            Arc::new(
                ChannelNotifier::new(transport, credentials)
                    .with_timeout(Duration::from_millis(*timeout_ms)),
            )
        }
        NotifierConfig::Poll { interval_ms } => {
            Arc::new(PollNotifier::new(Duration::from_millis(*interval_ms)))
        }
    })
}
