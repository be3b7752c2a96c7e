// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Push-subscribe strategy: per-kind topics on a message bus.

use crate::{Notifier, NotifierError, DEFAULT_NOTIFY_TIMEOUT};
use async_trait::async_trait;
use core_types::ResolvedStream;
use futures::stream::{self, StreamExt};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

type ReleaseFn = Box<dyn FnOnce() + Send + Sync>;

/// Live subscription handed out by a [`MessageBus`]; unsubscribes on drop.
pub struct BusSubscription {
    subject: String,
    messages: mpsc::Receiver<BusMessage>,
    release: Option<ReleaseFn>,
}

impl BusSubscription {
    pub fn new(subject: impl Into<String>, messages: mpsc::Receiver<BusMessage>) -> Self {
        Self {
            subject: subject.into(),
            messages,
            release: None,
        }
    }

    /// Hook run exactly once when the subscription is dropped.
    pub fn on_release(mut self, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub async fn next(&mut self) -> Option<BusMessage> {
        self.messages.recv().await
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn subscribe(&self, subject: &str) -> Result<BusSubscription, NotifierError>;
}

/// Topic announcing new events of one kind.
pub fn notify_subject(stream: &ResolvedStream, event_kind: &str) -> String {
    format!(
        "stored.event.notify.0.{}.{}.{}",
        stream.ids.collection_id, stream.identity.sub_collection, event_kind
    )
}

pub struct SubscribeNotifier {
    bus: Arc<dyn MessageBus>,
    timeout: Duration,
}

impl SubscribeNotifier {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            timeout: DEFAULT_NOTIFY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn subscribe_all(&self, stream: &ResolvedStream) -> Vec<BusSubscription> {
        let mut subscriptions = Vec::with_capacity(stream.identity.event_kinds.len());
        for kind in &stream.identity.event_kinds {
            let subject = notify_subject(stream, kind);
            match self.bus.subscribe(&subject).await {
                Ok(sub) => subscriptions.push(sub),
                Err(err) => warn!("notifier subscription failed, relying on timeout: {}", err),
            }
        }
        subscriptions
    }
}

#[async_trait]
impl Notifier for SubscribeNotifier {
    async fn wait(&self, stream: &ResolvedStream, cancel: CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        // subscribing counts against the same deadline as waiting
        let first_message = async {
            let subscriptions = self.subscribe_all(stream).await;
            let mut merged = stream::select_all(subscriptions.into_iter().map(|sub| {
                Box::pin(stream::unfold(sub, |mut sub| async move {
                    let message = sub.next().await?;
                    Some((message, sub))
                }))
            }));
            match merged.next().await {
                Some(message) => message,
                // every subscription closed: only the timeout or cancel can end the wait
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            message = first_message => debug!("notified via {}", message.subject),
            _ = sleep(self.timeout) => debug!("notifier safety timeout elapsed"),
            _ = cancel.cancelled() => debug!("notifier wait cancelled"),
        }
    }
}
