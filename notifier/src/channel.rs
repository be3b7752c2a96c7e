// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Persistent push-channel strategy.
//!
//! A single long-lived connection is opened by the first wait and shared by all
//! later ones. Incoming notifications fan out over a broadcast channel; each
//! wait filters for the event kinds of its stream. Drops are retried in the
//! background with the reconnect back-off and are invisible to waiters, which
//! simply fall back to the safety-net timeout meanwhile.

use crate::{Notifier, NotifierError, DEFAULT_NOTIFY_TIMEOUT};
use async_trait::async_trait;
use core_types::credentials::{Authorization, Credentials};
use core_types::retry::RetryPolicy;
use core_types::ResolvedStream;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const FANOUT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub tenant: String,
    pub collection: String,
    pub sub_collection: String,
    pub event_kind: String,
    pub event_id: Option<String>,
}

/// Server-side filter for one connection, expressed in resolved ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFilter {
    pub tenant: String,
    pub collection: String,
    pub sub_collection: String,
}

impl ChannelFilter {
    pub fn for_stream(stream: &ResolvedStream) -> Self {
        Self {
            tenant: stream.ids.tenant_id.clone(),
            collection: stream.ids.collection_id.clone(),
            sub_collection: stream.ids.sub_collection_id.clone(),
        }
    }
}

/// Opens one filtered connection; the receiver closes when the connection drops.
#[async_trait]
pub trait NotificationTransport: Send + Sync + 'static {
    async fn connect(
        &self,
        filter: &ChannelFilter,
        auth: Authorization,
    ) -> Result<mpsc::Receiver<Notification>, NotifierError>;
}

struct Connection {
    filter: ChannelFilter,
    events: broadcast::Sender<Notification>,
    shutdown: CancellationToken,
}

pub struct ChannelNotifier {
    transport: Arc<dyn NotificationTransport>,
    credentials: Credentials,
    timeout: Duration,
    retry: RetryPolicy,
    connection: Mutex<Option<Connection>>,
}

impl ChannelNotifier {
    pub fn new(transport: Arc<dyn NotificationTransport>, credentials: Credentials) -> Self {
        Self {
            transport,
            credentials,
            timeout: DEFAULT_NOTIFY_TIMEOUT,
            retry: RetryPolicy::reconnect(),
            connection: Mutex::new(None),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn subscribe(&self, stream: &ResolvedStream) -> broadcast::Receiver<Notification> {
        let filter = ChannelFilter::for_stream(stream);
        let mut guard = self.connection.lock();
        if let Some(conn) = guard.as_ref() {
            if conn.filter == filter && !conn.shutdown.is_cancelled() {
                return conn.events.subscribe();
            }
            conn.shutdown.cancel();
        }
        let (events, rx) = broadcast::channel(FANOUT_CAPACITY);
        let shutdown = CancellationToken::new();
        tokio::spawn(run_connection(
            self.transport.clone(),
            self.credentials.clone(),
            filter.clone(),
            events.clone(),
            self.retry.clone(),
            shutdown.clone(),
        ));
        *guard = Some(Connection {
            filter,
            events,
            shutdown,
        });
        rx
    }
}

impl Drop for ChannelNotifier {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.lock().take() {
            conn.shutdown.cancel();
        }
    }
}

async fn run_connection(
    transport: Arc<dyn NotificationTransport>,
    credentials: Credentials,
    filter: ChannelFilter,
    events: broadcast::Sender<Notification>,
    retry: RetryPolicy,
    shutdown: CancellationToken,
) {
    let mut attempt = 0usize;
    loop {
        let connected = match credentials.authorization().await {
            Ok(auth) => transport.connect(&filter, auth).await,
            Err(source) => Err(NotifierError::Credentials { source }),
        };
        match connected {
            Ok(mut incoming) => {
                attempt = 0;
                debug!(
                    "push channel connected for {}/{}",
                    filter.collection, filter.sub_collection
                );
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        next = incoming.recv() => match next {
                            // no receivers is fine: nobody is waiting right now
                            Some(notification) => { let _ = events.send(notification); }
                            None => break,
                        },
                    }
                }
                warn!(
                    "push channel for {}/{} dropped, reconnecting",
                    filter.collection, filter.sub_collection
                );
            }
            Err(err) => warn!("{}", err),
        }
        let delay = retry.delay_for(attempt);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = sleep(delay) => {}
        }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn wait(&self, stream: &ResolvedStream, cancel: CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        let mut rx = self.subscribe(stream);
        let matching = async {
            loop {
                match rx.recv().await {
                    Ok(notification) if stream.wants_kind(&notification.event_kind) => return,
                    Ok(_) => continue,
                    // missed some: any of them may have been ours
                    Err(broadcast::error::RecvError::Lagged(_)) => return,
                    Err(broadcast::error::RecvError::Closed) => {
                        std::future::pending::<()>().await
                    }
                }
            }
        };
        tokio::select! {
            _ = matching => debug!("push channel notification received"),
            _ = sleep(self.timeout) => debug!("notifier safety timeout elapsed"),
            _ = cancel.cancelled() => debug!("notifier wait cancelled"),
        }
    }
}
