// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! The buffer engine: fetch loop, reservation, redelivery and checkpoints.
//!
//! All buffer and run-state mutation happens under one `parking_lot` mutex
//! that is never held across an await. Suspensions use one `Notify` per
//! condition (events available, below threshold, drained); a waiter creates
//! its `notified()` future before checking the condition under the lock, so
//! a `notify_waiters` issued after the check is never missed.

use crate::buffer::{Buffer, Expiry, Removal, ReservedEvent};
use crate::checkpoint::{CheckpointTicket, CheckpointWriter};
use crate::handler::{EventHandler, FailedHandler};
use crate::metrics::{PumpMetrics, PumpMetricsSnapshot};
use crate::state::StateStore;
use crate::walker::{CursorWalker, WalkStep};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::config::{CheckpointMode, PumpConfig};
use core_types::{uid, Cursor, CursorError, ResolvedStream, StreamEvent, TimePartition};
use engine_api::{Engine, EngineError, EngineHealth, EngineResult, EngineTask, HealthStatus};
use log::{debug, error, info, warn};
use notifier::Notifier;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use stream_source::{SourceError, StreamSource};
use tokio::sync::Notify;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const LIVE_PACING: Duration = Duration::from_millis(1_000);

pub struct DataPumpBuilder {
    config: PumpConfig,
    source: Arc<dyn StreamSource>,
    notifier: Arc<dyn Notifier>,
    state: Arc<dyn StateStore>,
    failed: Option<Arc<dyn FailedHandler>>,
    handler: Option<Arc<dyn EventHandler>>,
}

impl DataPumpBuilder {
    pub fn failed_handler(mut self, handler: Arc<dyn FailedHandler>) -> Self {
        self.failed = Some(handler);
        self
    }

    /// Runs a processor loop around `reserve -> handle -> acknowledge`.
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn build(self) -> EngineResult<DataPump> {
        self.config.validate()?;
        let buffer = Buffer::new(self.config.buffer.capacity, self.config.buffer.threshold());
        let core = PumpCore {
            loop_alive: false,
            running: false,
            restarting: false,
            restart_to: None,
            buffer,
            cursor: None,
            stop_at: self.config.stop_at,
            cancel: CancellationToken::new(),
            checkpoints: None,
            processor_alive: false,
        };
        Ok(DataPump {
            shared: Arc::new(Shared {
                config: self.config,
                source: self.source,
                notifier: self.notifier,
                state: self.state,
                failed: self.failed,
                handler: self.handler,
                metrics: PumpMetrics::new(),
                core: Mutex::new(core),
                health: Mutex::new(EngineHealth::new(
                    HealthStatus::Stopped,
                    Some("engine not started".to_string()),
                )),
                events_available: Notify::new(),
                below_threshold: Notify::new(),
                drained: Notify::new(),
            }),
        })
    }
}

/// Handle to one pump instance. Clones share the same buffer and cursor.
#[derive(Clone)]
pub struct DataPump {
    shared: Arc<Shared>,
}

impl DataPump {
    pub fn builder(
        config: PumpConfig,
        source: Arc<dyn StreamSource>,
        notifier: Arc<dyn Notifier>,
        state: Arc<dyn StateStore>,
    ) -> DataPumpBuilder {
        DataPumpBuilder {
            config,
            source,
            notifier,
            state,
            failed: None,
            handler: None,
        }
    }

    /// Up to `max` open events under one fresh delivery id.
    ///
    /// Suspends while nothing is open. Returns empty once the engine is
    /// stopped; a restart in progress keeps the caller waiting.
    pub async fn reserve(&self, max: usize) -> Vec<ReservedEvent> {
        self.shared.reserve(max).await
    }

    /// Removes the events and resolves after any resulting checkpoint was written.
    pub async fn acknowledge(&self, ids: &[String]) -> usize {
        self.shared.acknowledge(ids).await
    }

    /// Like [`acknowledge`](Self::acknowledge), then hands the removed events
    /// to the failed handler in the background. Does not count as a redelivery.
    pub async fn fail(&self, ids: &[String]) -> usize {
        self.shared.fail(ids).await
    }

    /// Re-positions a live fetch loop. `stop_at`: `None` keeps the current
    /// stop time, `Some(None)` clears it, `Some(Some(t))` replaces it.
    pub fn restart(&self, cursor: Cursor, stop_at: Option<Option<DateTime<Utc>>>) -> EngineResult<()> {
        self.shared.restart(cursor, stop_at)
    }

    pub fn is_running(&self) -> bool {
        let core = self.shared.core.lock();
        core.loop_alive && !core.halted()
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.shared.core.lock().cursor.clone()
    }

    pub fn buffered_ids(&self) -> Vec<String> {
        self.shared
            .core
            .lock()
            .buffer
            .entries()
            .map(|entry| entry.event.event_id.clone())
            .collect()
    }

    pub fn metrics(&self) -> PumpMetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

#[async_trait]
impl Engine for DataPump {
    async fn start(&self) -> EngineResult<EngineTask> {
        self.shared.start().await
    }

    fn stop(&self) {
        self.shared.stop()
    }

    fn health(&self) -> EngineHealth {
        self.shared.health.lock().clone()
    }
}

struct RestartRequest {
    cursor: Cursor,
    stop_at: Option<Option<DateTime<Utc>>>,
}

struct PumpCore {
    /// A fetch loop task exists (or is being prepared by `start`).
    loop_alive: bool,
    running: bool,
    restarting: bool,
    restart_to: Option<RestartRequest>,
    buffer: Buffer,
    cursor: Option<Cursor>,
    stop_at: Option<DateTime<Utc>>,
    cancel: CancellationToken,
    checkpoints: Option<CheckpointWriter>,
    processor_alive: bool,
}

impl PumpCore {
    fn halted(&self) -> bool {
        !self.running && !self.restarting
    }
}

/// Fetch loop state that never leaves the loop task.
struct Run {
    stream: ResolvedStream,
    cursor: Cursor,
    stop_target: Option<Cursor>,
    cancel: CancellationToken,
}

struct Shared {
    config: PumpConfig,
    source: Arc<dyn StreamSource>,
    notifier: Arc<dyn Notifier>,
    state: Arc<dyn StateStore>,
    failed: Option<Arc<dyn FailedHandler>>,
    handler: Option<Arc<dyn EventHandler>>,
    metrics: PumpMetrics,
    core: Mutex<PumpCore>,
    health: Mutex<EngineHealth>,
    events_available: Notify,
    below_threshold: Notify,
    drained: Notify,
}

fn source_failure(err: SourceError) -> EngineError {
    match err {
        SourceError::IdentityNotFound { kind, name } => EngineError::IdentityNotFound {
            name: format!("{kind} {name}"),
        },
        SourceError::InvalidPartition(err) => EngineError::InvalidCursor(err),
        other => EngineError::SourceUnavailable {
            source: Box::new(other),
        },
    }
}

fn stop_target(
    walker: &CursorWalker,
    stop_at: Option<DateTime<Utc>>,
) -> Result<Option<Cursor>, CursorError> {
    let Some(at) = stop_at else {
        return Ok(None);
    };
    let partition = walker.closest_partition(TimePartition::containing(at).as_str(), true)?;
    Ok(Some(Cursor::new(partition, Some(uid::event_id_at(at)))))
}

async fn written(ticket: Option<CheckpointTicket>) {
    if let Some(ticket) = ticket {
        let _ = ticket.await;
    }
}

impl Shared {
    fn label(&self) -> &str {
        &self.config.label
    }

    fn set_health(&self, status: HealthStatus, detail: Option<String>) {
        *self.health.lock() = EngineHealth::new(status, detail);
    }

    fn publish_occupancy(&self, core: &PumpCore) {
        self.metrics
            .set_occupancy(core.buffer.len(), core.buffer.reserved());
    }

    fn wake_all(&self) {
        self.events_available.notify_waiters();
        self.below_threshold.notify_waiters();
        self.drained.notify_waiters();
    }

    async fn start(self: &Arc<Self>) -> EngineResult<EngineTask> {
        let cancel = CancellationToken::new();
        {
            let mut core = self.core.lock();
            if core.loop_alive {
                return Err(EngineError::AlreadyRunning);
            }
            core.loop_alive = true;
            core.cancel = cancel.clone();
        }
        self.set_health(HealthStatus::Starting, None);

        let (walker, run) = match self.prepare(cancel).await {
            Ok(prepared) => prepared,
            Err(err) => {
                {
                    // a restart accepted during prepare has no loop to run it
                    let mut core = self.core.lock();
                    core.loop_alive = false;
                    core.running = false;
                    core.restarting = false;
                    core.restart_to = None;
                }
                self.wake_all();
                error!("[{}] data pump failed to start: {}", self.label(), err);
                self.set_health(HealthStatus::Failed, Some(err.to_string()));
                return Err(err);
            }
        };

        let processor = {
            let mut core = self.core.lock();
            if run.cancel.is_cancelled() && !core.restarting {
                core.loop_alive = false;
                drop(core);
                self.set_health(HealthStatus::Stopped, None);
                return Err(EngineError::NotRunning);
            }
            core.running = true;
            core.buffer.clear();
            core.cursor = Some(run.cursor.clone());
            match &core.checkpoints {
                Some(writer) => writer.reset(),
                None => {
                    core.checkpoints = Some(CheckpointWriter::spawn(
                        self.config.label.clone(),
                        self.state.clone(),
                    ))
                }
            }
            self.publish_occupancy(&core);
            let processor = self.handler.clone().filter(|_| !core.processor_alive);
            if processor.is_some() {
                core.processor_alive = true;
            }
            processor
        };
        if let Some(handler) = processor {
            tokio::spawn(self.clone().process(handler));
        }

        self.set_health(HealthStatus::Ready, None);
        info!("[{}] data pump started at {}", self.label(), run.cursor);
        Ok(tokio::spawn(self.clone().run(walker, run)))
    }

    async fn prepare(&self, cancel: CancellationToken) -> EngineResult<(CursorWalker, Run)> {
        let stream = self
            .source
            .resolve_identity()
            .await
            .map_err(source_failure)?;
        let walker = CursorWalker::load(self.source.as_ref())
            .await
            .map_err(source_failure)?;
        let stored = self
            .state
            .get_state()
            .await
            .map_err(|err| EngineError::State {
                source: Box::new(err),
            })?;
        let cursor = match stored {
            Some(stored) => walker.resolve(&stored)?,
            None => Cursor::new(
                walker.closest_partition(TimePartition::now().as_str(), false)?,
                Some(uid::event_id_now()),
            ),
        };
        let stop_at = self.core.lock().stop_at;
        let stop_target = stop_target(&walker, stop_at)?;
        Ok((
            walker,
            Run {
                stream,
                cursor,
                stop_target,
                cancel,
            },
        ))
    }

    async fn run(self: Arc<Self>, mut walker: CursorWalker, mut run: Run) -> EngineResult<()> {
        let result = self.fetch_loop(&mut walker, &mut run).await;
        {
            let mut core = self.core.lock();
            core.loop_alive = false;
            core.running = false;
            core.restarting = false;
            core.restart_to = None;
            core.buffer.clear();
            core.cancel.cancel();
            self.publish_occupancy(&core);
        }
        self.wake_all();
        match &result {
            Ok(()) => {
                info!("[{}] data pump stopped", self.label());
                self.set_health(HealthStatus::Stopped, None);
            }
            Err(err) => {
                error!("[{}] data pump failed: {}", self.label(), err);
                self.set_health(HealthStatus::Failed, Some(err.to_string()));
            }
        }
        result
    }

    async fn fetch_loop(&self, walker: &mut CursorWalker, run: &mut Run) -> EngineResult<()> {
        loop {
            let restart = {
                let mut core = self.core.lock();
                match core.restart_to.take() {
                    Some(request) => Some(request),
                    None if core.running => None,
                    None => return Ok(()),
                }
            };
            match restart {
                Some(request) => self.resume(walker, run, request).await?,
                None => self.fetch_once(walker, run).await?,
            }
        }
    }

    async fn resume(
        &self,
        walker: &mut CursorWalker,
        run: &mut Run,
        request: RestartRequest,
    ) -> EngineResult<()> {
        walker
            .refresh(self.source.as_ref())
            .await
            .map_err(source_failure)?;
        walker.set_live(false);
        let cursor = walker.resolve(&request.cursor)?;
        let stop_at = {
            let mut core = self.core.lock();
            if let Some(stop_at) = request.stop_at {
                core.stop_at = stop_at;
            }
            core.stop_at
        };
        let stop_target = stop_target(walker, stop_at)?;
        let cancel = CancellationToken::new();
        {
            let mut core = self.core.lock();
            // stopped for good, or superseded by a newer restart
            if !core.restarting || core.restart_to.is_some() {
                return Ok(());
            }
            core.running = true;
            core.restarting = false;
            core.buffer.clear();
            core.cursor = Some(cursor.clone());
            core.cancel = cancel.clone();
            if let Some(writer) = &core.checkpoints {
                writer.reset();
            }
            self.publish_occupancy(&core);
        }
        info!("[{}] data pump restarted at {}", self.label(), cursor);
        run.cursor = cursor;
        run.stop_target = stop_target;
        run.cancel = cancel;
        self.set_health(HealthStatus::Ready, None);
        Ok(())
    }

    /// One iteration of the fetch loop.
    async fn fetch_once(&self, walker: &mut CursorWalker, run: &mut Run) -> EngineResult<()> {
        let Some(budget) = self.wait_for_budget().await else {
            return Ok(());
        };
        let upper_bound = run
            .stop_target
            .as_ref()
            .and_then(|target| target.event_id.as_deref());
        let events = self
            .source
            .fetch_events(&run.cursor, budget, upper_bound)
            .await
            .map_err(source_failure)?;
        let fetched = events.len();
        let bytes: usize = events.iter().map(StreamEvent::payload_len).sum();
        self.metrics.record_fetch(fetched, bytes);
        {
            let mut core = self.core.lock();
            if !core.running {
                return Ok(());
            }
            if let Some(last) = events.last() {
                run.cursor.event_id = Some(last.event_id.clone());
            }
            core.buffer.push_open(events);
            core.cursor = Some(run.cursor.clone());
            self.publish_occupancy(&core);
        }
        if fetched > 0 {
            debug!(
                "[{}] fetched {} events, cursor {}",
                self.label(),
                fetched,
                run.cursor
            );
            self.events_available.notify_waiters();
        }

        if fetched == 0 {
            if let Some(target) = &run.stop_target {
                if run.cursor.time_partition >= target.time_partition {
                    info!("[{}] stop target {} reached, draining", self.label(), target);
                    self.stop_when_drained().await;
                    return Ok(());
                }
            }
        }
        if fetched >= budget {
            return Ok(());
        }

        let was_live = walker.is_live();
        let previous = run.cursor.time_partition.clone();
        let step = walker
            .after_short_page(
                self.source.as_ref(),
                &mut run.cursor,
                fetched == 0,
                TimePartition::now(),
            )
            .await
            .map_err(source_failure)?;
        if run.cursor.time_partition != previous {
            debug!(
                "[{}] moving from partition {} to {}",
                self.label(),
                previous,
                run.cursor.time_partition
            );
            let mut core = self.core.lock();
            if core.running {
                core.cursor = Some(run.cursor.clone());
            }
        }
        match step {
            WalkStep::WaitLive => {
                if !was_live {
                    info!("[{}] caught up at {}, waiting for new events", self.label(), run.cursor);
                    self.set_health(HealthStatus::Ready, Some("live".to_string()));
                }
                self.notifier.wait(&run.stream, run.cancel.clone()).await;
            }
            WalkStep::Pace => {
                tokio::select! {
                    _ = sleep(LIVE_PACING) => {}
                    _ = run.cancel.cancelled() => {}
                }
            }
            WalkStep::Advanced if was_live => self.set_health(HealthStatus::Ready, None),
            WalkStep::Advanced | WalkStep::Continue => {}
        }
        Ok(())
    }

    /// Fetch budget once backpressure allows, `None` when the run ended.
    async fn wait_for_budget(&self) -> Option<usize> {
        let mut paused = false;
        loop {
            let notified = self.below_threshold.notified();
            {
                let mut core = self.core.lock();
                if !core.running {
                    return None;
                }
                if let Some(budget) = core.buffer.fetch_budget() {
                    if paused {
                        debug!("[{}] fetch resumed with budget {}", self.label(), budget);
                    }
                    return Some(budget);
                }
            }
            if !paused {
                debug!("[{}] buffer full, fetch paused", self.label());
                paused = true;
            }
            notified.await;
        }
    }

    async fn stop_when_drained(&self) {
        loop {
            let notified = self.drained.notified();
            {
                let mut core = self.core.lock();
                if !core.running {
                    return;
                }
                if core.buffer.is_empty() {
                    core.running = false;
                    core.cancel.cancel();
                    break;
                }
            }
            notified.await;
        }
        self.wake_all();
    }

    fn stop(&self) {
        let was_active = {
            let mut core = self.core.lock();
            let was_active = !core.halted();
            core.running = false;
            core.restarting = false;
            core.restart_to = None;
            core.buffer.clear();
            core.cancel.cancel();
            self.publish_occupancy(&core);
            was_active
        };
        self.wake_all();
        if was_active {
            info!("[{}] stop requested", self.label());
        }
    }

    fn restart(&self, cursor: Cursor, stop_at: Option<Option<DateTime<Utc>>>) -> EngineResult<()> {
        {
            let mut core = self.core.lock();
            if !core.loop_alive {
                return Err(EngineError::NotRunning);
            }
            info!("[{}] restart requested at {}", self.label(), cursor);
            core.running = false;
            core.restarting = true;
            core.restart_to = Some(RestartRequest { cursor, stop_at });
            core.buffer.clear();
            core.cancel.cancel();
            self.publish_occupancy(&core);
        }
        // reservers stay parked: the next run refills the buffer
        self.below_threshold.notify_waiters();
        self.drained.notify_waiters();
        Ok(())
    }

    async fn reserve(self: &Arc<Self>, max: usize) -> Vec<ReservedEvent> {
        if max == 0 {
            return Vec::new();
        }
        loop {
            let notified = self.events_available.notified();
            {
                let mut core = self.core.lock();
                if core.halted() {
                    return Vec::new();
                }
                let delivery_id = Uuid::new_v4().to_string();
                let reserved = core.buffer.reserve(max, &delivery_id);
                if !reserved.is_empty() {
                    self.publish_occupancy(&core);
                    self.arm_redelivery(delivery_id);
                    return reserved;
                }
            }
            notified.await;
        }
    }

    fn arm_redelivery(self: &Arc<Self>, delivery_id: String) {
        let shared = Arc::downgrade(self);
        let timeout = self.config.buffer.acknowledge_timeout();
        tokio::spawn(async move {
            sleep(timeout).await;
            if let Some(shared) = shared.upgrade() {
                shared.redeliver(&delivery_id).await;
            }
        });
    }

    async fn redeliver(&self, delivery_id: &str) {
        let (reopened, exhausted, ticket) = {
            let mut core = self.core.lock();
            let Expiry {
                reopened,
                exhausted,
            } = core
                .buffer
                .expire(delivery_id, self.config.buffer.redelivery_limit());
            if reopened > 0 {
                self.publish_occupancy(&core);
            }
            let ticket = self.after_removal(&core, &exhausted);
            (reopened, exhausted.removed, ticket)
        };
        if reopened > 0 {
            debug!(
                "[{}] delivery {} timed out, reopened {} events",
                self.label(),
                delivery_id,
                reopened
            );
            self.metrics.inc_redelivered(reopened);
            self.events_available.notify_waiters();
        }
        if !exhausted.is_empty() {
            warn!(
                "[{}] {} events exhausted their redeliveries",
                self.label(),
                exhausted.len()
            );
            self.metrics.inc_exhausted(exhausted.len());
            self.report_failed(exhausted);
        }
        written(ticket).await;
    }

    async fn acknowledge(&self, ids: &[String]) -> usize {
        let (removed, ticket) = self.remove(ids);
        self.metrics.inc_acknowledged(removed.len());
        written(ticket).await;
        removed.len()
    }

    async fn fail(&self, ids: &[String]) -> usize {
        let (removed, ticket) = self.remove(ids);
        let count = removed.len();
        if count > 0 {
            info!("[{}] {} events failed", self.label(), count);
            self.metrics.inc_failed(count);
            self.report_failed(removed);
        }
        written(ticket).await;
        count
    }

    fn remove(&self, ids: &[String]) -> (Vec<StreamEvent>, Option<CheckpointTicket>) {
        let mut core = self.core.lock();
        let removal = core.buffer.remove(ids);
        let ticket = self.after_removal(&core, &removal);
        (removal.removed, ticket)
    }

    /// Wakes the fetch loop as needed and queues the checkpoint a removal
    /// allows. Runs under the core lock.
    fn after_removal(&self, core: &PumpCore, removal: &Removal) -> Option<CheckpointTicket> {
        if removal.removed.is_empty() {
            return None;
        }
        self.publish_occupancy(core);
        if core.buffer.below_threshold() {
            self.below_threshold.notify_waiters();
        }
        if core.buffer.is_empty() {
            self.drained.notify_waiters();
        }
        let cursor = match (&removal.drained_at, self.config.checkpoint) {
            (Some(cursor), _) => cursor,
            (None, CheckpointMode::SettledPrefix) => removal.settled_to.as_ref()?,
            (None, CheckpointMode::OnDrain) => return None,
        };
        core.checkpoints.as_ref()?.submit(cursor.clone())
    }

    /// Hands removed events to the failed handler without waiting for it.
    fn report_failed(&self, events: Vec<StreamEvent>) {
        let Some(handler) = self.failed.clone() else {
            warn!(
                "[{}] no failed handler configured, dropping {} events",
                self.label(),
                events.len()
            );
            return;
        };
        let label = self.config.label.clone();
        let count = events.len();
        let delivery = tokio::spawn(async move { handler.on_failed(events).await });
        tokio::spawn(async move {
            match delivery.await {
                Ok(Ok(())) => debug!("[{}] reported {} failed events", label, count),
                Ok(Err(err)) => warn!("[{}] failed handler error: {}", label, err),
                Err(err) => warn!("[{}] failed handler panicked: {}", label, err),
            }
        });
    }

    async fn process(self: Arc<Self>, handler: Arc<dyn EventHandler>) {
        let batch_size = self.config.processor.concurrency;
        loop {
            let batch = self.reserve(batch_size).await;
            if batch.is_empty() {
                let mut core = self.core.lock();
                if core.halted() {
                    core.processor_alive = false;
                    break;
                }
                continue;
            }
            let ids: Vec<String> = batch.iter().map(|r| r.event.event_id.clone()).collect();
            let events: Vec<StreamEvent> = batch.into_iter().map(|r| r.event).collect();
            let handler = handler.clone();
            match tokio::spawn(async move { handler.handle(&events).await }).await {
                Ok(Ok(())) => {
                    self.acknowledge(&ids).await;
                }
                Ok(Err(err)) => error!(
                    "[{}] handler failed on {} events: {}",
                    self.label(),
                    ids.len(),
                    err
                ),
                Err(err) => error!("[{}] handler panicked: {}", self.label(), err),
            }
        }
        debug!("[{}] processor loop exited", self.label());
    }
}
