// Copyright (c) James Kassemi, SC, US. All rights reserved.

use async_trait::async_trait;
use core_types::{BoxError, StreamEvent};

/// Receives events removed without an acknowledgement: explicit failures and
/// events that ran out of redeliveries.
#[async_trait]
pub trait FailedHandler: Send + Sync + 'static {
    async fn on_failed(&self, events: Vec<StreamEvent>) -> Result<(), BoxError>;
}

/// Work done by the processor loop for each reserved batch.
///
/// Returning an error leaves the batch reserved; the redelivery timeout hands
/// it out again.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, events: &[StreamEvent]) -> Result<(), BoxError>;
}
