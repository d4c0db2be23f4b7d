// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Event Sinks
//!
//! The handoff point between the input and whatever processes events next.
//! Several inputs may share one sink; each input pushes its events in delivery
//! order.

use crate::{errors::AmqpError, event::Event};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Accepts events produced by the input.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Forwards one event. Bounded sinks apply backpressure by awaiting.
    async fn push(&self, event: Event) -> Result<(), AmqpError>;
}

#[async_trait]
impl EventSink for mpsc::Sender<Event> {
    async fn push(&self, event: Event) -> Result<(), AmqpError> {
        self.send(event)
            .await
            .map_err(|_| AmqpError::SinkClosedError)
    }
}

#[async_trait]
impl EventSink for mpsc::UnboundedSender<Event> {
    async fn push(&self, event: Event) -> Result<(), AmqpError> {
        self.send(event).map_err(|_| AmqpError::SinkClosedError)
    }
}
