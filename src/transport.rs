// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Transport
//!
//! The [`AmqpTransport`] trait is the boundary between the input and the AMQP
//! client library. Every method is a single attempt: retries, backoff and
//! cancellation are layered on top by the connection manager, the topology
//! setup and the consumer loop. [`crate::channel::AmqpChannel`] implements it
//! on top of lapin.

use crate::{
    delivery::InboundDelivery,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// What a live subscription yields.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumerEvent {
    /// A message, already converted to transport-neutral types.
    Delivery(InboundDelivery),
    /// The broker cancelled the subscription (basic.cancel), e.g. because the
    /// queue was deleted. The stream ends after this event.
    Cancelled,
    /// The subscription failed; the stream ends after this event.
    Failed(AmqpError),
}

/// Deliveries for one consumer, in broker order. The stream ending without a
/// [`ConsumerEvent::Cancelled`] means the channel or connection went away.
pub type DeliveryStream = BoxStream<'static, ConsumerEvent>;

/// Single-attempt broker primitives used by the input.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpTransport: Send + Sync {
    /// Opens the connection and its channel, replacing any previous ones.
    async fn connect(&self) -> Result<(), AmqpError>;

    /// Non-blocking liveness check of the connection and channel.
    fn is_connected(&self) -> bool;

    /// Whether the broker currently blocks publishing on this connection.
    fn is_blocked(&self) -> bool;

    /// Declares (or, when passive, asserts) the queue and returns its name,
    /// which is broker-assigned when the definition name is empty.
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<String, AmqpError>;

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    async fn bind_queue(&self, queue: &str, binding: &QueueBinding) -> Result<(), AmqpError>;

    /// Sets the channel delivery quota.
    async fn set_prefetch(&self, count: u16) -> Result<(), AmqpError>;

    /// Starts a consumer on the queue under the given tag.
    async fn subscribe(
        &self,
        queue: &str,
        consumer_tag: &str,
        manual_ack: bool,
    ) -> Result<DeliveryStream, AmqpError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    /// Cancels the consumer registered under the given tag.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError>;

    /// Closes the channel then the connection. Safe when never connected.
    async fn close(&self) -> Result<(), AmqpError>;
}
