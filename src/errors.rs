// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Input
//!
//! This module provides the error taxonomy for every broker-facing operation of
//! the input: connection and channel establishment, topology declaration,
//! subscription, acknowledgement, and the decode/forward step. Whether an error
//! is retried, logged, or swallowed is decided by the caller; the variants only
//! say which operation failed.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect `{0}`")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel `{0}`")]
    ChannelError(String),

    /// The operation needs a live channel but none is open
    #[error("not connected")]
    NotConnected,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error subscribing a consumer to a queue
    #[error("failure to declare consumer on queue `{0}`")]
    ConsumerDeclarationError(String),

    /// Error cancelling a consumer
    #[error("failure to cancel consumer `{0}`")]
    CancelConsumerError(String),

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error acknowledging a message
    #[error("failure to ack message `{0}`")]
    AckMessageError(u64),

    /// Error decoding a message payload
    #[error("failure to decode payload `{0}`")]
    DecodeError(String),

    /// The downstream event sink no longer accepts events
    #[error("event sink closed")]
    SinkClosedError,

    /// Invalid or unreadable configuration
    #[error("invalid configuration `{0}`")]
    ConfigError(String),

    /// The operation was abandoned because a stop was requested
    #[error("stop requested")]
    Stopped,
}
