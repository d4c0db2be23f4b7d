// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Management for RabbitMQ
//!
//! This module provides the queue descriptor declared by the input at setup
//! time and the binding that attaches it to an exchange.

use crate::delivery::HeaderValue;
use std::collections::BTreeMap;

/// Routing key used when none is configured.
pub const DEFAULT_ROUTING_KEY: &str = "logstash";

/// Definition of a RabbitMQ queue with its declaration parameters.
///
/// An empty name asks the broker to assign one; the assigned name is returned
/// by the declaration and used for the binding and the subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) auto_delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) passive: bool,
    pub(crate) arguments: BTreeMap<String, HeaderValue>,
}

impl QueueDefinition {
    /// Creates a non-durable, non-exclusive queue definition with the given name.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..QueueDefinition::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the queue to be deleted when its last consumer goes away.
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    /// Makes the queue exclusive to the declaring connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Only asserts that the queue exists; the broker state is left untouched
    /// and the declaration fails if the queue is missing.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Sets the broker-specific declaration arguments, e.g. `x-max-length`.
    pub fn arguments(mut self, arguments: BTreeMap<String, HeaderValue>) -> Self {
        self.arguments = arguments;
        self
    }
}

/// Configuration for binding the queue to an exchange.
///
/// Fanout exchanges ignore the routing key and direct exchanges take it
/// literally; checking wildcards against the exchange type is left to whoever
/// writes the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a binding to the given exchange with the default routing key.
    pub fn new(exchange: &str) -> QueueBinding {
        QueueBinding {
            exchange_name: exchange.to_owned(),
            routing_key: DEFAULT_ROUTING_KEY.to_owned(),
        }
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn key(&self) -> &str {
        &self.routing_key
    }

    /// Sets the routing key for the binding.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }
}
