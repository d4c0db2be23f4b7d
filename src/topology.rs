// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! The topology of an input is one queue, optionally bound to one exchange,
//! plus the channel prefetch. [`AmqpTopology::install`] applies it in order:
//! declare the queue, declare the exchange and bind, set the prefetch. The
//! prefetch is always applied last so it is in place before any subscription.
//! Errors are returned as-is; retrying is the caller's decision.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
    transport::AmqpTransport,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Default channel prefetch.
pub const DEFAULT_PREFETCH_COUNT: u16 = 256;

pub struct AmqpTopology<T: AmqpTransport> {
    transport: Arc<T>,
    pub(crate) queue: QueueDefinition,
    pub(crate) exchange: Option<ExchangeDefinition>,
    pub(crate) binding: Option<QueueBinding>,
    pub(crate) prefetch: u16,
}

impl<T: AmqpTransport> AmqpTopology<T> {
    pub fn new(transport: Arc<T>, queue: QueueDefinition) -> AmqpTopology<T> {
        AmqpTopology {
            transport,
            queue,
            exchange: None,
            binding: None,
            prefetch: DEFAULT_PREFETCH_COUNT,
        }
    }

    /// Declares this exchange before binding.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchange = Some(def);
        self
    }

    /// Binds the queue to an exchange once it is declared.
    pub fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.binding = Some(binding);
        self
    }

    pub fn prefetch(mut self, count: u16) -> Self {
        self.prefetch = count;
        self
    }

    /// Installs the topology and returns the declared queue's name.
    pub async fn install(&self) -> Result<String, AmqpError> {
        let queue = self.declare_queue().await?;
        self.bind_exchange(&queue).await?;
        self.set_prefetch().await?;
        Ok(queue)
    }

    pub async fn declare_queue(&self) -> Result<String, AmqpError> {
        debug!("declaring queue: {}", self.queue.name);

        let name = self.transport.declare_queue(&self.queue).await?;

        debug!("queue: {} was declared", name);
        Ok(name)
    }

    /// Declares the exchange and binds the queue to it. Without a configured
    /// binding this issues no broker call at all.
    pub async fn bind_exchange(&self, queue: &str) -> Result<(), AmqpError> {
        let Some(binding) = &self.binding else {
            return Ok(());
        };

        if let Some(exch) = &self.exchange {
            debug!("declaring exchange: {}", exch.name);
            self.transport.declare_exchange(exch).await?;
        }

        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, binding.exchange_name, binding.routing_key
        );

        match self.transport.bind_queue(queue, binding).await {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(err)
            }
            _ => Ok(()),
        }
    }

    pub async fn set_prefetch(&self) -> Result<(), AmqpError> {
        debug!("setting prefetch: {}", self.prefetch);
        self.transport.set_prefetch(self.prefetch).await
    }
}
