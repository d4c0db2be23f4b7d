// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Management
//!
//! Wraps the single-attempt transport primitives with the input's retry
//! policy: connecting, and the whole register sequence (connect, declare,
//! bind, prefetch), are retried after a backoff until they succeed or a stop
//! is requested. Broker unavailability is never fatal.

use crate::{
    errors::AmqpError, shutdown::wait_for_retry, topology::AmqpTopology, transport::AmqpTransport,
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct ConnectionManager<T: AmqpTransport> {
    transport: Arc<T>,
    retry_interval: Duration,
}

impl<T: AmqpTransport> ConnectionManager<T> {
    pub fn new(transport: Arc<T>, retry_interval: Duration) -> ConnectionManager<T> {
        ConnectionManager {
            transport,
            retry_interval,
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Connects, retrying until it succeeds. Returns [`AmqpError::Stopped`]
    /// if the token is cancelled first, closing a connection that came up
    /// after the stop was requested.
    pub async fn connect(&self, token: &CancellationToken) -> Result<(), AmqpError> {
        loop {
            if token.is_cancelled() {
                return Err(AmqpError::Stopped);
            }

            match self.transport.connect().await {
                Ok(()) if token.is_cancelled() => {
                    debug!("stop requested while connecting, closing");
                    self.close().await;
                    return Err(AmqpError::Stopped);
                }
                Ok(()) => {
                    info!("connected to rabbitmq");
                    return Ok(());
                }
                Err(err) => warn!(
                    error = err.to_string(),
                    retry_interval_secs = self.retry_interval.as_secs_f64(),
                    "failure to connect to rabbitmq, will retry"
                ),
            }

            if !wait_for_retry(token, self.retry_interval).await {
                return Err(AmqpError::Stopped);
            }
        }
    }

    /// Runs connect and topology installation as one unit, retrying the unit
    /// until it succeeds. Returns the name of the declared queue.
    pub async fn register(
        &self,
        topology: &AmqpTopology<T>,
        token: &CancellationToken,
    ) -> Result<String, AmqpError> {
        loop {
            self.connect(token).await?;

            match topology.install().await {
                Ok(queue) if token.is_cancelled() => {
                    debug!(queue = queue.as_str(), "stop requested during setup, closing");
                    self.close().await;
                    return Err(AmqpError::Stopped);
                }
                Ok(queue) => {
                    info!(queue = queue.as_str(), "rabbitmq input registered");
                    return Ok(queue);
                }
                Err(err) => warn!(
                    error = err.to_string(),
                    retry_interval_secs = self.retry_interval.as_secs_f64(),
                    "error while setting up connection for rabbitmq input, will retry"
                ),
            }

            if !wait_for_retry(token, self.retry_interval).await {
                return Err(AmqpError::Stopped);
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Closes the channel and the connection. Failures are only logged.
    pub async fn close(&self) {
        match self.transport.close().await {
            Ok(()) => debug!("rabbitmq connection closed"),
            Err(err) => warn!(error = err.to_string(), "failure to close rabbitmq connection"),
        }
    }
}
