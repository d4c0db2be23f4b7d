// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Shutdown Coordination
//!
//! A single [`CancellationToken`] is the stop signal of an input. Every
//! blocking step (connect backoff, setup backoff, subscription wait, retry
//! wait) selects on it, so a stop is honored while waiting rather than at the
//! next loop boundary. [`ShutdownCoordinator::stop`] cancels the token, then
//! tears down the active consumer and the connection.

use crate::{connection::ConnectionManager, transport::AmqpTransport};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Sleeps for `interval` unless the token is cancelled first.
///
/// Returns `false` when the wait ended because of a stop request.
pub async fn wait_for_retry(token: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(interval) => !token.is_cancelled(),
    }
}

pub struct ShutdownCoordinator<T: AmqpTransport> {
    transport: Arc<T>,
    manager: Arc<ConnectionManager<T>>,
    token: CancellationToken,
    consumer_tag: Mutex<Option<String>>,
    // held for the whole stop sequence so a concurrent caller returns only
    // once the teardown is complete
    stopped: tokio::sync::Mutex<bool>,
}

impl<T: AmqpTransport> ShutdownCoordinator<T> {
    pub fn new(
        transport: Arc<T>,
        manager: Arc<ConnectionManager<T>>,
        token: CancellationToken,
    ) -> ShutdownCoordinator<T> {
        ShutdownCoordinator {
            transport,
            manager,
            token,
            consumer_tag: Mutex::new(None),
            stopped: tokio::sync::Mutex::new(false),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether a stop was requested. Stays true once set.
    pub fn is_stopping(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signals the consumer loop, cancels the active consumer if there is one,
    /// then closes the channel and connection. Later calls are no-ops. Never
    /// fails: teardown errors are logged.
    pub async fn stop(&self) {
        self.token.cancel();

        let mut stopped = self.stopped.lock().await;
        if *stopped {
            debug!("input already stopped");
            return;
        }

        info!("stopping rabbitmq input");
        self.shutdown_consumer().await;
        self.manager.close().await;

        *stopped = true;
    }

    /// Best-effort cancel of the tracked consumer.
    pub async fn shutdown_consumer(&self) {
        let tag = self.take_consumer();
        let Some(tag) = tag else {
            return;
        };

        match self.transport.cancel(&tag).await {
            Ok(()) => debug!(consumer_tag = tag.as_str(), "consumer cancelled"),
            Err(err) => debug!(
                error = err.to_string(),
                consumer_tag = tag.as_str(),
                "failure to cancel consumer, ignoring"
            ),
        }
    }

    pub(crate) fn track_consumer(&self, tag: &str) {
        *self.lock_tag() = Some(tag.to_owned());
    }

    /// Forgets the consumer without talking to the broker.
    pub(crate) fn take_consumer(&self) -> Option<String> {
        self.lock_tag().take()
    }

    fn lock_tag(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.consumer_tag
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
