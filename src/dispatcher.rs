// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Consumer Loop
//!
//! The state machine that keeps one subscription alive until the input is
//! stopped:
//!
//! ```text
//! Idle -> Subscribing -> Consuming -> (Error | Cancelled) -> Subscribing ...
//!                                                       \-> Stopped
//! ```
//!
//! A subscription is only attempted on a live connection. When it ends or
//! cannot be created the loop waits the retry interval (waking early on stop)
//! and tries again, forever. If the connection itself is gone by then, the
//! register sequence is re-run first since lapin does not resubscribe on its
//! own. A server-side cancel is routed into the same stop path as an external
//! stop.

use crate::{
    connection::ConnectionManager,
    consumer::MessageConsumer,
    errors::AmqpError,
    shutdown::{wait_for_retry, ShutdownCoordinator},
    topology::AmqpTopology,
    transport::{AmqpTransport, ConsumerEvent},
};
use futures_util::StreamExt;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Lifecycle state of the consumer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Subscribing,
    Consuming,
    Error,
    Cancelled,
    Stopped,
}

/// How one subscription attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SubscriptionEnd {
    /// Not subscribed, subscription failed, or the stream ended.
    Failed,
    /// The broker cancelled the consumer.
    Cancelled,
    /// A stop was requested while consuming.
    Stopped,
}

pub struct RabbitMQDispatcher<T: AmqpTransport> {
    transport: Arc<T>,
    manager: Arc<ConnectionManager<T>>,
    topology: Arc<AmqpTopology<T>>,
    consumer: Arc<MessageConsumer<T>>,
    shutdown: Arc<ShutdownCoordinator<T>>,
    state: Arc<watch::Sender<ConsumerState>>,
    retry_interval: Duration,
}

impl<T: AmqpTransport> RabbitMQDispatcher<T> {
    pub fn new(
        manager: Arc<ConnectionManager<T>>,
        topology: Arc<AmqpTopology<T>>,
        consumer: Arc<MessageConsumer<T>>,
        shutdown: Arc<ShutdownCoordinator<T>>,
        state: Arc<watch::Sender<ConsumerState>>,
        retry_interval: Duration,
    ) -> RabbitMQDispatcher<T> {
        RabbitMQDispatcher {
            transport: manager.transport().clone(),
            manager,
            topology,
            consumer,
            shutdown,
            state,
            retry_interval,
        }
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }

    /// Runs the loop on the already registered queue until stopped.
    pub async fn consume_blocking(&self, queue: String) {
        let token = self.shutdown.token().clone();
        let mut queue = queue;

        while !token.is_cancelled() {
            self.set_state(ConsumerState::Subscribing);

            match self.subscribe_once(&queue).await {
                SubscriptionEnd::Stopped => break,
                SubscriptionEnd::Cancelled => {
                    info!(queue = queue.as_str(), "received basic.cancel from broker, shutting down");
                    self.set_state(ConsumerState::Cancelled);
                    // the consumer is already gone on the broker side
                    self.shutdown.take_consumer();
                    self.shutdown.stop().await;
                    break;
                }
                SubscriptionEnd::Failed => {
                    self.set_state(ConsumerState::Error);
                    self.shutdown.shutdown_consumer().await;
                }
            }

            if !wait_for_retry(&token, self.retry_interval).await {
                break;
            }

            if !self.transport.is_connected() {
                warn!(queue = queue.as_str(), "connection lost, setting up again");
                match self.manager.register(&self.topology, &token).await {
                    Ok(name) => queue = name,
                    Err(AmqpError::Stopped) => break,
                    Err(err) => error!(error = err.to_string(), "unexpected setup error"),
                }
            }
        }

        self.set_state(ConsumerState::Stopped);
        info!(queue = queue.as_str(), "consumer loop stopped");
    }

    /// One pass through `Subscribing` and `Consuming`.
    pub(crate) async fn subscribe_once(&self, queue: &str) -> SubscriptionEnd {
        let token = self.shutdown.token();
        let retry_interval_secs = self.retry_interval.as_secs_f64();

        if !self.transport.is_connected() {
            warn!(
                queue,
                retry_interval_secs, "not connected, will retry subscribing"
            );
            return SubscriptionEnd::Failed;
        }

        let tag = format!("rabbitmq-input-{}", Uuid::new_v4());
        let mut deliveries = match self
            .transport
            .subscribe(queue, &tag, self.consumer.acks())
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    queue,
                    retry_interval_secs,
                    "could not subscribe to queue, will retry"
                );
                return SubscriptionEnd::Failed;
            }
        };

        self.shutdown.track_consumer(&tag);
        self.set_state(ConsumerState::Consuming);
        info!(queue, consumer_tag = tag.as_str(), "consuming");

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => return SubscriptionEnd::Stopped,

                event = deliveries.next() => match event {
                    Some(ConsumerEvent::Delivery(delivery)) => {
                        match self.consumer.consume(&delivery, token).await {
                            Ok(_) => {}
                            Err(AmqpError::Stopped) => return SubscriptionEnd::Stopped,
                            Err(err) => error!(error = err.to_string(), "error consume msg"),
                        }
                    }
                    Some(ConsumerEvent::Cancelled) => return SubscriptionEnd::Cancelled,
                    Some(ConsumerEvent::Failed(err)) => {
                        warn!(
                            error = err.to_string(),
                            queue,
                            retry_interval_secs,
                            "subscription failed, will retry"
                        );
                        return SubscriptionEnd::Failed;
                    }
                    None => {
                        warn!(queue, retry_interval_secs, "subscription ended, will retry");
                        return SubscriptionEnd::Failed;
                    }
                },
            }
        }
    }
}
