// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Input
//!
//! Wires the pieces of an input together from one [`InputConfig`]:
//!
//! - [`RabbitMQInput::register`] connects and installs the topology, retrying
//!   until it succeeds or the input is stopped
//! - [`RabbitMQInput::run`] drives the consumer loop until the input is stopped
//! - [`RabbitMQInput::stop`] may be called from anywhere, any number of times
//!
//! ```rust,ignore
//! let (tx, mut rx) = tokio::sync::mpsc::channel(1024);
//! let input = Arc::new(RabbitMQInput::from_config(InputConfig::load(None)?, Arc::new(tx))?);
//! tokio::spawn({
//!     let input = input.clone();
//!     async move { input.run().await }
//! });
//! while let Some(event) = rx.recv().await { /* ... */ }
//! input.stop().await;
//! ```

use crate::{
    channel::AmqpChannel,
    codec::Decoder,
    configs::InputConfig,
    connection::ConnectionManager,
    consumer::MessageConsumer,
    dispatcher::{ConsumerState, RabbitMQDispatcher},
    errors::AmqpError,
    shutdown::ShutdownCoordinator,
    sink::EventSink,
    topology::AmqpTopology,
    transport::AmqpTransport,
};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub struct RabbitMQInput<T: AmqpTransport> {
    manager: Arc<ConnectionManager<T>>,
    topology: Arc<AmqpTopology<T>>,
    consumer: Arc<MessageConsumer<T>>,
    shutdown: Arc<ShutdownCoordinator<T>>,
    state: Arc<watch::Sender<ConsumerState>>,
    queue: Mutex<Option<String>>,
    cfg: InputConfig,
}

impl RabbitMQInput<AmqpChannel> {
    /// Builds an input talking to the configured broker through lapin, using
    /// the configured codec.
    pub fn from_config(
        cfg: InputConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<RabbitMQInput<AmqpChannel>, AmqpError> {
        let transport = Arc::new(AmqpChannel::new(&cfg.amqp_uri(), &cfg.connection_name));
        let decoder: Arc<dyn Decoder> = Arc::from(cfg.codec.decoder());
        RabbitMQInput::new(cfg, transport, decoder, sink)
    }
}

impl<T: AmqpTransport> RabbitMQInput<T> {
    pub fn new(
        cfg: InputConfig,
        transport: Arc<T>,
        decoder: Arc<dyn Decoder>,
        sink: Arc<dyn EventSink>,
    ) -> Result<RabbitMQInput<T>, AmqpError> {
        cfg.validate()?;

        let manager = Arc::new(ConnectionManager::new(
            transport.clone(),
            cfg.connect_retry_interval(),
        ));

        let mut topology =
            AmqpTopology::new(transport.clone(), cfg.queue_definition()).prefetch(cfg.prefetch_count);
        if let Some(def) = cfg.exchange_definition() {
            topology = topology.exchange(def);
        }
        if let Some(binding) = cfg.queue_binding() {
            topology = topology.queue_binding(binding);
        }

        let consumer = Arc::new(MessageConsumer::new(
            transport.clone(),
            decoder,
            sink,
            cfg.decoration(),
            cfg.ack,
        ));

        let shutdown = Arc::new(ShutdownCoordinator::new(
            transport,
            manager.clone(),
            CancellationToken::new(),
        ));

        let (state, _) = watch::channel(ConsumerState::Idle);

        Ok(RabbitMQInput {
            manager,
            topology: Arc::new(topology),
            consumer,
            shutdown,
            state: Arc::new(state),
            queue: Mutex::new(None),
            cfg,
        })
    }

    /// Connects, declares the queue, binds it and sets the prefetch, retrying
    /// the whole sequence until it succeeds. Fails only with
    /// [`AmqpError::Stopped`].
    pub async fn register(&self) -> Result<(), AmqpError> {
        let queue = self
            .manager
            .register(&self.topology, self.shutdown.token())
            .await?;
        *self.lock_queue() = Some(queue);
        Ok(())
    }

    /// Consumes until the input is stopped, registering first if needed.
    /// Returns `Ok` once stopped.
    pub async fn run(&self) -> Result<(), AmqpError> {
        if self.lock_queue().is_none() {
            match self.register().await {
                Ok(()) => {}
                Err(AmqpError::Stopped) => {
                    self.state.send_replace(ConsumerState::Stopped);
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
        let queue = self.lock_queue().clone().unwrap_or_default();

        RabbitMQDispatcher::new(
            self.manager.clone(),
            self.topology.clone(),
            self.consumer.clone(),
            self.shutdown.clone(),
            self.state.clone(),
            self.cfg.subscription_retry_interval(),
        )
        .consume_blocking(queue)
        .await;

        Ok(())
    }

    /// Stops the input: wakes the consumer loop, cancels the active consumer
    /// and closes the connection. Idempotent, and safe before any connection.
    pub async fn stop(&self) {
        self.shutdown.stop().await;
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    /// Whether the broker has blocked the connection for flow control.
    pub fn is_blocked(&self) -> bool {
        self.manager.transport().is_blocked()
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_stopping()
    }

    /// Name of the declared queue once registered.
    pub fn queue_name(&self) -> Option<String> {
        self.lock_queue().clone()
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// The stop signal shared by every blocking step of this input.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.token().clone()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
