// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;
#[cfg(test)]
mod testing;

pub mod channel;
pub mod codec;
pub mod configs;
pub mod connection;
pub mod consumer;
pub mod delivery;
pub mod dispatcher;
pub mod errors;
pub mod event;
pub mod exchange;
pub mod input;
pub mod metadata;
pub mod queue;
pub mod shutdown;
pub mod sink;
pub mod topology;
pub mod transport;

pub use configs::InputConfig;
pub use dispatcher::ConsumerState;
pub use errors::AmqpError;
pub use event::Event;
pub use input::RabbitMQInput;
