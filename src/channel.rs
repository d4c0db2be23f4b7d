// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module implements [`AmqpTransport`] on top of lapin. It owns the one
//! connection/channel pair of an input, and it is the only place where lapin
//! types are seen: deliveries and header values are converted to their
//! transport-neutral counterparts here.

use crate::{
    delivery::{Envelope, HeaderValue, InboundDelivery, MessageProperties},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
    transport::{AmqpTransport, ConsumerEvent, DeliveryStream},
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicQosOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    protocol::basic::AMQPProperties,
    types::{AMQPValue, ByteArray, DecimalValue, FieldArray, FieldTable, LongString, ShortString},
    Channel, Connection, ConnectionProperties,
};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{debug, error, warn};

/// Reply code sent when the input closes its channel and connection.
const REPLY_SUCCESS: u16 = 200;

type Session = (Arc<Connection>, Arc<Channel>);

/// lapin-backed transport holding at most one live connection and channel.
pub struct AmqpChannel {
    uri: String,
    connection_name: String,
    session: Mutex<Option<Session>>,
}

impl AmqpChannel {
    /// Creates an unconnected transport for the given broker URI.
    pub fn new(uri: &str, connection_name: &str) -> AmqpChannel {
        AmqpChannel {
            uri: uri.to_owned(),
            connection_name: connection_name.to_owned(),
            session: Mutex::new(None),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn channel(&self) -> Result<Arc<Channel>, AmqpError> {
        self.session()
            .as_ref()
            .map(|(_, channel)| channel.clone())
            .ok_or(AmqpError::NotConnected)
    }

    async fn close_session((conn, channel): Session) -> Result<(), AmqpError> {
        if channel.status().connected() {
            channel
                .close(REPLY_SUCCESS, "input stopped")
                .await
                .map_err(|err| AmqpError::ChannelError(err.to_string()))?;
        }

        if conn.status().connected() {
            conn.close(REPLY_SUCCESS, "input stopped")
                .await
                .map_err(|err| AmqpError::ConnectionError(err.to_string()))?;
        }

        Ok(())
    }
}

#[async_trait]
impl AmqpTransport for AmqpChannel {
    async fn connect(&self) -> Result<(), AmqpError> {
        let previous = self.session().take();
        if let Some(previous) = previous {
            if let Err(err) = Self::close_session(previous).await {
                debug!(error = err.to_string(), "failure to close previous connection");
            }
        }

        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(self.connection_name.clone()));

        let conn = match Connection::connect(&self.uri, options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }?;

        conn.on_error(|err| {
            warn!(error = err.to_string(), "amqp connection shut down");
        });
        debug!("amqp connected");

        debug!("creating amqp channel...");
        let channel = match conn.create_channel().await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }?;
        debug!("channel created");

        *self.session() = Some((Arc::new(conn), Arc::new(channel)));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session()
            .as_ref()
            .is_some_and(|(conn, channel)| conn.status().connected() && channel.status().connected())
    }

    fn is_blocked(&self) -> bool {
        self.session()
            .as_ref()
            .is_some_and(|(conn, _)| conn.status().blocked())
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<String, AmqpError> {
        let channel = self.channel()?;

        match channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.auto_delete,
                    nowait: false,
                },
                field_table(&def.arguments),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), queue = def.name.as_str(), "error to declare the queue");
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
            Ok(queue) => Ok(queue.name().as_str().to_owned()),
        }
    }

    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let channel = self.channel()?;

        match channel
            .exchange_declare(
                &def.name,
                (&def.kind).into(),
                ExchangeDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = def.name.as_str(), "error to declare the exchange");
                Err(AmqpError::DeclareExchangeError(def.name.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn bind_queue(&self, queue: &str, binding: &QueueBinding) -> Result<(), AmqpError> {
        let channel = self.channel()?;

        match channel
            .queue_bind(
                queue,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    queue.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), AmqpError> {
        self.channel()?
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|err| AmqpError::QoSDeclarationError(err.to_string()))
    }

    async fn subscribe(
        &self,
        queue: &str,
        consumer_tag: &str,
        manual_ack: bool,
    ) -> Result<DeliveryStream, AmqpError> {
        let channel = self.channel()?;

        let consumer = match channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: !manual_ack,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::ConsumerDeclarationError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        let tag = consumer_tag.to_owned();

        // lapin ends the consumer stream both on basic.cancel from the broker and
        // when the channel dies; a channel that is still open tells them apart.
        // On close or connection failure lapin moves the channel out of
        // Connected before it signals its consumers (and a connection failure
        // yields an error item first), while basic.cancel only deregisters the
        // consumer and leaves the channel state alone.
        Ok(stream::unfold(Some((consumer, channel)), move |state| {
            let tag = tag.clone();
            async move {
                let (mut consumer, channel) = state?;
                match consumer.next().await {
                    Some(Ok(delivery)) => Some((
                        ConsumerEvent::Delivery(inbound_delivery(&delivery, &tag)),
                        Some((consumer, channel)),
                    )),
                    Some(Err(err)) => Some((
                        ConsumerEvent::Failed(AmqpError::ConsumerError(err.to_string())),
                        None,
                    )),
                    None if channel.status().connected() => Some((ConsumerEvent::Cancelled, None)),
                    None => None,
                }
            }
        })
        .boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.channel()?
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "failure to ack msg");
                AmqpError::AckMessageError(delivery_tag)
            })
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        self.channel()?
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|_| AmqpError::CancelConsumerError(consumer_tag.to_owned()))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let session = self.session().take();
        match session {
            Some(session) => Self::close_session(session).await,
            None => Ok(()),
        }
    }
}

/// Converts a lapin delivery received by the consumer with the given tag.
pub(crate) fn inbound_delivery(delivery: &Delivery, consumer_tag: &str) -> InboundDelivery {
    InboundDelivery {
        data: delivery.data.clone(),
        envelope: Envelope {
            delivery_tag: delivery.delivery_tag,
            routing_key: delivery.routing_key.as_str().to_owned(),
            exchange: delivery.exchange.as_str().to_owned(),
            redelivered: delivery.redelivered,
            consumer_tag: consumer_tag.to_owned(),
        },
        properties: message_properties(&delivery.properties),
        headers: headers(&delivery.properties),
    }
}

fn short(value: &Option<ShortString>) -> Option<String> {
    value.as_ref().map(|s| s.as_str().to_owned())
}

pub(crate) fn message_properties(props: &AMQPProperties) -> MessageProperties {
    MessageProperties {
        app_id: short(props.app_id()),
        cluster_id: short(props.cluster_id()),
        content_encoding: short(props.content_encoding()),
        content_type: short(props.content_type()),
        correlation_id: short(props.correlation_id()),
        delivery_mode: *props.delivery_mode(),
        expiration: short(props.expiration()),
        message_id: short(props.message_id()),
        priority: *props.priority(),
        reply_to: short(props.reply_to()),
        timestamp: *props.timestamp(),
        kind: short(props.kind()),
        user_id: short(props.user_id()),
    }
}

pub(crate) fn headers(props: &AMQPProperties) -> Option<BTreeMap<String, HeaderValue>> {
    props.headers().as_ref().map(|table| {
        table
            .inner()
            .iter()
            .map(|(k, v)| (k.as_str().to_owned(), header_value(v)))
            .collect()
    })
}

/// Strips lapin wrapper types from a field value.
pub(crate) fn header_value(value: &AMQPValue) -> HeaderValue {
    match value {
        AMQPValue::Boolean(b) => HeaderValue::Bool(*b),
        AMQPValue::ShortShortInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::ShortShortUInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::ShortInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::ShortUInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::LongInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::LongUInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::LongLongInt(v) => HeaderValue::Int(*v),
        AMQPValue::Float(v) => HeaderValue::Float(f64::from(*v)),
        AMQPValue::Double(v) => HeaderValue::Float(*v),
        AMQPValue::DecimalValue(d) => HeaderValue::Decimal {
            scale: d.scale,
            value: d.value,
        },
        AMQPValue::ShortString(s) => HeaderValue::Text(s.as_str().to_owned()),
        AMQPValue::LongString(s) => {
            HeaderValue::Text(String::from_utf8_lossy(s.as_bytes()).into_owned())
        }
        AMQPValue::FieldArray(items) => {
            HeaderValue::List(items.as_slice().iter().map(header_value).collect())
        }
        AMQPValue::Timestamp(t) => HeaderValue::Timestamp(*t),
        AMQPValue::FieldTable(table) => HeaderValue::Table(
            table
                .inner()
                .iter()
                .map(|(k, v)| (k.as_str().to_owned(), header_value(v)))
                .collect(),
        ),
        AMQPValue::ByteArray(bytes) => HeaderValue::Bytes(bytes.as_slice().to_vec()),
        AMQPValue::Void => HeaderValue::Void,
    }
}

/// Builds a lapin field value, used for queue declaration arguments.
pub(crate) fn amqp_value(value: &HeaderValue) -> AMQPValue {
    match value {
        HeaderValue::Void => AMQPValue::Void,
        HeaderValue::Bool(b) => AMQPValue::Boolean(*b),
        HeaderValue::Int(i) => AMQPValue::LongLongInt(*i),
        HeaderValue::UInt(u) => AMQPValue::LongLongInt(i64::try_from(*u).unwrap_or(i64::MAX)),
        HeaderValue::Float(f) => AMQPValue::Double(*f),
        HeaderValue::Decimal { scale, value } => AMQPValue::DecimalValue(DecimalValue {
            scale: *scale,
            value: *value,
        }),
        HeaderValue::Text(s) => AMQPValue::LongString(LongString::from(s.as_str())),
        HeaderValue::Bytes(b) => AMQPValue::ByteArray(ByteArray::from(b.clone())),
        HeaderValue::Timestamp(t) => AMQPValue::Timestamp(*t),
        HeaderValue::List(items) => {
            AMQPValue::FieldArray(FieldArray::from(items.iter().map(amqp_value).collect::<Vec<_>>()))
        }
        HeaderValue::Table(table) => AMQPValue::FieldTable(field_table(table)),
    }
}

pub(crate) fn field_table(values: &BTreeMap<String, HeaderValue>) -> FieldTable {
    FieldTable::from(
        values
            .iter()
            .map(|(k, v)| (ShortString::from(k.clone()), amqp_value(v)))
            .collect::<BTreeMap<ShortString, AMQPValue>>(),
    )
}
