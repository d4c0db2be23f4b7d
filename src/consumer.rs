// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! Handles one delivery end to end: decode the payload, decorate every
//! produced event, attach the delivery metadata, forward the events in order
//! and finally acknowledge the delivery by its own tag.
//!
//! A delivery is acknowledged even when it produced no events, including when
//! the decoder rejected it. This favors forward progress over durability: a
//! payload that can never be decoded would otherwise be redelivered forever.

use crate::{
    codec::Decoder,
    delivery::InboundDelivery,
    errors::AmqpError,
    event::Decoration,
    metadata,
    otel,
    sink::EventSink,
    transport::AmqpTransport,
};
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use std::{borrow::Cow, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Name of the tracer used for delivery spans.
pub const TRACER_NAME: &str = "rabbitmq input";

pub struct MessageConsumer<T: AmqpTransport> {
    transport: Arc<T>,
    decoder: Arc<dyn Decoder>,
    sink: Arc<dyn EventSink>,
    decoration: Decoration,
    ack: bool,
    tracer: BoxedTracer,
}

impl<T: AmqpTransport> MessageConsumer<T> {
    pub fn new(
        transport: Arc<T>,
        decoder: Arc<dyn Decoder>,
        sink: Arc<dyn EventSink>,
        decoration: Decoration,
        ack: bool,
    ) -> MessageConsumer<T> {
        MessageConsumer {
            transport,
            decoder,
            sink,
            decoration,
            ack,
            tracer: global::tracer(TRACER_NAME),
        }
    }

    pub fn acks(&self) -> bool {
        self.ack
    }

    /// Processes one delivery and returns how many events were forwarded.
    ///
    /// A sink failure aborts the delivery before the ack so the broker
    /// redelivers it later. So does a stop requested while waiting on the
    /// sink, which then returns [`AmqpError::Stopped`].
    pub async fn consume(
        &self,
        delivery: &InboundDelivery,
        token: &CancellationToken,
    ) -> Result<usize, AmqpError> {
        let (_, mut span) = otel::new_span(delivery, &self.tracer, &delivery.envelope.routing_key);

        debug!(
            delivery_tag = delivery.delivery_tag(),
            exchange = delivery.envelope.exchange.as_str(),
            "received message"
        );

        let events = match self.decoder.decode(&delivery.data) {
            Ok(events) => events,
            Err(err) => {
                error!(
                    error = err.to_string(),
                    delivery_tag = delivery.delivery_tag(),
                    "failure to decode message"
                );
                span.record_error(&err);
                vec![]
            }
        };

        let metadata = metadata::extract(delivery);
        let forwarded = events.len();

        for mut event in events {
            self.decoration.apply(&mut event);
            event.set_metadata(metadata.clone());

            let pushed = tokio::select! {
                biased;

                _ = token.cancelled() => Err(AmqpError::Stopped),
                pushed = self.sink.push(event) => pushed,
            };

            match pushed {
                Ok(()) => {}
                Err(AmqpError::Stopped) => {
                    info!(
                        delivery_tag = delivery.delivery_tag(),
                        "stop requested while forwarding, leaving message unacked"
                    );
                    return Err(AmqpError::Stopped);
                }
                Err(err) => {
                    error!(error = err.to_string(), "failure to forward event");
                    span.record_error(&err);
                    span.set_status(Status::Error {
                        description: Cow::from("failure to forward event"),
                    });
                    return Err(err);
                }
            }
        }

        if self.ack {
            if let Err(err) = self.transport.ack(delivery.delivery_tag()).await {
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("error to ack msg"),
                });
                return Err(err);
            }
        }

        span.set_status(Status::Ok);
        Ok(forwarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{JsonDecoder, MockDecoder},
        delivery::{Envelope, HeaderValue, MessageProperties},
        event::Event,
        testing::{Call, CallLog, FakeBroker, RecordingSink},
        transport::MockAmqpTransport,
    };
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn consumer_with(
        decoder: Arc<dyn Decoder>,
        ack: bool,
    ) -> (MessageConsumer<MockAmqpTransport>, CallLog, mpsc::UnboundedReceiver<Event>) {
        let (transport, calls, _) = FakeBroker::default().build();
        let (sink, rx) = RecordingSink::new(calls.clone());
        let decoration = Decoration {
            kind: Some("rabbitmq".to_owned()),
            ..Decoration::default()
        };
        (
            MessageConsumer::new(Arc::new(transport), decoder, Arc::new(sink), decoration, ack),
            calls,
            rx,
        )
    }

    fn delivery(tag: u64, body: &str) -> InboundDelivery {
        InboundDelivery::new(tag, body.as_bytes().to_vec())
            .with_envelope(Envelope {
                delivery_tag: tag,
                routing_key: "logstash".to_owned(),
                exchange: "myexchange".to_owned(),
                redelivered: false,
                consumer_tag: "ctag".to_owned(),
            })
            .with_properties(MessageProperties {
                timestamp: Some(1_700_000_000),
                ..MessageProperties::default()
            })
            .with_header("source", HeaderValue::from("sensor"))
    }

    #[tokio::test]
    async fn forwards_decorated_event_then_acks() {
        let (consumer, calls, mut rx) = consumer_with(Arc::new(JsonDecoder), true);

        let forwarded = consumer
            .consume(&delivery(7, r#"{"message":"Foo Message"}"#), &CancellationToken::new())
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(forwarded, 1);
        assert_eq!(event.get("message"), Some(&json!("Foo Message")));
        assert_eq!(event.get("type"), Some(&json!("rabbitmq")));
        assert_eq!(event.headers().unwrap()["source"], json!("sensor"));
        assert_eq!(event.properties().unwrap()["timestamp"], json!(1_700_000_000));
        assert_eq!(
            calls.snapshot(),
            vec![Call::Forward(Some("Foo Message".to_owned())), Call::Ack(7)]
        );
    }

    #[tokio::test]
    async fn every_event_gets_the_same_metadata() {
        let (consumer, calls, mut rx) = consumer_with(Arc::new(JsonDecoder), true);

        consumer
            .consume(
                &delivery(3, r#"[{"message":"a"},{"message":"b"}]"#),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.metadata(), second.metadata());
        assert_eq!(
            calls.snapshot(),
            vec![
                Call::Forward(Some("a".to_owned())),
                Call::Forward(Some("b".to_owned())),
                Call::Ack(3),
            ]
        );
    }

    #[tokio::test]
    async fn decode_failure_is_still_acked() {
        let mut decoder = MockDecoder::new();
        decoder
            .expect_decode()
            .returning(|_| Err(AmqpError::DecodeError("bad payload".to_owned())));
        let (consumer, calls, mut rx) = consumer_with(Arc::new(decoder), true);

        let forwarded = consumer
            .consume(&delivery(11, "garbage"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(forwarded, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(calls.snapshot(), vec![Call::Ack(11)]);
    }

    #[tokio::test]
    async fn zero_events_are_acked() {
        let (consumer, calls, _rx) = consumer_with(Arc::new(JsonDecoder), true);

        let forwarded = consumer
            .consume(&delivery(12, "[]"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(forwarded, 0);
        assert_eq!(calls.snapshot(), vec![Call::Ack(12)]);
    }

    #[tokio::test]
    async fn auto_ack_mode_sends_no_ack() {
        let (consumer, calls, _rx) = consumer_with(Arc::new(JsonDecoder), false);

        consumer
            .consume(&delivery(5, r#"{"message":"x"}"#), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(calls.count(|c| matches!(c, Call::Ack(_))), 0);
    }

    #[tokio::test]
    async fn closed_sink_skips_ack() {
        let (consumer, calls, rx) = consumer_with(Arc::new(JsonDecoder), true);
        drop(rx);

        let result = consumer
            .consume(&delivery(9, r#"{"message":"x"}"#), &CancellationToken::new())
            .await;

        assert_eq!(result, Err(AmqpError::SinkClosedError));
        assert_eq!(calls.count(|c| matches!(c, Call::Ack(_))), 0);
    }

    #[tokio::test]
    async fn stop_while_sink_is_full_leaves_delivery_unacked() {
        let (transport, calls, _) = FakeBroker::default().build();
        let (tx, _rx) = mpsc::channel::<Event>(1);
        let consumer = MessageConsumer::new(
            Arc::new(transport),
            Arc::new(JsonDecoder),
            Arc::new(tx),
            Decoration::default(),
            true,
        );
        let token = CancellationToken::new();
        let stopper = tokio::spawn({
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                token.cancel();
            }
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            consumer.consume(
                &delivery(4, r#"[{"message":"a"},{"message":"b"}]"#),
                &token,
            ),
        )
        .await
        .expect("forwarding did not observe the stop");
        stopper.await.unwrap();

        assert_eq!(result, Err(AmqpError::Stopped));
        assert_eq!(calls.count(|c| matches!(c, Call::Ack(_))), 0);
    }
}
