// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Scripted broker used by the unit tests: configures a `MockAmqpTransport`
//! and records every broker call in order.

use crate::{
    errors::AmqpError,
    event::Event,
    sink::EventSink,
    transport::{ConsumerEvent, DeliveryStream, MockAmqpTransport},
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Connect,
    DeclareQueue(String),
    DeclareExchange(String),
    Bind(String, String, String),
    Prefetch(u16),
    Subscribe(String, bool),
    Forward(Option<String>),
    Ack(u64),
    Cancel(String),
    Close,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub(crate) fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub(crate) fn snapshot(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|c| pred(c)).count()
    }
}

/// What one subscription yields.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Events, then the subscription stays open.
    Hold(Vec<ConsumerEvent>),
    /// Events, then the stream ends while the connection stays up.
    End(Vec<ConsumerEvent>),
    /// Events, then the connection drops and the stream ends.
    Drop(Vec<ConsumerEvent>),
}

#[derive(Debug, Default)]
pub(crate) struct FakeBroker {
    pub connect_failures: usize,
    pub declare_failures: usize,
    pub bind_failures: usize,
    pub subscribe_failures: usize,
    pub cancel_fails: bool,
    pub close_fails: bool,
    /// One entry per successful subscription; later ones hold with no events.
    pub subscriptions: Vec<Script>,
}

fn fail_first(counter: &AtomicUsize, failures: usize) -> bool {
    counter.fetch_add(1, Ordering::SeqCst) < failures
}

impl FakeBroker {
    pub(crate) fn build(self) -> (MockAmqpTransport, CallLog, Arc<AtomicBool>) {
        let calls = CallLog::default();
        let connected = Arc::new(AtomicBool::new(false));
        let mut mock = MockAmqpTransport::new();

        let (log, up, attempts) = (calls.clone(), connected.clone(), AtomicUsize::new(0));
        let failures = self.connect_failures;
        mock.expect_connect().returning(move || {
            log.push(Call::Connect);
            if fail_first(&attempts, failures) {
                return Err(AmqpError::ConnectionError("connection refused".to_owned()));
            }
            up.store(true, Ordering::SeqCst);
            Ok(())
        });

        let up = connected.clone();
        mock.expect_is_connected()
            .returning(move || up.load(Ordering::SeqCst));
        mock.expect_is_blocked().returning(|| false);

        let (log, attempts) = (calls.clone(), AtomicUsize::new(0));
        let failures = self.declare_failures;
        mock.expect_declare_queue().returning(move |def| {
            log.push(Call::DeclareQueue(def.name().to_owned()));
            if fail_first(&attempts, failures) {
                return Err(AmqpError::DeclareQueueError(def.name().to_owned()));
            }
            if def.name().is_empty() {
                Ok("amq.gen-JzTY20BRgKO".to_owned())
            } else {
                Ok(def.name().to_owned())
            }
        });

        let log = calls.clone();
        mock.expect_declare_exchange().returning(move |def| {
            log.push(Call::DeclareExchange(def.name().to_owned()));
            Ok(())
        });

        let (log, attempts) = (calls.clone(), AtomicUsize::new(0));
        let failures = self.bind_failures;
        mock.expect_bind_queue().returning(move |queue, binding| {
            log.push(Call::Bind(
                queue.to_owned(),
                binding.exchange_name().to_owned(),
                binding.key().to_owned(),
            ));
            if fail_first(&attempts, failures) {
                return Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name().to_owned(),
                    queue.to_owned(),
                ));
            }
            Ok(())
        });

        let log = calls.clone();
        mock.expect_set_prefetch().returning(move |count| {
            log.push(Call::Prefetch(count));
            Ok(())
        });

        let (log, up, attempts) = (calls.clone(), connected.clone(), AtomicUsize::new(0));
        let failures = self.subscribe_failures;
        let scripts = Mutex::new(VecDeque::from(self.subscriptions));
        mock.expect_subscribe().returning(move |queue, _tag, manual_ack| {
            log.push(Call::Subscribe(queue.to_owned(), manual_ack));
            if fail_first(&attempts, failures) {
                return Err(AmqpError::ConsumerDeclarationError(queue.to_owned()));
            }
            let script = scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Hold(vec![]));
            Ok(script_stream(script, up.clone()))
        });

        let log = calls.clone();
        mock.expect_ack().returning(move |tag| {
            log.push(Call::Ack(tag));
            Ok(())
        });

        let log = calls.clone();
        let cancel_fails = self.cancel_fails;
        mock.expect_cancel().returning(move |tag| {
            log.push(Call::Cancel(tag.to_owned()));
            if cancel_fails {
                return Err(AmqpError::CancelConsumerError(tag.to_owned()));
            }
            Ok(())
        });

        let (log, up) = (calls.clone(), connected.clone());
        let close_fails = self.close_fails;
        mock.expect_close().returning(move || {
            log.push(Call::Close);
            up.store(false, Ordering::SeqCst);
            if close_fails {
                return Err(AmqpError::ConnectionError("already closed".to_owned()));
            }
            Ok(())
        });

        (mock, calls, connected)
    }
}

fn script_stream(script: Script, connected: Arc<AtomicBool>) -> DeliveryStream {
    match script {
        Script::Hold(events) => stream::iter(events).chain(stream::pending()).boxed(),
        Script::End(events) => stream::iter(events).boxed(),
        Script::Drop(events) => stream::iter(events)
            .chain(
                stream::once(async move {
                    connected.store(false, Ordering::SeqCst);
                })
                .filter_map(|_| async { None::<ConsumerEvent> }),
            )
            .boxed(),
    }
}

/// Sink that records forwards in the call log before handing events on.
pub(crate) struct RecordingSink {
    calls: CallLog,
    tx: mpsc::UnboundedSender<Event>,
}

impl RecordingSink {
    pub(crate) fn new(calls: CallLog) -> (RecordingSink, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (RecordingSink { calls, tx }, rx)
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn push(&self, event: Event) -> Result<(), AmqpError> {
        self.calls.push(Call::Forward(
            event
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_owned),
        ));
        self.tx.push(event).await
    }
}
