// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration for RabbitMQ
//!
//! Extracts the trace context a publisher propagated through the message
//! headers and opens a consumer span for the processing of each delivery.

use crate::delivery::{HeaderValue, InboundDelivery};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::Extractor,
    trace::{SpanKind, Tracer},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap};

/// Reads trace context entries out of normalized delivery headers.
pub(crate) struct RabbitMQTracePropagator<'a> {
    headers: &'a BTreeMap<String, HeaderValue>,
}

impl<'a> RabbitMQTracePropagator<'a> {
    pub(crate) fn new(headers: &'a BTreeMap<String, HeaderValue>) -> Self {
        Self { headers }
    }
}

impl Extractor for RabbitMQTracePropagator<'_> {
    /// Only text headers can carry propagation fields.
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(HeaderValue::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(String::as_str).collect()
    }
}

/// Creates a consumer span for a delivery, parented on the propagated context.
pub fn new_span(delivery: &InboundDelivery, tracer: &BoxedTracer, name: &str) -> (Context, BoxedSpan) {
    let empty = BTreeMap::new();
    let headers = delivery.headers.as_ref().unwrap_or(&empty);

    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&RabbitMQTracePropagator::new(headers))
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}
