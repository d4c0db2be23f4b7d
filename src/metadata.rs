// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Metadata Extraction
//!
//! Maps a delivery's header table and message properties into the flat
//! metadata attached to every event produced from it. Extraction is pure: the
//! delivery is only borrowed and absent properties are simply left out.
//!
//! The exchange, redeliver, routing-key and consumer-tag entries belong to the
//! envelope rather than the message properties; they are reported alongside
//! the properties anyway since that is where downstream filters look for them.
//! Envelope strings are always reported, even empty, while `redeliver` only
//! shows up when the message was redelivered.

use crate::delivery::{HeaderValue, InboundDelivery};
use serde::Serialize;
use serde_json::{Map, Number, Value};

/// Metadata attached to an event: normalized headers and present properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata {
    #[serde(rename = "rabbitmq_headers")]
    pub headers: Map<String, Value>,
    #[serde(rename = "rabbitmq_properties")]
    pub properties: Map<String, Value>,
}

type PropertyAccessor = fn(&InboundDelivery) -> Option<Value>;

/// Recognized properties in output order, keyed by their hyphenated names.
pub static MESSAGE_PROPERTIES: [(&str, PropertyAccessor); 17] = [
    ("app-id", |d| text(&d.properties.app_id)),
    ("cluster-id", |d| text(&d.properties.cluster_id)),
    ("consumer-tag", |d| Some(Value::from(d.envelope.consumer_tag.as_str()))),
    ("content-encoding", |d| text(&d.properties.content_encoding)),
    ("content-type", |d| text(&d.properties.content_type)),
    ("correlation-id", |d| text(&d.properties.correlation_id)),
    ("delivery-mode", |d| d.properties.delivery_mode.map(Value::from)),
    ("exchange", |d| Some(Value::from(d.envelope.exchange.as_str()))),
    ("expiration", |d| text(&d.properties.expiration)),
    ("message-id", |d| text(&d.properties.message_id)),
    ("priority", |d| d.properties.priority.map(Value::from)),
    ("redeliver", |d| d.envelope.redelivered.then_some(Value::Bool(true))),
    ("reply-to", |d| text(&d.properties.reply_to)),
    ("routing-key", |d| Some(Value::from(d.envelope.routing_key.as_str()))),
    // the wire format only has second resolution
    ("timestamp", |d| d.properties.timestamp.map(Value::from)),
    ("type", |d| text(&d.properties.kind)),
    ("user-id", |d| text(&d.properties.user_id)),
];

fn text(value: &Option<String>) -> Option<Value> {
    value.as_deref().map(Value::from)
}

/// Extracts headers and properties from a delivery.
pub fn extract(delivery: &InboundDelivery) -> Metadata {
    Metadata {
        headers: extract_headers(delivery),
        properties: extract_properties(delivery),
    }
}

/// Normalizes the header table. A delivery without headers yields an empty map.
pub fn extract_headers(delivery: &InboundDelivery) -> Map<String, Value> {
    match &delivery.headers {
        Some(headers) => headers
            .iter()
            .map(|(k, v)| (k.clone(), header_value(v)))
            .collect(),
        None => Map::new(),
    }
}

/// Collects every recognized property present on the delivery.
pub fn extract_properties(delivery: &InboundDelivery) -> Map<String, Value> {
    MESSAGE_PROPERTIES
        .iter()
        .filter_map(|(name, accessor)| accessor(delivery).map(|v| ((*name).to_owned(), v)))
        .collect()
}

/// Converts a header value into plain JSON, recursing into lists and tables.
pub fn header_value(value: &HeaderValue) -> Value {
    match value {
        HeaderValue::Void => Value::Null,
        HeaderValue::Bool(b) => Value::Bool(*b),
        HeaderValue::Int(i) => Value::from(*i),
        HeaderValue::UInt(u) => Value::from(*u),
        HeaderValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        HeaderValue::Decimal { scale, value } => {
            let f = f64::from(*value) / 10f64.powi(i32::from(*scale));
            Number::from_f64(f).map_or(Value::Null, Value::Number)
        }
        HeaderValue::Text(s) => Value::String(s.clone()),
        HeaderValue::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        HeaderValue::Timestamp(t) => Value::from(*t),
        HeaderValue::List(items) => Value::Array(items.iter().map(header_value).collect()),
        HeaderValue::Table(table) => Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), header_value(v)))
                .collect(),
        ),
    }
}
