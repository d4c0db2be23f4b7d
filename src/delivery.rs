// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Inbound Deliveries
//!
//! Transport-neutral representation of one message handed to the input by the
//! broker. The lapin adapter in [`crate::channel`] converts broker-native types
//! (length-prefixed strings, field arrays, field tables) into [`HeaderValue`]s
//! before a delivery reaches the metadata extractor, so nothing past this
//! boundary needs to know about lapin.

use std::collections::BTreeMap;

/// A header value with broker wrapper types already stripped.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Void,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Fixed-point decimal: `value / 10^scale`.
    Decimal { scale: u8, value: u32 },
    Text(String),
    Bytes(Vec<u8>),
    /// Seconds since the unix epoch.
    Timestamp(u64),
    List(Vec<HeaderValue>),
    Table(BTreeMap<String, HeaderValue>),
}

impl HeaderValue {
    /// Returns the text content of a `Text` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

/// Configuration values (queue arguments) arrive as JSON.
impl From<&serde_json::Value> for HeaderValue {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => HeaderValue::Void,
            Value::Bool(b) => HeaderValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    HeaderValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    HeaderValue::UInt(u)
                } else {
                    HeaderValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => HeaderValue::Text(s.clone()),
            Value::Array(items) => HeaderValue::List(items.iter().map(HeaderValue::from).collect()),
            Value::Object(map) => HeaderValue::Table(
                map.iter()
                    .map(|(k, v)| (k.clone(), HeaderValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Delivery-level routing information. Assigned by the broker, not the publisher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub exchange: String,
    pub redelivered: bool,
    pub consumer_tag: String,
}

/// The basic-class message properties. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageProperties {
    pub app_id: Option<String>,
    pub cluster_id: Option<String>,
    pub content_encoding: Option<String>,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub delivery_mode: Option<u8>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub priority: Option<u8>,
    pub reply_to: Option<String>,
    /// Seconds since the unix epoch, the wire resolution.
    pub timestamp: Option<u64>,
    pub kind: Option<String>,
    pub user_id: Option<String>,
}

/// One message received from the broker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundDelivery {
    pub data: Vec<u8>,
    pub envelope: Envelope,
    pub properties: MessageProperties,
    /// `None` when the message carried no header table at all.
    pub headers: Option<BTreeMap<String, HeaderValue>>,
}

impl InboundDelivery {
    pub fn new(delivery_tag: u64, data: impl Into<Vec<u8>>) -> InboundDelivery {
        InboundDelivery {
            data: data.into(),
            envelope: Envelope {
                delivery_tag,
                ..Envelope::default()
            },
            properties: MessageProperties::default(),
            headers: None,
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.envelope.delivery_tag
    }

    pub fn with_envelope(mut self, envelope: Envelope) -> Self {
        self.envelope = envelope;
        self
    }

    pub fn with_properties(mut self, properties: MessageProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_header(mut self, key: &str, value: HeaderValue) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_owned(), value);
        self
    }
}
