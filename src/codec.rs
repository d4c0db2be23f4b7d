// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Payload Decoders
//!
//! A decoder turns the raw bytes of one delivery into zero or more events.
//! Decoders own their failure policy: the JSON decoder never fails, it tags a
//! malformed payload instead, while custom decoders may return an error that
//! the consumer logs before acknowledging the delivery anyway.

use crate::{
    errors::AmqpError,
    event::{Event, MESSAGE_FIELD},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Tag added to events whose payload was not valid JSON.
pub const JSON_PARSE_FAILURE_TAG: &str = "_jsonparsefailure";

/// Decodes a delivery payload into events.
#[cfg_attr(test, mockall::automock)]
pub trait Decoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<Vec<Event>, AmqpError>;
}

/// The codecs selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Json,
    Plain,
}

impl CodecKind {
    pub fn decoder(&self) -> Box<dyn Decoder> {
        match self {
            CodecKind::Json => Box::new(JsonDecoder),
            CodecKind::Plain => Box::new(PlainDecoder),
        }
    }
}

/// JSON documents: an object is one event, an array of objects is one event each.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, data: &[u8]) -> Result<Vec<Event>, AmqpError> {
        let parsed = match serde_json::from_slice::<Value>(data) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = err.to_string(), "failure to parse json payload");
                return Ok(vec![parse_failure(data)]);
            }
        };

        match parsed {
            Value::Object(fields) => Ok(vec![Event::from_fields(fields)]),
            Value::Array(items) if items.iter().all(Value::is_object) => Ok(items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(fields) => Some(Event::from_fields(fields)),
                    _ => None,
                })
                .collect()),
            _ => {
                warn!("json payload is not an object or an array of objects");
                Ok(vec![parse_failure(data)])
            }
        }
    }
}

fn parse_failure(data: &[u8]) -> Event {
    let mut event = Event::from_message(String::from_utf8_lossy(data));
    event.tag(JSON_PARSE_FAILURE_TAG);
    event
}

/// Whole payload as the `message` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainDecoder;

impl Decoder for PlainDecoder {
    fn decode(&self, data: &[u8]) -> Result<Vec<Event>, AmqpError> {
        let mut event = Event::new();
        event.set(
            MESSAGE_FIELD,
            Value::String(String::from_utf8_lossy(data).into_owned()),
        );
        Ok(vec![event])
    }
}
