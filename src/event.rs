// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Events
//!
//! An [`Event`] is the structured record the input forwards downstream: the
//! fields produced by the decoder plus the broker metadata of the delivery it
//! came from. [`Decoration`] holds the process-wide rules applied to every
//! event before it leaves the input.

use crate::metadata::Metadata;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field holding the event tags.
pub const TAGS_FIELD: &str = "tags";
/// Field holding the event type.
pub const TYPE_FIELD: &str = "type";
/// Field holding the raw payload when a decoder has nothing better.
pub const MESSAGE_FIELD: &str = "message";

/// A decoded, decorated record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Event {
    #[serde(flatten)]
    fields: Map<String, Value>,
    #[serde(rename = "@metadata", skip_serializing_if = "Option::is_none")]
    metadata: Option<Metadata>,
}

impl Event {
    pub fn new() -> Event {
        Event::default()
    }

    pub fn from_fields(fields: Map<String, Value>) -> Event {
        Event {
            fields,
            metadata: None,
        }
    }

    /// Builds an event carrying only a `message` field.
    pub fn from_message(message: impl Into<String>) -> Event {
        let mut event = Event::new();
        event.set(MESSAGE_FIELD, Value::String(message.into()));
        event
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_owned(), value);
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Adds a tag unless the event already carries it.
    pub fn tag(&mut self, tag: &str) {
        let entry = self
            .fields
            .entry(TAGS_FIELD)
            .or_insert_with(|| Value::Array(Vec::new()));

        if !entry.is_array() {
            let previous = entry.take();
            *entry = Value::Array(vec![previous]);
        }

        if let Value::Array(tags) = entry {
            if !tags.iter().any(|t| t.as_str() == Some(tag)) {
                tags.push(Value::String(tag.to_owned()));
            }
        }
    }

    pub fn tags(&self) -> Vec<&str> {
        match self.fields.get(TAGS_FIELD) {
            Some(Value::Array(tags)) => tags.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(tag)) => vec![tag.as_str()],
            _ => vec![],
        }
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn set_metadata(&mut self, metadata: Metadata) {
        self.metadata = Some(metadata);
    }

    /// Headers attached from the delivery, if any were attached.
    pub fn headers(&self) -> Option<&Map<String, Value>> {
        self.metadata.as_ref().map(|m| &m.headers)
    }

    /// Properties attached from the delivery, if any were attached.
    pub fn properties(&self) -> Option<&Map<String, Value>> {
        self.metadata.as_ref().map(|m| &m.properties)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Process-wide rules applied to every produced event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoration {
    pub kind: Option<String>,
    pub tags: Vec<String>,
    pub add_field: BTreeMap<String, String>,
}

impl Decoration {
    /// Applies the rules. An event type already set by the decoder wins.
    pub fn apply(&self, event: &mut Event) {
        if let Some(kind) = &self.kind {
            if !event.contains(TYPE_FIELD) {
                event.set(TYPE_FIELD, Value::String(kind.clone()));
            }
        }

        for (field, value) in &self.add_field {
            event.set(field, Value::String(value.clone()));
        }

        for tag in &self.tags {
            event.tag(tag);
        }
    }
}
