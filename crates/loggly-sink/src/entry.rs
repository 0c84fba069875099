// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structured log entries produced by an event source.
//!
//! A [`LogEntry`] is created once by the producer, handed to the sink and never
//! mutated afterwards. The payload is an ordered list of `(name, value)` pairs
//! where the names come from the event schema and the values from the event
//! itself.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Severity of an event, ordered from most to least severe.
///
/// The discriminants are the wire values written to the `Level` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum EventLevel {
    LogAlways = 0,
    Critical = 1,
    Error = 2,
    Warning = 3,
    #[default]
    Informational = 4,
    Verbose = 5,
}

impl EventLevel {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        i32::from(self as u8)
    }
}

/// A single immutable log record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub event_id: i32,
    pub event_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Keyword flags, written to the wire as a signed 64-bit value.
    pub keywords: u64,
    pub provider_id: Uuid,
    pub provider_name: Option<String>,
    pub level: EventLevel,
    pub message: Option<String>,
    pub opcode: i32,
    pub task: i32,
    pub version: u8,
    pub process_id: i32,
    pub thread_id: i32,
    pub activity_id: Uuid,
    pub related_activity_id: Option<Uuid>,
    pub payload: Vec<(String, Value)>,
}

impl LogEntry {
    /// Creates an entry stamped with the current UTC time and an empty payload.
    #[must_use]
    pub fn new(event_id: i32, level: EventLevel, message: impl Into<String>) -> Self {
        LogEntry {
            event_id,
            event_name: None,
            timestamp: Utc::now(),
            keywords: 0,
            provider_id: Uuid::nil(),
            provider_name: None,
            level,
            message: Some(message.into()),
            opcode: 0,
            task: 0,
            version: 0,
            process_id: i32::try_from(std::process::id()).unwrap_or_default(),
            thread_id: 0,
            activity_id: Uuid::nil(),
            related_activity_id: None,
            payload: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_event_name(mut self, event_name: impl Into<String>) -> Self {
        self.event_name = Some(event_name.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_keywords(mut self, keywords: u64) -> Self {
        self.keywords = keywords;
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider_id: Uuid, provider_name: impl Into<String>) -> Self {
        self.provider_id = provider_id;
        self.provider_name = Some(provider_name.into());
        self
    }

    #[must_use]
    pub fn with_opcode(mut self, opcode: i32) -> Self {
        self.opcode = opcode;
        self
    }

    #[must_use]
    pub fn with_task(mut self, task: i32) -> Self {
        self.task = task;
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub fn with_process(mut self, process_id: i32, thread_id: i32) -> Self {
        self.process_id = process_id;
        self.thread_id = thread_id;
        self
    }

    #[must_use]
    pub fn with_activity(mut self, activity_id: Uuid, related_activity_id: Option<Uuid>) -> Self {
        self.activity_id = activity_id;
        self.related_activity_id = related_activity_id;
        self
    }

    /// Pairs schema payload names with the event's values positionally.
    ///
    /// When the two sequences differ in length the extra items of the longer
    /// one are ignored.
    #[must_use]
    pub fn with_payload<N, V>(mut self, names: N, values: V) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        V: IntoIterator<Item = Value>,
    {
        self.payload = names
            .into_iter()
            .map(Into::into)
            .zip(values)
            .collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_level_ordering_and_wire_values() {
        assert!(EventLevel::Critical < EventLevel::Error);
        assert!(EventLevel::Warning < EventLevel::Verbose);
        assert_eq!(EventLevel::LogAlways.as_i32(), 0);
        assert_eq!(EventLevel::Informational.as_i32(), 4);
        assert_eq!(EventLevel::Verbose.as_i32(), 5);
    }

    #[test]
    fn test_payload_zip_truncates_to_shorter_names() {
        let entry = LogEntry::new(1, EventLevel::Error, "failure")
            .with_payload(["message"], vec![json!("boom"), json!(42)]);

        assert_eq!(entry.payload, vec![("message".to_string(), json!("boom"))]);
    }

    #[test]
    fn test_payload_zip_truncates_to_shorter_values() {
        let entry = LogEntry::new(3, EventLevel::Informational, "page")
            .with_payload(["ID", "url", "extra"], vec![json!(7), json!("/home")]);

        assert_eq!(
            entry.payload,
            vec![
                ("ID".to_string(), json!(7)),
                ("url".to_string(), json!("/home")),
            ]
        );
    }

    #[test]
    fn test_new_defaults() {
        let entry = LogEntry::new(2, EventLevel::Informational, "Starting up.");
        assert_eq!(entry.message.as_deref(), Some("Starting up."));
        assert!(entry.event_name.is_none());
        assert!(entry.related_activity_id.is_none());
        assert!(entry.payload.is_empty());
        assert_eq!(entry.activity_id, Uuid::nil());
    }
}
