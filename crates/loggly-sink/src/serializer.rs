// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Newline-delimited JSON encoding of log entry batches.
//!
//! Every entry becomes one JSON object followed by `\n`. Keys are written in a
//! fixed order, and the sink's instance name is injected into every object.
//! String values are HTML-escaped (`<`, `>`, `&`, `'` and `"` become `\uXXXX`
//! sequences) so payloads can be embedded in web views without further
//! processing.
//!
//! ```text
//! {"EventId":1,"EventName":"Failure",...,"Payload":{"message":"fail!!!"}}\n
//! {"EventId":2,"EventName":"Startup",...,"Payload":{}}\n
//! ```

use std::io;

use serde::ser::{SerializeMap, Serializer as _};
use serde_json::ser::{CharEscape, Formatter};
use serde_json::Serializer;

use crate::entry::LogEntry;
use crate::error::SinkError;

const PAYLOAD_KEY: &str = "Payload";
const FLATTENED_PAYLOAD_PREFIX: &str = "Payload_";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Serializes `entries` as newline-delimited JSON.
///
/// Returns `Ok(None)` when there is no batch to serialize.
pub fn serialize(
    entries: Option<&[LogEntry]>,
    instance_name: &str,
    flatten_payload: bool,
) -> Result<Option<String>, SinkError> {
    EntrySerializer::new(instance_name, flatten_payload).serialize(entries)
}

/// Converts log entries into the bulk endpoint's wire format.
#[derive(Debug, Clone)]
pub struct EntrySerializer {
    instance_name: String,
    flatten_payload: bool,
}

impl EntrySerializer {
    #[must_use]
    pub fn new(instance_name: impl Into<String>, flatten_payload: bool) -> Self {
        EntrySerializer {
            instance_name: instance_name.into(),
            flatten_payload,
        }
    }

    pub fn serialize(&self, entries: Option<&[LogEntry]>) -> Result<Option<String>, SinkError> {
        let Some(entries) = entries else {
            return Ok(None);
        };

        // The writer only lives for this call, whether or not every entry is written.
        let mut buffer = Vec::with_capacity(entries.len() * 512);
        for entry in entries {
            self.write_entry(&mut buffer, entry)?;
            buffer.push(b'\n');
        }

        String::from_utf8(buffer)
            .map(Some)
            .map_err(|e| SinkError::Serialization(serde::ser::Error::custom(e)))
    }

    fn write_entry(&self, buffer: &mut Vec<u8>, entry: &LogEntry) -> Result<(), SinkError> {
        let mut serializer = Serializer::with_formatter(buffer, HtmlSafeFormatter);
        let mut map = serializer.serialize_map(None)?;

        map.serialize_entry("EventId", &entry.event_id)?;
        map.serialize_entry("EventName", &entry.event_name)?;
        map.serialize_entry(
            "Timestamp",
            &entry.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        )?;
        // Keyword flags are reinterpreted as signed on the wire.
        #[allow(clippy::cast_possible_wrap)]
        let keywords = entry.keywords as i64;
        map.serialize_entry("Keywords", &keywords)?;
        map.serialize_entry("ProviderId", &entry.provider_id.to_string())?;
        map.serialize_entry("ProviderName", &entry.provider_name)?;
        map.serialize_entry("InstanceName", &self.instance_name)?;
        map.serialize_entry("Level", &entry.level.as_i32())?;
        map.serialize_entry("Message", &entry.message)?;
        map.serialize_entry("Opcode", &entry.opcode)?;
        map.serialize_entry("Task", &entry.task)?;
        map.serialize_entry("Version", &entry.version)?;
        map.serialize_entry("ProcessId", &entry.process_id)?;
        map.serialize_entry("ThreadId", &entry.thread_id)?;
        map.serialize_entry("ActivityId", &entry.activity_id.to_string())?;
        map.serialize_entry(
            "RelatedActivityId",
            &entry.related_activity_id.map(|id| id.to_string()),
        )?;

        if self.flatten_payload {
            // No guard against colliding with a fixed key: the later key wins for readers.
            for (name, value) in &entry.payload {
                map.serialize_entry(&format!("{FLATTENED_PAYLOAD_PREFIX}{name}"), value)?;
            }
        } else {
            map.serialize_entry(PAYLOAD_KEY, &NestedPayload(&entry.payload))?;
        }

        map.end()?;
        Ok(())
    }
}

/// Writes payload pairs as a JSON object, preserving their order.
struct NestedPayload<'a>(&'a [(String, serde_json::Value)]);

impl serde::Serialize for NestedPayload<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(name, value)| (name, value)))
    }
}

/// Compact JSON formatter that also escapes HTML-significant characters.
#[derive(Debug, Clone, Copy, Default)]
struct HtmlSafeFormatter;

impl Formatter for HtmlSafeFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let bytes = fragment.as_bytes();
        let mut start = 0;
        for (i, byte) in bytes.iter().enumerate() {
            let escape: &[u8] = match byte {
                b'<' => b"\\u003c",
                b'>' => b"\\u003e",
                b'&' => b"\\u0026",
                b'\'' => b"\\u0027",
                _ => continue,
            };
            writer.write_all(&bytes[start..i])?;
            writer.write_all(escape)?;
            start = i + 1;
        }
        writer.write_all(&bytes[start..])
    }

    fn write_char_escape<W>(&mut self, writer: &mut W, char_escape: CharEscape) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

        let escape: &[u8] = match char_escape {
            CharEscape::Quote => b"\\u0022",
            CharEscape::ReverseSolidus => b"\\\\",
            CharEscape::Solidus => b"\\/",
            CharEscape::Backspace => b"\\b",
            CharEscape::FormFeed => b"\\f",
            CharEscape::LineFeed => b"\\n",
            CharEscape::CarriageReturn => b"\\r",
            CharEscape::Tab => b"\\t",
            CharEscape::AsciiControl(byte) => {
                let escaped = [
                    b'\\',
                    b'u',
                    b'0',
                    b'0',
                    HEX_DIGITS[usize::from(byte >> 4)],
                    HEX_DIGITS[usize::from(byte & 0xF)],
                ];
                return writer.write_all(&escaped);
            }
        };
        writer.write_all(escape)
    }
}
