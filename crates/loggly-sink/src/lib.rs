// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Loggly Sink
//!
//! Buffers structured log entries in memory and ships them in batches to a
//! Loggly bulk endpoint as newline-delimited JSON.
//!
//! ## Architecture
//!
//! - [`serializer`]: log entries to NDJSON with a fixed field order
//! - [`delivery`]: bulk HTTP requests and response classification
//! - [`buffer`]: in-memory buffer with interval and count triggered publishing
//! - [`sink`]: lifecycle of a sink (push, flush, completion and disposal)
//!
//! ```no_run
//! use loggly_sink::{EventLevel, LogEntry, LogglySink, SinkConfig};
//!
//! # async fn run() -> Result<(), loggly_sink::SinkError> {
//! let config = SinkConfig::new("web-01", "https://logs-01.loggly.com", "customer-token");
//! let sink = LogglySink::new(config)?;
//!
//! sink.push(LogEntry::new(1, EventLevel::Informational, "Request served"));
//! sink.on_completed().await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::module_name_repetitions)]

/// Buffering and scheduled publishing of entries
pub mod buffer;

/// Sink configuration, defaults and environment variables
pub mod config;

/// Bulk endpoint requests and response classification
pub mod delivery;

/// Reporting of faults that cannot be returned to a caller
pub mod diagnostics;

/// Log entry model
pub mod entry;

pub mod error;

/// HTTP client construction
pub mod http;

/// Tracing setup and log line format
pub mod logger;

/// NDJSON serialization of log entries
pub mod serializer;

/// Sink lifecycle
pub mod sink;

pub use config::SinkConfig;
pub use diagnostics::{DiagnosticSink, TracingDiagnostics};
pub use entry::{EventLevel, LogEntry};
pub use error::SinkError;
pub use sink::{LogglySink, SinkState, TerminalSignal};
