// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of serialized batches to the bulk endpoint.
//!
//! Each publish call serializes the batch, POSTs it, and classifies the
//! result into a [`DeliveryOutcome`]:
//!
//! | Result                          | Outcome                  | Removed from buffer |
//! |---------------------------------|--------------------------|---------------------|
//! | 200 with `"response": "ok"`     | `Delivered`              | whole batch         |
//! | 200 with another `response`     | `Discarded` (count 0)    | none                |
//! | 400                             | `Discarded` (poison)     | whole batch         |
//! | any other status                | `Retained`               | none                |
//! | cancelled during shutdown       | `Cancelled`              | none                |
//! | transport / decode failure      | error, reported + raised | none                |
//!
//! A poison batch is dropped on purpose: one malformed entry must not keep the
//! rest of the stream stuck in the buffer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buffer::Publish;
use crate::config::SinkConfig;
use crate::diagnostics::DiagnosticSink;
use crate::entry::LogEntry;
use crate::error::SinkError;
use crate::http::get_client;
use crate::serializer::EntrySerializer;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The endpoint accepted every entry.
    Delivered(usize),
    /// `count` entries are dropped without retry because of `reason`.
    Discarded { count: usize, reason: String },
    /// Transient failure, the batch stays buffered.
    Retained,
    /// Shutdown interrupted the request, the batch stays buffered.
    Cancelled,
}

impl DeliveryOutcome {
    /// Number of entries the buffer should remove.
    #[must_use]
    pub fn removed(&self) -> usize {
        match self {
            DeliveryOutcome::Delivered(count) | DeliveryOutcome::Discarded { count, .. } => {
                *count
            }
            DeliveryOutcome::Retained | DeliveryOutcome::Cancelled => 0,
        }
    }
}

/// Body returned by the bulk endpoint, e.g. `{"response":"ok"}`.
#[derive(Debug, Deserialize)]
struct BulkResponse {
    response: Option<serde_json::Value>,
}

impl BulkResponse {
    fn message(&self) -> Option<String> {
        match self.response.as_ref()? {
            serde_json::Value::String(message) => Some(message.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Extracts the `response` message from an error body, falling back to the raw text.
fn server_error_message(body: &str) -> String {
    serde_json::from_str::<BulkResponse>(body)
        .ok()
        .and_then(|parsed| parsed.message())
        .unwrap_or_else(|| body.to_string())
}

/// Publishes log entry batches to the bulk endpoint.
#[derive(Debug)]
pub struct BulkPublisher {
    url: Url,
    serializer: EntrySerializer,
    request_timeout: Option<Duration>,
    cancel_token: CancellationToken,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl BulkPublisher {
    pub fn new(
        config: &SinkConfig,
        cancel_token: CancellationToken,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, SinkError> {
        Ok(BulkPublisher {
            url: config.bulk_url()?,
            serializer: EntrySerializer::new(config.instance_name.clone(), config.flatten_payload),
            request_timeout: config.request_timeout,
            cancel_token,
            diagnostics,
        })
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Sends `batch` and classifies the result.
    ///
    /// Failures other than cancellation and classified status codes are
    /// reported to the diagnostic sink before being returned.
    pub async fn deliver(&self, batch: &[LogEntry]) -> Result<DeliveryOutcome, SinkError> {
        if self.cancel_token.is_cancelled() {
            return Ok(DeliveryOutcome::Cancelled);
        }

        let result = tokio::select! {
            biased;
            () = self.cancel_token.cancelled() => {
                debug!("LOGGLY | Delivery of {} entries cancelled", batch.len());
                return Ok(DeliveryOutcome::Cancelled);
            }
            result = self.send(batch) => result,
        };

        result.inspect_err(|e| self.diagnostics.report_fault(&format!("{e:?}")))
    }

    async fn send(&self, batch: &[LogEntry]) -> Result<DeliveryOutcome, SinkError> {
        let body = self.serializer.serialize(Some(batch))?.unwrap_or_default();

        // The client is dropped when this call returns, whatever the outcome.
        let client = get_client(self.request_timeout);
        let response = client
            .post(self.url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let text = response.text().await?;
                let parsed: BulkResponse = serde_json::from_str(&text).map_err(|_| {
                    SinkError::UnexpectedResponse {
                        status: status.as_u16(),
                        body: text.clone(),
                    }
                })?;
                match parsed.message() {
                    Some(message) if message.eq_ignore_ascii_case("ok") => {
                        debug!("LOGGLY | Delivered {} entries", batch.len());
                        Ok(DeliveryOutcome::Delivered(batch.len()))
                    }
                    other => {
                        let reason = other.unwrap_or(text);
                        warn!(
                            "LOGGLY | Bulk endpoint answered 200 without 'ok', keeping {} entries buffered: {}",
                            batch.len(),
                            reason
                        );
                        Ok(DeliveryOutcome::Discarded { count: 0, reason })
                    }
                }
            }
            StatusCode::BAD_REQUEST => {
                let discarded = batch.len();
                let text = response.text().await.unwrap_or_default();
                let reason = server_error_message(&text);
                self.diagnostics.report_fault(&format!(
                    "Discarded message:{discarded} Server error:{reason}"
                ));
                Ok(DeliveryOutcome::Discarded {
                    count: discarded,
                    reason,
                })
            }
            unexpected => {
                debug!(
                    "LOGGLY | Bulk endpoint answered {}, keeping {} entries buffered",
                    unexpected,
                    batch.len()
                );
                Ok(DeliveryOutcome::Retained)
            }
        }
    }
}

#[async_trait]
impl Publish<LogEntry> for BulkPublisher {
    async fn publish(&self, batch: &[LogEntry]) -> Result<usize, SinkError> {
        self.deliver(batch).await.map(|outcome| outcome.removed())
    }
}
