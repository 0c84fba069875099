// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::SinkError;
use crate::http::REQUEST_TIMEOUT;
use reqwest::Url;
use std::env;
use std::time::Duration;

/// Default interval between two scheduled publish attempts.
pub const DEFAULT_BUFFERING_INTERVAL: Duration = Duration::from_secs(30);
/// Default number of buffered entries that triggers an early publish.
pub const DEFAULT_BUFFERING_COUNT: usize = 1_000;
/// Default number of entries kept in memory before new entries are dropped.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 30_000;

/// Configuration for a [`crate::sink::LogglySink`]
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    /// Name of the instance originating the entries, written to every record
    pub instance_name: String,
    /// Base address of the bulk endpoint (e.g. `https://logs-01.loggly.com`)
    pub connection_string: String,
    /// Customer token that is part of the bulk URL
    pub customer_token: String,
    /// Tag used in the bulk URL, defaults to the instance name
    pub tag: Option<String>,
    /// Promote payload fields to top-level `Payload_<name>` keys
    pub flatten_payload: bool,
    /// Interval between scheduled publish attempts
    pub buffering_interval: Duration,
    /// Buffered entry count that triggers a publish before the interval elapses
    pub buffering_count: usize,
    /// Entries buffered beyond this count are dropped
    pub max_buffer_size: usize,
    /// Bound on the flush performed by terminal signals, `None` waits forever
    pub on_completed_timeout: Option<Duration>,
    /// Bound on a single bulk request, `None` waits forever
    pub request_timeout: Option<Duration>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            instance_name: String::new(),
            connection_string: "https://logs-01.loggly.com".to_string(),
            customer_token: String::new(),
            tag: None,
            flatten_payload: false,
            buffering_interval: DEFAULT_BUFFERING_INTERVAL,
            buffering_count: DEFAULT_BUFFERING_COUNT,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            on_completed_timeout: None,
            request_timeout: Some(REQUEST_TIMEOUT),
        }
    }
}

impl SinkConfig {
    /// Creates a configuration with default buffering settings.
    #[must_use]
    pub fn new(
        instance_name: impl Into<String>,
        connection_string: impl Into<String>,
        customer_token: impl Into<String>,
    ) -> Self {
        Self {
            instance_name: instance_name.into(),
            connection_string: connection_string.into(),
            customer_token: customer_token.into(),
            ..Self::default()
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, SinkError> {
        let defaults = Self::default();

        let instance_name = env::var("LOGGLY_INSTANCE_NAME").unwrap_or_default();
        let connection_string =
            env::var("LOGGLY_CONNECTION_STRING").unwrap_or(defaults.connection_string);
        let customer_token = env::var("LOGGLY_CUSTOMER_TOKEN").unwrap_or_default();
        let tag = env::var("LOGGLY_TAG").ok();
        let flatten_payload = env::var("LOGGLY_FLATTEN_PAYLOAD")
            .is_ok_and(|val| val.eq_ignore_ascii_case("true"));
        let buffering_interval = env::var("LOGGLY_BUFFERING_INTERVAL_SECS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .map_or(defaults.buffering_interval, Duration::from_secs);
        let buffering_count = env::var("LOGGLY_BUFFERING_COUNT")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(defaults.buffering_count);
        let max_buffer_size = env::var("LOGGLY_MAX_BUFFER_SIZE")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(defaults.max_buffer_size);
        let on_completed_timeout = env::var("LOGGLY_FLUSH_TIMEOUT_SECS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .map(Duration::from_secs);
        // 0 disables the request timeout.
        let request_timeout = env::var("LOGGLY_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .map_or(defaults.request_timeout, |secs| {
                (secs > 0).then_some(Duration::from_secs(secs))
            });

        let config = Self {
            instance_name,
            connection_string,
            customer_token,
            tag,
            flatten_payload,
            buffering_interval,
            buffering_count,
            max_buffer_size,
            on_completed_timeout,
            request_timeout,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SinkError> {
        if self.instance_name.trim().is_empty() {
            return Err(SinkError::InvalidConfig(
                "instance name cannot be empty".to_string(),
            ));
        }

        if self.connection_string.trim().is_empty() {
            return Err(SinkError::InvalidConfig(
                "connection string cannot be empty".to_string(),
            ));
        }

        if self.customer_token.trim().is_empty() {
            return Err(SinkError::InvalidConfig(
                "customer token cannot be empty".to_string(),
            ));
        }

        if self.buffering_interval.is_zero() {
            return Err(SinkError::InvalidConfig(
                "buffering interval must be greater than 0".to_string(),
            ));
        }

        if self.max_buffer_size == 0 {
            return Err(SinkError::InvalidConfig(
                "max buffer size must be greater than 0".to_string(),
            ));
        }

        // A count of 0 disables the count trigger.
        if self.buffering_count > self.max_buffer_size {
            return Err(SinkError::InvalidConfig(format!(
                "buffering count cannot exceed the max buffer size ({})",
                self.max_buffer_size
            )));
        }

        self.bulk_url().map(|_| ())
    }

    /// Tag used in the bulk URL. A missing or blank tag falls back to the instance name.
    #[must_use]
    pub fn tag(&self) -> &str {
        match &self.tag {
            Some(tag) if !tag.trim().is_empty() => tag,
            _ => &self.instance_name,
        }
    }

    /// Full address of the bulk endpoint, `{base}/bulk/{token}/tag/{tag}/`.
    ///
    /// The bulk path replaces any path already present in the connection
    /// string. Token and tag are percent-encoded as single path segments.
    pub fn bulk_url(&self) -> Result<Url, SinkError> {
        let mut url = Url::parse(&self.connection_string).map_err(|e| {
            SinkError::InvalidConfig(format!(
                "invalid connection string '{}': {e}",
                self.connection_string
            ))
        })?;
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|()| {
                SinkError::InvalidConfig(format!(
                    "connection string '{}' cannot be used as a base address",
                    self.connection_string
                ))
            })?
            .clear()
            .extend(["bulk", self.customer_token.as_str(), "tag", self.tag(), ""]);
        Ok(url)
    }
}
