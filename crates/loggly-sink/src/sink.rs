// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sink lifecycle: ingestion, flushing and bounded shutdown.
//!
//! ```text
//!   Running ──(Completed / Failed)──► Flushing ──► Disposed
//!      │                                              ▲
//!      └──────────────────(dispose)───────────────────┘
//! ```
//!
//! `Disposed` is terminal: pushes are ignored, flushes resolve immediately and
//! the shared cancellation token stops any in-flight or future request.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buffer::{BufferedPublisher, BufferedPublisherHandle, Publish};
use crate::config::SinkConfig;
use crate::delivery::BulkPublisher;
use crate::diagnostics::{DiagnosticSink, TracingDiagnostics};
use crate::entry::LogEntry;
use crate::error::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Running,
    Flushing,
    Disposed,
}

/// End-of-stream notifications from the producer.
#[derive(Debug)]
pub enum TerminalSignal {
    Completed,
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

/// Buffers log entries and ships them to a Loggly bulk endpoint.
///
/// Must be created inside a tokio runtime, otherwise construction fails with
/// [`SinkError::RuntimeUnavailable`]. Publishing runs on a background task
/// while [`LogglySink::push`] only touches the in-memory buffer.
#[derive(Debug)]
pub struct LogglySink {
    state: Mutex<SinkState>,
    publisher: BufferedPublisherHandle<LogEntry>,
    cancel_token: CancellationToken,
    on_completed_timeout: Option<Duration>,
}

impl LogglySink {
    /// Creates a sink reporting internal faults through `tracing`.
    pub fn new(config: SinkConfig) -> Result<Self, SinkError> {
        Self::with_diagnostics(config, Arc::new(TracingDiagnostics))
    }

    pub fn with_diagnostics(
        config: SinkConfig,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, SinkError> {
        config.validate()?;
        let cancel_token = CancellationToken::new();
        let publisher = BulkPublisher::new(&config, cancel_token.clone(), diagnostics)?;
        Self::start(&config, Arc::new(publisher), cancel_token)
    }

    /// Creates a sink delivering batches through a custom publisher.
    pub fn with_publisher(
        config: SinkConfig,
        publisher: Arc<dyn Publish<LogEntry>>,
    ) -> Result<Self, SinkError> {
        config.validate()?;
        Self::start(&config, publisher, CancellationToken::new())
    }

    pub(crate) fn start(
        config: &SinkConfig,
        publisher: Arc<dyn Publish<LogEntry>>,
        cancel_token: CancellationToken,
    ) -> Result<Self, SinkError> {
        if Handle::try_current().is_err() {
            return Err(SinkError::RuntimeUnavailable);
        }

        let id = format!("LogglySink ({})", config.instance_name);
        let publisher = BufferedPublisher::start(
            &id,
            publisher,
            config.buffering_interval,
            config.buffering_count,
            config.max_buffer_size,
            &cancel_token,
        );
        debug!("LOGGLY | {id} started");

        Ok(LogglySink {
            state: Mutex::new(SinkState::Running),
            publisher,
            cancel_token,
            on_completed_timeout: config.on_completed_timeout,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> SinkState {
        *self.lock_state()
    }

    /// Buffers an entry without blocking. `None` is ignored.
    ///
    /// Returns whether the entry was buffered; it is dropped once the sink is
    /// disposed or the buffer is full.
    pub fn push(&self, entry: impl Into<Option<LogEntry>>) -> bool {
        let Some(entry) = entry.into() else {
            return false;
        };
        if self.state() == SinkState::Disposed {
            return false;
        }
        self.publisher.try_post(entry)
    }

    /// Publishes everything buffered now. Resolves immediately once disposed.
    pub fn flush(&self) -> impl Future<Output = Result<(), SinkError>> + Send + 'static {
        let pending = match self.state() {
            SinkState::Disposed => None,
            SinkState::Running | SinkState::Flushing => Some(self.publisher.flush()),
        };

        async move {
            match pending {
                Some(flush) => flush.await,
                None => Ok(()),
            }
        }
    }

    /// The producer finished: flush within the completion timeout, then dispose.
    pub async fn on_completed(&self) -> Result<(), SinkError> {
        self.terminate(TerminalSignal::Completed).await
    }

    /// The producer failed: flush within the completion timeout, then dispose.
    pub async fn on_error(
        &self,
        error: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Result<(), SinkError> {
        self.terminate(TerminalSignal::Failed(error.into())).await
    }

    /// Runs the bounded flush and disposes the sink.
    ///
    /// A flush that times out or fails with [`SinkError::FlushFailed`] is not
    /// an error for the caller. Any other flush error is returned after the
    /// sink has been disposed.
    pub async fn terminate(&self, signal: TerminalSignal) -> Result<(), SinkError> {
        {
            let mut state = self.lock_state();
            if *state != SinkState::Running {
                return Ok(());
            }
            *state = SinkState::Flushing;
        }

        if let TerminalSignal::Failed(error) = &signal {
            debug!("LOGGLY | Event stream failed, flushing before shutdown: {error}");
        }

        let result = self.flush_bounded().await;
        self.dispose();
        result
    }

    async fn flush_bounded(&self) -> Result<(), SinkError> {
        let flush = self.publisher.flush();
        let result = match self.on_completed_timeout {
            Some(limit) => {
                if let Ok(result) = tokio::time::timeout(limit, flush).await {
                    result
                } else {
                    warn!(
                        "LOGGLY | Flush did not complete within {} ms, buffered entries are dropped",
                        limit.as_millis()
                    );
                    return Ok(());
                }
            }
            None => flush.await,
        };

        match result {
            Err(e) if e.is_flush_failed() => {
                debug!("LOGGLY | Ignoring failed flush during shutdown: {e}");
                Ok(())
            }
            other => other,
        }
    }

    /// Cancels in-flight requests and stops the publisher. Idempotent.
    pub fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), SinkState::Disposed);
        if previous == SinkState::Disposed {
            return;
        }

        self.cancel_token.cancel();
        self.publisher.dispose();
        debug!("LOGGLY | Sink disposed");
    }
}

impl Drop for LogglySink {
    fn drop(&mut self) {
        // Only the token is touched here; cancelling twice is a no-op.
        self.cancel_token.cancel();
    }
}
