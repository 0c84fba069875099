// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffered, scheduled publishing of entries.
//!
//! Producers post entries through a [`BufferedPublisherHandle`] without ever
//! blocking on I/O. A single worker task owns the publishing side: it wakes up
//! when the buffering interval elapses, when the buffered count reaches the
//! threshold, or when a flush is requested, and hands batches to a
//! [`Publish`] implementation.
//!
//! ```text
//!   try_post ──► ┌──────────────┐   batch    ┌─────────────┐
//!                │    queue     │ ─────────► │   Publish   │
//!   flush ─────► │ (FIFO, max)  │ ◄───────── │ (HTTP etc.) │
//!                └──────────────┘  removed   └─────────────┘
//!                       ▲
//!                 worker task (interval / threshold / flush)
//! ```
//!
//! The publisher reports how many entries of a batch may be removed. Entries
//! it did not accept go back to the front of the queue and are retried on the
//! next cycle, so order within the queue is preserved. A failed publish backs
//! the worker off exponentially, capped by the buffering interval.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::error::SinkError;

/// First delay applied after a failed publish.
const MIN_BACKOFF: Duration = Duration::from_millis(100);

/// Delivers one batch and reports how many entries can leave the buffer.
#[async_trait]
pub trait Publish<T>: Send + Sync {
    async fn publish(&self, batch: &[T]) -> Result<usize, SinkError>;
}

#[derive(Debug)]
enum PublisherCommand {
    Flush(oneshot::Sender<Result<(), SinkError>>),
}

#[derive(Debug)]
struct Queue<T> {
    entries: VecDeque<T>,
    // Entries taken out for the batch currently being published.
    in_flight: usize,
}

#[derive(Debug)]
struct Shared<T> {
    queue: Mutex<Queue<T>>,
    wake: Notify,
    overflowing: AtomicBool,
    count_threshold: usize,
    max_buffer_size: usize,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Queue<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> usize {
        let queue = self.lock();
        queue.entries.len() + queue.in_flight
    }

    /// Takes at most `limit` entries from the front of the queue.
    fn take_batch(&self, limit: usize) -> Vec<T> {
        let mut queue = self.lock();
        let mut size = limit.min(queue.entries.len());
        if self.count_threshold > 0 {
            size = size.min(self.count_threshold);
        }
        queue.in_flight = size;
        queue.entries.drain(..size).collect()
    }

    fn return_batch(&self, batch: Vec<T>, removed: usize) {
        let mut queue = self.lock();
        queue.in_flight = 0;
        for entry in batch.into_iter().skip(removed).rev() {
            queue.entries.push_front(entry);
        }
    }

    fn clear(&self) {
        let mut queue = self.lock();
        let dropped = queue.entries.len();
        queue.entries.clear();
        if dropped > 0 {
            debug!("LOGGLY | Dropped {dropped} buffered entries on shutdown");
        }
    }
}

/// Producer-side handle of a running [`BufferedPublisher`].
#[derive(Debug)]
pub struct BufferedPublisherHandle<T> {
    shared: Arc<Shared<T>>,
    tx: mpsc::UnboundedSender<PublisherCommand>,
    shutdown: CancellationToken,
}

impl<T> BufferedPublisherHandle<T> {
    /// Buffers `entry` without blocking.
    ///
    /// Returns `false` when the entry was dropped because the buffer is full
    /// or the publisher has been shut down.
    pub fn try_post(&self, entry: T) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }

        let buffered = {
            let mut queue = self.shared.lock();
            if queue.entries.len() + queue.in_flight >= self.shared.max_buffer_size {
                drop(queue);
                if !self.shared.overflowing.swap(true, Ordering::Relaxed) {
                    warn!(
                        "LOGGLY | Buffer reached its maximum size of {} entries, dropping new entries",
                        self.shared.max_buffer_size
                    );
                }
                return false;
            }
            queue.entries.push_back(entry);
            queue.entries.len()
        };

        if self.shared.overflowing.swap(false, Ordering::Relaxed) {
            debug!("LOGGLY | Buffer has room again, accepting entries");
        }

        if self.shared.count_threshold > 0 && buffered >= self.shared.count_threshold {
            self.shared.wake.notify_one();
        }
        true
    }

    /// Requests that everything buffered right now is published.
    ///
    /// The request is queued immediately; the returned future resolves once the
    /// buffer has drained, or with [`SinkError::FlushFailed`] if a publish fails
    /// or accepts nothing.
    pub fn flush(&self) -> impl Future<Output = Result<(), SinkError>> + Send + 'static {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self.tx.send(PublisherCommand::Flush(reply_tx)).is_ok();

        async move {
            if !sent {
                return Err(SinkError::PublisherClosed);
            }
            reply_rx.await.map_err(|_| SinkError::PublisherClosed)?
        }
    }

    /// Number of entries waiting in the buffer, including an in-flight batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.pending()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the worker and drops whatever is still buffered. Idempotent.
    pub fn dispose(&self) {
        self.shutdown.cancel();
        self.shared.clear();
    }
}

/// Worker that owns the publishing side of the buffer.
pub struct BufferedPublisher<T> {
    shared: Arc<Shared<T>>,
    publisher: Arc<dyn Publish<T>>,
    interval: Duration,
    rx: mpsc::UnboundedReceiver<PublisherCommand>,
    shutdown: CancellationToken,
}

impl<T> BufferedPublisher<T>
where
    T: Send + Sync + 'static,
{
    /// Spawns the worker on the current tokio runtime and returns its handle.
    ///
    /// A `count_threshold` of 0 disables the early trigger; the whole buffer is
    /// then published as one batch. Cancelling `cancel_token` stops the worker.
    pub fn start(
        id: &str,
        publisher: Arc<dyn Publish<T>>,
        interval: Duration,
        count_threshold: usize,
        max_buffer_size: usize,
        cancel_token: &CancellationToken,
    ) -> BufferedPublisherHandle<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = cancel_token.child_token();
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                entries: VecDeque::new(),
                in_flight: 0,
            }),
            wake: Notify::new(),
            overflowing: AtomicBool::new(false),
            count_threshold,
            max_buffer_size,
        });

        let worker = BufferedPublisher {
            shared: Arc::clone(&shared),
            publisher,
            interval,
            rx,
            shutdown: shutdown.clone(),
        };
        tokio::spawn(worker.run().instrument(info_span!("publisher", id = %id)));

        BufferedPublisherHandle {
            shared,
            tx,
            shutdown,
        }
    }

    async fn run(mut self) {
        debug!("LOGGLY | Buffered publisher started");
        let mut backoff: Option<Duration> = None;

        loop {
            let wait = backoff.unwrap_or(self.interval);
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(PublisherCommand::Flush(reply)) => {
                        let result = self.flush_all().await;
                        backoff = None;
                        if reply.send(result).is_err() {
                            debug!("LOGGLY | Flush requester went away before completion");
                        }
                    }
                    None => break,
                },
                () = self.shared.wake.notified(), if backoff.is_none() => {
                    backoff = self.publish_pending(backoff).await;
                }
                () = tokio::time::sleep(wait) => {
                    backoff = self.publish_pending(backoff).await;
                }
            }
        }

        self.shared.clear();
        debug!("LOGGLY | Buffered publisher stopped");
    }

    /// Publishes the entries buffered when the cycle starts, stopping early if
    /// the publisher stops accepting. Returns the backoff to apply before the
    /// next attempt.
    async fn publish_pending(&self, backoff: Option<Duration>) -> Option<Duration> {
        let mut remaining = self.shared.pending();
        while remaining > 0 && !self.shutdown.is_cancelled() {
            match self.publish_batch(remaining).await {
                Ok(Some(0) | None) => return None,
                Ok(Some(removed)) => remaining = remaining.saturating_sub(removed),
                Err(e) => {
                    let next = next_backoff(backoff, self.interval);
                    error!(
                        "LOGGLY | Failed to publish entries, retrying in {} ms: {}",
                        next.as_millis(),
                        e
                    );
                    return Some(next);
                }
            }
        }
        None
    }

    /// Publishes the entries buffered when the flush was requested. Entries
    /// posted while the flush runs wait for a later cycle.
    async fn flush_all(&self) -> Result<(), SinkError> {
        let mut remaining = self.shared.pending();
        while remaining > 0 {
            if self.shutdown.is_cancelled() {
                return Err(SinkError::FlushFailed(
                    "publisher is shutting down".to_string(),
                ));
            }
            match self.publish_batch(remaining).await {
                Ok(None) => return Ok(()),
                Ok(Some(0)) => {
                    return Err(SinkError::FlushFailed(format!(
                        "{remaining} entries could not be published"
                    )));
                }
                Ok(Some(removed)) => remaining = remaining.saturating_sub(removed),
                Err(e) => return Err(SinkError::FlushFailed(e.to_string())),
            }
        }
        Ok(())
    }

    /// Publishes one batch of at most `limit` entries. `Ok(None)` means there
    /// was nothing to publish.
    async fn publish_batch(&self, limit: usize) -> Result<Option<usize>, SinkError> {
        let batch = self.shared.take_batch(limit);
        if batch.is_empty() {
            self.shared.return_batch(batch, 0);
            return Ok(None);
        }

        let result = self.publisher.publish(&batch).await;
        let removed = match &result {
            Ok(count) => (*count).min(batch.len()),
            Err(_) => 0,
        };
        debug!(
            "LOGGLY | Published batch of {} entries, {} removed from buffer",
            batch.len(),
            removed
        );
        self.shared.return_batch(batch, removed);
        result.map(|_| Some(removed))
    }
}

fn next_backoff(current: Option<Duration>, cap: Duration) -> Duration {
    current
        .map_or(MIN_BACKOFF, |delay| delay.saturating_mul(2))
        .min(cap)
}
