//! The crawl work queue.
//!
//! The queue is the synchronization point between the admission pipeline and
//! the worker pool. Besides FIFO delivery it tracks outstanding work, a URL
//! counts as outstanding from the moment it is enqueued until the worker
//! that dequeued it calls [`Queue::done`]. The run terminates when
//! outstanding work reaches zero.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Queue errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was closed; workers treat this as end of input.
    #[error("queue closed")]
    Closed,

    /// The operation was cancelled while blocked.
    #[error("queue operation cancelled")]
    Cancelled,
}

/// A URL queue.
///
/// Implementations must be safe for concurrent producers and consumers.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueues a batch of URLs.
    ///
    /// Every enqueued URL increments the outstanding-work counter. An empty
    /// batch is a no-op. Returns [`QueueError::Closed`] after the queue was
    /// closed and [`QueueError::Cancelled`] when the token is cancelled.
    async fn enqueue(&self, token: &CancellationToken, urls: Vec<Url>) -> Result<(), QueueError>;

    /// Dequeues the next URL in FIFO order.
    ///
    /// Blocks while the queue is empty and open. Returns
    /// [`QueueError::Closed`] once the queue is closed and drained and
    /// [`QueueError::Cancelled`] when the token is cancelled while waiting.
    async fn dequeue(&self, token: &CancellationToken) -> Result<Url, QueueError>;

    /// Marks a dequeued URL as fully processed.
    ///
    /// Must be called exactly once per successfully dequeued URL.
    fn done(&self, url: &Url);

    /// Resolves once the outstanding-work counter reaches zero.
    async fn wait(&self);

    /// Closes the queue, discarding pending URLs and waking all waiters.
    ///
    /// Closing is idempotent.
    fn close(&self);
}

/// The default in-memory queue.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    added: Notify,
    idle: Notify,
}

#[derive(Debug, Default)]
struct Inner {
    pending: VecDeque<Url>,
    outstanding: usize,
    closed: bool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the outstanding-work counter, pending plus in-flight.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().outstanding
    }

    /// Returns true once the queue was closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn enqueue(&self, token: &CancellationToken, urls: Vec<Url>) -> Result<(), QueueError> {
        if urls.is_empty() {
            return Ok(());
        }

        if token.is_cancelled() {
            return Err(QueueError::Cancelled);
        }

        let mut inner = self.inner.lock();

        if inner.closed {
            return Err(QueueError::Closed);
        }

        inner.outstanding += urls.len();
        inner.pending.extend(urls);
        drop(inner);

        self.added.notify_waiters();

        Ok(())
    }

    async fn dequeue(&self, token: &CancellationToken) -> Result<Url, QueueError> {
        loop {
            // Register for a wakeup before inspecting the queue so an
            // enqueue between the check and the await is not lost.
            let notified = self.added.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if let Some(url) = inner.pending.pop_front() {
                    return Ok(url);
                }
                if inner.closed {
                    return Err(QueueError::Closed);
                }
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(QueueError::Cancelled),
                _ = &mut notified => {}
            }
        }
    }

    fn done(&self, _url: &Url) {
        let mut inner = self.inner.lock();
        inner.outstanding = inner.outstanding.saturating_sub(1);
        let drained = inner.outstanding == 0;
        drop(inner);

        if drained {
            self.idle.notify_waiters();
        }
    }

    async fn wait(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.lock().outstanding == 0 {
                return;
            }

            notified.await;
        }
    }

    fn close(&self) {
        let mut inner = self.inner.lock();

        if !inner.closed {
            inner.closed = true;
            inner.outstanding = inner.outstanding.saturating_sub(inner.pending.len());
            inner.pending.clear();
        }

        let drained = inner.outstanding == 0;
        drop(inner);

        self.added.notify_waiters();
        if drained {
            self.idle.notify_waiters();
        }
    }
}
