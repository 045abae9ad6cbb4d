//! Linked Transfer Queue
//!
//! An unbounded FIFO queue on the dual queue engine. Inserts never wait: a
//! value is handed to a waiting consumer if there is one and linked at the
//! tail otherwise. Producers that need to know the value was received use
//! [`transfer`](TransferQueue::transfer), which waits for a consumer like a
//! synchronous queue would.
//!
//! ## Size
//!
//! `len()` walks the queue and counts unmatched data nodes. Under concurrent
//! use the count is a snapshot that may already be stale when it returns.

use super::{settle_offer, settle_request, BlockingQueue, TransferQueue};
use crate::config::SpinConfig;
use crate::metrics::{MetricsCollector, TransferMetrics};
use crate::transfer::{DualQueue, Mode, Transferer};
use crate::{Error, OfferError};
use std::fmt;
use std::time::Duration;

/// An unbounded FIFO queue whose producers may wait for delivery
///
/// # Examples
///
/// ```rust
/// use handoff::{BlockingQueue, LinkedTransferQueue, TransferQueue};
/// use std::time::Duration;
///
/// let queue: LinkedTransferQueue<&str> = ["a", "b"].into_iter().collect();
/// assert_eq!(queue.len(), 2);
///
/// // Nobody is waiting, so the value comes back.
/// let err = queue.try_transfer_timeout("c", Duration::from_millis(5)).unwrap_err();
/// assert!(err.is_timeout());
/// assert_eq!(err.into_inner(), "c");
///
/// let mut drained = Vec::new();
/// assert_eq!(queue.drain_into(&mut drained), 2);
/// assert_eq!(drained, vec!["a", "b"]);
/// ```
pub struct LinkedTransferQueue<T> {
    inner: DualQueue<T>,
}

impl<T> LinkedTransferQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::with_config(SpinConfig::default())
    }

    /// Create an empty queue with explicit spin tuning
    pub fn with_config(config: SpinConfig) -> Self {
        Self {
            inner: DualQueue::with_config(config),
        }
    }
}

impl<T: Send> LinkedTransferQueue<T> {
    fn send(&self, value: T, mode: Mode) -> Result<(), OfferError<T>> {
        settle_offer(self.inner.transfer(Some(value), mode), mode, self.inner.counters())
    }

    fn recv(&self, mode: Mode) -> crate::Result<Option<T>> {
        settle_request(self.inner.transfer(None, mode), mode, self.inner.counters())
    }
}

impl<T: Send> BlockingQueue<T> for LinkedTransferQueue<T> {
    /// Insert `value` at the tail; never waits
    fn put(&self, value: T) -> Result<(), OfferError<T>> {
        self.send(value, Mode::Async)
    }

    /// Insert `value` at the tail; never fails
    fn offer(&self, value: T) -> Result<(), OfferError<T>> {
        self.send(value, Mode::Async)
    }

    /// Insert `value` at the tail; the queue is unbounded, so the timeout is
    /// never used
    fn offer_timeout(&self, value: T, _timeout: Duration) -> Result<(), OfferError<T>> {
        self.send(value, Mode::Async)
    }

    fn take(&self) -> crate::Result<T> {
        self.recv(Mode::Sync)?.ok_or(Error::Interrupted)
    }

    fn poll(&self) -> Option<T> {
        self.recv(Mode::Now).ok().flatten()
    }

    fn poll_timeout(&self, timeout: Duration) -> crate::Result<Option<T>> {
        self.recv(Mode::Timed(timeout))
    }

    fn remaining_capacity(&self) -> usize {
        usize::MAX
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T: Send> TransferQueue<T> for LinkedTransferQueue<T> {
    fn transfer(&self, value: T) -> Result<(), OfferError<T>> {
        self.send(value, Mode::Sync)
    }

    fn try_transfer(&self, value: T) -> Result<(), OfferError<T>> {
        self.send(value, Mode::Now)
    }

    fn try_transfer_timeout(&self, value: T, timeout: Duration) -> Result<(), OfferError<T>> {
        self.send(value, Mode::Timed(timeout))
    }

    fn has_waiting_consumer(&self) -> bool {
        self.inner.has_waiting_consumer()
    }

    fn waiting_consumer_count(&self) -> usize {
        self.inner.waiting_consumer_count()
    }
}

impl<T> MetricsCollector for LinkedTransferQueue<T> {
    fn metrics(&self) -> TransferMetrics {
        self.inner.counters().snapshot()
    }

    fn reset_metrics(&self) {
        self.inner.counters().reset();
    }

    fn set_metrics_enabled(&self, enabled: bool) {
        self.inner.counters().set_enabled(enabled);
    }

    fn is_metrics_enabled(&self) -> bool {
        self.inner.counters().is_enabled()
    }
}

impl<T> Default for LinkedTransferQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Extend<T> for LinkedTransferQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.inner.transfer(Some(value), Mode::Async);
        }
    }
}

impl<T: Send> FromIterator<T> for LinkedTransferQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut queue = Self::new();
        queue.extend(iter);
        queue
    }
}

impl<T> fmt::Debug for LinkedTransferQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedTransferQueue")
            .field("inner", &self.inner)
            .finish()
    }
}
