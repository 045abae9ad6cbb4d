//! Synchronous Queue
//!
//! A queue with no capacity at all: every insert waits for a remove and
//! every remove waits for an insert. Values pass directly from producer to
//! consumer.
//!
//! ## Fairness
//!
//! - **Unfair** (default): waiters sit on a [`TransferStack`]. The most recent
//!   arrival is matched first, which keeps hot threads hot and gives the best
//!   throughput under contention.
//! - **Fair**: waiters sit on an unbuffered [`DualQueue`] and are matched in
//!   arrival order.

use super::{settle_offer, settle_request, BlockingQueue, TransferQueue};
use crate::config::SpinConfig;
use crate::metrics::{AtomicMetrics, MetricsCollector, TransferMetrics};
use crate::transfer::{DualQueue, Mode, Transfer, TransferStack, Transferer};
use crate::{Error, OfferError};
use std::fmt;
use std::time::Duration;

enum Engine<T> {
    Stack(TransferStack<T>),
    Queue(DualQueue<T>),
}

/// A zero-capacity rendezvous queue
///
/// `len()` is always 0 and `remaining_capacity()` is always 0; an element is
/// never "in" the queue, only in flight between two threads.
///
/// # Examples
///
/// ```rust
/// use handoff::{BlockingQueue, SynchronousQueue};
/// use std::sync::Arc;
/// use std::thread;
///
/// let queue = Arc::new(SynchronousQueue::new());
///
/// let producer = {
///     let queue = Arc::clone(&queue);
///     thread::spawn(move || {
///         for i in 0..3 {
///             queue.put(i).unwrap();
///         }
///     })
/// };
///
/// let received: Vec<i32> = (0..3).map(|_| queue.take().unwrap()).collect();
/// producer.join().unwrap();
/// assert_eq!(received, vec![0, 1, 2]);
/// assert!(queue.is_empty());
/// ```
pub struct SynchronousQueue<T> {
    engine: Engine<T>,
}

impl<T> SynchronousQueue<T> {
    /// Create an unfair synchronous queue
    pub fn new() -> Self {
        Self::with_config(false, SpinConfig::default())
    }

    /// Create a synchronous queue with the given fairness policy
    ///
    /// # Examples
    ///
    /// ```rust
    /// use handoff::SynchronousQueue;
    ///
    /// let queue: SynchronousQueue<String> = SynchronousQueue::with_fairness(true);
    /// assert!(queue.is_fair());
    /// ```
    pub fn with_fairness(fair: bool) -> Self {
        Self::with_config(fair, SpinConfig::default())
    }

    /// Create a synchronous queue with explicit spin tuning
    pub fn with_config(fair: bool, config: SpinConfig) -> Self {
        let engine = if fair {
            Engine::Queue(DualQueue::unbuffered(config))
        } else {
            Engine::Stack(TransferStack::with_config(config))
        };
        Self { engine }
    }

    /// Whether waiters are matched in arrival order
    pub fn is_fair(&self) -> bool {
        matches!(self.engine, Engine::Queue(_))
    }

    fn counters(&self) -> &AtomicMetrics {
        match &self.engine {
            Engine::Stack(stack) => stack.counters(),
            Engine::Queue(queue) => queue.counters(),
        }
    }
}

impl<T: Send> SynchronousQueue<T> {
    fn exchange(&self, item: Option<T>, mode: Mode) -> Transfer<T> {
        match &self.engine {
            Engine::Stack(stack) => stack.transfer(item, mode),
            Engine::Queue(queue) => queue.transfer(item, mode),
        }
    }

    fn send(&self, value: T, mode: Mode) -> Result<(), OfferError<T>> {
        settle_offer(self.exchange(Some(value), mode), mode, self.counters())
    }

    fn recv(&self, mode: Mode) -> crate::Result<Option<T>> {
        settle_request(self.exchange(None, mode), mode, self.counters())
    }
}

impl<T: Send> BlockingQueue<T> for SynchronousQueue<T> {
    /// Wait for a consumer to take `value`
    fn put(&self, value: T) -> Result<(), OfferError<T>> {
        self.send(value, Mode::Sync)
    }

    /// Hand `value` over only if a consumer is already waiting
    fn offer(&self, value: T) -> Result<(), OfferError<T>> {
        self.send(value, Mode::Now)
    }

    fn offer_timeout(&self, value: T, timeout: Duration) -> Result<(), OfferError<T>> {
        self.send(value, Mode::Timed(timeout))
    }

    fn take(&self) -> crate::Result<T> {
        self.recv(Mode::Sync)?.ok_or(Error::Interrupted)
    }

    /// Take a value only if a producer is already waiting
    fn poll(&self) -> Option<T> {
        self.recv(Mode::Now).ok().flatten()
    }

    fn poll_timeout(&self, timeout: Duration) -> crate::Result<Option<T>> {
        self.recv(Mode::Timed(timeout))
    }

    fn remaining_capacity(&self) -> usize {
        0
    }

    fn len(&self) -> usize {
        0
    }

    fn is_empty(&self) -> bool {
        true
    }
}

impl<T: Send> TransferQueue<T> for SynchronousQueue<T> {
    fn transfer(&self, value: T) -> Result<(), OfferError<T>> {
        self.put(value)
    }

    fn try_transfer(&self, value: T) -> Result<(), OfferError<T>> {
        self.offer(value)
    }

    fn try_transfer_timeout(&self, value: T, timeout: Duration) -> Result<(), OfferError<T>> {
        self.offer_timeout(value, timeout)
    }

    fn has_waiting_consumer(&self) -> bool {
        match &self.engine {
            Engine::Stack(stack) => stack.has_waiting_consumer(),
            Engine::Queue(queue) => queue.has_waiting_consumer(),
        }
    }

    fn waiting_consumer_count(&self) -> usize {
        match &self.engine {
            Engine::Stack(stack) => stack.waiting_consumer_count(),
            Engine::Queue(queue) => queue.waiting_consumer_count(),
        }
    }
}

impl<T> MetricsCollector for SynchronousQueue<T> {
    fn metrics(&self) -> TransferMetrics {
        self.counters().snapshot()
    }

    fn reset_metrics(&self) {
        self.counters().reset();
    }

    fn set_metrics_enabled(&self, enabled: bool) {
        self.counters().set_enabled(enabled);
    }

    fn is_metrics_enabled(&self) -> bool {
        self.counters().is_enabled()
    }
}

impl<T> Default for SynchronousQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SynchronousQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("SynchronousQueue");
        debug.field("fair", &self.is_fair());
        match &self.engine {
            Engine::Stack(stack) => debug.field("engine", stack),
            Engine::Queue(queue) => debug.field("engine", queue),
        };
        debug.finish()
    }
}
