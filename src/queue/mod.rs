//! Queue implementations
//!
//! Blocking queues built on the dual-mode transfer core.
//!
//! ## Available Queues
//!
//! - [`SynchronousQueue`]: zero-capacity rendezvous; each insert waits for a
//!   remove and vice versa. Unfair (LIFO stack) by default, fair (FIFO queue)
//!   on request.
//! - [`LinkedTransferQueue`]: unbounded FIFO; inserts never block, and
//!   [`transfer`](TransferQueue::transfer) additionally waits until a consumer
//!   has the value.
//!
//! ## Operations
//!
//! | Operation | Waits | On failure |
//! |-----------|-------|------------|
//! | `put` / `transfer` | until matched | `OfferError::Interrupted` |
//! | `offer` / `try_transfer` | never | `OfferError::Unmatched` |
//! | `offer_timeout` / `try_transfer_timeout` | up to the timeout | `OfferError::Timeout` / `Interrupted` |
//! | `take` | until matched | `Error::Interrupted` |
//! | `poll` | never | `None` |
//! | `poll_timeout` | up to the timeout | `Ok(None)` / `Error::Interrupted` |
//!
//! A rejected value is always handed back inside the error. Interruption is
//! reported once: the thread's interrupt flag is cleared when an operation
//! returns an interrupted error.
//!
//! ## Examples
//!
//! ```rust
//! use handoff::{BlockingQueue, LinkedTransferQueue, SynchronousQueue};
//!
//! // Nobody is waiting on a synchronous queue, so a non-blocking offer fails.
//! let sync: SynchronousQueue<u32> = SynchronousQueue::new();
//! assert_eq!(sync.offer(1).unwrap_err().into_inner(), 1);
//!
//! // A transfer queue buffers.
//! let linked = LinkedTransferQueue::new();
//! linked.offer(1).unwrap();
//! linked.offer(2).unwrap();
//! assert_eq!(linked.poll(), Some(1));
//! assert_eq!(linked.len(), 1);
//! ```

pub mod linked_transfer;
pub mod synchronous;

pub use linked_transfer::LinkedTransferQueue;
pub use synchronous::SynchronousQueue;

use crate::interrupt;
use crate::metrics::AtomicMetrics;
use crate::transfer::{Mode, Transfer};
use crate::{Error, OfferError};
use std::time::Duration;

/// A queue whose operations may wait for the other side
pub trait BlockingQueue<T>: Send + Sync {
    /// Insert `value`, waiting if necessary
    fn put(&self, value: T) -> Result<(), OfferError<T>>;

    /// Insert `value` only if that needs no waiting
    fn offer(&self, value: T) -> Result<(), OfferError<T>>;

    /// Insert `value`, waiting at most `timeout`
    fn offer_timeout(&self, value: T, timeout: Duration) -> Result<(), OfferError<T>>;

    /// Remove a value, waiting until one is available
    fn take(&self) -> crate::Result<T>;

    /// Remove a value if one is available right now
    fn poll(&self) -> Option<T>;

    /// Remove a value, waiting at most `timeout`; `Ok(None)` on timeout
    fn poll_timeout(&self, timeout: Duration) -> crate::Result<Option<T>>;

    /// How many more values could be inserted without waiting
    fn remaining_capacity(&self) -> usize;

    /// Number of values held
    fn len(&self) -> usize;

    /// Whether no value is held
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move every immediately available value into `sink`
    ///
    /// Returns the number of values moved.
    fn drain_into<E: Extend<T>>(&self, sink: &mut E) -> usize
    where
        Self: Sized,
    {
        self.drain_into_max(sink, usize::MAX)
    }

    /// Move at most `max` immediately available values into `sink`
    fn drain_into_max<E: Extend<T>>(&self, sink: &mut E, max: usize) -> usize
    where
        Self: Sized,
    {
        let mut moved = 0;
        while moved < max {
            match self.poll() {
                Some(value) => {
                    sink.extend(Some(value));
                    moved += 1;
                }
                None => break,
            }
        }
        moved
    }
}

/// A blocking queue whose producers can wait for delivery
pub trait TransferQueue<T>: BlockingQueue<T> {
    /// Hand `value` to a consumer, waiting until one receives it
    fn transfer(&self, value: T) -> Result<(), OfferError<T>>;

    /// Hand `value` to a consumer that is already waiting
    fn try_transfer(&self, value: T) -> Result<(), OfferError<T>>;

    /// Hand `value` to a consumer, waiting at most `timeout` for one
    fn try_transfer_timeout(&self, value: T, timeout: Duration) -> Result<(), OfferError<T>>;

    /// Whether at least one consumer is waiting
    fn has_waiting_consumer(&self) -> bool;

    /// Number of consumers waiting (a snapshot)
    fn waiting_consumer_count(&self) -> usize;
}

/// Translate the outcome of a data transfer into an insert result
pub(crate) fn settle_offer<T>(
    outcome: Transfer<T>,
    mode: Mode,
    metrics: &AtomicMetrics,
) -> Result<(), OfferError<T>> {
    let value = match outcome {
        Transfer::Delivered => return Ok(()),
        Transfer::Unmatched(Some(value)) => value,
        Transfer::Received(_) | Transfer::Unmatched(None) => {
            unreachable!("data transfer lost its payload")
        }
    };
    match mode {
        Mode::Now | Mode::Async => Err(OfferError::Unmatched(value)),
        _ if interrupt::interrupted() => {
            metrics.record_interrupt();
            Err(OfferError::Interrupted(value))
        }
        Mode::Timed(_) => {
            metrics.record_timeout();
            Err(OfferError::Timeout(value))
        }
        // An untimed wait only gives up when interrupted.
        Mode::Sync => {
            metrics.record_interrupt();
            Err(OfferError::Interrupted(value))
        }
    }
}

/// Translate the outcome of a request transfer into a remove result
pub(crate) fn settle_request<T>(
    outcome: Transfer<T>,
    mode: Mode,
    metrics: &AtomicMetrics,
) -> crate::Result<Option<T>> {
    match outcome {
        Transfer::Received(value) => Ok(Some(value)),
        Transfer::Unmatched(_) => match mode {
            Mode::Now | Mode::Async => Ok(None),
            _ if interrupt::interrupted() => {
                metrics.record_interrupt();
                Err(Error::Interrupted)
            }
            Mode::Timed(_) => {
                metrics.record_timeout();
                Ok(None)
            }
            Mode::Sync => {
                metrics.record_interrupt();
                Err(Error::Interrupted)
            }
        },
        Transfer::Delivered => unreachable!("request transfer delivered data"),
    }
}


#[cfg(test)]
mod proptests;

#[cfg(test)]
mod loom_tests;
