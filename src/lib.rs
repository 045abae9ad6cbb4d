//! # handoff
//!
//! Lock-free hand-off queues for coordinating producer and consumer threads.
//!
//! ## Features
//!
//! - **SynchronousQueue**: Zero-capacity rendezvous; every insert waits for a matching remove
//! - **LinkedTransferQueue**: Unbounded FIFO queue whose producers may optionally wait for delivery
//! - **Dual-mode transfer core**: Data and request operations meet and match through a single CAS
//!
//! ## Philosophy
//!
//! Both queues are *dual* data structures: at any moment they hold either pending
//! offers or pending requests, never a mix. An operation of one kind that finds a
//! node of the complementary kind matches it in place, without a lock ever being
//! held across the match. Threads that must wait spin briefly, then park.
//!
//! ## Quick Start
//!
//! ```rust
//! use handoff::{BlockingQueue, LinkedTransferQueue, TransferQueue};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let queue = Arc::new(LinkedTransferQueue::new());
//!
//! let consumer = {
//!     let queue = Arc::clone(&queue);
//!     thread::spawn(move || queue.take().unwrap())
//! };
//!
//! // Waits until the consumer has the value in hand.
//! queue.transfer(42).unwrap();
//! assert_eq!(consumer.join().unwrap(), 42);
//! ```
//!
//! ## Thread Safety
//!
//! Every queue in this crate is `Send + Sync` for `T: Send` and is meant to be
//! shared across threads behind an `Arc`. Blocking operations can be cancelled
//! cooperatively through [`interrupt`].
//!
//! ## Performance
//!
//! - Hot head/tail pointers are cache-padded
//! - Unlinked nodes are reclaimed through epoch-based reclamation
//! - Waiters spin before parking, and never hold an epoch guard while parked

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod config;
pub mod interrupt;
pub mod metrics;
pub mod queue;
pub mod transfer;

pub use crate::config::SpinConfig;
pub use crate::metrics::{MetricsCollector, TransferMetrics};
pub use crate::queue::{BlockingQueue, LinkedTransferQueue, SynchronousQueue, TransferQueue};

/// Error types for blocking operations that carry no payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The calling thread was interrupted while waiting
    #[error("operation interrupted")]
    Interrupted,
    /// The operation did not complete before its deadline
    #[error("operation timed out")]
    Timeout,
}

/// Result type for handoff operations
pub type Result<T> = core::result::Result<T, Error>;

/// Failure of an insert-side operation, handing the rejected value back
///
/// A value that could not be delivered is never dropped by the queue; it is
/// returned inside the error so the caller can retry or dispose of it.
#[derive(Clone, PartialEq, Eq, thiserror::Error)]
pub enum OfferError<T> {
    /// No consumer was waiting to receive the value
    #[error("no waiting consumer")]
    Unmatched(T),
    /// No consumer received the value before the deadline
    #[error("offer timed out")]
    Timeout(T),
    /// The calling thread was interrupted while waiting for a consumer
    #[error("offer interrupted")]
    Interrupted(T),
}

impl<T> OfferError<T> {
    /// Recover the value that was not delivered
    pub fn into_inner(self) -> T {
        match self {
            OfferError::Unmatched(value)
            | OfferError::Timeout(value)
            | OfferError::Interrupted(value) => value,
        }
    }

    /// Whether the offer gave up because its deadline passed
    pub fn is_timeout(&self) -> bool {
        matches!(self, OfferError::Timeout(_))
    }

    /// Whether the offer gave up because the thread was interrupted
    pub fn is_interrupted(&self) -> bool {
        matches!(self, OfferError::Interrupted(_))
    }

    /// The payload-free error kind, if the failure was a blocking failure
    pub fn kind(&self) -> Option<Error> {
        match self {
            OfferError::Unmatched(_) => None,
            OfferError::Timeout(_) => Some(Error::Timeout),
            OfferError::Interrupted(_) => Some(Error::Interrupted),
        }
    }
}

impl<T> core::fmt::Debug for OfferError<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            OfferError::Unmatched(_) => f.write_str("Unmatched(..)"),
            OfferError::Timeout(_) => f.write_str("Timeout(..)"),
            OfferError::Interrupted(_) => f.write_str("Interrupted(..)"),
        }
    }
}
