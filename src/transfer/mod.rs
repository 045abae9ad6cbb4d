//! Dual-mode transfer core
//!
//! This module implements the synchronization protocol shared by every queue
//! in the crate. A *data* operation (carrying a value) and a *request*
//! operation (wanting one) meet in a lock-free structure and match through a
//! single CAS on the waiting node's item slot.
//!
//! ## Strategies
//!
//! - [`TransferStack`]: LIFO. Favors thread locality and throughput, gives no
//!   ordering guarantee among waiters. Backs the unfair `SynchronousQueue`.
//! - [`DualQueue`]: FIFO. Grants waiters arrival-order access and can buffer
//!   data asynchronously. Backs `LinkedTransferQueue` and the fair
//!   `SynchronousQueue`.
//!
//! ## Protocol
//!
//! ```text
//! transfer(item, mode)
//!   first live node has the opposite mode?  --yes-->  CAS its item (linearization point)
//!         |                                             wake its waiter, unlink it
//!         no                                            return the exchanged value
//!         v
//!   mode == Now?  --yes-->  return Unmatched
//!         v
//!   link a node of our mode (CAS)
//!   mode == Async?  --yes-->  return Delivered
//!         v
//!   spin, then park until matched, timed out or interrupted
//!   (timeout/interrupt: CAS item to the cancelled sentinel, clean up)
//! ```
//!
//! Nodes are reclaimed through `crossbeam-epoch`. A waiting thread holds only
//! a reference-counted handle on its node's slot, never a pinned guard, so a
//! parked thread does not hold back reclamation.

mod queue;
mod slot;
mod stack;
mod wait;

pub use self::queue::DualQueue;
pub use self::stack::TransferStack;

use crate::metrics::TransferMetrics;
use std::time::{Duration, Instant};

/// How long a transfer may wait for its partner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Match only if a partner is already waiting; never link a node
    Now,
    /// Link a data node and return without waiting (buffered put)
    ///
    /// Zero-capacity structures treat this like [`Mode::Now`].
    Async,
    /// Wait until matched or interrupted
    Sync,
    /// Wait until matched, interrupted, or the timeout elapses
    ///
    /// A zero timeout behaves like [`Mode::Now`].
    Timed(Duration),
}

impl Mode {
    /// Whether this mode may block the caller
    pub fn may_wait(&self) -> bool {
        match self {
            Mode::Sync => true,
            Mode::Timed(timeout) => !timeout.is_zero(),
            Mode::Now | Mode::Async => false,
        }
    }

    /// Deadline for a timed wait, measured from now
    ///
    /// A timeout too large to represent is treated as no deadline at all.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        match self {
            Mode::Timed(timeout) => Instant::now().checked_add(*timeout),
            _ => None,
        }
    }

    pub(crate) fn is_timed(&self) -> bool {
        matches!(self, Mode::Timed(_))
    }
}

/// Outcome of a single transfer
#[derive(Debug, PartialEq, Eq)]
pub enum Transfer<T> {
    /// A request was fulfilled with this value
    Received(T),
    /// A data item was handed to a consumer, or linked for [`Mode::Async`]
    Delivered,
    /// No match was made: no partner for [`Mode::Now`], deadline expiry, or
    /// interruption. The offered value, if any, is handed back.
    ///
    /// Callers tell interruption from timeout with
    /// [`interrupt::interrupted`](crate::interrupt::interrupted).
    Unmatched(Option<T>),
}

impl<T> Transfer<T> {
    /// Whether the transfer matched (or, for async data, was linked)
    pub fn is_success(&self) -> bool {
        !matches!(self, Transfer::Unmatched(_))
    }

    /// The received value, if this was a fulfilled request
    pub fn into_received(self) -> Option<T> {
        match self {
            Transfer::Received(value) => Some(value),
            _ => None,
        }
    }
}

/// The single operation every dual structure exposes
///
/// `item = Some(v)` is a data operation offering `v`; `item = None` is a
/// request. The structure either matches a complementary waiter, links a
/// node and (depending on `mode`) waits for one, or gives up.
pub trait Transferer<T>: Send + Sync {
    /// Perform one transfer
    fn transfer(&self, item: Option<T>, mode: Mode) -> Transfer<T>;

    /// Whether any request is currently waiting for data
    fn has_waiting_consumer(&self) -> bool;

    /// Number of requests currently waiting for data
    fn waiting_consumer_count(&self) -> usize;

    /// Counters for this structure
    fn metrics(&self) -> TransferMetrics;
}
