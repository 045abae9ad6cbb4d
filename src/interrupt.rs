//! Cooperative thread interruption
//!
//! Rust threads have no built-in interrupt status, so this module provides one
//! for threads blocked inside this crate. Each thread owns a parker and a
//! shared signal; the signal is what a matching thread uses to wake a parked
//! waiter, and it also carries the interrupt flag.
//!
//! ```rust
//! use handoff::{interrupt, BlockingQueue, Error, SynchronousQueue};
//! use std::sync::{mpsc, Arc};
//! use std::thread;
//!
//! let queue: Arc<SynchronousQueue<u32>> = Arc::new(SynchronousQueue::new());
//! let (tx, rx) = mpsc::channel();
//!
//! let consumer = {
//!     let queue = Arc::clone(&queue);
//!     thread::spawn(move || {
//!         tx.send(interrupt::current()).unwrap();
//!         queue.take()
//!     })
//! };
//!
//! rx.recv().unwrap().interrupt();
//! assert_eq!(consumer.join().unwrap(), Err(Error::Interrupted));
//! ```

use crossbeam_utils::sync::{Parker, Unparker};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Wake-up handle shared between a thread and whoever needs to unpark it
pub(crate) struct Signal {
    unparker: Unparker,
    interrupted: AtomicBool,
}

impl Signal {
    #[inline]
    pub(crate) fn unpark(&self) {
        self.unparker.unpark();
    }

    #[inline]
    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

struct Local {
    parker: Parker,
    signal: Arc<Signal>,
}

impl Local {
    fn new() -> Self {
        let parker = Parker::new();
        let signal = Arc::new(Signal {
            unparker: parker.unparker().clone(),
            interrupted: AtomicBool::new(false),
        });
        Self { parker, signal }
    }
}

thread_local! {
    static LOCAL: Local = Local::new();
}

/// The calling thread's signal
pub(crate) fn signal() -> Arc<Signal> {
    LOCAL.with(|local| Arc::clone(&local.signal))
}

/// Block the calling thread until unparked (or spuriously woken)
pub(crate) fn park() {
    LOCAL.with(|local| local.parker.park());
}

/// Block the calling thread for at most `timeout`
pub(crate) fn park_timeout(timeout: Duration) {
    LOCAL.with(|local| local.parker.park_timeout(timeout));
}

/// A handle that can interrupt the thread it was created on
///
/// Interrupting a thread sets its interrupt flag and wakes it if it is parked
/// inside a queue operation. The blocked operation then cancels itself and
/// reports the interruption. A thread that is not blocked keeps the flag set
/// until it next blocks or calls [`interrupted`].
#[derive(Clone)]
pub struct Interrupter {
    signal: Arc<Signal>,
}

impl Interrupter {
    /// Set the target thread's interrupt flag and wake it
    pub fn interrupt(&self) {
        self.signal.interrupted.store(true, Ordering::SeqCst);
        self.signal.unpark();
    }

    /// Whether the target thread's interrupt flag is currently set
    pub fn is_interrupted(&self) -> bool {
        self.signal.is_interrupted()
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupter")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// Capture an interrupt handle for the calling thread
pub fn current() -> Interrupter {
    Interrupter { signal: signal() }
}

/// Whether the calling thread has been interrupted, leaving the flag as is
pub fn is_interrupted() -> bool {
    LOCAL.with(|local| local.signal.is_interrupted())
}

/// Test and clear the calling thread's interrupt flag
pub fn interrupted() -> bool {
    LOCAL.with(|local| local.signal.interrupted.swap(false, Ordering::SeqCst))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_flag_is_per_thread() {
        assert!(!interrupted());
        current().interrupt();
        assert!(is_interrupted());

        let other = thread::spawn(is_interrupted).join().unwrap();
        assert!(!other);

        assert!(interrupted());
        assert!(!interrupted());
    }

    #[test]
    fn test_interrupt_wakes_parked_thread() {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            tx.send(current()).unwrap();
            while !is_interrupted() {
                park();
            }
            interrupted()
        });

        let interrupter = rx.recv().unwrap();
        interrupter.interrupt();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_park_timeout_returns() {
        let start = std::time::Instant::now();
        park_timeout(Duration::from_millis(10));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
