//! Spin-then-park wait controller
//!
//! A linked waiter first spins on its slot for a budget chosen by the
//! structure, yielding now and then, and only parks once the budget is gone.
//! Parking registers the thread's signal on the slot and re-checks before
//! blocking, so a match that lands between the check and the park is never
//! lost: either the matcher sees the signal and unparks us, or we see the
//! match on the re-check.

use super::slot::Slot;
use crate::config::SpinConfig;
use crate::interrupt;
use crate::metrics::AtomicMetrics;
use std::thread;
use std::time::Instant;
use tracing::trace;

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// A partner matched the slot
    Matched,
    /// The owner withdrew the slot after a timeout or interrupt
    Cancelled,
}

/// Wait until `slot` is matched, the deadline passes, or the thread is
/// interrupted
///
/// `deadline = None` waits indefinitely. The caller must not hold an epoch
/// guard: this may park for an unbounded time.
pub(crate) fn await_match<T>(
    slot: &Slot<T>,
    deadline: Option<Instant>,
    mut spins: u32,
    config: &SpinConfig,
    metrics: &AtomicMetrics,
) -> Outcome {
    let signal = interrupt::signal();
    let yield_every = config.yield_every();
    let mut spun: u32 = 0;
    let mut registered = false;

    loop {
        if slot.is_matched() {
            slot.clear_waiter();
            return Outcome::Matched;
        }

        let now = deadline.map(|_| Instant::now());
        let expired = matches!((deadline, now), (Some(d), Some(n)) if n >= d);
        if expired || signal.is_interrupted() {
            if slot.cancel() {
                slot.clear_waiter();
                metrics.record_cancellation();
                trace!(expired, "waiter cancelled");
                return Outcome::Cancelled;
            }
            // Matched at the last instant; the next pass reports it.
            continue;
        }

        if spins > 0 {
            spins -= 1;
            spun = spun.wrapping_add(1);
            if spun % yield_every == 0 {
                thread::yield_now();
            } else {
                core::hint::spin_loop();
            }
            continue;
        }

        let remaining = match (deadline, now) {
            (Some(d), Some(n)) => Some(d.saturating_duration_since(n)),
            _ => None,
        };
        if let Some(remaining) = remaining {
            if remaining < config.spin_for_timeout_threshold {
                core::hint::spin_loop();
                continue;
            }
        }

        if !registered {
            slot.register_waiter(&signal);
            registered = true;
            continue;
        }

        metrics.record_park();
        trace!(timed = remaining.is_some(), "waiter parking");
        match remaining {
            Some(remaining) => interrupt::park_timeout(remaining),
            None => interrupt::park(),
        }
    }
}
