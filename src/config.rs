//! Spin and cleanup tunables
//!
//! None of these values is a semantic contract: they trade CPU for latency
//! and bound how much garbage a queue may retain, but every setting yields a
//! correct queue. The defaults follow the number of available CPUs; on a
//! single-CPU machine spinning is pointless, so all spin budgets are zero.

use std::sync::OnceLock;
use std::time::Duration;

/// Tunables for the wait controller and the dual queue's cleanup
///
/// # Examples
///
/// ```rust
/// use handoff::{SpinConfig, SynchronousQueue};
/// use std::time::Duration;
///
/// let config = SpinConfig::default()
///     .with_front_spins(256)
///     .with_spin_for_timeout_threshold(Duration::from_micros(2));
/// let queue: SynchronousQueue<u64> = SynchronousQueue::with_config(true, config);
/// assert!(queue.is_fair());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SpinConfig {
    /// Spins before parking for a timed waiter at the top of the stack
    pub max_timed_spins: u32,
    /// Spins before parking for an untimed waiter at the top of the stack
    pub max_untimed_spins: u32,
    /// Spins for a queue waiter that is probably first in line
    pub front_spins: u32,
    /// Spins for a queue waiter behind another spinning waiter
    pub chained_spins: u32,
    /// Yield the processor once every this many spins
    pub yield_interval: u32,
    /// Below this much remaining time a timed waiter spins instead of parking
    pub spin_for_timeout_threshold: Duration,
    /// Failed unsplice attempts tolerated before a full sweep of the queue
    pub sweep_threshold: u32,
}

fn multiprocessor() -> bool {
    static MP: OnceLock<bool> = OnceLock::new();
    *MP.get_or_init(|| {
        std::thread::available_parallelism()
            .map(|n| n.get() > 1)
            .unwrap_or(false)
    })
}

impl Default for SpinConfig {
    fn default() -> Self {
        let timed = if multiprocessor() { 32 } else { 0 };
        let front = if multiprocessor() { 1 << 7 } else { 0 };
        Self {
            max_timed_spins: timed,
            max_untimed_spins: timed * 16,
            front_spins: front,
            chained_spins: front >> 1,
            yield_interval: 64,
            spin_for_timeout_threshold: Duration::from_nanos(1023),
            sweep_threshold: 32,
        }
    }
}

impl SpinConfig {
    /// A configuration that parks waiters immediately
    ///
    /// Mostly useful in tests that need parking paths exercised deterministically.
    pub fn no_spin() -> Self {
        Self {
            max_timed_spins: 0,
            max_untimed_spins: 0,
            front_spins: 0,
            chained_spins: 0,
            spin_for_timeout_threshold: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Set the timed stack spin budget
    pub fn with_max_timed_spins(mut self, spins: u32) -> Self {
        self.max_timed_spins = spins;
        self
    }

    /// Set the untimed stack spin budget
    pub fn with_max_untimed_spins(mut self, spins: u32) -> Self {
        self.max_untimed_spins = spins;
        self
    }

    /// Set the spin budget for queue waiters at the front
    pub fn with_front_spins(mut self, spins: u32) -> Self {
        self.front_spins = spins;
        self
    }

    /// Set the spin budget for chained queue waiters
    pub fn with_chained_spins(mut self, spins: u32) -> Self {
        self.chained_spins = spins;
        self
    }

    /// Set how often a spinning waiter yields; clamped to at least 1
    pub fn with_yield_interval(mut self, interval: u32) -> Self {
        self.yield_interval = interval.max(1);
        self
    }

    /// Set the remaining-time threshold below which timed waiters keep spinning
    pub fn with_spin_for_timeout_threshold(mut self, threshold: Duration) -> Self {
        self.spin_for_timeout_threshold = threshold;
        self
    }

    /// Set the sweep threshold; clamped to at least 1
    pub fn with_sweep_threshold(mut self, threshold: u32) -> Self {
        self.sweep_threshold = threshold.max(1);
        self
    }

    pub(crate) fn yield_every(&self) -> u32 {
        self.yield_interval.max(1)
    }
}
