//! Transfer Metrics Module
//!
//! Counters describing how a queue's hand-offs resolved: how many matched,
//! how many gave up and why, how often waiters had to park, and how much
//! contention the CAS loops saw. Counting uses relaxed atomics and can be
//! switched off per queue.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Snapshot of a queue's transfer counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferMetrics {
    /// Hand-offs completed between a data and a request operation
    pub matches: u64,
    /// Data items linked without waiting (buffered puts)
    pub enqueued: u64,
    /// Non-blocking operations that found no partner
    pub unmatched: u64,
    /// Waiting operations that gave up at their deadline
    pub timeouts: u64,
    /// Waiting operations abandoned because the thread was interrupted
    pub interrupts: u64,
    /// Nodes withdrawn by their owner (timeouts, interrupts, lost races)
    pub cancellations: u64,
    /// Times a waiter parked its thread
    pub parks: u64,
    /// Full cleanup sweeps of the dual queue
    pub sweeps: u64,
    /// CAS attempts that lost to a concurrent update and retried
    pub contended: u64,
}

impl TransferMetrics {
    /// Operations that reached an outcome
    pub fn total_operations(&self) -> u64 {
        self.matches + self.enqueued + self.unmatched + self.timeouts + self.interrupts
    }

    /// Share of outcomes that were hand-offs, as a percentage
    pub fn match_rate(&self) -> f64 {
        let total = self.total_operations();
        if total == 0 {
            0.0
        } else {
            (self.matches as f64 / total as f64) * 100.0
        }
    }

    /// Contended CAS retries per completed operation, as a percentage
    pub fn contention_rate(&self) -> f64 {
        let total = self.total_operations();
        if total == 0 {
            0.0
        } else {
            (self.contended as f64 / total as f64) * 100.0
        }
    }
}

/// Internal atomic counters backing [`TransferMetrics`]
#[derive(Debug)]
pub(crate) struct AtomicMetrics {
    enabled: AtomicBool,
    matches: AtomicU64,
    enqueued: AtomicU64,
    unmatched: AtomicU64,
    timeouts: AtomicU64,
    interrupts: AtomicU64,
    cancellations: AtomicU64,
    parks: AtomicU64,
    sweeps: AtomicU64,
    contended: AtomicU64,
}

impl Default for AtomicMetrics {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            matches: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            unmatched: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            interrupts: AtomicU64::new(0),
            cancellations: AtomicU64::new(0),
            parks: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
            contended: AtomicU64::new(0),
        }
    }
}

impl AtomicMetrics {
    #[inline]
    fn bump(&self, counter: &AtomicU64) {
        if self.enabled.load(Ordering::Relaxed) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a completed hand-off
    pub fn record_match(&self) {
        self.bump(&self.matches);
    }

    /// Record a buffered (non-waiting) insert
    pub fn record_enqueue(&self) {
        self.bump(&self.enqueued);
    }

    /// Record a non-blocking miss
    pub fn record_unmatched(&self) {
        self.bump(&self.unmatched);
    }

    /// Record a deadline expiry
    pub fn record_timeout(&self) {
        self.bump(&self.timeouts);
    }

    /// Record an interrupted wait
    pub fn record_interrupt(&self) {
        self.bump(&self.interrupts);
    }

    /// Record a successful self-cancellation
    pub fn record_cancellation(&self) {
        self.bump(&self.cancellations);
    }

    /// Record a park
    pub fn record_park(&self) {
        self.bump(&self.parks);
    }

    /// Record a full sweep
    pub fn record_sweep(&self) {
        self.bump(&self.sweeps);
    }

    /// Record a lost CAS
    pub fn record_contention(&self) {
        self.bump(&self.contended);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> TransferMetrics {
        TransferMetrics {
            matches: self.matches.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            parks: self.parks.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.matches,
            &self.enqueued,
            &self.unmatched,
            &self.timeouts,
            &self.interrupts,
            &self.cancellations,
            &self.parks,
            &self.sweeps,
            &self.contended,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Trait for queues that expose transfer metrics
pub trait MetricsCollector {
    /// Get current transfer metrics
    fn metrics(&self) -> TransferMetrics;

    /// Reset all counters
    fn reset_metrics(&self);

    /// Enable or disable counting
    fn set_metrics_enabled(&self, enabled: bool);

    /// Check if counting is enabled
    fn is_metrics_enabled(&self) -> bool;
}
