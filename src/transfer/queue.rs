//! Dual Transfer Queue
//!
//! A linked FIFO whose live nodes are either all data or all requests. An
//! arriving operation scans from the front: the first live node of the
//! opposite mode is matched in place with one CAS on its slot; a live node of
//! the same mode means the caller must append and (usually) wait behind it.
//!
//! ```text
//! sentinel -> [D, matched] -> [D] -> [D] -> [D, cancelled] -> null
//!                               ^                               ^
//!                        first live node                  tail (hint)
//! ```
//!
//! ## Removal
//!
//! Dead nodes (matched or cancelled) are removed Harris-style: the node is
//! first *marked* through the tag bit of its own `next`, which freezes that
//! link, then cut out with a CAS on its unmarked predecessor's `next`. The
//! thread whose unlink CAS succeeds retires the node. A dead node that is
//! still the last node cannot be removed this way; it stays until something
//! is appended behind it.
//!
//! ## Tail
//!
//! `tail` is only a hint. It lags behind the last node and is advanced by
//! appenders, and before any node is unlinked the tail is pushed past it, so
//! the tail never refers to a retired node. Node sequence numbers increase
//! along the list, which keeps the tail moving forward only.
//!
//! ## Memory Ordering
//!
//! - Links are published with `AcqRel` CAS and read with `Acquire`
//! - A waiter never holds an epoch guard while parked; it keeps its slot
//!   alive through an `Arc` and finds its node again by walking from the
//!   sentinel when it has to withdraw it

use super::slot::Slot;
use super::wait::{self, Outcome};
use super::{Mode, Transfer, Transferer};
use crate::config::SpinConfig;
use crate::metrics::{AtomicMetrics, TransferMetrics};
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

const MARKED: usize = 1;

struct QNode<T> {
    seq: u64,
    // None only for the sentinel
    slot: Option<Arc<Slot<T>>>,
    next: Atomic<QNode<T>>,
}

impl<T> QNode<T> {
    #[inline]
    fn is_live(&self) -> bool {
        self.slot.as_ref().map_or(false, |slot| slot.is_live())
    }

    #[inline]
    fn holds(&self, slot: &Arc<Slot<T>>) -> bool {
        self.slot.as_ref().map_or(false, |own| Arc::ptr_eq(own, slot))
    }
}

/// What a cleanup pass found out about its target node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scrub {
    /// This pass unlinked the target
    Unlinked,
    /// The target is the last node and cannot be unlinked yet
    Trailing,
    /// The target was not found, so another thread removed it
    Missing,
}

/// FIFO dual queue backing [`LinkedTransferQueue`](crate::LinkedTransferQueue)
/// and the fair [`SynchronousQueue`](crate::SynchronousQueue)
///
/// A buffered queue links data for [`Mode::Async`] and returns at once; an
/// unbuffered one treats `Async` like [`Mode::Now`].
///
/// # Examples
///
/// ```rust
/// use handoff::transfer::{DualQueue, Mode, Transfer, Transferer};
///
/// let queue: DualQueue<&str> = DualQueue::new();
/// assert_eq!(queue.transfer(Some("a"), Mode::Async), Transfer::Delivered);
/// assert_eq!(queue.transfer(Some("b"), Mode::Async), Transfer::Delivered);
/// assert_eq!(queue.transfer(None, Mode::Now), Transfer::Received("a"));
/// assert_eq!(queue.len(), 1);
/// ```
pub struct DualQueue<T> {
    // The sentinel; never replaced
    head: CachePadded<Atomic<QNode<T>>>,
    tail: CachePadded<Atomic<QNode<T>>>,
    sweep_votes: AtomicUsize,
    buffered: bool,
    config: SpinConfig,
    metrics: AtomicMetrics,
}

impl<T> DualQueue<T> {
    /// Create an empty buffered queue with default spin tuning
    pub fn new() -> Self {
        Self::with_config(SpinConfig::default())
    }

    /// Create an empty buffered queue
    pub fn with_config(config: SpinConfig) -> Self {
        Self::build(config, true)
    }

    /// Create an empty zero-capacity queue, where `Async` never links a node
    pub fn unbuffered(config: SpinConfig) -> Self {
        Self::build(config, false)
    }

    fn build(config: SpinConfig, buffered: bool) -> Self {
        let sentinel = Owned::new(QNode {
            seq: 0,
            slot: None,
            next: Atomic::null(),
        })
        .into_shared(unsafe { epoch::unprotected() });

        Self {
            head: CachePadded::new(Atomic::from(sentinel)),
            tail: CachePadded::new(Atomic::from(sentinel)),
            sweep_votes: AtomicUsize::new(0),
            buffered,
            config,
            metrics: AtomicMetrics::default(),
        }
    }

    /// Whether `Async` data is linked without waiting
    pub fn is_buffered(&self) -> bool {
        self.buffered
    }

    /// Spin tuning in use
    pub fn config(&self) -> &SpinConfig {
        &self.config
    }

    pub(crate) fn counters(&self) -> &AtomicMetrics {
        &self.metrics
    }

    #[inline]
    fn sentinel<'g>(&self, guard: &'g Guard) -> Shared<'g, QNode<T>> {
        self.head.load(Ordering::Relaxed, guard)
    }

    /// Advance the tail hint until it is strictly past `node`
    fn push_tail_past(&self, node: &QNode<T>, guard: &Guard) {
        loop {
            let t = self.tail.load(Ordering::Acquire, guard);
            if unsafe { t.deref() }.seq > node.seq {
                return;
            }
            let mut last = t;
            loop {
                let next = unsafe { last.deref() }.next.load(Ordering::Acquire, guard);
                if next.is_null() {
                    break;
                }
                last = next.with_tag(0);
            }
            if self
                .tail
                .compare_exchange(t, last, Ordering::AcqRel, Ordering::Acquire, guard)
                .is_err()
            {
                self.metrics.record_contention();
            }
        }
    }

    /// Freeze the link of dead node `cur`, whose successor is `next`
    #[inline]
    fn mark(&self, cur: &QNode<T>, next: Shared<'_, QNode<T>>, guard: &Guard) -> bool {
        debug_assert!(!cur.is_live() && !next.is_null() && next.tag() == 0);
        cur.next
            .compare_exchange(
                next,
                next.with_tag(MARKED),
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            )
            .is_ok()
    }

    /// Cut marked node `cur` out from behind `pred`; the winner retires it
    fn unlink<'g>(
        &self,
        pred: &QNode<T>,
        cur: Shared<'g, QNode<T>>,
        next: Shared<'g, QNode<T>>,
        guard: &'g Guard,
    ) -> bool {
        self.push_tail_past(unsafe { cur.deref() }, guard);
        match pred
            .next
            .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Acquire, guard)
        {
            Ok(_) => {
                unsafe { guard.defer_destroy(cur) };
                true
            }
            Err(_) => {
                self.metrics.record_contention();
                false
            }
        }
    }

    /// Remove dead node `cur` from behind `pred` if it has a successor
    fn remove<'g>(
        &self,
        pred: &QNode<T>,
        cur: Shared<'g, QNode<T>>,
        guard: &'g Guard,
    ) -> bool {
        let node = unsafe { cur.deref() };
        let next = node.next.load(Ordering::Acquire, guard);
        if next.is_null() {
            return false;
        }
        if next.tag() == 0 && !self.mark(node, next, guard) {
            return false;
        }
        self.unlink(pred, cur, next.with_tag(0), guard)
    }

    /// Match the first live node if it has the opposite mode
    ///
    /// Dead nodes met on the way are removed. `None` means the caller has to
    /// append: the queue is empty, ends in a dead node, or its first live
    /// node has our mode.
    fn match_front(&self, slot: &Arc<Slot<T>>, guard: &Guard) -> Option<Transfer<T>> {
        let sentinel = unsafe { self.sentinel(guard).deref() };
        loop {
            let curp = sentinel.next.load(Ordering::Acquire, guard);
            let cur = unsafe { curp.as_ref() }?;
            let next = cur.next.load(Ordering::Acquire, guard);

            if next.tag() == 0 && cur.is_live() {
                let theirs = cur.slot.as_ref()?;
                if theirs.is_data() == slot.is_data() {
                    return None;
                }
                let matched = if slot.is_data() {
                    theirs.fill(slot.offered())
                } else {
                    theirs.take()
                };
                if !matched {
                    self.metrics.record_contention();
                    continue;
                }
                theirs.wake();
                self.metrics.record_match();
                self.remove(sentinel, curp, guard);

                return Some(if slot.is_data() {
                    slot.forget_offered();
                    Transfer::Delivered
                } else {
                    Transfer::Received(*unsafe { theirs.claim_offered() })
                });
            }

            if next.is_null() {
                return None;
            }
            self.remove(sentinel, curp, guard);
        }
    }

    /// Append a node holding `slot` after the last node
    ///
    /// Returns the predecessor the node was linked behind, or `None` if the
    /// last node is a live node of the opposite mode, in which case the
    /// caller should try to match again.
    fn try_append<'g>(
        &self,
        slot: &Arc<Slot<T>>,
        guard: &'g Guard,
    ) -> Option<Shared<'g, QNode<T>>> {
        let mut node = Owned::new(QNode {
            seq: 0,
            slot: Some(Arc::clone(slot)),
            next: Atomic::null(),
        });
        loop {
            let t = self.tail.load(Ordering::Acquire, guard);
            let mut pred = t;
            loop {
                let next = unsafe { pred.deref() }.next.load(Ordering::Acquire, guard);
                if next.is_null() {
                    break;
                }
                pred = next.with_tag(0);
            }

            let p = unsafe { pred.deref() };
            if let Some(last) = &p.slot {
                if last.is_live() && last.is_data() != slot.is_data() {
                    return None;
                }
            }

            node.seq = p.seq + 1;
            match p.next.compare_exchange(
                Shared::null(),
                node,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(s) => {
                    let _ = self
                        .tail
                        .compare_exchange(t, s, Ordering::AcqRel, Ordering::Relaxed, guard);
                    return Some(pred);
                }
                Err(err) => {
                    self.metrics.record_contention();
                    node = err.new;
                }
            }
        }
    }

    /// Whether a live node of the opposite mode sits ahead of ours
    fn behind_opposite(&self, slot: &Arc<Slot<T>>, guard: &Guard) -> bool {
        let sentinel = unsafe { self.sentinel(guard).deref() };
        let mut cur = sentinel.next.load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { cur.with_tag(0).as_ref() } {
            if node.holds(slot) {
                return false;
            }
            if let Some(theirs) = &node.slot {
                if theirs.is_live() {
                    return theirs.is_data() != slot.is_data();
                }
            }
            cur = node.next.load(Ordering::Acquire, guard);
        }
        false
    }

    /// Spin budget for a waiter linked behind `pred`
    fn spins_for(&self, pred: &QNode<T>, is_data: bool) -> u32 {
        let config = &self.config;
        match &pred.slot {
            None => config.front_spins,
            Some(p) if p.is_data() != is_data => {
                config.front_spins.saturating_add(config.chained_spins)
            }
            Some(p) if !p.is_live() => config.front_spins,
            Some(p) if p.has_waiter() => 0,
            Some(_) => config.chained_spins,
        }
    }

    /// Walk from the sentinel unlinking dead nodes
    ///
    /// With a target, stops once the target's node is dealt with; without
    /// one, scans the whole queue. Returns the number of nodes this pass
    /// unlinked.
    fn scrub(&self, target: Option<&Arc<Slot<T>>>, guard: &Guard) -> (Scrub, usize) {
        let mut removed = 0;
        'restart: loop {
            let mut pred = self.sentinel(guard);
            loop {
                let p = unsafe { pred.deref() };
                let curp = p.next.load(Ordering::Acquire, guard);
                if curp.tag() != 0 {
                    // Predecessor was marked under us.
                    continue 'restart;
                }
                let cur = match unsafe { curp.as_ref() } {
                    Some(cur) => cur,
                    None => return (Scrub::Missing, removed),
                };
                let next = cur.next.load(Ordering::Acquire, guard);
                if next.tag() == 0 && cur.is_live() {
                    pred = curp;
                    continue;
                }

                let is_target = target.map_or(false, |slot| cur.holds(slot));
                if next.is_null() {
                    let found = if is_target { Scrub::Trailing } else { Scrub::Missing };
                    return (found, removed);
                }
                if self.remove(p, curp, guard) {
                    removed += 1;
                    if is_target {
                        return (Scrub::Unlinked, removed);
                    }
                }
            }
        }
    }

    /// Remove the node of a withdrawn slot, or vote for a sweep if it is
    /// stuck at the end of the queue
    fn unsplice(&self, slot: &Arc<Slot<T>>) {
        let guard = &epoch::pin();
        let (found, _) = self.scrub(Some(slot), guard);
        if found != Scrub::Trailing {
            return;
        }
        let threshold = self.config.sweep_threshold.max(1) as usize;
        let votes = self.sweep_votes.fetch_add(1, Ordering::AcqRel) + 1;
        if votes >= threshold
            && self
                .sweep_votes
                .compare_exchange(votes, 0, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            self.sweep(guard);
        }
    }

    /// Unlink every removable dead node
    fn sweep(&self, guard: &Guard) {
        let (_, removed) = self.scrub(None, guard);
        self.metrics.record_sweep();
        debug!(removed, "swept dual queue");
    }

    /// Hand the payload of an unmatched data slot back to its owner
    fn give_back(slot: &Slot<T>) -> Transfer<T> {
        if !slot.is_data() {
            return Transfer::Unmatched(None);
        }
        let _ = slot.cancel();
        debug_assert!(slot.is_cancelled());
        Transfer::Unmatched(Some(*unsafe { slot.claim_offered() }))
    }

    /// A fresh unpublished slot carrying the same payload as `old`
    ///
    /// `old` must already be cancelled by its owner.
    fn respawn(old: &Slot<T>) -> Slot<T> {
        debug_assert!(old.is_cancelled());
        if old.is_data() {
            Slot::data(old.offered())
        } else {
            Slot::request()
        }
    }

    fn count_live(&self, data: bool) -> usize {
        let guard = &epoch::pin();
        let sentinel = unsafe { self.sentinel(guard).deref() };
        let mut count = 0;
        let mut cur = sentinel.next.load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { cur.with_tag(0).as_ref() } {
            if let Some(slot) = &node.slot {
                if slot.is_data() == data && slot.is_live() {
                    count += 1;
                }
            }
            cur = node.next.load(Ordering::Acquire, guard);
        }
        count
    }

    /// Number of unmatched data items
    pub fn len(&self) -> usize {
        self.count_live(true)
    }

    /// Whether no unmatched data item is present
    pub fn is_empty(&self) -> bool {
        self.first_live_is(true) != Some(true)
    }

    /// Mode of the first live node, compared against `data`
    fn first_live_is(&self, data: bool) -> Option<bool> {
        let guard = &epoch::pin();
        let sentinel = unsafe { self.sentinel(guard).deref() };
        let mut cur = sentinel.next.load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { cur.with_tag(0).as_ref() } {
            if let Some(slot) = &node.slot {
                if slot.is_live() {
                    return Some(slot.is_data() == data);
                }
            }
            cur = node.next.load(Ordering::Acquire, guard);
        }
        None
    }

    #[cfg(test)]
    fn node_count(&self) -> usize {
        let guard = &epoch::pin();
        let sentinel = unsafe { self.sentinel(guard).deref() };
        let mut count = 0;
        let mut cur = sentinel.next.load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { cur.with_tag(0).as_ref() } {
            count += 1;
            cur = node.next.load(Ordering::Acquire, guard);
        }
        count
    }

    /// Sequence number of the tail node, how many links it trails the last
    /// node by, and whether it is still reachable from the sentinel
    #[cfg(test)]
    fn tail_position(&self) -> (u64, usize, bool) {
        let guard = &epoch::pin();
        let t = self.tail.load(Ordering::Acquire, guard);
        let tail = unsafe { t.deref() };

        let mut hops = 0;
        let mut cur = tail.next.load(Ordering::Acquire, guard).with_tag(0);
        while let Some(node) = unsafe { cur.as_ref() } {
            hops += 1;
            cur = node.next.load(Ordering::Acquire, guard).with_tag(0);
        }

        let mut reachable = false;
        let mut cur = self.sentinel(guard);
        while let Some(node) = unsafe { cur.as_ref() } {
            if cur == t {
                reachable = true;
                break;
            }
            cur = node.next.load(Ordering::Acquire, guard).with_tag(0);
        }
        (tail.seq, hops, reachable)
    }
}

impl<T: Send> Transferer<T> for DualQueue<T> {
    fn transfer(&self, item: Option<T>, mode: Mode) -> Transfer<T> {
        let mut slot = Arc::new(match item {
            Some(value) => Slot::data(Box::into_raw(Box::new(value))),
            None => Slot::request(),
        });
        let is_data = slot.is_data();
        let linger = mode == Mode::Async && self.buffered && is_data;
        let may_wait = mode.may_wait();
        let deadline = mode.deadline();

        loop {
            let guard = epoch::pin();
            if let Some(result) = self.match_front(&slot, &guard) {
                return result;
            }
            if !may_wait && !linger {
                drop(guard);
                self.metrics.record_unmatched();
                return Self::give_back(&slot);
            }

            let pred = match self.try_append(&slot, &guard) {
                Some(pred) => pred,
                None => continue,
            };
            let p = unsafe { pred.deref() };

            // A live partner may have been linked ahead of us between the
            // scan and the append.
            if p.slot.is_some() && self.behind_opposite(&slot, &guard) {
                if slot.cancel() {
                    trace!("withdrew node appended behind a live partner");
                    drop(guard);
                    self.unsplice(&slot);
                    slot = Arc::new(Self::respawn(&slot));
                    continue;
                }
                // Matched meanwhile; the wait below returns at once.
            }

            if linger {
                self.metrics.record_enqueue();
                return Transfer::Delivered;
            }

            let spins = self.spins_for(p, is_data);
            drop(guard);

            return match wait::await_match(&slot, deadline, spins, &self.config, &self.metrics) {
                Outcome::Cancelled => {
                    self.unsplice(&slot);
                    Self::give_back(&slot)
                }
                Outcome::Matched if is_data => Transfer::Delivered,
                Outcome::Matched => Transfer::Received(*unsafe { slot.claim_delivered() }),
            };
        }
    }

    fn has_waiting_consumer(&self) -> bool {
        self.first_live_is(false) == Some(true)
    }

    fn waiting_consumer_count(&self) -> usize {
        self.count_live(false)
    }

    fn metrics(&self) -> TransferMetrics {
        self.metrics.snapshot()
    }
}

impl<T> Default for DualQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for DualQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualQueue")
            .field("len", &self.len())
            .field("waiting_consumers", &self.count_live(false))
            .field("buffered", &self.buffered)
            .field("config", &self.config)
            .finish()
    }
}

impl<T> Drop for DualQueue<T> {
    fn drop(&mut self) {
        unsafe {
            let guard = epoch::unprotected();
            let mut cur = self.head.load(Ordering::Relaxed, guard);
            while !cur.is_null() {
                let next = cur.deref().next.load(Ordering::Relaxed, guard);
                drop(cur.with_tag(0).into_owned());
                cur = next.with_tag(0);
            }
        }
    }
}
