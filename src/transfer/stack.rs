//! Dual Transfer Stack
//!
//! A Treiber stack whose nodes are either all waiting producers or all
//! waiting consumers. An operation of the opposite kind does not pop a node
//! directly; it pushes a *fulfilling* node on top and then matches the first
//! live node below it. While a fulfilling node sits on top every other
//! arrival helps complete that match before retrying its own, so a stalled
//! fulfiller never blocks the stack.
//!
//! ```text
//! head -> [F|DATA] -> [REQ, cancelled] -> [REQ] -> [REQ] -> null
//!            |                              ^
//!            +--------- matches ------------+
//!
//! after the pop CAS: head -> [REQ] -> null
//! ```
//!
//! ## Removal
//!
//! Nodes leave the stack in two ways:
//!
//! - **Pop**: a CAS on `head` cuts off a run of nodes from the top.
//! - **Unlink**: a cancelled node below a live one is cut out with a CAS on
//!   its predecessor's `next`.
//!
//! Both first *mark* the `next` of every node they remove through its tag
//! bit, which freezes that link. An unlink CAS expects an unmarked link, so it
//! fails once its predecessor has been popped, and a pop walks the run it cut
//! off through the frozen links. Each node is therefore retired by exactly one
//! thread: the one whose CAS took it out of the stack.
//!
//! Cancelled nodes are skipped by fulfillers. The canceller's cleanup pass
//! pops them off the top and unlinks them from below live waiters.

use super::slot::Slot;
use super::wait::{self, Outcome};
use super::{Mode, Transfer, Transferer};
use crate::config::SpinConfig;
use crate::metrics::{AtomicMetrics, TransferMetrics};
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, trace};

const REQUEST: u8 = 0;
const DATA: u8 = 1;
const FULFILLING: u8 = 2;

const MARKED: usize = 1;

struct SNode<T> {
    mode: u8,
    slot: Arc<Slot<T>>,
    next: Atomic<SNode<T>>,
}

impl<T> SNode<T> {
    #[inline]
    fn is_fulfilling(&self) -> bool {
        self.mode & FULFILLING != 0
    }

    #[inline]
    fn is_cancelled(&self) -> bool {
        !self.is_fulfilling() && self.slot.is_cancelled()
    }

    #[inline]
    fn holds(&self, slot: &Arc<Slot<T>>) -> bool {
        Arc::ptr_eq(&self.slot, slot)
    }
}

/// LIFO dual stack backing the unfair [`SynchronousQueue`](crate::SynchronousQueue)
///
/// Never buffers: [`Mode::Async`] behaves like [`Mode::Now`].
///
/// # Examples
///
/// ```rust
/// use handoff::transfer::{Mode, Transfer, TransferStack, Transferer};
///
/// let stack: TransferStack<u32> = TransferStack::new();
/// // Nobody is waiting, so a non-blocking offer hands the value back.
/// assert_eq!(stack.transfer(Some(5), Mode::Now), Transfer::Unmatched(Some(5)));
/// ```
pub struct TransferStack<T> {
    head: CachePadded<Atomic<SNode<T>>>,
    config: SpinConfig,
    metrics: AtomicMetrics,
}

impl<T> TransferStack<T> {
    /// Create an empty stack with default spin tuning
    pub fn new() -> Self {
        Self::with_config(SpinConfig::default())
    }

    /// Create an empty stack with the given spin tuning
    pub fn with_config(config: SpinConfig) -> Self {
        Self {
            head: CachePadded::new(Atomic::null()),
            config,
            metrics: AtomicMetrics::default(),
        }
    }

    /// Spin tuning in use
    pub fn config(&self) -> &SpinConfig {
        &self.config
    }

    pub(crate) fn counters(&self) -> &AtomicMetrics {
        &self.metrics
    }

    fn node(
        spare: &mut Option<Owned<SNode<T>>>,
        mode: u8,
        slot: &Arc<Slot<T>>,
        next: Shared<'_, SNode<T>>,
    ) -> Owned<SNode<T>> {
        let mut node = spare.take().unwrap_or_else(|| {
            Owned::new(SNode {
                mode,
                slot: Arc::clone(slot),
                next: Atomic::null(),
            })
        });
        node.mode = mode;
        node.next.store(next, Ordering::Relaxed);
        node
    }

    /// Mark `node.next` and return the successor it is frozen at
    fn freeze<'g>(node: &SNode<T>, guard: &'g Guard) -> Shared<'g, SNode<T>> {
        let mut next = node.next.load(Ordering::Acquire, guard);
        while next.tag() == 0 {
            match node.next.compare_exchange(
                next,
                next.with_tag(MARKED),
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => break,
                Err(err) => next = err.current,
            }
        }
        next.with_tag(0)
    }

    /// CAS `head` from `h` to `nh`; the winner retires every node in `[h, nh)`
    ///
    /// `nh` must be null or the frozen successor of the deepest node removed,
    /// so no unlink can move it.
    fn pop<'g>(&self, h: Shared<'g, SNode<T>>, nh: Shared<'g, SNode<T>>, guard: &'g Guard) -> bool {
        if self
            .head
            .compare_exchange(h, nh, Ordering::AcqRel, Ordering::Acquire, guard)
            .is_err()
        {
            self.metrics.record_contention();
            return false;
        }
        let mut cur = h;
        while !cur.is_null() && cur != nh {
            // Freezing each link stops unlinkers working inside the cut-off
            // run; a node they already took out is no longer on this path.
            let next = Self::freeze(unsafe { cur.deref() }, guard);
            unsafe { guard.defer_destroy(cur) };
            cur = next;
        }
        true
    }

    /// First node below `f` that has not been cancelled
    fn first_waiter<'g>(f: &SNode<T>, guard: &'g Guard) -> Option<&'g SNode<T>> {
        let mut cur = f.next.load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { cur.with_tag(0).as_ref() } {
            if !node.slot.is_cancelled() {
                return Some(node);
            }
            cur = node.next.load(Ordering::Acquire, guard);
        }
        None
    }

    /// Match waiter `m` on behalf of fulfiller `f`
    fn try_match(&self, f: &SNode<T>, m: &SNode<T>) -> bool {
        debug_assert_ne!(f.slot.is_data(), m.slot.is_data());
        let matched = if f.slot.is_data() {
            m.slot.fill(f.slot.offered())
        } else {
            m.slot.take()
        };
        if matched {
            m.slot.wake();
            self.metrics.record_match();
        }
        matched
    }

    /// Complete the match of the fulfilling node at `h` and pop it
    fn help<'g>(&self, h: Shared<'g, SNode<T>>, guard: &'g Guard) {
        let f = unsafe { h.deref() };
        match Self::first_waiter(f, guard) {
            None => {
                self.pop(h, Shared::null(), guard);
            }
            Some(m) => {
                if self.try_match(f, m) || m.slot.is_matched() {
                    self.pop(h, Self::freeze(m, guard), guard);
                }
            }
        }
    }

    /// Push a fulfilling node over the opposite-mode top `h` and match
    ///
    /// `None` means the caller must retry from scratch: either the push lost
    /// or every waiter below it was cancelled.
    fn fulfill<'g>(
        &self,
        h: Shared<'g, SNode<T>>,
        mode: u8,
        slot: &Arc<Slot<T>>,
        spare: &mut Option<Owned<SNode<T>>>,
        guard: &'g Guard,
    ) -> Option<Transfer<T>> {
        let node = Self::node(spare, FULFILLING | mode, slot, h);
        let f = match self
            .head
            .compare_exchange(h, node, Ordering::AcqRel, Ordering::Acquire, guard)
        {
            Ok(f) => f,
            Err(err) => {
                self.metrics.record_contention();
                *spare = Some(err.new);
                return None;
            }
        };
        let fnode = unsafe { f.deref() };

        loop {
            let m = match Self::first_waiter(fnode, guard) {
                Some(m) => m,
                None => {
                    self.pop(f, Shared::null(), guard);
                    return None;
                }
            };
            // A node below us that is matched but not cancelled was matched
            // by a helper on our behalf.
            if !self.try_match(fnode, m) && !m.slot.is_matched() {
                trace!("fulfiller lost race to cancellation, rescanning");
                continue;
            }
            self.pop(f, Self::freeze(m, guard), guard);

            return Some(if slot.is_data() {
                slot.forget_offered();
                Transfer::Delivered
            } else {
                // Only our team matches nodes below us, so the payload is ours.
                Transfer::Received(*unsafe { m.slot.claim_offered() })
            });
        }
    }

    /// Remove the withdrawn node holding `slot` and the cancelled nodes above
    /// and directly below it
    ///
    /// Cancelled nodes on top are popped; below a live node they are
    /// unlinked from their predecessor. The pass stops at the first live node
    /// past our own, or at the bottom if another thread removed ours first.
    fn clean(&self, slot: &Arc<Slot<T>>) {
        let guard = &epoch::pin();
        let mut passed = false;
        let mut removed = 0usize;

        'restart: loop {
            let h = self.head.load(Ordering::Acquire, guard);
            let top = match unsafe { h.as_ref() } {
                Some(top) => top,
                None => break,
            };
            if top.is_cancelled() {
                let ours = top.holds(slot);
                if self.pop(h, Self::freeze(top, guard), guard) {
                    removed += 1;
                    passed |= ours;
                }
                continue;
            }
            if passed {
                break;
            }

            let mut pred = top;
            loop {
                let curp = pred.next.load(Ordering::Acquire, guard);
                if curp.tag() != 0 {
                    // Predecessor was taken out under us.
                    continue 'restart;
                }
                let cur = match unsafe { curp.as_ref() } {
                    Some(cur) => cur,
                    None => break 'restart,
                };
                if !cur.is_cancelled() {
                    if passed {
                        break 'restart;
                    }
                    pred = cur;
                    continue;
                }

                let ours = cur.holds(slot);
                let next = Self::freeze(cur, guard);
                if pred
                    .next
                    .compare_exchange(curp, next, Ordering::AcqRel, Ordering::Acquire, guard)
                    .is_err()
                {
                    self.metrics.record_contention();
                    continue 'restart;
                }
                unsafe { guard.defer_destroy(curp) };
                removed += 1;
                passed |= ours;
            }
        }

        if removed > 0 {
            debug!(removed, "removed cancelled nodes from the stack");
        }
    }

    /// Hand the payload of an unmatched data slot back to its owner
    fn give_back(&self, slot: &Slot<T>) -> Transfer<T> {
        if !slot.is_data() {
            return Transfer::Unmatched(None);
        }
        // No-op if the wait already cancelled it.
        let _ = slot.cancel();
        debug_assert!(slot.is_cancelled());
        Transfer::Unmatched(Some(*unsafe { slot.claim_offered() }))
    }

    fn count_live(&self, mode: u8) -> usize {
        let guard = &epoch::pin();
        let mut count = 0;
        let mut cur = self.head.load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { cur.with_tag(0).as_ref() } {
            if node.mode == mode && node.slot.is_live() {
                count += 1;
            }
            cur = node.next.load(Ordering::Acquire, guard);
        }
        count
    }

    /// Spins granted to the freshly pushed node `s`
    ///
    /// Only a node at the top, or one a fulfiller is already working down
    /// towards, is likely to be matched soon.
    fn spin_budget(&self, s: Shared<'_, SNode<T>>, timed: bool, guard: &Guard) -> u32 {
        let h = self.head.load(Ordering::Acquire, guard);
        let near_match = h == s || unsafe { h.as_ref() }.map_or(false, |top| top.is_fulfilling());
        match (near_match, timed) {
            (false, _) => 0,
            (true, true) => self.config.max_timed_spins,
            (true, false) => self.config.max_untimed_spins,
        }
    }

    #[cfg(test)]
    fn node_count(&self) -> usize {
        let guard = &epoch::pin();
        let mut count = 0;
        let mut cur = self.head.load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { cur.with_tag(0).as_ref() } {
            count += 1;
            cur = node.next.load(Ordering::Acquire, guard);
        }
        count
    }
}

impl<T: Send> Transferer<T> for TransferStack<T> {
    fn transfer(&self, item: Option<T>, mode: Mode) -> Transfer<T> {
        let slot = Arc::new(match item {
            Some(value) => Slot::data(Box::into_raw(Box::new(value))),
            None => Slot::request(),
        });
        let node_mode = if slot.is_data() { DATA } else { REQUEST };
        let may_wait = mode.may_wait();
        let deadline = mode.deadline();
        let mut spare = None;

        loop {
            let guard = epoch::pin();
            let h = self.head.load(Ordering::Acquire, &guard);
            let top = unsafe { h.as_ref() };

            match top {
                Some(top) if top.is_fulfilling() => {
                    self.help(h, &guard);
                    continue;
                }
                Some(top) if !top.slot.is_live() => {
                    self.pop(h, Self::freeze(top, &guard), &guard);
                    continue;
                }
                Some(top) if top.mode != node_mode => {
                    if let Some(result) = self.fulfill(h, node_mode, &slot, &mut spare, &guard) {
                        return result;
                    }
                    continue;
                }
                _ => {}
            }

            if !may_wait {
                drop(guard);
                self.metrics.record_unmatched();
                return self.give_back(&slot);
            }

            let node = Self::node(&mut spare, node_mode, &slot, h);
            let s = match self
                .head
                .compare_exchange(h, node, Ordering::AcqRel, Ordering::Acquire, &guard)
            {
                Ok(s) => s,
                Err(err) => {
                    self.metrics.record_contention();
                    spare = Some(err.new);
                    continue;
                }
            };

            let spins = self.spin_budget(s, mode.is_timed(), &guard);
            drop(guard);

            return match wait::await_match(&slot, deadline, spins, &self.config, &self.metrics) {
                Outcome::Cancelled => {
                    self.clean(&slot);
                    self.give_back(&slot)
                }
                Outcome::Matched => {
                    // Help pop our fulfiller if it is still on top.
                    let guard = &epoch::pin();
                    let h = self.head.load(Ordering::Acquire, guard);
                    if let Some(top) = unsafe { h.as_ref() } {
                        if top.is_fulfilling() {
                            if let Some(m) = Self::first_waiter(top, guard) {
                                if m.holds(&slot) {
                                    self.pop(h, Self::freeze(m, guard), guard);
                                }
                            }
                        }
                    }
                    if slot.is_data() {
                        Transfer::Delivered
                    } else {
                        Transfer::Received(*unsafe { slot.claim_delivered() })
                    }
                }
            };
        }
    }

    fn has_waiting_consumer(&self) -> bool {
        let guard = &epoch::pin();
        let mut cur = self.head.load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { cur.with_tag(0).as_ref() } {
            if node.mode == REQUEST && node.slot.is_live() {
                return true;
            }
            cur = node.next.load(Ordering::Acquire, guard);
        }
        false
    }

    fn waiting_consumer_count(&self) -> usize {
        self.count_live(REQUEST)
    }

    fn metrics(&self) -> TransferMetrics {
        self.metrics.snapshot()
    }
}

impl<T> Default for TransferStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TransferStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferStack")
            .field("waiting_producers", &self.count_live(DATA))
            .field("waiting_consumers", &self.count_live(REQUEST))
            .field("config", &self.config)
            .finish()
    }
}

impl<T> Drop for TransferStack<T> {
    fn drop(&mut self) {
        unsafe {
            let guard = epoch::unprotected();
            let mut cur = self.head.load(Ordering::Relaxed, guard);
            while !cur.is_null() {
                let next = cur.deref().next.load(Ordering::Relaxed, guard);
                drop(cur.into_owned());
                cur = next.with_tag(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn stack<T>() -> Arc<TransferStack<T>> {
        Arc::new(TransferStack::with_config(SpinConfig::no_spin()))
    }

    #[test]
    fn test_now_without_partner() {
        let stack = stack::<i32>();
        assert_eq!(stack.transfer(Some(1), Mode::Now), Transfer::Unmatched(Some(1)));
        assert_eq!(stack.transfer(None, Mode::Now), Transfer::Unmatched(None));
        assert_eq!(stack.transfer(Some(2), Mode::Async), Transfer::Unmatched(Some(2)));
        assert!(stack.head.load(Ordering::Acquire, &epoch::pin()).is_null());
        assert_eq!(stack.metrics().unmatched, 3);
    }

    #[test]
    fn test_rendezvous() {
        let stack = stack::<String>();
        let consumer = {
            let stack = Arc::clone(&stack);
            thread::spawn(move || stack.transfer(None, Mode::Sync))
        };
        while !stack.has_waiting_consumer() {
            thread::yield_now();
        }
        assert_eq!(stack.waiting_consumer_count(), 1);
        assert_eq!(stack.transfer(Some("hello".into()), Mode::Now), Transfer::Delivered);
        assert_eq!(
            consumer.join().unwrap(),
            Transfer::Received(String::from("hello"))
        );
        assert_eq!(stack.metrics().matches, 1);
    }

    #[test]
    fn test_timed_out_producer_gets_value_back() {
        let stack = stack::<u64>();
        let result = stack.transfer(Some(9), Mode::Timed(Duration::from_millis(10)));
        assert_eq!(result, Transfer::Unmatched(Some(9)));
        assert!(stack.head.load(Ordering::Acquire, &epoch::pin()).is_null());
        assert_eq!(stack.metrics().cancellations, 1);
    }

    #[test]
    fn test_fulfiller_skips_cancelled_waiters() {
        let stack = stack::<u32>();
        let patient = {
            let stack = Arc::clone(&stack);
            thread::spawn(move || stack.transfer(None, Mode::Sync))
        };
        while !stack.has_waiting_consumer() {
            thread::yield_now();
        }
        // An impatient consumer lands on top and gives up.
        assert_eq!(
            stack.transfer(None, Mode::Timed(Duration::from_millis(5))),
            Transfer::Unmatched(None)
        );
        assert_eq!(stack.transfer(Some(4), Mode::Now), Transfer::Delivered);
        assert_eq!(patient.join().unwrap(), Transfer::Received(4));
    }

    #[test]
    fn test_spin_budget_follows_fulfiller() {
        let stack = TransferStack::<u32>::with_config(
            SpinConfig::no_spin()
                .with_max_timed_spins(8)
                .with_max_untimed_spins(32),
        );
        let guard = &epoch::pin();

        let waiter = Arc::new(Slot::request());
        let s = TransferStack::<u32>::node(&mut None, REQUEST, &waiter, Shared::null())
            .into_shared(guard);
        stack.head.store(s, Ordering::Release);
        assert_eq!(stack.spin_budget(s, false, guard), 32);
        assert_eq!(stack.spin_budget(s, true, guard), 8);

        // Buried under another waiter: park straight away.
        let other = Arc::new(Slot::request());
        let above = TransferStack::<u32>::node(&mut None, REQUEST, &other, s).into_shared(guard);
        stack.head.store(above, Ordering::Release);
        assert_eq!(stack.spin_budget(s, false, guard), 0);

        // A fulfiller on top will reach us shortly.
        let data = Arc::new(Slot::data(Box::into_raw(Box::new(1u32))));
        let fulfiller = TransferStack::<u32>::node(&mut None, DATA | FULFILLING, &data, above)
            .into_shared(guard);
        stack.head.store(fulfiller, Ordering::Release);
        assert_eq!(stack.spin_budget(s, false, guard), 32);
        assert_eq!(stack.spin_budget(s, true, guard), 8);
    }

    #[test]
    fn test_cancelled_waiters_below_live_one_are_unlinked() {
        const TIMED: usize = 20;
        let stack = stack::<u32>();

        let impatient: Vec<_> = (0..TIMED)
            .map(|_| {
                let stack = Arc::clone(&stack);
                thread::spawn(move || stack.transfer(None, Mode::Timed(Duration::from_millis(500))))
            })
            .collect();
        while stack.waiting_consumer_count() < TIMED {
            thread::yield_now();
        }
        let patient = {
            let stack = Arc::clone(&stack);
            thread::spawn(move || stack.transfer(None, Mode::Sync))
        };
        while stack.waiting_consumer_count() < TIMED + 1 {
            thread::yield_now();
        }

        for handle in impatient {
            assert_eq!(handle.join().unwrap(), Transfer::Unmatched(None));
        }
        // Nothing above the patient consumer can pop the dead nodes under it.
        assert_eq!(stack.node_count(), 1);

        for _ in 0..5 {
            assert_eq!(
                stack.transfer(None, Mode::Timed(Duration::from_millis(1))),
                Transfer::Unmatched(None)
            );
        }
        assert_eq!(stack.node_count(), 1);
        assert_eq!(stack.metrics().cancellations, TIMED as u64 + 5);

        assert_eq!(stack.transfer(Some(3), Mode::Now), Transfer::Delivered);
        assert_eq!(patient.join().unwrap(), Transfer::Received(3));
        assert_eq!(stack.node_count(), 0);
    }

    #[test]
    fn test_cancel_storm_leaves_only_live_waiters() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 50;
        let stack = stack::<usize>();
        let patient = {
            let stack = Arc::clone(&stack);
            thread::spawn(move || stack.transfer(None, Mode::Sync))
        };
        while !stack.has_waiting_consumer() {
            thread::yield_now();
        }

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let stack = Arc::clone(&stack);
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        let result = stack.transfer(None, Mode::Timed(Duration::from_micros(200)));
                        assert_eq!(result, Transfer::Unmatched(None));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stack.node_count(), 1);
        assert_eq!(stack.waiting_consumer_count(), 1);
        assert_eq!(stack.transfer(Some(11), Mode::Now), Transfer::Delivered);
        assert_eq!(patient.join().unwrap(), Transfer::Received(11));
    }

    #[test]
    fn test_concurrent_pairs_exchange_every_value_once() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 250;
        let stack = Arc::new(TransferStack::<usize>::new());
        let received = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for t in 0..THREADS {
            let producer = Arc::clone(&stack);
            handles.push(thread::spawn(move || {
                for i in 0..PER_THREAD {
                    assert_eq!(
                        producer.transfer(Some(t * PER_THREAD + i), Mode::Sync),
                        Transfer::Delivered
                    );
                }
            }));
            let consumer = Arc::clone(&stack);
            let received = Arc::clone(&received);
            handles.push(thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    let value = consumer.transfer(None, Mode::Sync).into_received().unwrap();
                    received.fetch_add(value, Ordering::Relaxed);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let n = THREADS * PER_THREAD;
        assert_eq!(received.load(Ordering::Relaxed), n * (n - 1) / 2);
        assert_eq!(stack.metrics().matches, n as u64);
        assert_eq!(stack.waiting_consumer_count(), 0);
    }
}
