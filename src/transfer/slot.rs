//! Matchable node state
//!
//! A slot is the part of a node that two threads race on. It lives behind an
//! `Arc` shared by the structure's node and the thread waiting on it, so the
//! waiter can keep observing its slot after the node itself has been unlinked
//! and handed to the epoch collector.
//!
//! ```text
//!               unmatched        matched          cancelled
//! DATA slot     offered (Box)    null             &self
//! REQUEST slot  null             delivered (Box)  &self
//! ```
//!
//! The item leaves its initial value at most once. Whichever CAS does it
//! (a match or the owner's cancellation) decides the outcome.

use crate::interrupt::Signal;
use core::fmt;
use core::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

pub(crate) struct Slot<T> {
    is_data: bool,
    item: AtomicPtr<T>,
    // Payload as first published; null for requests
    offered: *mut T,
    waiter: AtomicPtr<Signal>,
}

// Payloads only ever move between threads through a successful CAS.
unsafe impl<T: Send> Send for Slot<T> {}
unsafe impl<T: Send> Sync for Slot<T> {}

impl<T> Slot<T> {
    /// A data slot owning `payload`, which must come from `Box::into_raw`
    pub(crate) fn data(payload: *mut T) -> Self {
        debug_assert!(!payload.is_null());
        Self {
            is_data: true,
            item: AtomicPtr::new(payload),
            offered: payload,
            waiter: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// An empty request slot
    pub(crate) fn request() -> Self {
        Self {
            is_data: false,
            item: AtomicPtr::new(ptr::null_mut()),
            offered: ptr::null_mut(),
            waiter: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[inline]
    fn cancelled(&self) -> *mut T {
        self as *const Self as *mut T
    }

    #[inline]
    fn initial(&self) -> *mut T {
        self.offered
    }

    #[inline]
    pub(crate) fn is_data(&self) -> bool {
        self.is_data
    }

    /// The payload pointer this data slot was created with
    #[inline]
    pub(crate) fn offered(&self) -> *mut T {
        self.offered
    }

    /// Whether the slot can still be matched
    #[inline]
    pub(crate) fn is_live(&self) -> bool {
        self.item.load(Ordering::Acquire) == self.initial()
    }

    #[inline]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.item.load(Ordering::Acquire) == self.cancelled()
    }

    /// Whether a partner has matched this slot
    #[inline]
    pub(crate) fn is_matched(&self) -> bool {
        let item = self.item.load(Ordering::Acquire);
        item != self.initial() && item != self.cancelled()
    }

    /// Match a data slot from the request side
    ///
    /// On `true` the payload now belongs to the request side, to be claimed
    /// with [`claim_offered`](Self::claim_offered).
    pub(crate) fn take(&self) -> bool {
        debug_assert!(self.is_data);
        self.item
            .compare_exchange(
                self.offered,
                ptr::null_mut(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Match a request slot by handing it `payload`
    ///
    /// On `true` ownership of `payload` has passed to the slot's owner.
    pub(crate) fn fill(&self, payload: *mut T) -> bool {
        debug_assert!(!self.is_data);
        self.item
            .compare_exchange(
                ptr::null_mut(),
                payload,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Whether this request slot was filled with exactly `payload`
    #[cfg(test)]
    pub(crate) fn holds(&self, payload: *mut T) -> bool {
        self.item.load(Ordering::Acquire) == payload
    }

    /// Withdraw an unmatched slot; `false` means a match won the race
    pub(crate) fn cancel(&self) -> bool {
        self.item
            .compare_exchange(
                self.initial(),
                self.cancelled(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Forget the payload of a data slot whose value was delivered elsewhere
    ///
    /// Used by a stack fulfiller, whose own slot is never matched in place.
    pub(crate) fn forget_offered(&self) {
        debug_assert!(self.is_data);
        self.item.store(ptr::null_mut(), Ordering::Release);
    }

    /// Take ownership of the offered payload
    ///
    /// # Safety
    ///
    /// The caller must be the unique owner of the payload: either it matched
    /// this slot with [`take`](Self::take), or it owns the slot and withdrew
    /// it with [`cancel`](Self::cancel). Must be called at most once.
    pub(crate) unsafe fn claim_offered(&self) -> Box<T> {
        debug_assert!(self.is_data && !self.offered.is_null());
        Box::from_raw(self.offered)
    }

    /// Take the value delivered to a matched request slot
    ///
    /// # Safety
    ///
    /// The caller must own this request slot, must have observed it matched,
    /// and must call this at most once.
    pub(crate) unsafe fn claim_delivered(&self) -> Box<T> {
        let item = self.item.load(Ordering::Acquire);
        debug_assert!(!self.is_data && !item.is_null() && item != self.cancelled());
        Box::from_raw(item)
    }

    /// Record `signal` as the thread to wake on a match
    pub(crate) fn register_waiter(&self, signal: &Arc<Signal>) {
        let raw = Arc::into_raw(Arc::clone(signal)) as *mut Signal;
        let old = self.waiter.swap(raw, Ordering::AcqRel);
        if !old.is_null() {
            drop(unsafe { Arc::from_raw(old) });
        }
    }

    /// Clear the waiter once the owner no longer needs waking
    pub(crate) fn clear_waiter(&self) {
        let old = self.waiter.swap(ptr::null_mut(), Ordering::AcqRel);
        if !old.is_null() {
            drop(unsafe { Arc::from_raw(old) });
        }
    }

    /// Whether a waiter has registered and not yet been woken
    #[inline]
    pub(crate) fn has_waiter(&self) -> bool {
        !self.waiter.load(Ordering::Acquire).is_null()
    }

    /// Wake the registered waiter, if any
    ///
    /// Called by the thread whose CAS matched this slot. The waiter either
    /// registered before this swap and gets unparked, or registers after it
    /// and sees the match on its re-check.
    pub(crate) fn wake(&self) {
        let waiter = self.waiter.swap(ptr::null_mut(), Ordering::AcqRel);
        if !waiter.is_null() {
            let signal = unsafe { Arc::from_raw(waiter) };
            signal.unpark();
        }
    }
}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        let item = *self.item.get_mut();
        // Buffered data nobody took.
        if self.is_data && item == self.offered {
            drop(unsafe { Box::from_raw(item) });
        }
        let waiter = *self.waiter.get_mut();
        if !waiter.is_null() {
            drop(unsafe { Arc::from_raw(waiter) });
        }
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_live() {
            "live"
        } else if self.is_cancelled() {
            "cancelled"
        } else {
            "matched"
        };
        f.debug_struct("Slot")
            .field("is_data", &self.is_data)
            .field("state", &state)
            .field("has_waiter", &self.has_waiter())
            .finish()
    }
}
