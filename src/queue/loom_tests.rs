//! Loom-based model checking of the slot hand-off protocol
//!
//! The engines are built on crossbeam-epoch, which loom cannot instrument,
//! so these tests model the slot protocol itself with loom's atomics and
//! explore every interleaving of a match racing a cancellation and of a
//! wake-up racing a waiter going to sleep.

#[cfg(test)]
mod loom_tests {
    use loom::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
    use loom::sync::{Arc, Mutex};
    use loom::thread::{self, Thread};
    use std::ptr;

    const UNMATCHED: usize = 0;
    const MATCHED: usize = 1;
    const CANCELLED: usize = 2;

    /// The slot state machine: one CAS moves `item` away from its initial value
    ///
    /// `waiter` is handed over the same way as the real slot's signal: the
    /// owner swaps a boxed handle in, and whoever swaps it out owns it.
    struct ModelSlot {
        item: AtomicUsize,
        waiter: AtomicPtr<Thread>,
    }

    impl ModelSlot {
        fn new() -> Self {
            Self {
                item: AtomicUsize::new(UNMATCHED),
                waiter: AtomicPtr::new(ptr::null_mut()),
            }
        }

        fn try_match(&self) -> bool {
            self.item
                .compare_exchange(UNMATCHED, MATCHED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        }

        fn cancel(&self) -> bool {
            self.item
                .compare_exchange(UNMATCHED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        }

        fn is_matched(&self) -> bool {
            self.item.load(Ordering::Acquire) == MATCHED
        }

        fn register(&self) {
            let raw = Box::into_raw(Box::new(thread::current()));
            let old = self.waiter.swap(raw, Ordering::AcqRel);
            if !old.is_null() {
                drop(unsafe { Box::from_raw(old) });
            }
        }

        fn clear(&self) {
            let old = self.waiter.swap(ptr::null_mut(), Ordering::AcqRel);
            if !old.is_null() {
                drop(unsafe { Box::from_raw(old) });
            }
        }

        fn wake(&self) {
            let waiter = self.waiter.swap(ptr::null_mut(), Ordering::AcqRel);
            if !waiter.is_null() {
                unsafe { Box::from_raw(waiter) }.unpark();
            }
        }
    }

    impl Drop for ModelSlot {
        fn drop(&mut self) {
            self.clear();
        }
    }

    #[test]
    fn test_match_and_cancel_single_winner() {
        loom::model(|| {
            let slot = Arc::new(ModelSlot::new());

            let matcher = {
                let slot = Arc::clone(&slot);
                thread::spawn(move || slot.try_match())
            };
            let cancelled = slot.cancel();
            let matched = matcher.join().unwrap();

            assert!(matched ^ cancelled);
            let expected = if matched { MATCHED } else { CANCELLED };
            assert_eq!(slot.item.load(Ordering::Acquire), expected);
        });
    }

    #[test]
    fn test_two_matchers_one_winner() {
        loom::model(|| {
            let slot = Arc::new(ModelSlot::new());
            let wins = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let slot = Arc::clone(&slot);
                    let wins = Arc::clone(&wins);
                    thread::spawn(move || {
                        if slot.try_match() {
                            wins.fetch_add(1, Ordering::Relaxed);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(wins.load(Ordering::Relaxed), 1);
        });
    }

    #[test]
    fn test_no_lost_wakeup() {
        loom::model(|| {
            let slot = Arc::new(ModelSlot::new());

            // The owner registers once, re-checks, then parks until matched.
            let waiter = {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    if !slot.is_matched() {
                        slot.register();
                        while !slot.is_matched() {
                            thread::park();
                        }
                    }
                    slot.clear();
                })
            };

            assert!(slot.try_match());
            slot.wake();
            waiter.join().unwrap();
        });
    }

    #[test]
    fn test_cancelled_waiter_is_not_woken() {
        loom::model(|| {
            let slot = Arc::new(ModelSlot::new());

            let owner = {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    slot.register();
                    let cancelled = slot.cancel();
                    // Either way the owner is done waiting.
                    slot.clear();
                    cancelled
                })
            };

            let matched = slot.try_match();
            if matched {
                slot.wake();
            }
            let cancelled = owner.join().unwrap();
            assert!(matched ^ cancelled);
            assert!(slot.waiter.load(Ordering::Acquire).is_null());
        });
    }

    #[test]
    fn test_interrupt_flag_then_unpark() {
        loom::model(|| {
            let flag = Arc::new(AtomicBool::new(false));
            let parked: Arc<Mutex<Option<Thread>>> = Arc::new(Mutex::new(None));

            let waiter = {
                let flag = Arc::clone(&flag);
                let parked = Arc::clone(&parked);
                thread::spawn(move || {
                    *parked.lock().unwrap() = Some(thread::current());
                    while !flag.load(Ordering::SeqCst) {
                        thread::park();
                    }
                })
            };

            flag.store(true, Ordering::SeqCst);
            if let Some(handle) = parked.lock().unwrap().take() {
                handle.unpark();
            }
            waiter.join().unwrap();
        });
    }
}
