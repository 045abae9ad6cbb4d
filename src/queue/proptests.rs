//! Property-based tests for the public queues using proptest
//!
//! Single-threaded operation sequences are checked against a `VecDeque`
//! model; zero-capacity queues are checked to never retain anything.

use crate::config::SpinConfig;
use crate::metrics::MetricsCollector;
use crate::queue::{BlockingQueue, LinkedTransferQueue, SynchronousQueue, TransferQueue};
use proptest::prelude::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Op {
    Put(i32),
    TryTransfer(i32),
    Poll,
    PollTimeout,
    Len,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<i32>().prop_map(Op::Put),
        1 => any::<i32>().prop_map(Op::TryTransfer),
        3 => Just(Op::Poll),
        1 => Just(Op::PollTimeout),
        1 => Just(Op::Len),
    ]
}

#[cfg(test)]
mod linked_transfer_properties {
    use super::*;

    proptest! {
        #[test]
        fn test_matches_fifo_model(ops in prop::collection::vec(op_strategy(), 1..200)) {
            let queue = LinkedTransferQueue::with_config(SpinConfig::no_spin());
            let mut model = VecDeque::new();

            for op in ops {
                match op {
                    Op::Put(value) => {
                        prop_assert!(queue.put(value).is_ok());
                        model.push_back(value);
                    }
                    Op::TryTransfer(value) => {
                        // Single-threaded: nobody can be waiting.
                        let err = queue.try_transfer(value).unwrap_err();
                        prop_assert_eq!(err.into_inner(), value);
                    }
                    Op::Poll => prop_assert_eq!(queue.poll(), model.pop_front()),
                    Op::PollTimeout => {
                        let got = queue.poll_timeout(Duration::from_micros(50)).unwrap();
                        prop_assert_eq!(got, model.pop_front());
                    }
                    Op::Len => prop_assert_eq!(queue.len(), model.len()),
                }
            }

            prop_assert_eq!(queue.len(), model.len());
            prop_assert_eq!(queue.is_empty(), model.is_empty());
            prop_assert!(!queue.has_waiting_consumer());
            let mut drained = Vec::new();
            queue.drain_into(&mut drained);
            prop_assert_eq!(drained, Vec::from(model));
        }

        #[test]
        fn test_every_buffered_value_dropped_once(
            puts in 0usize..64,
            polls in 0usize..64,
        ) {
            struct Counted(Arc<AtomicUsize>);
            impl Drop for Counted {
                fn drop(&mut self) {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }

            let drops = Arc::new(AtomicUsize::new(0));
            {
                let queue = LinkedTransferQueue::new();
                for _ in 0..puts {
                    queue.put(Counted(Arc::clone(&drops))).ok();
                }
                for _ in 0..polls {
                    drop(queue.poll());
                }
                prop_assert_eq!(drops.load(Ordering::SeqCst), puts.min(polls));
            }
            prop_assert_eq!(drops.load(Ordering::SeqCst), puts);
        }
    }
}

#[cfg(test)]
mod synchronous_properties {
    use super::*;

    proptest! {
        #[test]
        fn test_zero_capacity_never_retains(
            fair in any::<bool>(),
            ops in prop::collection::vec(op_strategy(), 1..100),
        ) {
            let queue = SynchronousQueue::with_config(fair, SpinConfig::no_spin());
            let mut misses = 0u64;

            for op in ops {
                match op {
                    Op::Put(value) | Op::TryTransfer(value) => {
                        let err = queue.offer(value).unwrap_err();
                        prop_assert!(!err.is_timeout() && !err.is_interrupted());
                        prop_assert_eq!(err.into_inner(), value);
                        misses += 1;
                    }
                    Op::Poll => {
                        prop_assert_eq!(queue.poll(), None);
                        misses += 1;
                    }
                    Op::PollTimeout => {
                        prop_assert_eq!(queue.poll_timeout(Duration::from_micros(20)), Ok(None));
                    }
                    Op::Len => {
                        prop_assert_eq!(queue.len(), 0);
                        prop_assert_eq!(queue.remaining_capacity(), 0);
                    }
                }
                prop_assert!(!queue.has_waiting_consumer());
                prop_assert_eq!(queue.waiting_consumer_count(), 0);
            }

            let metrics = queue.metrics();
            prop_assert_eq!(metrics.matches, 0);
            prop_assert_eq!(metrics.unmatched, misses);
        }
    }
}
