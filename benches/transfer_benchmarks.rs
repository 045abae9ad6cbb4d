//! Throughput benchmarks for the transfer queues
//!
//! Compares handoff's queues against the crossbeam channels with the closest
//! semantics:
//! - `SynchronousQueue` (fair and unfair) vs `crossbeam::channel::bounded(0)`
//! - `LinkedTransferQueue` vs `crossbeam::channel::unbounded`
//!
//! `withdraw_behind_buffer` measures a timed transfer that gives up behind a
//! long buffer, whose node has to be found again by walking the whole queue.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use crossbeam::channel::{bounded as crossbeam_bounded, unbounded as crossbeam_unbounded};
use handoff::{BlockingQueue, LinkedTransferQueue, SynchronousQueue, TransferQueue};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const MESSAGES: usize = 20_000;
const PAIR_COUNTS: &[usize] = &[1, 2, 4];
const BUFFER_DEPTHS: &[usize] = &[0, 1_000, 10_000];

/// Run `pairs` producer/consumer pairs over a shared queue
fn run_pairs<Q>(queue: Arc<Q>, pairs: usize, send: fn(&Q, usize), recv: fn(&Q) -> usize)
where
    Q: Send + Sync + 'static,
{
    let per_thread = MESSAGES / pairs;
    let barrier = Arc::new(Barrier::new(pairs * 2));
    let mut handles = Vec::with_capacity(pairs * 2);

    for _ in 0..pairs {
        let producer_queue = Arc::clone(&queue);
        let producer_barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            producer_barrier.wait();
            for i in 0..per_thread {
                send(&producer_queue, i);
            }
        }));

        let consumer_queue = Arc::clone(&queue);
        let consumer_barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            consumer_barrier.wait();
            for _ in 0..per_thread {
                black_box(recv(&consumer_queue));
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

fn bench_synchronous_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("synchronous_handoff");
    group.sample_size(20);

    for &pairs in PAIR_COUNTS {
        group.throughput(Throughput::Elements(MESSAGES as u64));

        group.bench_with_input(BenchmarkId::new("handoff_unfair", pairs), &pairs, |b, &pairs| {
            b.iter(|| {
                run_pairs(
                    Arc::new(SynchronousQueue::<usize>::new()),
                    pairs,
                    |q, v| q.put(v).unwrap(),
                    |q| q.take().unwrap(),
                )
            })
        });

        group.bench_with_input(BenchmarkId::new("handoff_fair", pairs), &pairs, |b, &pairs| {
            b.iter(|| {
                run_pairs(
                    Arc::new(SynchronousQueue::<usize>::with_fairness(true)),
                    pairs,
                    |q, v| q.put(v).unwrap(),
                    |q| q.take().unwrap(),
                )
            })
        });

        group.bench_with_input(BenchmarkId::new("crossbeam_bounded_0", pairs), &pairs, |b, &pairs| {
            b.iter(|| {
                run_pairs(
                    Arc::new(crossbeam_bounded::<usize>(0)),
                    pairs,
                    |(tx, _), v| tx.send(v).unwrap(),
                    |(_, rx)| rx.recv().unwrap(),
                )
            })
        });
    }

    group.finish();
}

fn bench_buffered_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffered_queue");
    group.sample_size(20);

    for &pairs in PAIR_COUNTS {
        group.throughput(Throughput::Elements(MESSAGES as u64));

        group.bench_with_input(BenchmarkId::new("handoff_linked_transfer", pairs), &pairs, |b, &pairs| {
            b.iter(|| {
                run_pairs(
                    Arc::new(LinkedTransferQueue::<usize>::new()),
                    pairs,
                    |q, v| q.put(v).unwrap(),
                    |q| q.take().unwrap(),
                )
            })
        });

        group.bench_with_input(BenchmarkId::new("crossbeam_unbounded", pairs), &pairs, |b, &pairs| {
            b.iter(|| {
                run_pairs(
                    Arc::new(crossbeam_unbounded::<usize>()),
                    pairs,
                    |(tx, _), v| tx.send(v).unwrap(),
                    |(_, rx)| rx.recv().unwrap(),
                )
            })
        });
    }

    group.finish();
}

fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_thread");
    group.throughput(Throughput::Elements(1));

    let queue = LinkedTransferQueue::new();
    group.bench_function("linked_transfer_put_poll", |b| {
        b.iter(|| {
            queue.put(black_box(42u64)).unwrap();
            black_box(queue.poll());
        })
    });

    let (tx, rx) = crossbeam_unbounded();
    group.bench_function("crossbeam_unbounded_send_recv", |b| {
        b.iter(|| {
            tx.send(black_box(42u64)).unwrap();
            black_box(rx.try_recv().ok());
        })
    });

    let sync: SynchronousQueue<u64> = SynchronousQueue::new();
    group.bench_function("synchronous_offer_miss", |b| {
        b.iter(|| black_box(sync.offer(black_box(7)).is_err()))
    });

    let empty: LinkedTransferQueue<u64> = LinkedTransferQueue::new();
    group.bench_function("linked_transfer_try_transfer_miss", |b| {
        b.iter(|| black_box(empty.try_transfer(black_box(7)).is_err()))
    });

    group.finish();
}

fn bench_withdraw_behind_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("withdraw_behind_buffer");
    group.sample_size(20);
    group.throughput(Throughput::Elements(1));

    for &depth in BUFFER_DEPTHS {
        let queue = LinkedTransferQueue::new();
        for i in 0..depth {
            queue.put(i).unwrap();
        }
        group.bench_with_input(BenchmarkId::new("try_transfer_timeout", depth), &depth, |b, _| {
            b.iter(|| {
                black_box(
                    queue
                        .try_transfer_timeout(black_box(usize::MAX), Duration::from_micros(1))
                        .is_err(),
                )
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_synchronous_handoff,
    bench_buffered_queue,
    bench_single_thread,
    bench_withdraw_behind_buffer
);
criterion_main!(benches);
