//! Work pipeline with delivery acknowledgement
//!
//! A dispatcher feeds jobs to a pool of workers through a
//! `LinkedTransferQueue`. Routine jobs are buffered with `put`; urgent jobs use
//! `transfer`, which returns only once a worker has picked the job up.
//! Workers hand results to a collector through a fair `SynchronousQueue`, and
//! are shut down by interrupting their blocked `take`.

use handoff::interrupt::{self, Interrupter};
use handoff::{BlockingQueue, LinkedTransferQueue, MetricsCollector, SynchronousQueue, TransferQueue};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Job {
    id: u64,
    urgent: bool,
    cost: u64,
}

#[derive(Debug)]
struct Outcome {
    job: u64,
    worker: usize,
    checksum: u64,
}

fn process(job: &Job) -> u64 {
    (0..job.cost).fold(job.id, |acc, i| acc.wrapping_mul(31).wrapping_add(i))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("Transfer pipeline example");
    println!("=========================");

    let num_workers = 4;
    let num_jobs = 2_000u64;

    let jobs = Arc::new(LinkedTransferQueue::new());
    let results = Arc::new(SynchronousQueue::with_fairness(true));

    // Each worker reports its interrupt handle before it starts blocking.
    let (handle_tx, handle_rx) = mpsc::channel::<Interrupter>();
    let mut workers = Vec::with_capacity(num_workers);
    for worker in 0..num_workers {
        let jobs = Arc::clone(&jobs);
        let results = Arc::clone(&results);
        let handle_tx = handle_tx.clone();
        workers.push(thread::spawn(move || {
            handle_tx.send(interrupt::current()).expect("dispatcher gone");
            let mut handled = 0u64;
            while let Ok(job) = jobs.take() {
                let checksum = process(&job);
                let outcome = Outcome {
                    job: job.id,
                    worker,
                    checksum,
                };
                if results.put(outcome).is_err() {
                    break;
                }
                handled += 1;
            }
            handled
        }));
    }
    drop(handle_tx);
    let interrupters: Vec<Interrupter> = handle_rx.iter().collect();

    let collector = {
        let results = Arc::clone(&results);
        thread::spawn(move || {
            let mut per_worker = vec![0u64; num_workers];
            let mut checksum = 0u64;
            for _ in 0..num_jobs {
                let outcome = results.take().expect("collector interrupted");
                per_worker[outcome.worker] += 1;
                checksum ^= outcome.checksum.rotate_left((outcome.job % 64) as u32);
            }
            (per_worker, checksum)
        })
    };

    let start = Instant::now();
    let mut urgent_latency = Duration::ZERO;
    let mut urgent = 0u32;
    for id in 0..num_jobs {
        let job = Job {
            id,
            urgent: id % 50 == 0,
            cost: 100 + id % 400,
        };
        if job.urgent {
            let sent = Instant::now();
            jobs.transfer(job).expect("dispatcher interrupted");
            urgent_latency += sent.elapsed();
            urgent += 1;
        } else {
            jobs.put(job).expect("unbounded put failed");
        }
    }

    let (per_worker, checksum) = collector.join().expect("collector panicked");
    let elapsed = start.elapsed();

    // Every job has been collected; the workers are now parked in `take`.
    while jobs.waiting_consumer_count() < num_workers {
        thread::yield_now();
    }
    for interrupter in &interrupters {
        interrupter.interrupt();
    }
    let handled: Vec<u64> = workers
        .into_iter()
        .map(|worker| worker.join().expect("worker panicked"))
        .collect();

    println!("\nResults:");
    println!("  Jobs processed: {}", per_worker.iter().sum::<u64>());
    println!("  Per worker: {:?}", handled);
    println!("  Checksum: {:#018x}", checksum);
    println!("  Elapsed: {:?}", elapsed);
    if urgent > 0 {
        println!("  Mean urgent hand-off: {:?}", urgent_latency / urgent);
    }

    let job_metrics = jobs.metrics();
    let result_metrics = results.metrics();
    println!("\nJob queue:");
    println!("  Matches: {}", job_metrics.matches);
    println!("  Buffered: {}", job_metrics.enqueued);
    println!("  Parks: {}", job_metrics.parks);
    println!("  Interrupts: {}", job_metrics.interrupts);
    println!("Result queue:");
    println!("  Matches: {}", result_metrics.matches);
    println!("  Match rate: {:.2}%", result_metrics.match_rate());
}
