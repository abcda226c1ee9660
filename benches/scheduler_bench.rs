//! Benchmarks for the scheduler.
//!
//! Covers priority-ordered enqueue/dequeue on an otherwise quiet engine and
//! end-to-end execution throughput across worker counts.

use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use threadloom::{ClosureJob, JobHandle, Scheduler, SchedulerConfig};

fn make_jobs(count: usize) -> Vec<JobHandle> {
    (0..count)
        .map(|index| -> JobHandle {
            ClosureJob::with_priority((index % 7) as i32, |_job, _thread| Ok(()))
        })
        .collect()
}

fn bench_enqueue_priority_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue");
    for size in [64usize, 256, 1024] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            // suspended engine: inserts are measured, dispatch is not
            let scheduler = Scheduler::new(SchedulerConfig::new().with_max_threads(1));
            scheduler.suspend();
            b.iter(|| {
                scheduler.enqueue(make_jobs(size));
                black_box(scheduler.queue_length());
                scheduler.dequeue_all();
            });
            scheduler.shutdown();
        });
    }
    group.finish();
}

fn bench_execute_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute");
    group.sample_size(10);
    for workers in [1usize, 4] {
        group.throughput(Throughput::Elements(256));
        group.bench_with_input(
            BenchmarkId::new("workers", workers),
            &workers,
            |b, &workers| {
                let scheduler = Scheduler::new(SchedulerConfig::new().with_max_threads(workers));
                b.iter(|| {
                    let counter = Arc::new(AtomicUsize::new(0));
                    let jobs: Vec<JobHandle> = (0..256)
                        .map(|_| -> JobHandle {
                            let counter = Arc::clone(&counter);
                            ClosureJob::new(move |_job, _thread| {
                                counter.fetch_add(1, Ordering::Relaxed);
                                Ok(())
                            })
                        })
                        .collect();
                    scheduler.enqueue(jobs);
                    scheduler.finish();
                    black_box(counter.load(Ordering::Relaxed))
                });
                scheduler.shutdown();
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_enqueue_priority_insert, bench_execute_throughput);
criterion_main!(benches);
