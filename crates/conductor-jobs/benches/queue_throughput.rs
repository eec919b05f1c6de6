//! Queue throughput benchmarks
//!
//! ```bash
//! cargo bench --package conductor-jobs
//! cargo bench --package conductor-jobs -- submit_dequeue
//! ```

use conductor_core::SystemClock;
use conductor_jobs::{resolve_dependencies, NewJob, Priority, PriorityJobQueue, QueueConfig, UnitSpec};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

fn unbounded_queue() -> PriorityJobQueue {
    PriorityJobQueue::new(
        QueueConfig {
            max_queue_size: 0,
            ..QueueConfig::default()
        },
        SystemClock::shared(),
    )
}

fn bench_submit_dequeue(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_dequeue");

    for count in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let queue = unbounded_queue();
                for i in 0..count {
                    let priority = Priority::ALL[i % Priority::ALL.len()];
                    queue
                        .submit(NewJob::new("bench").payload(json!({"i": i})).priority(priority))
                        .ok();
                }
                while let Some(dispatch) = queue.dequeue("bench-worker") {
                    black_box(dispatch.job.id);
                }
            });
        });
    }

    group.finish();
}

fn bench_resolve_dependencies(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_dependencies");

    for count in [10usize, 100, 1_000] {
        let units: Vec<UnitSpec> = (0..count)
            .map(|i| {
                let unit = UnitSpec::new(format!("unit-{i}")).priority((count - i) as i32);
                if i == 0 {
                    unit
                } else {
                    unit.depends_on([format!("unit-{}", i - 1), format!("unit-{}", i / 2)])
                }
            })
            .collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &units, |b, units| {
            b.iter(|| black_box(resolve_dependencies(units).map(|order| order.len())));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_submit_dequeue, bench_resolve_dependencies);
criterion_main!(benches);
