//! Benchmarks for `IndexedPriorityQueue`'s push/pop/update_priority paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use overmind::coordinator::IndexedPriorityQueue;

fn bench_push_pop(c: &mut Criterion) {
    c.bench_function("push_pop_1k", |bench| {
        bench.iter(|| {
            let mut queue = IndexedPriorityQueue::new();
            for i in 0..1_000u32 {
                queue.push(i, i % 10);
            }
            while let Some(item) = queue.pop() {
                black_box(item);
            }
        });
    });
}

fn bench_update_priority(c: &mut Criterion) {
    let mut queue = IndexedPriorityQueue::new();
    for i in 0..1_000u32 {
        queue.push(i, 5);
    }

    c.bench_function("update_priority_1k", |bench| {
        bench.iter(|| {
            for i in 0..1_000u32 {
                queue.update_priority(i, (i % 10) + 1);
            }
        });
    });
}

criterion_group!(benches, bench_push_pop, bench_update_priority);
criterion_main!(benches);
