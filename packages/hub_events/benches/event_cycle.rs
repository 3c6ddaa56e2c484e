//! Benchmarks the cost of waking waiters through an event, from `set()` to every waiter
//! having observed it.

#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint;

use criterion::{Criterion, criterion_group, criterion_main};
use hub_events::{Event, Hub};

fn set_then_wait_fast_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_fast_path");

    group.bench_function("wait_on_set_event", |b| {
        let hub = Hub::new();
        let event = Event::new();
        event.set(&hub);

        b.iter(|| {
            let was_set = hub.block_on({
                let hub = hub.clone();
                let event = event.clone();

                async move { event.wait(&hub, None).await.unwrap() }
            });

            hint::black_box(was_set);
        });
    });

    group.finish();
}

fn wake_waiters(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_wake_waiters");

    for waiter_count in [1_usize, 16, 256] {
        group.bench_function(format!("{waiter_count}_waiters"), |b| {
            b.iter(|| {
                let hub = Hub::new();
                let event = Event::new();

                for _ in 0..waiter_count {
                    hub.spawn({
                        let hub = hub.clone();
                        let event = event.clone();

                        async move {
                            hint::black_box(event.wait(&hub, None).await.unwrap());
                        }
                    });
                }

                hub.spawn({
                    let hub = hub.clone();
                    let event = event.clone();

                    async move { event.set(&hub) }
                });

                hub.run();
                assert_eq!(event.waiter_count(), 0);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, set_then_wait_fast_path, wake_waiters);
criterion_main!(benches);
