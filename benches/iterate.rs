//! Throughput of the scheduler loop for each speed.
//!
//! Run with:
//!   cargo bench --bench iterate

use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use revolve::{Context, EventLoop, Speed, Step};

const ITEMS: u64 = 10_000;

fn for_each_by_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("for_each");

    for speed in Speed::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(speed), &speed, |b, &speed| {
            let host = Rc::new(EventLoop::new());
            let ctx = Context::new(host.clone());

            b.iter(|| {
                let handle = ctx.with_speed(speed).for_each((0..ITEMS).collect()).run(|mut item| {
                    *item = black_box(item.index as u64);
                    Ok(Step::CONTINUE)
                });
                host.run_until_idle();
                black_box(handle.resolve_assuming_ready().map(|c| c.stats.turns).unwrap_or(0))
            });
        });
    }

    group.finish();
}

fn repeat_by_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("repeat");

    for speed in [Speed::Doze, Speed::Normal, Speed::Ninja] {
        group.bench_with_input(BenchmarkId::from_parameter(speed), &speed, |b, &speed| {
            let host = Rc::new(EventLoop::new());
            let ctx = Context::new(host.clone());

            b.iter(|| {
                let handle = ctx
                    .with_speed(speed)
                    .repeat(ITEMS as u32)
                    .run(|round| Ok(Step::Continue(black_box(round.index))));
                host.run_until_idle();
                black_box(handle.resolve_assuming_ready().map(|c| c.value.len()).unwrap_or(0))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, for_each_by_speed, repeat_by_speed);
criterion_main!(benches);
