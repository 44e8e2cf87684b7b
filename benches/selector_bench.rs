use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use upstream_pool::{Context, ParseMode, RotationPolicy, UpstreamList};

fn build_list(ctx: &Context, n: usize, rotation: RotationPolicy) -> UpstreamList {
    let list = UpstreamList::new(ctx);
    list.set_rotation(rotation);
    for i in 0..n {
        list.add_upstream(&format!("10.0.0.{}:80", i % 255), 80, ParseMode::Default);
    }
    list
}

fn bench_round_robin_get(c: &mut Criterion) {
    let ctx = Context::new();
    let list = build_list(&ctx, 16, RotationPolicy::RoundRobin);

    c.bench_function("list_get_round_robin_16", |b| {
        b.iter(|| {
            let _ = list.get(None, None);
        })
    });
}

fn bench_hashed_get(c: &mut Criterion) {
    let ctx = Context::new();
    let list = build_list(&ctx, 16, RotationPolicy::Hashed);

    c.bench_function("list_get_hashed_16", |b| {
        b.iter(|| {
            let _ = list.get(None, Some(b"user-42"));
        })
    });
}

fn bench_random_get(c: &mut Criterion) {
    let ctx = Context::new();
    let list = build_list(&ctx, 16, RotationPolicy::Random);

    c.bench_function("list_get_random_16", |b| {
        b.iter(|| {
            let _ = list.get(None, None);
        })
    });
}

fn bench_fail_ok_roundtrip(c: &mut Criterion) {
    c.bench_function("upstream_fail_then_ok", |b| {
        b.iter_batched(
            || {
                let ctx = Context::new();
                let list = build_list(&ctx, 4, RotationPolicy::RoundRobin);
                list.iter().into_iter().next().unwrap()
            },
            |up| {
                up.fail(false);
                up.ok();
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_round_robin_get,
    bench_hashed_get,
    bench_random_get,
    bench_fail_ok_roundtrip
);
criterion_main!(benches);
