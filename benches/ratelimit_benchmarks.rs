use blog_ratelimit::rate_limit::{KeyStrategy, RateLimiter, RequestContext};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

fn benchmark_allow_single_key(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let limiter = RateLimiter::in_memory();
    let ctx = RequestContext::background();
    let window = Duration::from_secs(60);

    c.bench_function("allow_single_key", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(limiter.allow(&ctx, "ip:10.0.0.1", u64::MAX, window).await)
        })
    });
}

fn benchmark_allow_many_keys(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let ctx = RequestContext::background();
    let window = Duration::from_secs(60);

    let mut group = c.benchmark_group("allow_many_keys");
    for key_count in [100usize, 10_000] {
        let limiter = RateLimiter::in_memory();
        let keys: Vec<String> = (0..key_count)
            .map(|i| KeyStrategy::Ip.key_for(&format!("10.0.{}.{}", i / 256, i % 256), None))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(key_count), &keys, |b, keys| {
            let mut i = 0;
            b.to_async(&rt).iter(|| {
                let key = &keys[i % keys.len()];
                i += 1;
                let limiter = &limiter;
                let ctx = &ctx;
                async move { black_box(limiter.allow(ctx, key, 1_000, window).await) }
            })
        });
    }
    group.finish();
}

fn benchmark_key_strategy(c: &mut Criterion) {
    c.bench_function("key_for_ip_user", |b| {
        b.iter(|| black_box(KeyStrategy::IpUser.key_for("203.0.113.7", Some("42"))))
    });
}

criterion_group!(
    benches,
    benchmark_allow_single_key,
    benchmark_allow_many_keys,
    benchmark_key_strategy
);
criterion_main!(benches);
