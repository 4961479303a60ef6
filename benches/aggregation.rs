use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use oracle_core::aggregation::{aggregate, Submission};
use oracle_core::decimal::Decimal;
use oracle_core::types::ValidatorAddr;

fn synthetic_submissions(n: usize) -> Vec<Submission> {
    (0..n)
        .map(|i| Submission {
            validator: ValidatorAddr(format!("val-{i:04}")),
            // A handful of outliers mixed into an otherwise tight cluster,
            // so the benchmark exercises the full outlier-filter path.
            price: if i % 17 == 0 {
                Decimal::from_i128(1_000_000 + i as i128)
            } else {
                Decimal::from_scaled(100_00 + (i as i128 % 5), 2).unwrap()
            },
            voting_power: 1_000_000,
            region: "us".to_string(),
        })
        .collect()
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    for &n in &[10usize, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let submissions = synthetic_submissions(n);
            let total_power = n as u128 * 1_000_000;
            b.iter(|| {
                let _ = aggregate(
                    &"ATOM/USD".to_string(),
                    black_box(submissions.clone()),
                    total_power,
                    Decimal::from_scaled(50, 2).unwrap(),
                    Decimal::from_scaled(50, 2).unwrap(),
                    false,
                    0,
                );
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_aggregate);
criterion_main!(benches);
