use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lunchrec::algorithms::*;
use lunchrec::config::Normalization;
use lunchrec::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn synthetic_votes(users: usize, items: usize, votes_per_user: usize) -> Vec<VoteRecord> {
    let mut rng = StdRng::seed_from_u64(7);
    let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut records = Vec::with_capacity(users * votes_per_user);

    for u in 0..users {
        for v in 0..votes_per_user {
            let item = rng.gen_range(0..items);
            let action = if rng.gen_bool(0.8) { VoteAction::Like } else { VoteAction::Unlike };
            records.push(VoteRecord::new(
                format!("user{}", u),
                item.to_string(),
                action,
                base + Duration::seconds(v as i64),
            ));
        }
    }
    records
}

fn benchmark_matrix_build(c: &mut Criterion) {
    let records = synthetic_votes(500, 200, 20);

    c.bench_function("matrix_build_500x200", |b| {
        b.iter(|| black_box(MatrixBuilder::new().build(black_box(&records))));
    });
}

fn benchmark_similarity(c: &mut Criterion) {
    let mut group = c.benchmark_group("similarity");

    for users in [100, 500] {
        let matrix = MatrixBuilder::new().build(&synthetic_votes(users, 200, 20));
        group.bench_with_input(BenchmarkId::from_parameter(users), &matrix, |b, matrix| {
            b.iter(|| black_box(SimilarityEngine::new().compute(matrix)));
        });
    }

    group.finish();
}

fn benchmark_als(c: &mut Criterion) {
    let matrix = MatrixBuilder::new().build(&synthetic_votes(300, 150, 15));
    let trainer = AlsTrainer::new(AlsParams {
        factors: 16,
        iterations: 5,
        ..AlsParams::default()
    });

    c.bench_function("als_train_300x150_k16", |b| {
        b.iter(|| black_box(trainer.train(&matrix).unwrap()));
    });

    let model = trainer.train(&matrix).unwrap();
    c.bench_function("als_recommend", |b| {
        b.iter(|| black_box(model.recommend(black_box("user42"), 10)));
    });
}

fn benchmark_combine(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(11);
    let sources = [
        (SourceTag::CollaborativeUser, 0.24),
        (SourceTag::CollaborativeItem, 0.18),
        (SourceTag::LatentFactor, 0.18),
        (SourceTag::VectorSimilarity, 0.40),
    ];
    let lists: Vec<SourceList> = sources
        .iter()
        .map(|(tag, weight)| {
            let candidates = (0..200)
                .map(|_| {
                    let item = ItemKey::place(rng.gen_range(0..400).to_string());
                    Candidate::new(item, rng.gen::<f64>(), *tag)
                })
                .collect();
            SourceList::new(*tag, *weight, candidates)
        })
        .collect();

    for normalization in [Normalization::MinMax, Normalization::Rank] {
        let aggregator = CandidateAggregator::new(normalization);
        c.bench_function(&format!("combine_4x200_{:?}", normalization), |b| {
            b.iter(|| black_box(aggregator.combine(black_box(&lists), 10)));
        });
    }
}

criterion_group!(
    benches,
    benchmark_matrix_build,
    benchmark_similarity,
    benchmark_als,
    benchmark_combine
);
criterion_main!(benches);
