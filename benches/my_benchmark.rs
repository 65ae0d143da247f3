use bvh_hanim::{parse, to_bvh_text, to_x3d_text, X3dOptions};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const WALK: &str = include_str!("../tests/data/walk.bvh");

pub fn criterion_benchmark(c: &mut Criterion) {
    let (hierarchy, _) = parse(WALK);
    let options = X3dOptions::default().with_translated_date("1 January 2024");

    let mut group = c.benchmark_group("sample-size-example");
    group.sample_size(10);
    group.bench_function("parse walk", |b| b.iter(|| black_box(parse(black_box(WALK)))));
    group.bench_function("write bvh", |b| b.iter(|| black_box(to_bvh_text(&hierarchy))));
    group.bench_function("write x3d", |b| {
        b.iter(|| black_box(to_x3d_text(&hierarchy, "walk.x3d", &options)))
    });
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
