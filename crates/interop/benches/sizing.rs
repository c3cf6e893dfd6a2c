use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use interop::scene::ImageSize;
use interop::sizing::{image_grid, reduction_partial_grid};

fn bench_sizing(c: &mut Criterion) {
    c.bench_function("reduction_partial_grid 1080p", |b| {
        b.iter(|| reduction_partial_grid(black_box(ImageSize::new(1920, 1080))));
    });
    c.bench_function("image_grid 1080p", |b| {
        b.iter(|| image_grid(black_box(ImageSize::new(1920, 1080))));
    });
}

criterion_group!(benches, bench_sizing);
criterion_main!(benches);
