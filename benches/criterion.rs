use criterion::{Criterion, criterion_group, criterion_main};
use tripod::containers::{IdList, SortedChain};
use tripod::query::leapfrog_join;

/// Sorted sequence of `len` ids spaced by `stride` starting at `start`.
fn sequence(start: u32, stride: u32, len: u32) -> IdList {
    IdList::from((0..len).map(|i| start + i * stride).collect::<Vec<u32>>())
}

fn leapfrog(c: &mut Criterion) {
    let mut group = c.benchmark_group("leapfrog");
    let dense = [sequence(0, 2, 100_000), sequence(0, 3, 100_000), sequence(0, 5, 100_000)];
    group.bench_function("three dense sequences", |b| b.iter(|| leapfrog_join(&dense).len()));
    let skewed = [sequence(0, 1, 500_000), sequence(0, 1000, 500)];
    group.bench_function("one long one short", |b| b.iter(|| leapfrog_join(&skewed).len()));
    let disjoint = [sequence(0, 2, 100_000), sequence(1, 2, 100_000)];
    group.bench_function("disjoint sequences", |b| b.iter(|| leapfrog_join(&disjoint).len()));
    group.finish();
}

fn sorted_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("sorted_chain");
    group.sample_size(20);
    group.bench_function("ascending inserts", |b| {
        b.iter(|| {
            let mut chain = SortedChain::new();
            chain.extend(0..100_000u32);
            chain.len()
        })
    });
    group.bench_function("shuffled inserts", |b| {
        b.iter(|| {
            let mut chain = SortedChain::new();
            chain.extend((0..100_000u32).map(|i| i.wrapping_mul(2_654_435_761) % 1_000_000));
            chain.len()
        })
    });
    group.finish();
}

criterion_group!(criterion, leapfrog, sorted_chain);
criterion_main!(criterion);
