use cap_space::table::EntryTable;
use cap_space::{Name, RightType};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::time::Duration;

fn bench_allocate_release_cycle(c: &mut Criterion) {
    c.bench_function("table_allocate_release_cycle", |b| {
        let mut t: EntryTable<u64> = EntryTable::with_size(1024).unwrap();
        b.iter(|| {
            let n = t.allocate(RightType::None).unwrap();
            black_box(t.release(n.index()));
        })
    });
}

fn bench_fill_1k(c: &mut Criterion) {
    c.bench_function("table_fill_1k", |b| {
        b.iter_batched(
            || EntryTable::<u64>::with_size(1024).unwrap(),
            |mut t| {
                while let Some(n) = t.allocate(RightType::None) {
                    black_box(n);
                }
                t
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_lookup_hit(c: &mut Criterion) {
    c.bench_function("table_lookup_hit", |b| {
        let mut t: EntryTable<u64> = EntryTable::with_size(8192).unwrap();
        let names: Vec<Name> = std::iter::from_fn(|| t.allocate(RightType::None)).collect();
        let mut it = names.iter().cycle();
        b.iter(|| {
            let n = *it.next().unwrap();
            black_box(t.lookup(n).unwrap().urefs());
        })
    });
}

fn bench_lookup_stale(c: &mut Criterion) {
    c.bench_function("table_lookup_stale", |b| {
        let mut t: EntryTable<u64> = EntryTable::with_size(8192).unwrap();
        let names: Vec<Name> = std::iter::from_fn(|| t.allocate(RightType::None)).collect();
        for n in &names {
            t.release(n.index());
        }
        let mut it = names.iter().cycle();
        b.iter(|| black_box(t.lookup(*it.next().unwrap()).is_none()))
    });
}

fn bench_claim_by_name(c: &mut Criterion) {
    c.bench_function("table_claim_by_name", |b| {
        b.iter_batched(
            || EntryTable::<u64>::with_size(4096).unwrap(),
            |mut t| {
                // Every second index, so each claim walks past the
                // still-free slots before it.
                for i in (2..2048u32).step_by(2) {
                    assert!(t.allocate_name(Name::from_parts(i, 7)));
                }
                t
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_config() -> Criterion {
    Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(8))
        .warm_up_time(Duration::from_secs(2))
}

criterion_group! {
    name = benches;
    config = bench_config();
    targets = bench_allocate_release_cycle, bench_fill_1k, bench_lookup_hit,
        bench_lookup_stale, bench_claim_by_name
}
criterion_main!(benches);
