//! Region tagging benchmarks on the shadow backend.
//!
//! Compares the double-granule path against single-granule stores, and the
//! three region operations against each other, by instruction count
//! dispatched through the emulated tag storage.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use mtekit::{MteConfig, ShadowTagMemory, Tagger};

const MAX_LEN: usize = 4096;

#[repr(C, align(32))]
struct Arena([u8; MAX_LEN]);

fn arena() -> Box<Arena> {
    Box::new(Arena([0; MAX_LEN]))
}

fn tagger(double_granule: bool) -> Tagger<ShadowTagMemory> {
    Tagger::with_config(
        ShadowTagMemory::new(),
        MteConfig::strict().with_double_granule(double_granule),
    )
}

fn bench_tag_region_paths(c: &mut Criterion) {
    let sizes: [usize; 4] = [48, 256, 1024, MAX_LEN];
    let mut group = c.benchmark_group("tag_region_paths");

    for size in sizes {
        group.throughput(Throughput::Bytes(size as u64));
        for (name, double_granule) in [("double_granule", true), ("single_granule", false)] {
            let mut buf = arena();
            let t = tagger(double_granule);
            let ptr = t.set_tag(buf.0.as_mut_ptr(), 9);
            group.bench_with_input(BenchmarkId::new(name, size), &size, |b, &size| {
                b.iter(|| {
                    // SAFETY: shadow backend; `size` bytes lie inside the arena.
                    unsafe { t.tag_region(black_box(ptr), black_box(size)) };
                });
            });
        }
    }

    group.finish();
}

fn bench_region_operations(c: &mut Criterion) {
    let size = 1024;
    let mut group = c.benchmark_group("region_operations");
    group.throughput(Throughput::Bytes(size as u64));

    let mut dst = arena();
    let src = vec![0xAB_u8; size];
    let t = tagger(true);
    let ptr = t.set_tag(dst.0.as_mut_ptr(), 3);

    group.bench_function("tag", |b| {
        // SAFETY: shadow backend; `size` bytes lie inside the arena.
        b.iter(|| unsafe { t.tag_region(black_box(ptr), size) });
    });
    group.bench_function("tag_and_zero", |b| {
        // SAFETY: as above, and the arena is writable.
        b.iter(|| unsafe { t.tag_and_zero_region(black_box(ptr), size) });
    });
    group.bench_function("tag_and_copy", |b| {
        // SAFETY: as above; `src` is a separate allocation of `size` bytes.
        b.iter(|| unsafe { t.tag_and_copy_region(black_box(ptr), src.as_ptr(), size) });
    });

    group.finish();
}

criterion_group!(benches, bench_tag_region_paths, bench_region_operations);
criterion_main!(benches);
