//! Allocation fast-path benchmark: TLAB bump allocation with periodic
//! collections recycling the garbage.

use std::hint::black_box;

use beltway_gc::{layout, BeltConfig, BeltHeap, Hub, LayoutKind, Offset};
use criterion::{criterion_group, criterion_main, Criterion};

fn bench_tuple_allocation(c: &mut Criterion) {
    let heap = BeltHeap::new(BeltConfig {
        heap_size: 64 * 1024 * 1024,
        belt_percentages: vec![50, 25, 25],
        tlab_size: 32 * 1024,
        cascade_threshold: 75,
    });
    let mut alloc = heap.allocator();

    let hub = alloc.create_hub(
        LayoutKind::Tuple,
        layout::tuple_cell_size(4),
        &[Offset::from_words(0)],
    );
    let mut hub_grip = hub.grip();
    let root = heap.root(&mut hub_grip);

    c.bench_function("tlab_tuple_allocation", |b| {
        b.iter(|| {
            let hub = Hub::from_grip(root.get());
            black_box(alloc.create_tuple(hub));
        });
    });
}

fn bench_ref_array_allocation(c: &mut Criterion) {
    let heap = BeltHeap::new(BeltConfig {
        heap_size: 64 * 1024 * 1024,
        belt_percentages: vec![50, 25, 25],
        tlab_size: 32 * 1024,
        cascade_threshold: 75,
    });
    let mut alloc = heap.allocator();

    let hub = alloc.create_hub(LayoutKind::RefArray, beltway_gc::Size::ZERO, &[]);
    let mut hub_grip = hub.grip();
    let root = heap.root(&mut hub_grip);

    c.bench_function("tlab_ref_array_allocation_16", |b| {
        b.iter(|| {
            let hub = Hub::from_grip(root.get());
            black_box(alloc.create_ref_array(hub, 16));
        });
    });
}

criterion_group!(benches, bench_tuple_allocation, bench_ref_array_allocation);
criterion_main!(benches);
