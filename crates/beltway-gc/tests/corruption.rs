//! Fault injection: the corruption diagnostics must trip, fatally, on a
//! damaged heap.

use beltway_gc::{layout, BeltConfig, BeltHeap, Grip, LayoutKind, Offset, Size};

fn small_heap() -> BeltHeap {
    BeltHeap::new(BeltConfig {
        heap_size: 512 * 1024,
        belt_percentages: vec![25, 25, 50],
        tlab_size: 4096,
        cascade_threshold: 75,
    })
}

// The cell tag only exists in debug builds; the injection needs it there.
#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "cell tag")]
fn smashed_cell_tag_aborts_the_scan() {
    let heap = small_heap();
    let mut alloc = heap.allocator();

    let hub = alloc.create_hub(LayoutKind::Tuple, layout::tuple_cell_size(2), &[]);
    let tuple = alloc.create_tuple(hub);

    // Overwrite the sentinel word immediately preceding the cell.
    let cell = layout::origin_to_cell(tuple.to_origin());
    unsafe { (cell - layout::debug_tag_size()).write_word(0xDEAD_DEAD) };

    // The pre-collection verification sweep walks straight into the damage.
    alloc.collect_nursery();
}

#[test]
#[should_panic(expected = "live span")]
fn grip_past_the_allocation_mark_fails_verification() {
    let heap = small_heap();

    // Fabricate a grip into untouched nursery space and root it.
    let mut bogus = Grip::from_origin(heap.nursery().start() + Size::from_words(64));
    let _root = heap.root(&mut bogus);
    heap.verify();
}

#[test]
#[should_panic(expected = "outside every belt")]
fn grip_outside_the_heap_fails_verification() {
    let heap = small_heap();

    let mut outside: usize = 0;
    let mut bogus = Grip::from_origin(beltway_gc::Address::new(
        std::ptr::addr_of_mut!(outside) as usize & !(beltway_gc::WORD_BYTES - 1),
    ));
    let _root = heap.root(&mut bogus);
    heap.verify();
}

#[test]
fn intact_heap_passes_verification() {
    let heap = small_heap();
    let mut alloc = heap.allocator();

    let hub = alloc.create_hub(
        LayoutKind::Tuple,
        layout::tuple_cell_size(2),
        &[Offset::from_words(0)],
    );
    let mut keep = alloc.create_tuple(hub);
    let _root = heap.root(&mut keep);
    alloc.verify_heap();
}
