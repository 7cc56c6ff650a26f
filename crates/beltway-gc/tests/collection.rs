//! End-to-end collection scenarios: survivors, forwarding idempotence,
//! reference arrays, and the major compaction.

use beltway_gc::{layout, Allocator, BeltConfig, BeltHeap, Grip, Hub, LayoutKind, Offset, Size};

fn small_heap() -> BeltHeap {
    BeltHeap::new(BeltConfig {
        heap_size: 1024 * 1024,
        belt_percentages: vec![25, 25, 50],
        tlab_size: 4096,
        cascade_threshold: 75,
    })
}

/// A tuple class with two word fields, the first a reference.
fn node_hub(alloc: &mut Allocator<'_>) -> Hub {
    alloc.create_hub(
        LayoutKind::Tuple,
        layout::tuple_cell_size(2),
        &[Offset::from_words(0)],
    )
}

fn array_hub(alloc: &mut Allocator<'_>) -> Hub {
    alloc.create_hub(LayoutKind::RefArray, Size::ZERO, &[])
}

const VALUE_FIELD: Offset = Offset::from_words(1);

#[test]
fn nursery_collection_moves_survivors_and_resets_the_nursery() {
    let heap = small_heap();
    let mut alloc = heap.allocator();

    let hub = node_hub(&mut alloc);
    let mut hub_grip = hub.grip();

    let mut a = alloc.create_tuple(hub);
    let mut b = alloc.create_tuple(hub);
    unsafe {
        a.set_word(VALUE_FIELD, 41);
        b.set_word(VALUE_FIELD, 42);
    }
    assert!(heap.nursery().contains(a.to_origin()));

    // Dead weight that must not survive.
    for _ in 0..64 {
        let garbage = alloc.create_tuple(hub);
        unsafe { garbage.set_word(VALUE_FIELD, 7) };
    }

    let sizes_before = unsafe { (layout::size_of(a.to_origin()), layout::size_of(b.to_origin())) };

    let root_hub = heap.root(&mut hub_grip);
    let root_a = heap.root(&mut a);
    let root_b = heap.root(&mut b);
    alloc.collect_nursery();

    let (hub_after, a_after, b_after) = (root_hub.get(), root_a.get(), root_b.get());

    // Survivors now live in belt 1; the nursery rewound to its start.
    assert!(heap.belt(1).contains(a_after.to_origin()));
    assert!(heap.belt(1).contains(b_after.to_origin()));
    assert!(heap.belt(1).contains(hub_after.to_origin()));
    assert!(heap.nursery().used_bytes().is_zero());

    unsafe {
        // Each survivor still dereferences to a cell of its original class.
        assert_eq!(layout::hub_of(a_after.to_origin()), hub_after);
        assert_eq!(layout::hub_of(b_after.to_origin()), hub_after);
        assert_eq!(a_after.get_word(VALUE_FIELD), 41);
        assert_eq!(b_after.get_word(VALUE_FIELD), 42);

        // Size preservation across the copy.
        assert_eq!(layout::size_of(a_after.to_origin()), sizes_before.0);
        assert_eq!(layout::size_of(b_after.to_origin()), sizes_before.1);
    }

    // Exactly the three rooted objects survived, packed contiguously from
    // the belt's prior mark (its start).
    let counters = heap.metrics().belt(1);
    assert_eq!(counters.survivor_objects(), 3);
    let expected = layout::hub_cell_size(1)
        + layout::tuple_cell_size(2) * 2
        + layout::debug_tag_size() * 3;
    assert_eq!(heap.belt(1).used_bytes(), expected);
}

#[test]
fn forwarding_is_idempotent_across_reference_paths() {
    let heap = small_heap();
    let mut alloc = heap.allocator();

    let nodes = node_hub(&mut alloc);
    let arrays = array_hub(&mut alloc);

    let mut target = alloc.create_tuple(nodes);
    unsafe { target.set_word(VALUE_FIELD, 1234) };

    let mut array = alloc.create_ref_array(arrays, 4);
    unsafe {
        // Two distinct paths to the same object, plus the direct root.
        layout::ref_array_set(array.to_origin(), 0, target);
        layout::ref_array_set(array.to_origin(), 2, target);
    }

    let root_target = heap.root(&mut target);
    let root_array = heap.root(&mut array);
    alloc.collect_nursery();

    let target_after = root_target.get();
    let array_after = root_array.get();
    unsafe {
        // Every path resolved to the identical destination grip.
        assert_eq!(layout::ref_array_get(array_after.to_origin(), 0), target_after);
        assert_eq!(layout::ref_array_get(array_after.to_origin(), 2), target_after);
        assert_eq!(target_after.get_word(VALUE_FIELD), 1234);
    }

    // array + target + the two hubs: one copy each, no duplicates.
    assert_eq!(heap.metrics().belt(1).survivor_objects(), 4);
}

#[test]
fn ref_array_keeps_live_entries_at_their_indices() {
    let heap = small_heap();
    let mut alloc = heap.allocator();

    let nodes = node_hub(&mut alloc);
    let arrays = array_hub(&mut alloc);

    let length = 8;
    let live_indices = [1_usize, 4, 6];

    let mut array = alloc.create_ref_array(arrays, length);
    for (slot, &index) in live_indices.iter().enumerate() {
        // Interleave dead garbage between the live tuples.
        let _ = alloc.create_tuple(nodes);
        let live = alloc.create_tuple(nodes);
        unsafe {
            live.set_word(VALUE_FIELD, 100 + slot);
            layout::ref_array_set(array.to_origin(), index, live);
        }
    }

    let root_array = heap.root(&mut array);
    alloc.collect_nursery();
    let array_after = root_array.get();

    unsafe {
        assert_eq!(layout::read_length(array_after.to_origin()), length);
        for index in 0..length {
            let entry = layout::ref_array_get(array_after.to_origin(), index);
            if let Some(slot) = live_indices.iter().position(|&i| i == index) {
                assert!(!entry.is_zero());
                // No entry may point back into the evacuated nursery.
                assert!(!heap.nursery().contains(entry.to_origin()));
                assert!(heap.belt(1).contains(entry.to_origin()));
                assert_eq!(entry.get_word(VALUE_FIELD), 100 + slot);
            } else {
                assert_eq!(entry, Grip::ZERO);
            }
        }
    }
}

#[test]
fn full_collection_compacts_into_the_mature_belt() {
    let heap = small_heap();
    let mut alloc = heap.allocator();

    let hub = node_hub(&mut alloc);
    let mut keep = alloc.create_tuple(hub);
    unsafe { keep.set_word(VALUE_FIELD, 99) };

    let root = heap.root(&mut keep);

    // First full cascade lands the survivor in the mature belt.
    alloc.collect_full();
    let in_mature = root.get();
    assert!(heap.mature().contains(in_mature.to_origin()));
    unsafe { assert_eq!(in_mature.get_word(VALUE_FIELD), 99) };

    // A second full collection re-compacts the mature belt through the
    // nursery and back; the object stays in mature and keeps its state.
    let mature_used_before = heap.mature().used_bytes();
    alloc.collect_full();
    let still_mature = root.get();
    assert!(heap.mature().contains(still_mature.to_origin()));
    assert_ne!(still_mature, in_mature, "compaction relocated the survivor");
    unsafe { assert_eq!(still_mature.get_word(VALUE_FIELD), 99) };

    // Only live data came back: mature occupancy cannot have grown.
    assert!(heap.mature().used_bytes() <= mature_used_before);

    drop(root);
    drop(alloc);
    heap.verify();
}

#[test]
fn unrooted_objects_do_not_survive() {
    let heap = small_heap();
    let mut alloc = heap.allocator();

    let hub = node_hub(&mut alloc);
    for _ in 0..128 {
        let _ = alloc.create_tuple(hub);
    }
    let allocated = heap.metrics().belt(0).allocations();
    assert!(allocated >= 128);

    alloc.collect_nursery();

    // Nothing was rooted, so nothing survived.
    assert_eq!(heap.metrics().belt(1).survivor_objects(), 0);
    assert!(heap.belt(1).used_bytes().is_zero());
    assert!(heap.nursery().used_bytes().is_zero());
}

#[test]
fn chained_references_survive_transitively() {
    let heap = small_heap();
    let mut alloc = heap.allocator();

    let hub = node_hub(&mut alloc);

    // Build head -> middle -> tail through the reference field.
    let tail = alloc.create_tuple(hub);
    unsafe { tail.set_word(VALUE_FIELD, 3) };
    let middle = alloc.create_tuple(hub);
    unsafe {
        middle.set_grip(Offset::from_words(0), tail);
        middle.set_word(VALUE_FIELD, 2);
    }
    let mut head = alloc.create_tuple(hub);
    unsafe {
        head.set_grip(Offset::from_words(0), middle);
        head.set_word(VALUE_FIELD, 1);
    }

    let root = heap.root(&mut head);
    alloc.collect_nursery();

    unsafe {
        let head_after = root.get();
        assert_eq!(head_after.get_word(VALUE_FIELD), 1);
        let middle_after = head_after.get_grip(Offset::from_words(0));
        assert!(heap.belt(1).contains(middle_after.to_origin()));
        assert_eq!(middle_after.get_word(VALUE_FIELD), 2);
        let tail_after = middle_after.get_grip(Offset::from_words(0));
        assert!(heap.belt(1).contains(tail_after.to_origin()));
        assert_eq!(tail_after.get_word(VALUE_FIELD), 3);
        assert_eq!(tail_after.get_grip(Offset::from_words(0)), Grip::ZERO);
    }

    // head, middle, tail and their hub.
    assert_eq!(heap.metrics().belt(1).survivor_objects(), 4);
}

#[test]
fn metrics_describe_the_collection() {
    let heap = small_heap();
    let mut alloc = heap.allocator();

    let hub = node_hub(&mut alloc);
    let mut keep = alloc.create_tuple(hub);
    let root = heap.root(&mut keep);

    alloc.collect_nursery();
    drop(root);

    let last = heap.metrics().last_collection();
    assert_eq!(last.kind, beltway_gc::CollectionKind::Nursery);
    assert_eq!(last.total_collections, 1);
    assert_eq!(last.objects_survived, 2); // the tuple and its hub
    assert!(last.bytes_survived > 0);
    assert!(last.bytes_reclaimed > 0); // the dead hub-creation garbage
    assert_eq!(heap.metrics().total_collections(), 1);
    assert_eq!(heap.metrics().belt(0).collections(), 1);
}
