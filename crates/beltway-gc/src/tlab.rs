//! Thread-local allocation buffers and the mutator allocation context.
//!
//! The mutator fast path is a private bump allocation inside a TLAB carved
//! from the nursery; only the carve itself crosses a thread-safety boundary
//! (a CAS on the belt mark). A retired TLAB's unused tail is plugged with a
//! filler object so linear scans parse the belt without gaps.

use crate::gc::safepoint::MutatorToken;
use crate::gc::sync::{LockGuard, LockOrder};
use crate::grip::Grip;
use crate::heap::{write_debug_tag, BeltHeap};
use crate::layout::{
    debug_tag_size, debug_tag_words, hub_cell_size, plant_hybrid, plant_hub, plant_ref_array,
    plant_tuple, Hub, LayoutKind,
};
use crate::word::{Address, Offset, Size};

/// Bytes a TLAB always keeps in reserve so its tail can take a filler
/// object: the filler's debug tag plus a zero-length reference array.
pub(crate) fn filler_reserve() -> Size {
    debug_tag_size() + Size::from_words(3)
}

// ============================================================================
// Tlab
// ============================================================================

/// A thread-private sub-range of the nursery for lock-free bump allocation.
///
/// The TLAB's own allocation mark (`top`) is invisible to other threads; the
/// belt's global mark only moved when the TLAB was carved.
#[derive(Debug)]
pub struct Tlab {
    start: Address,
    end: Address,
    top: Address,
}

impl Tlab {
    /// An unset TLAB; every allocation against it fails over to the slow
    /// path.
    #[must_use]
    pub const fn unset() -> Self {
        Self {
            start: Address::ZERO,
            end: Address::ZERO,
            top: Address::ZERO,
        }
    }

    /// Whether this TLAB currently owns a span.
    #[must_use]
    pub const fn is_set(&self) -> bool {
        !self.start.is_zero()
    }

    /// Point this TLAB at a freshly carved span.
    pub fn initialize(&mut self, start: Address, size: Size) {
        self.start = start;
        self.top = start;
        self.end = start + size;
    }

    /// First address of the current span.
    #[must_use]
    pub const fn start(&self) -> Address {
        self.start
    }

    /// One past the last address of the current span.
    #[must_use]
    pub const fn end(&self) -> Address {
        self.end
    }

    /// The TLAB's private allocation mark.
    #[must_use]
    pub const fn top(&self) -> Address {
        self.top
    }

    /// Bump-allocate a cell of `size` bytes. Plants the debug tag and
    /// returns the cell address, or [`Address::ZERO`] when the TLAB cannot
    /// take the cell, including when doing so would leave a tail too small
    /// for a filler object.
    pub fn allocate(&mut self, size: Size) -> Address {
        let after = self.top + size + debug_tag_size();
        if after > self.end {
            return Address::ZERO;
        }
        // Never leave a gap smaller than the minimum filler.
        if after != self.end && after + filler_reserve() > self.end {
            return Address::ZERO;
        }
        let span = self.top;
        self.top = after;
        write_debug_tag(span)
    }

    /// Give up the TLAB: plug the unused tail with a filler reference array
    /// (all-zero elements, skipped by every action) so the belt stays
    /// linearly parseable, then unset.
    pub fn retire(&mut self, filler_hub: Hub) {
        if !self.is_set() {
            return;
        }
        let gap = self.end.distance_from(self.top);
        if !gap.is_zero() {
            let length = gap.words() - debug_tag_words() - 3;
            let cell = write_debug_tag(self.top);
            // SAFETY: the gap is TLAB-owned storage of exactly the filler's
            // cell size plus its tag.
            unsafe { plant_ref_array(cell, filler_hub, length) };
        }
        *self = Self::unset();
    }
}

impl Default for Tlab {
    fn default() -> Self {
        Self::unset()
    }
}

// ============================================================================
// Allocator - the per-thread mutator context
// ============================================================================

/// A mutator's allocation context: its TLAB plus its safepoint
/// registration. Create one per thread via [`BeltHeap::allocator`].
///
/// While an `Allocator` exists, its thread must keep polling
/// [`Allocator::safepoint`] (the slow allocation path polls on its own) or
/// collections requested by other threads cannot start.
pub struct Allocator<'h> {
    heap: &'h BeltHeap,
    tlab: Tlab,
    _token: MutatorToken<'h>,
}

impl<'h> Allocator<'h> {
    pub(crate) fn new(heap: &'h BeltHeap) -> Self {
        Self {
            heap,
            tlab: Tlab::unset(),
            _token: heap.safepoint.register_mutator(),
        }
    }

    /// The heap this context allocates from.
    #[must_use]
    pub const fn heap(&self) -> &'h BeltHeap {
        self.heap
    }

    /// Allocate a raw cell of `size` bytes in the nursery.
    ///
    /// The TLAB fast path is tried first; on exhaustion the TLAB is retired
    /// and a new one carved from the nursery, triggering a collection when
    /// the nursery cannot supply it.
    ///
    /// The returned cell must be planted (see the `create_*` methods, or
    /// the `layout` planting functions) before this thread next reaches a
    /// safepoint, or the scanner will trip over it.
    ///
    /// # Panics
    ///
    /// Panics fatally if the nursery cannot supply the request even after a
    /// collection.
    pub fn allocate(&mut self, size: Size) -> Address {
        debug_assert!(!size.is_zero() && size.is_word_granular());
        let cell = self.tlab.allocate(size);
        if !cell.is_zero() {
            self.heap.metrics.belt(0).record_allocation(size);
            return cell;
        }
        self.allocate_slow(size)
    }

    #[cold]
    fn allocate_slow(&mut self, size: Size) -> Address {
        self.retire_tlab();
        self.safepoint();

        // Proactive trigger: ask the configured condition before carving.
        let should_collect = {
            let condition = *self.heap.collect_condition.lock();
            condition(&self.heap.collect_info())
        };
        if should_collect {
            self.heap.collect_for_allocation(true);
        }

        let carve_bytes = self.carve_size(size);
        let mut span = self.carve(carve_bytes);
        if span.is_zero() {
            // Reactive trigger: the nursery is genuinely full.
            self.heap.collect_for_allocation(true);
            span = self.carve(carve_bytes);
            if span.is_zero() {
                panic!(
                    "out of memory: nursery cannot supply a {carve_bytes}-byte allocation buffer"
                );
            }
        }

        self.tlab.initialize(span, Size::new(carve_bytes));
        self.heap.metrics.belt(0).record_tlab_carve();

        let cell = self.tlab.allocate(size);
        debug_assert!(!cell.is_zero(), "fresh TLAB must satisfy the sizing request");
        self.heap.metrics.belt(0).record_allocation(size);
        cell
    }

    /// TLAB bytes to carve so that `size` fits with tag and filler reserve;
    /// grows past the configured size for oversized requests.
    fn carve_size(&self, size: Size) -> usize {
        let needed = (size + debug_tag_size() + filler_reserve()).bytes();
        let mut carve = self.heap.config().tlab_size;
        while carve < needed {
            carve *= 2;
        }
        carve
    }

    fn carve(&self, bytes: usize) -> Address {
        let _order = LockGuard::new(LockOrder::BeltAlloc);
        self.heap.nursery().reserve(Size::new(bytes))
    }

    /// Poll for a pending collection and park until it finishes. The TLAB is
    /// retired before parking so the collector sees an exact belt.
    pub fn safepoint(&mut self) {
        if self.heap.safepoint.pending() {
            self.retire_tlab();
            self.heap.safepoint.park();
        }
    }

    /// Retire the current TLAB (plugging its tail) without parking.
    pub fn retire_tlab(&mut self) {
        if self.tlab.is_set() {
            let filler = self.heap.filler_hub();
            self.tlab.retire(filler);
        }
    }

    /// Run a nursery collection from this thread.
    pub fn collect_nursery(&mut self) {
        self.retire_tlab();
        self.heap.collect_nursery_internal(true);
    }

    /// Run the full cascade: nursery, every intermediate belt, then the
    /// major compaction of the mature belt.
    pub fn collect_full(&mut self) {
        self.retire_tlab();
        self.heap.collect_full_internal(true);
    }

    /// Run the verify sweep over the whole heap from this thread.
    pub fn verify_heap(&mut self) {
        self.retire_tlab();
        self.heap.verify_internal(true);
    }

    // ------------------------------------------------------------------
    // Typed creation
    // ------------------------------------------------------------------

    /// Allocate and plant a tuple described by `hub`.
    ///
    /// The hub is rooted across the allocation, so a collection triggered by
    /// it cannot leave the new object's header pointing into from-space.
    pub fn create_tuple(&mut self, hub: Hub) -> Grip {
        // SAFETY: the caller's hub is live at entry.
        let size = unsafe { hub.instance_size() };
        self.alloc_with_rooted_hub(hub, size, |cell, hub| {
            // SAFETY: cell is fresh storage of the hub's instance size.
            unsafe { plant_tuple(cell, hub) }
        })
    }

    /// Allocate and plant a reference array of `length` null elements.
    pub fn create_ref_array(&mut self, hub: Hub, length: usize) -> Grip {
        let size = crate::layout::ref_array_cell_size(length);
        self.alloc_with_rooted_hub(hub, size, |cell, hub| {
            // SAFETY: cell is fresh storage of the array's cell size.
            unsafe { plant_ref_array(cell, hub, length) }
        })
    }

    /// Allocate and plant a hybrid with a `tail_words`-word scalar tail.
    pub fn create_hybrid(&mut self, hub: Hub, tail_words: usize) -> Grip {
        // SAFETY: the caller's hub is live at entry.
        let fixed = unsafe { hub.instance_size() };
        let size = crate::layout::hybrid_cell_size(fixed, tail_words);
        self.alloc_with_rooted_hub(hub, size, |cell, hub| {
            // SAFETY: cell is fresh storage of the hybrid's cell size.
            unsafe { plant_hybrid(cell, hub, tail_words) }
        })
    }

    /// Allocate and plant a hub for instances of the given shape (see
    /// [`plant_hub`] for the meaning of `instance_size` per kind).
    pub fn create_hub(&mut self, kind: LayoutKind, instance_size: Size, refmap: &[Offset]) -> Hub {
        let cell = self.allocate(hub_cell_size(refmap.len()));
        // Read the hub of hubs after the allocation: a collection inside it
        // may have moved the metadata.
        let hubs = self.heap.hub_of_hubs();
        // SAFETY: cell is fresh storage of the hub's cell size.
        unsafe { plant_hub(cell, hubs, kind, instance_size, refmap) }
    }

    /// Allocate `size` bytes while keeping `hub` registered as a root, then
    /// plant through the possibly-updated hub grip.
    fn alloc_with_rooted_hub(
        &mut self,
        hub: Hub,
        size: Size,
        plant: impl FnOnce(Address, Hub) -> Grip,
    ) -> Grip {
        let mut hub_grip = hub.grip();
        let cell = {
            let _root = self.heap.root(&mut hub_grip);
            self.allocate(size)
        };
        plant(cell, Hub::from_grip(hub_grip))
    }
}

impl Drop for Allocator<'_> {
    fn drop(&mut self) {
        self.retire_tlab();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::BeltConfig;
    use crate::layout::{read_length, ref_array_cell_size, size_of, CELL_TAG_WORD};

    fn test_heap() -> BeltHeap {
        BeltHeap::new(BeltConfig {
            heap_size: 512 * 1024,
            belt_percentages: vec![25, 25, 50],
            tlab_size: 4096,
            cascade_threshold: 75,
        })
    }

    #[test]
    fn unset_tlab_rejects_allocation() {
        let mut tlab = Tlab::unset();
        assert!(!tlab.is_set());
        assert!(tlab.allocate(Size::from_words(4)).is_zero());
    }

    #[test]
    fn tlab_bump_allocation_is_contiguous() {
        let heap = test_heap();
        let span = heap.nursery().reserve(Size::new(4096));
        let mut tlab = Tlab::unset();
        tlab.initialize(span, Size::new(4096));

        let first = tlab.allocate(Size::from_words(4));
        let second = tlab.allocate(Size::from_words(4));
        assert!(!first.is_zero() && !second.is_zero());
        assert_eq!(
            second.distance_from(first),
            Size::from_words(4) + debug_tag_size()
        );
        if debug_tag_words() > 0 {
            assert_eq!(unsafe { (first - debug_tag_size()).read_word() }, CELL_TAG_WORD);
        }
    }

    #[test]
    fn tlab_never_leaves_an_unfillable_tail() {
        let heap = test_heap();
        let span = heap.nursery().reserve(Size::new(4096));
        let mut tlab = Tlab::unset();
        tlab.initialize(span, Size::new(4096));

        // Fill with mixed sizes until the TLAB refuses; whatever tail is
        // left must be zero or big enough for a filler object.
        let sizes = [1_usize, 2, 3, 5, 7, 11];
        let mut i = 0;
        while !tlab.allocate(Size::from_words(sizes[i % sizes.len()])).is_zero() {
            i += 1;
        }
        let gap = tlab.end().distance_from(tlab.top());
        assert!(gap.is_zero() || gap >= filler_reserve());

        // And retiring must plug the tail completely.
        tlab.retire(heap.filler_hub());
        assert!(!tlab.is_set());
    }

    #[test]
    fn retired_tlab_tail_parses_as_filler() {
        let heap = test_heap();
        let span = heap.nursery().reserve(Size::new(4096));
        let mut tlab = Tlab::unset();
        tlab.initialize(span, Size::new(4096));

        let cell = tlab.allocate(Size::from_words(8));
        assert!(!cell.is_zero());
        let top = tlab.top();
        let gap = tlab.end().distance_from(top);
        tlab.retire(heap.filler_hub());
        assert!(!tlab.is_set());

        let filler_origin = crate::layout::cell_to_origin(top + debug_tag_size());
        unsafe {
            let length = read_length(filler_origin);
            assert_eq!(
                ref_array_cell_size(length) + debug_tag_size(),
                gap,
                "filler exactly plugs the retired tail"
            );
            assert_eq!(size_of(filler_origin), ref_array_cell_size(length));
        }
    }

    #[test]
    fn allocator_fast_path_and_carve() {
        let heap = test_heap();
        let mut alloc = heap.allocator();

        let a = alloc.allocate(Size::from_words(4));
        let b = alloc.allocate(Size::from_words(4));
        assert!(heap.nursery().contains(a));
        assert!(heap.nursery().contains(b));
        assert_eq!(heap.metrics().belt(0).tlab_carves(), 1);
        assert_eq!(heap.metrics().belt(0).allocations(), 2);
    }

    #[test]
    fn oversized_request_grows_the_carve() {
        let heap = test_heap();
        let mut alloc = heap.allocator();

        // Larger than one TLAB; must still come from the nursery.
        let big = Size::new(heap.config().tlab_size * 2);
        let cell = alloc.allocate(big);
        assert!(heap.nursery().contains(cell));
    }

    #[test]
    fn exhausting_a_tlab_falls_over_to_a_new_one() {
        let heap = test_heap();
        let mut alloc = heap.allocator();

        let per_cell = Size::from_words(16);
        let mut previous = Address::ZERO;
        for _ in 0..512 {
            let cell = alloc.allocate(per_cell);
            assert!(heap.nursery().contains(cell));
            assert_ne!(cell, previous);
            previous = cell;
        }
        assert!(heap.metrics().belt(0).tlab_carves() >= 2);
    }
}
