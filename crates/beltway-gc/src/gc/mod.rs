//! The collection driver.
//!
//! A collection stops the world, then runs one or more belt evacuations.
//! Each evacuation rewrites the root set with the copy action, linearly
//! scans every stable belt prefix for references into the from-belt, drains
//! the to-belt's Cheney frontier until no forwarding remains, and finally
//! resets the evacuated belt.
//!
//! The driver shapes, after the generational belt configuration:
//!
//! - **nursery**: belt 0 evacuated into belt 1, the common case;
//! - **intermediate**: belt i evacuated into belt i+1 when it fills;
//! - **major**: the mature belt compacted by copying it through the (empty)
//!   nursery and back.

pub mod action;
pub mod safepoint;
pub mod sync;
pub(crate) mod visit;

pub use action::Action;

use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::gc::sync::{LockGuard, LockOrder};
use crate::gc::visit::visit_cells;
use crate::heap::{Belt, BeltHeap, BeltState};
use crate::metrics::{CollectionKind, GcMetrics, PhaseTimer};
use crate::tracing::internal as trace_log;
use crate::word::Size;

// ============================================================================
// Collection triggering
// ============================================================================

/// Heap occupancy snapshot consulted by the collection condition.
#[derive(Debug, Clone, Copy)]
pub struct CollectInfo {
    nursery_used: Size,
    nursery_capacity: Size,
    nursery_free: Size,
    tlab_size: usize,
    cascade_threshold: u32,
}

impl CollectInfo {
    /// Bytes allocated in the nursery.
    #[must_use]
    pub const fn nursery_used(&self) -> Size {
        self.nursery_used
    }

    /// Total nursery capacity.
    #[must_use]
    pub const fn nursery_capacity(&self) -> Size {
        self.nursery_capacity
    }

    /// Bytes left in the nursery.
    #[must_use]
    pub const fn nursery_free(&self) -> Size {
        self.nursery_free
    }

    /// The configured TLAB size.
    #[must_use]
    pub const fn tlab_size(&self) -> usize {
        self.tlab_size
    }

    /// The configured cascade threshold, in percent.
    #[must_use]
    pub const fn cascade_threshold(&self) -> u32 {
        self.cascade_threshold
    }
}

/// A function deciding, on the allocation slow path, whether to collect
/// before carving the next TLAB.
pub type CollectCondition = fn(&CollectInfo) -> bool;

/// The default condition: collect when the nursery can no longer hold a
/// full TLAB, so the collection happens just before hard exhaustion.
#[must_use]
pub fn default_collect_condition(info: &CollectInfo) -> bool {
    info.nursery_free().bytes() < info.tlab_size()
}

// ============================================================================
// Driver
// ============================================================================

impl BeltHeap {
    pub(crate) fn collect_info(&self) -> CollectInfo {
        let nursery = self.nursery();
        CollectInfo {
            nursery_used: nursery.used_bytes(),
            nursery_capacity: nursery.capacity(),
            nursery_free: nursery.free_bytes(),
            tlab_size: self.config().tlab_size,
            cascade_threshold: self.config().cascade_threshold,
        }
    }

    /// Evacuate the nursery into belt 1.
    ///
    /// Stops the world first; do not call from a thread that owns a live
    /// [`Allocator`](crate::Allocator); use
    /// [`Allocator::collect_nursery`](crate::Allocator::collect_nursery),
    /// which retires its TLAB and excludes itself from the rendezvous.
    pub fn collect_nursery(&self) {
        self.collect_nursery_internal(false);
    }

    pub(crate) fn collect_nursery_internal(&self, exclude_self: bool) {
        self.run_collection(exclude_self, CollectionKind::Nursery, |heap, timer| {
            heap.evacuate_belt(0, 1, timer);
        });
    }

    /// Evacuate belt `index` into belt `index + 1`.
    ///
    /// # Panics
    ///
    /// Panics if `index` names the mature belt; that one is compacted by
    /// [`BeltHeap::collect_major`].
    pub fn collect_belt(&self, index: usize) {
        assert!(
            index + 1 < self.belts().len(),
            "the mature belt is compacted by a major collection"
        );
        let kind = if index == 0 {
            CollectionKind::Nursery
        } else {
            CollectionKind::Intermediate
        };
        self.run_collection(false, kind, |heap, timer| {
            heap.evacuate_belt(index, index + 1, timer);
        });
    }

    /// Compact the mature belt: copy it through the nursery and back. Runs
    /// a nursery evacuation first if the nursery is not empty.
    pub fn collect_major(&self) {
        self.collect_major_internal(false);
    }

    pub(crate) fn collect_major_internal(&self, exclude_self: bool) {
        self.run_collection(exclude_self, CollectionKind::Major, |heap, timer| {
            let last = heap.belts().len() - 1;
            if !heap.nursery().used_bytes().is_zero() {
                heap.evacuate_belt(0, 1, timer);
            }
            heap.evacuate_belt(last, 0, timer);
            heap.evacuate_belt(0, last, timer);
        });
    }

    /// The full cascade: every belt evacuated onward, then the mature belt
    /// compacted.
    pub fn collect_full(&self) {
        self.collect_full_internal(false);
    }

    pub(crate) fn collect_full_internal(&self, exclude_self: bool) {
        self.run_collection(exclude_self, CollectionKind::Major, |heap, timer| {
            let last = heap.belts().len() - 1;
            for index in 0..last {
                heap.evacuate_belt(index, index + 1, timer);
            }
            heap.evacuate_belt(last, 0, timer);
            heap.evacuate_belt(0, last, timer);
        });
    }

    /// Collection on behalf of a failed or imminent-failure allocation:
    /// nursery evacuation, cascading onward through any belt past the
    /// configured occupancy threshold.
    pub(crate) fn collect_for_allocation(&self, exclude_self: bool) {
        self.run_collection(exclude_self, CollectionKind::Nursery, |heap, timer| {
            let threshold = heap.config().cascade_threshold;
            let last = heap.belts().len() - 1;
            heap.evacuate_belt(0, 1, timer);
            for index in 1..last {
                if heap.belt(index).occupancy_percent() < threshold {
                    break;
                }
                heap.evacuate_belt(index, index + 1, timer);
            }
            if heap.mature().occupancy_percent() >= threshold {
                heap.evacuate_belt(last, 0, timer);
                heap.evacuate_belt(0, last, timer);
            }
        });
    }

    /// Run the verify action over every belt's live span.
    ///
    /// Stops the world first; the same caveat as [`BeltHeap::collect_nursery`]
    /// applies to threads owning a live allocator.
    pub fn verify(&self) {
        self.verify_internal(false);
    }

    pub(crate) fn verify_internal(&self, exclude_self: bool) {
        let Some(_world) = self.safepoint.stop_the_world(exclude_self) else {
            return;
        };
        self.verify_assume_stopped();
    }

    pub(crate) fn verify_assume_stopped(&self) {
        // Roots first, the way collections visit them.
        self.apply_to_roots(Action::Verify, self.nursery(), self.nursery());
        for belt in self.belts() {
            let mark = belt.allocation_mark();
            // SAFETY: exclusive heap access; everything below the mark is a
            // planted cell.
            let outcome =
                unsafe { visit_cells(self, belt.start(), || mark, Action::Verify, belt, belt) };
            assert_eq!(
                outcome.end,
                mark,
                "verification of belt {} must land exactly on the allocation mark \
                 ({} cells visited)",
                belt.index(),
                outcome.cells
            );
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn run_collection(
        &self,
        exclude_self: bool,
        kind: CollectionKind,
        body: impl FnOnce(&Self, &mut PhaseTimer),
    ) {
        let Some(_world) = self.safepoint.stop_the_world(exclude_self) else {
            // Lost the race: another thread's collection just completed on
            // our behalf.
            return;
        };
        assert!(
            !self.in_collect.swap(true, Ordering::AcqRel),
            "reentrant collection"
        );

        let gc_id = trace_log::next_gc_id();
        #[cfg(feature = "tracing")]
        let _span = trace_log::trace_collection(kind_name(kind), gc_id);
        #[cfg(not(feature = "tracing"))]
        let _ = gc_id;

        let started = Instant::now();
        let used_before = self.total_used_bytes();
        let (survived_bytes_before, survived_objects_before) = self.survivor_totals();

        if cfg!(debug_assertions) {
            self.verify_assume_stopped();
        }

        let mut timer = PhaseTimer::new();
        body(self, &mut timer);

        if cfg!(debug_assertions) {
            self.verify_assume_stopped();
        }
        self.reactivate_empty_belts();

        let (survived_bytes, survived_objects) = self.survivor_totals();
        let used_after = self.total_used_bytes();
        self.metrics.record_collection(GcMetrics {
            duration: started.elapsed(),
            roots_duration: timer.roots,
            scan_duration: timer.scan,
            drain_duration: timer.drain,
            bytes_survived: survived_bytes - survived_bytes_before,
            objects_survived: survived_objects - survived_objects_before,
            bytes_reclaimed: used_before.bytes().saturating_sub(used_after.bytes()),
            kind,
            total_collections: 0, // assigned when recorded
        });
        self.in_collect.store(false, Ordering::Release);
    }

    /// One belt evacuation: roots, stable prefixes, frontier drain, reset.
    fn evacuate_belt(&self, from_index: usize, to_index: usize, timer: &mut PhaseTimer) {
        assert_ne!(from_index, to_index, "a belt cannot evacuate into itself");
        let from = self.belt(from_index);
        let to = self.belt(to_index);
        from.set_state(BeltState::Evacuating);

        for belt in self.belts() {
            trace_log::log_belt(
                belt.index(),
                belt.start().raw(),
                belt.allocation_mark().raw(),
                belt.end().raw(),
            );
        }

        let to_prior = to.allocation_mark();
        let survivors_before = self.metrics.belt(to_index).survivor_bytes();

        timer.start();
        self.apply_to_roots(Action::Copy, from, to);
        timer.end_roots();

        timer.start();
        for belt in self.belts() {
            if belt.index() == from_index {
                continue;
            }
            // The to-belt's stable prefix ends where this evacuation began
            // writing; everything past it belongs to the drain.
            let stable_end = if belt.index() == to_index {
                to_prior
            } else {
                belt.allocation_mark()
            };
            // SAFETY: stop-the-world; cells below the snapshot are planted.
            let outcome =
                unsafe { visit_cells(self, belt.start(), || stable_end, Action::Copy, from, to) };
            debug_assert_eq!(outcome.end, stable_end, "stable scan must land on its bound");
        }
        timer.end_scan();

        timer.start();
        // SAFETY: stop-the-world; the moving bound re-reads the belt mark,
        // which only this thread advances now.
        let outcome =
            unsafe { visit_cells(self, to_prior, || to.allocation_mark(), Action::Copy, from, to) };
        debug_assert_eq!(
            outcome.end,
            to.allocation_mark(),
            "frontier drain must land on the final mark"
        );
        timer.end_drain();

        from.set_state(BeltState::Empty);
        from.reset_mark();
        self.metrics.belt(from_index).record_collection();
        trace_log::log_evacuation(
            from_index,
            to_index,
            self.metrics.belt(to_index).survivor_bytes() - survivors_before,
        );
    }

    /// Apply `action` to every registered root slot and to the heap's own
    /// metadata grips.
    fn apply_to_roots(&self, action: Action, from: &Belt, to: &Belt) {
        let _order = LockGuard::new(LockOrder::Roots);
        let roots = self.roots.lock();
        for slot in roots.iter() {
            // SAFETY: registered slots outlive their guards, and nothing
            // else writes them while the world is stopped.
            let held = unsafe { slot.as_ptr().read() };
            let updated = unsafe { action.apply(self, held, from, to) };
            if updated != held {
                unsafe { slot.as_ptr().write(updated) };
            }
        }
        drop(roots);

        for slot in [&self.hub_hub, &self.filler_hub] {
            let mut grip = slot.lock();
            // SAFETY: metadata grips always refer to planted hubs.
            let updated = unsafe { action.apply(self, *grip, from, to) };
            *grip = updated;
        }
    }

    fn total_used_bytes(&self) -> Size {
        self.belts()
            .iter()
            .fold(Size::ZERO, |acc, belt| acc + belt.used_bytes())
    }

    fn survivor_totals(&self) -> (usize, usize) {
        (0..self.belts().len()).fold((0, 0), |(bytes, objects), index| {
            let counters = self.metrics.belt(index);
            (
                bytes + counters.survivor_bytes(),
                objects + counters.survivor_objects(),
            )
        })
    }

    fn reactivate_empty_belts(&self) {
        for belt in self.belts() {
            if belt.state() == BeltState::Empty {
                belt.set_state(BeltState::Active);
            }
        }
    }
}

#[cfg(feature = "tracing")]
fn kind_name(kind: CollectionKind) -> &'static str {
    match kind {
        CollectionKind::None => "none",
        CollectionKind::Nursery => "nursery",
        CollectionKind::Intermediate => "intermediate",
        CollectionKind::Major => "major",
    }
}
