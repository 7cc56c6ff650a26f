//! The actions a scan applies to each reference it encounters.

use crate::grip::Grip;
use crate::heap::{fatal_corruption, fatal_evacuation_exhausted, Belt, BeltHeap, BeltState};
use crate::layout::{
    cell_to_origin, debug_tag_size, debug_tag_words, forward_of, hub_of, origin_to_cell,
    set_forward, size_of, CELL_TAG_WORD,
};

/// A polymorphic operation over `(grip, from, to)` yielding a
/// possibly-different grip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Evacuate objects out of the from-belt, forwarding exactly once.
    Copy,
    /// Check heap invariants; mutates nothing, dies on violation.
    Verify,
    /// Rewrite a stale grip through an existing forwarding record, without
    /// copying.
    Update,
}

impl Action {
    /// Apply this action to `grip`. Zero grips pass through untouched.
    ///
    /// # Safety
    ///
    /// Non-zero grips must refer to allocated cells; the caller must hold
    /// exclusive heap access (a stop-the-world window).
    pub(crate) unsafe fn apply(self, heap: &BeltHeap, grip: Grip, from: &Belt, to: &Belt) -> Grip {
        if grip.is_zero() {
            return grip;
        }
        match self {
            Self::Copy => unsafe { evacuate(heap, grip, from, to) },
            Self::Verify => unsafe { verify(heap, grip) },
            Self::Update => unsafe { update(grip, from) },
        }
    }
}

/// The copy action: Cheney-style evacuation through the forwarding slot.
///
/// 1. Objects outside the from-belt are already stable; return unchanged.
/// 2. A non-zero forwarding slot means an earlier path copied the object
///    this cycle; return the recorded grip (at-most-one-copy idempotence).
/// 3. Otherwise reserve the exact size in the to-belt, copy the cell
///    verbatim, record the forwarding grip in the old header, return it.
unsafe fn evacuate(heap: &BeltHeap, grip: Grip, from: &Belt, to: &Belt) -> Grip {
    let origin = grip.to_origin();
    if !from.contains(origin) {
        return grip;
    }

    let forwarded = unsafe { forward_of(origin) };
    if !forwarded.is_zero() {
        return Grip::from_origin(forwarded);
    }

    // The old hub stays readable even if it was itself evacuated earlier in
    // this cycle: forwarding only claims the header slot, not the fields.
    let size = unsafe { size_of(origin) };
    let new_cell = heap.gc_allocate(to, size);
    if new_cell.is_zero() {
        fatal_evacuation_exhausted(to.index(), size);
    }

    let old_cell = origin_to_cell(origin);
    unsafe { old_cell.copy_to(new_cell, size) };

    let new_origin = cell_to_origin(new_cell);
    unsafe { set_forward(origin, new_origin) };
    debug_assert_eq!(
        unsafe { size_of(new_origin) },
        size,
        "copied cell must keep its size"
    );

    heap.metrics.belt(to.index()).record_survivor(size);
    Grip::from_origin(new_origin)
}

/// The update action: follow an existing forwarding record, if any.
unsafe fn update(grip: Grip, from: &Belt) -> Grip {
    let origin = grip.to_origin();
    if !from.contains(origin) {
        return grip;
    }
    let forwarded = unsafe { forward_of(origin) };
    if forwarded.is_zero() {
        grip
    } else {
        Grip::from_origin(forwarded)
    }
}

/// The verify action: the grip must dereference to a plausibly live cell.
/// Any violation is fatal; a heap that fails verification cannot be trusted
/// for further collection work.
unsafe fn verify(heap: &BeltHeap, grip: Grip) -> Grip {
    let origin = grip.to_origin();
    if !origin.is_word_aligned() {
        fatal_corruption("unaligned grip", origin, heap.start());
    }
    let Some(belt) = heap.belt_containing(origin) else {
        fatal_corruption("grip outside every belt", origin, heap.start());
    };
    if belt.state() == BeltState::Empty {
        fatal_corruption("grip into an empty belt", origin, belt.start());
    }
    let cell = origin_to_cell(origin);
    if cell < belt.start() || origin >= belt.allocation_mark() {
        fatal_corruption("grip outside the belt's live span", origin, belt.start());
    }
    if debug_tag_words() > 0 {
        let tag = unsafe { (cell - debug_tag_size()).read_word() };
        if tag != CELL_TAG_WORD {
            fatal_corruption("grip to a cell without a valid tag", origin, belt.start());
        }
    }
    let hub = unsafe { hub_of(origin) };
    if hub.is_zero() || !heap.contains(hub.to_origin()) {
        fatal_corruption("cell with an invalid hub grip", origin, belt.start());
    }
    grip
}
