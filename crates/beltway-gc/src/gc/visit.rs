//! The cell visitor: linear, cell-at-a-time traversal of a region.
//!
//! The scan pointer walks from a region's start toward its allocation mark,
//! verifying the debug tag, applying the action to the hub grip and then to
//! every reference field the hub's layout declares, and advancing by the
//! cell's exact size. Any size or layout error therefore surfaces as a tag
//! mismatch on the very next step.
//!
//! The bound is a closure re-evaluated on every iteration: for a stable
//! region it returns a snapshot, for the to-belt frontier it re-reads the
//! belt mark (an acquire load paired with the allocator's release publish),
//! so the same loop drains a belt that is still growing under it.

use crate::gc::action::Action;
use crate::heap::{fatal_corruption, Belt, BeltHeap};
use crate::layout::{
    cell_to_origin, debug_tag_size, debug_tag_words, hub_of, read_length, set_hub, size_with_hub,
    Hub, LayoutKind, ARRAY_DATA_OFFSET, CELL_TAG_WORD,
};
use crate::word::{Address, Size};

/// What a scan covered.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScanOutcome {
    /// Cells visited.
    pub cells: usize,
    /// Where the scan pointer stopped; equals the bound at loop exit.
    pub end: Address,
}

/// Walk `[start, bound())` cell by cell, applying `action` to every
/// reference in every cell.
///
/// # Safety
///
/// The region must contain only validly planted cells between `start` and
/// the bound, the caller must have exclusive access to the heap (a
/// stop-the-world window), and `from`/`to` must be distinct belts of `heap`
/// when `action` copies.
pub(crate) unsafe fn visit_cells<F>(
    heap: &BeltHeap,
    start: Address,
    bound: F,
    action: Action,
    from: &Belt,
    to: &Belt,
) -> ScanOutcome
where
    F: Fn() -> Address,
{
    let mut scan = start;
    let mut cells = 0_usize;
    loop {
        let limit = bound();
        if scan >= limit {
            break;
        }
        scan = unsafe { visit_cell(heap, scan, start, action, from, to) };
        cells += 1;
    }
    ScanOutcome { cells, end: scan }
}

/// Visit the cell whose tag (or cell, in release builds) starts at `scan`;
/// returns the start of the next cell.
unsafe fn visit_cell(
    heap: &BeltHeap,
    scan: Address,
    region_start: Address,
    action: Action,
    from: &Belt,
    to: &Belt,
) -> Address {
    let cell = unsafe { advance_past_tag(scan, region_start) };
    let origin = cell_to_origin(cell);

    // The hub is an ordinary heap object: visit its grip first, since the
    // action may relocate the hub itself.
    let hub_grip = unsafe { hub_of(origin) };
    if hub_grip.is_zero() {
        fatal_corruption("cell without a hub", origin, region_start);
    }
    let visited_hub = unsafe { action.apply(heap, hub_grip, from, to) };
    if visited_hub != hub_grip {
        unsafe { set_hub(origin, visited_hub) };
    }
    let hub = Hub::from_grip(visited_hub);

    match unsafe { hub.layout_kind() } {
        LayoutKind::Tuple | LayoutKind::Hybrid => {
            let entries = unsafe { hub.refmap_len() };
            for index in 0..entries {
                let slot = origin + unsafe { hub.refmap_offset(index) };
                unsafe { visit_slot(heap, slot, action, from, to) };
            }
        }
        LayoutKind::RefArray => {
            let length = unsafe { read_length(origin) };
            for index in 0..length {
                let slot = origin + ARRAY_DATA_OFFSET + Size::from_words(index);
                unsafe { visit_slot(heap, slot, action, from, to) };
            }
        }
    }

    cell + unsafe { size_with_hub(origin, hub) }
}

/// Apply the action to the grip held in `slot`, writing back on change.
#[inline]
unsafe fn visit_slot(heap: &BeltHeap, slot: Address, action: Action, from: &Belt, to: &Belt) {
    let held = unsafe { crate::grip::Grip::from_origin(Address::new(slot.read_word())) };
    let updated = unsafe { action.apply(heap, held, from, to) };
    if updated != held {
        unsafe { slot.write_word(updated.raw()) };
    }
}

/// Verify the debug tag at `scan` and step over it. In release builds the
/// tag does not exist and `scan` is already the cell.
#[inline]
unsafe fn advance_past_tag(scan: Address, region_start: Address) -> Address {
    if debug_tag_words() == 0 {
        return scan;
    }
    let tag = unsafe { scan.read_word() };
    if tag != CELL_TAG_WORD {
        fatal_corruption("missing or invalid cell tag", scan, region_start);
    }
    scan + debug_tag_size()
}
