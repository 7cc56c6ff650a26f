//! The belt heap: one contiguous reservation partitioned into belts.
//!
//! A belt is a generation-as-a-queue: mutators bump-allocate at the tail of
//! belt 0 (through TLABs), and each collection copies survivors forward into
//! the next belt. Belt boundaries are fixed at heap construction from
//! configured percentages, aligned to the TLAB size.
//!
//! The heap owns all object storage, the root set, the safepoint control and
//! the metrics; there is no process-global collector state. Everything the
//! allocator and collector need is reached through a [`BeltHeap`] reference.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use parking_lot::Mutex;
use sys_alloc::HeapReservation;

use crate::gc::safepoint::SafepointControl;
use crate::gc::{default_collect_condition, CollectCondition};
use crate::grip::Grip;
use crate::layout::{
    self, debug_tag_size, hub_cell_size, plant_hub, plant_hub_of_hubs, Hub, LayoutKind,
    CELL_TAG_WORD,
};
use crate::metrics::HeapMetrics;
use crate::roots::{RootGuard, RootSet};
use crate::tlab::Allocator;
use crate::word::{Address, Size, WORD_BYTES};

// ============================================================================
// Constants
// ============================================================================

/// Default total heap size.
pub const DEFAULT_HEAP_SIZE: usize = 32 * 1024 * 1024;

/// Default TLAB size. Belt boundaries are aligned to this.
pub const DEFAULT_TLAB_SIZE: usize = 32 * 1024;

/// Default belt split: nursery / intermediate / mature.
pub const DEFAULT_BELT_PERCENTAGES: [u32; 3] = [25, 25, 50];

/// Default occupancy (percent) at which a belt is evacuated onward during a
/// triggered collection.
pub const DEFAULT_CASCADE_THRESHOLD: u32 = 75;

// ============================================================================
// Configuration
// ============================================================================

/// Heap construction parameters.
#[derive(Debug, Clone)]
pub struct BeltConfig {
    /// Total bytes to reserve for the heap. Must be a multiple of
    /// `tlab_size`.
    pub heap_size: usize,
    /// Percentage of the heap given to each belt, in belt order. Must sum
    /// to 100 with at least two belts.
    pub belt_percentages: Vec<u32>,
    /// TLAB bytes carved per mutator refill. Must be a power of two of at
    /// least 1KB.
    pub tlab_size: usize,
    /// Occupancy percent at which a belt cascades into the next during a
    /// triggered collection.
    pub cascade_threshold: u32,
}

impl Default for BeltConfig {
    fn default() -> Self {
        Self {
            heap_size: DEFAULT_HEAP_SIZE,
            belt_percentages: DEFAULT_BELT_PERCENTAGES.to_vec(),
            tlab_size: DEFAULT_TLAB_SIZE,
            cascade_threshold: DEFAULT_CASCADE_THRESHOLD,
        }
    }
}

impl BeltConfig {
    /// Validate the configuration.
    ///
    /// # Panics
    ///
    /// Panics on fewer than two belts, percentages not summing to 100, a
    /// zero percentage, a TLAB size that is not a power of two of at least
    /// 1KB, a heap size that is not a TLAB multiple, or a heap too small to
    /// give every belt one TLAB.
    pub fn validate(&self) {
        assert!(self.belt_percentages.len() >= 2, "a belt heap needs at least two belts");
        assert!(
            self.belt_percentages.iter().all(|&p| p > 0),
            "every belt needs a non-zero share of the heap"
        );
        assert_eq!(
            self.belt_percentages.iter().sum::<u32>(),
            100,
            "belt percentages must sum to 100"
        );
        assert!(
            self.tlab_size.is_power_of_two() && self.tlab_size >= 1024,
            "TLAB size must be a power of two of at least 1KB"
        );
        assert_eq!(self.heap_size % self.tlab_size, 0, "heap size must be a TLAB multiple");
        assert!(
            self.heap_size >= self.belt_percentages.len() * self.tlab_size,
            "heap too small for the configured belt count"
        );
        assert!(
            (1..=100).contains(&self.cascade_threshold),
            "cascade threshold must be a percentage"
        );
    }
}

// ============================================================================
// Belt
// ============================================================================

/// Lifecycle of a belt across a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BeltState {
    /// Accepting bump allocations.
    Active = 0,
    /// Being scanned and copied out of by the collector.
    Evacuating = 1,
    /// Fully drained; ready to take the next generation's survivors.
    Empty = 2,
}

impl BeltState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Evacuating,
            2 => Self::Empty,
            _ => unreachable!("invalid belt state byte"),
        }
    }
}

/// One contiguous belt of the heap with a monotonically advancing
/// allocation mark.
///
/// The mark is atomic: mutator-side TLAB carves advance it with a CAS and
/// publish with release ordering, and the scanner's moving-bound reads use
/// acquire, so a linear scan of a still-filling belt always sees fully
/// reserved spans.
pub struct Belt {
    index: usize,
    start: Address,
    end: Address,
    mark: AtomicUsize,
    state: AtomicU8,
}

impl Belt {
    fn new(index: usize, start: Address, end: Address) -> Self {
        Self {
            index,
            start,
            end,
            mark: AtomicUsize::new(start.raw()),
            state: AtomicU8::new(BeltState::Active as u8),
        }
    }

    /// Position of this belt in the belt order (0 = nursery).
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// First address of the belt.
    #[inline]
    #[must_use]
    pub const fn start(&self) -> Address {
        self.start
    }

    /// One past the last address of the belt.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> Address {
        self.end
    }

    /// The current allocation mark: the boundary between allocated cells
    /// and uncommitted space.
    #[inline]
    #[must_use]
    pub fn allocation_mark(&self) -> Address {
        Address::new(self.mark.load(Ordering::Acquire))
    }

    /// The belt's lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> BeltState {
        BeltState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: BeltState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Whether `addr` falls inside this belt.
    #[inline]
    #[must_use]
    pub fn contains(&self, addr: Address) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Total bytes this belt can hold.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> Size {
        self.end.distance_from(self.start)
    }

    /// Bytes below the allocation mark.
    #[inline]
    #[must_use]
    pub fn used_bytes(&self) -> Size {
        self.allocation_mark().distance_from(self.start)
    }

    /// Bytes between the allocation mark and the end of the belt.
    #[inline]
    #[must_use]
    pub fn free_bytes(&self) -> Size {
        self.end.distance_from(self.allocation_mark())
    }

    /// Occupancy as an integer percentage.
    #[inline]
    #[must_use]
    pub fn occupancy_percent(&self) -> u32 {
        let capacity = self.capacity().bytes();
        if capacity == 0 {
            return 100;
        }
        u32::try_from(self.used_bytes().bytes() * 100 / capacity).unwrap_or(100)
    }

    /// Reserve `size` bytes at the tail of this belt. Returns the start of
    /// the reserved span, or [`Address::ZERO`] on exhaustion.
    pub(crate) fn reserve(&self, size: Size) -> Address {
        loop {
            let old = self.mark.load(Ordering::Relaxed);
            let Some(new) = old.checked_add(size.bytes()) else {
                return Address::ZERO;
            };
            if new > self.end.raw() {
                return Address::ZERO;
            }
            if self
                .mark
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Address::new(old);
            }
        }
    }

    /// Reset the allocation mark to the belt start. Collector-only, after
    /// the belt has been fully evacuated.
    pub(crate) fn reset_mark(&self) {
        self.mark.store(self.start.raw(), Ordering::Release);
    }
}

// ============================================================================
// BeltHeap
// ============================================================================

/// The heap: reservation, belts, roots, safepoint control and metrics, owned
/// together with lifecycle tied to this value.
pub struct BeltHeap {
    config: BeltConfig,
    #[allow(dead_code)] // Holds the mapping alive for the belts carved from it.
    reservation: HeapReservation,
    start: Address,
    end: Address,
    belts: Vec<Belt>,
    pub(crate) roots: Mutex<RootSet>,
    pub(crate) safepoint: SafepointControl,
    pub(crate) metrics: HeapMetrics,
    pub(crate) in_collect: AtomicBool,
    pub(crate) collect_condition: Mutex<CollectCondition>,
    // Heap-internal metadata grips, updated like roots on every collection.
    pub(crate) hub_hub: Mutex<Grip>,
    pub(crate) filler_hub: Mutex<Grip>,
}

// SAFETY: all shared mutation inside the heap goes through atomics and
// parking_lot locks; raw root-slot pointers in the root set are only
// dereferenced by the collector inside a stop-the-world window.
unsafe impl Send for BeltHeap {}
unsafe impl Sync for BeltHeap {}

impl BeltHeap {
    /// Build a heap from the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid (see [`BeltConfig::validate`])
    /// or if the OS refuses the reservation.
    #[must_use]
    pub fn new(config: BeltConfig) -> Self {
        config.validate();

        let reservation = HeapReservation::reserve(config.heap_size)
            .expect("failed to reserve heap memory from the OS");
        let start = Address::new(reservation.base() as usize);
        let end = start + Size::new(config.heap_size);

        let belts = carve_belts(&config, start);
        let belt_count = belts.len();

        let heap = Self {
            reservation,
            start,
            end,
            belts,
            roots: Mutex::new(RootSet::new()),
            safepoint: SafepointControl::new(),
            metrics: HeapMetrics::new(belt_count),
            in_collect: AtomicBool::new(false),
            collect_condition: Mutex::new(default_collect_condition as CollectCondition),
            config,
            hub_hub: Mutex::new(Grip::ZERO),
            filler_hub: Mutex::new(Grip::ZERO),
        };
        heap.bootstrap_metadata();
        heap
    }

    /// Build a heap with the default configuration.
    #[must_use]
    pub fn with_default_config() -> Self {
        Self::new(BeltConfig::default())
    }

    /// Plant the self-describing hub of hubs and the filler-array hub in the
    /// mature belt. Both live as long as the heap and are rewritten by every
    /// collection that moves them.
    fn bootstrap_metadata(&self) {
        let mature = self.mature();

        let hubs_cell = self.gc_allocate(mature, hub_cell_size(0));
        assert!(!hubs_cell.is_zero(), "mature belt too small for heap metadata");
        // SAFETY: the cell was just reserved from the mature belt.
        let hubs = unsafe { plant_hub_of_hubs(hubs_cell) };
        *self.hub_hub.lock() = hubs.grip();

        let filler_cell = self.gc_allocate(mature, hub_cell_size(0));
        assert!(!filler_cell.is_zero(), "mature belt too small for heap metadata");
        // SAFETY: as above; the hub of hubs was planted just before.
        let filler = unsafe { plant_hub(filler_cell, hubs, LayoutKind::RefArray, Size::ZERO, &[]) };
        *self.filler_hub.lock() = filler.grip();
    }

    /// The heap configuration.
    #[must_use]
    pub const fn config(&self) -> &BeltConfig {
        &self.config
    }

    /// All belts in belt order.
    #[must_use]
    pub fn belts(&self) -> &[Belt] {
        &self.belts
    }

    /// Belt `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn belt(&self, index: usize) -> &Belt {
        &self.belts[index]
    }

    /// The nursery: belt 0, where mutators allocate.
    #[must_use]
    pub fn nursery(&self) -> &Belt {
        &self.belts[0]
    }

    /// The mature belt: the last belt, where survivors accumulate.
    #[must_use]
    pub fn mature(&self) -> &Belt {
        self.belts.last().expect("validated config has belts")
    }

    /// First address of the heap reservation.
    #[must_use]
    pub const fn start(&self) -> Address {
        self.start
    }

    /// One past the last address of the heap reservation.
    #[must_use]
    pub const fn end(&self) -> Address {
        self.end
    }

    /// Whether `addr` falls inside the heap reservation.
    #[must_use]
    pub fn contains(&self, addr: Address) -> bool {
        self.start <= addr && addr < self.end
    }

    /// The belt containing `addr`, if any.
    #[must_use]
    pub fn belt_containing(&self, addr: Address) -> Option<&Belt> {
        self.belts.iter().find(|belt| belt.contains(addr))
    }

    /// Heap metrics.
    #[must_use]
    pub const fn metrics(&self) -> &HeapMetrics {
        &self.metrics
    }

    /// The hub that describes hubs.
    #[must_use]
    pub fn hub_of_hubs(&self) -> Hub {
        Hub::from_grip(*self.hub_hub.lock())
    }

    pub(crate) fn filler_hub(&self) -> Hub {
        Hub::from_grip(*self.filler_hub.lock())
    }

    /// Create a mutator allocation context. One per thread; the context
    /// owns the thread's TLAB and its safepoint registration.
    #[must_use]
    pub fn allocator(&self) -> Allocator<'_> {
        Allocator::new(self)
    }

    /// Register `slot` as a root: the collector will treat the grip it holds
    /// as live and rewrite it when the object moves. The registration ends
    /// when the guard drops.
    ///
    /// Register and drop roots only from threads that hold an [`Allocator`]
    /// for this heap (whose safepoint discipline keeps them out of
    /// collection windows), or while no collection can run; a root slipped
    /// in mid-collection may hold a stale grip afterwards.
    pub fn root<'a>(&'a self, slot: &'a mut Grip) -> RootGuard<'a> {
        RootGuard::new(self, slot)
    }

    /// Replace the collection-trigger condition consulted on the mutator
    /// slow path.
    pub fn set_collect_condition(&self, condition: CollectCondition) {
        *self.collect_condition.lock() = condition;
    }

    /// Bump-allocate `size` bytes for one cell at the tail of `belt`.
    ///
    /// Returns the cell address (past the debug tag, which this call
    /// plants), or [`Address::ZERO`] if the belt cannot supply the span. The
    /// caller decides whether exhaustion is recoverable; during evacuation
    /// it is not.
    pub fn gc_allocate(&self, belt: &Belt, size: Size) -> Address {
        debug_assert!(size.is_word_granular(), "cell sizes are word-granular");
        let span = belt.reserve(size + debug_tag_size());
        if span.is_zero() {
            return Address::ZERO;
        }
        self.metrics.belt(belt.index()).record_allocation(size);
        write_debug_tag(span)
    }
}

/// Plant the debug cell tag at `span` and return the cell address after it.
/// In release builds the tag is absent and the span is the cell.
pub(crate) fn write_debug_tag(span: Address) -> Address {
    if layout::debug_tag_words() == 0 {
        return span;
    }
    // SAFETY: the span was reserved from a belt with room for the tag word.
    unsafe { span.write_word(CELL_TAG_WORD) };
    span + debug_tag_size()
}

fn carve_belts(config: &BeltConfig, start: Address) -> Vec<Belt> {
    let mut belts = Vec::with_capacity(config.belt_percentages.len());
    let mut cursor = start;
    let heap_end = start + Size::new(config.heap_size);

    for (index, &percent) in config.belt_percentages.iter().enumerate() {
        let end = if index == config.belt_percentages.len() - 1 {
            heap_end
        } else {
            // Round each interior boundary down to a TLAB multiple, but
            // never below one TLAB.
            let share = config.heap_size / 100 * percent as usize;
            let share = std::cmp::max(share / config.tlab_size * config.tlab_size, config.tlab_size);
            cursor + Size::new(share)
        };
        belts.push(Belt::new(index, cursor, end));
        cursor = end;
    }
    belts
}

// ============================================================================
// Fatal paths
// ============================================================================

/// A heap-consistency check failed. Prints the offending address and its
/// offset from the region start, then dies; a corrupted heap cannot be
/// trusted for further collection work.
#[cold]
pub(crate) fn fatal_corruption(message: &str, addr: Address, region_start: Address) -> ! {
    let offset = addr.raw().wrapping_sub(region_start.raw());
    panic!(
        "heap corruption: {message} at {addr} (region start {region_start}, offset {offset:#x})"
    );
}

/// The to-belt ran dry while evacuating. There is no defined semantics for a
/// half-evacuated heap, so this terminates the collection and the process.
#[cold]
pub(crate) fn fatal_evacuation_exhausted(belt_index: usize, requested: Size) -> ! {
    panic!(
        "out of memory during evacuation: belt {belt_index} cannot supply {requested} more bytes"
    );
}

const _: () = assert!(WORD_BYTES.is_power_of_two());

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> BeltConfig {
        BeltConfig {
            heap_size: 1024 * 1024,
            belt_percentages: vec![25, 25, 50],
            tlab_size: 4096,
            cascade_threshold: 75,
        }
    }

    #[test]
    fn belts_partition_the_reservation() {
        let heap = BeltHeap::new(small_config());
        let belts = heap.belts();
        assert_eq!(belts.len(), 3);
        assert_eq!(belts[0].start(), heap.start());
        assert_eq!(belts[2].end(), heap.end());
        for pair in belts.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start());
        }
        for belt in belts {
            assert!(belt.capacity().bytes() >= heap.config().tlab_size);
            assert_eq!(belt.state(), BeltState::Active);
        }
    }

    #[test]
    fn gc_allocate_bumps_and_tags() {
        let heap = BeltHeap::new(small_config());
        let belt = heap.belt(1);
        let before = belt.allocation_mark();

        let cell = heap.gc_allocate(belt, Size::from_words(4));
        assert!(!cell.is_zero());
        assert_eq!(cell, before + debug_tag_size());
        assert_eq!(
            belt.allocation_mark().distance_from(before),
            Size::from_words(4) + debug_tag_size()
        );

        if layout::debug_tag_words() > 0 {
            let tag = cell - debug_tag_size();
            assert_eq!(unsafe { tag.read_word() }, CELL_TAG_WORD);
        }
    }

    #[test]
    fn belt_reserve_exhausts_to_zero() {
        let heap = BeltHeap::new(small_config());
        let belt = heap.belt(0);
        let oversize = belt.capacity() + Size::from_words(1);
        assert!(belt.reserve(oversize).is_zero());
        // The failed reserve must not move the mark.
        assert_eq!(belt.used_bytes(), Size::ZERO);
    }

    #[test]
    fn metadata_hubs_are_planted_in_mature() {
        let heap = BeltHeap::new(small_config());
        let hubs = heap.hub_of_hubs();
        assert!(heap.mature().contains(hubs.grip().to_origin()));
        unsafe {
            assert_eq!(hubs.layout_kind(), LayoutKind::Hybrid);
            assert_eq!(heap.filler_hub().layout_kind(), LayoutKind::RefArray);
        }
    }

    #[test]
    fn occupancy_accounting() {
        let heap = BeltHeap::new(small_config());
        let belt = heap.belt(1);
        assert_eq!(belt.occupancy_percent(), 0);
        let quarter = Size::new(belt.capacity().bytes() / 4);
        assert!(!belt.reserve(quarter).is_zero());
        assert_eq!(belt.occupancy_percent(), 25);
        assert_eq!(belt.free_bytes() + belt.used_bytes(), belt.capacity());
    }

    #[test]
    #[should_panic(expected = "must sum to 100")]
    fn percentages_must_sum_to_100() {
        let mut config = small_config();
        config.belt_percentages = vec![30, 30, 30];
        BeltHeap::new(config);
    }

    #[test]
    #[should_panic(expected = "at least two belts")]
    fn single_belt_is_rejected() {
        let mut config = small_config();
        config.belt_percentages = vec![100];
        BeltHeap::new(config);
    }

    #[test]
    #[should_panic(expected = "TLAB multiple")]
    fn heap_size_must_be_tlab_multiple() {
        let mut config = small_config();
        config.heap_size += 8;
        BeltHeap::new(config);
    }
}
