//! Collection metrics and per-belt counters.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::word::Size;

/// What kind of collection produced a metrics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CollectionKind {
    /// No collection has run yet.
    #[default]
    None = 0,
    /// Nursery evacuated into the next belt.
    Nursery = 1,
    /// An intermediate belt evacuated onward.
    Intermediate = 2,
    /// The mature belt compacted through the nursery and back.
    Major = 3,
}

/// Statistics from the most recent collection.
#[derive(Debug, Clone, Copy)]
pub struct GcMetrics {
    /// Total stop-the-world duration.
    pub duration: Duration,
    /// Time spent rewriting the root set.
    pub roots_duration: Duration,
    /// Time spent scanning stable belt prefixes.
    pub scan_duration: Duration,
    /// Time spent draining the to-belt frontier.
    pub drain_duration: Duration,
    /// Bytes copied into to-belts.
    pub bytes_survived: usize,
    /// Objects copied into to-belts.
    pub objects_survived: usize,
    /// Bytes reclaimed from evacuated belts.
    pub bytes_reclaimed: usize,
    /// The kind of collection.
    pub kind: CollectionKind,
    /// Collections run on this heap so far, this one included.
    pub total_collections: usize,
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GcMetrics {
    /// A zeroed snapshot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::ZERO,
            roots_duration: Duration::ZERO,
            scan_duration: Duration::ZERO,
            drain_duration: Duration::ZERO,
            bytes_survived: 0,
            objects_survived: 0,
            bytes_reclaimed: 0,
            kind: CollectionKind::None,
            total_collections: 0,
        }
    }
}

// ============================================================================
// PhaseTimer
// ============================================================================

/// Captures the durations of the three phases of an evacuation: root
/// rewriting, stable-belt scanning, and frontier draining.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimer {
    /// Accumulated root-rewrite time.
    pub roots: Duration,
    /// Accumulated stable-scan time.
    pub scan: Duration,
    /// Accumulated frontier-drain time.
    pub drain: Duration,
    current_start: Option<Instant>,
}

impl PhaseTimer {
    /// A timer with all phases at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            roots: Duration::ZERO,
            scan: Duration::ZERO,
            drain: Duration::ZERO,
            current_start: None,
        }
    }

    /// Start timing a phase.
    pub fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    /// End the root-rewrite phase, accumulating its duration.
    pub fn end_roots(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.roots += start.elapsed();
        }
    }

    /// End the stable-scan phase, accumulating its duration.
    pub fn end_scan(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.scan += start.elapsed();
        }
    }

    /// End the frontier-drain phase, accumulating its duration.
    pub fn end_drain(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.drain += start.elapsed();
        }
    }
}

// ============================================================================
// Per-belt counters
// ============================================================================

/// Cumulative counters for one belt.
#[derive(Debug, Default)]
pub struct BeltCounters {
    allocations: AtomicUsize,
    bytes_allocated: AtomicUsize,
    tlab_carves: AtomicUsize,
    survivor_objects: AtomicUsize,
    survivor_bytes: AtomicUsize,
    collections: AtomicUsize,
}

impl BeltCounters {
    const fn new() -> Self {
        Self {
            allocations: AtomicUsize::new(0),
            bytes_allocated: AtomicUsize::new(0),
            tlab_carves: AtomicUsize::new(0),
            survivor_objects: AtomicUsize::new(0),
            survivor_bytes: AtomicUsize::new(0),
            collections: AtomicUsize::new(0),
        }
    }

    pub(crate) fn record_allocation(&self, size: Size) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated.fetch_add(size.bytes(), Ordering::Relaxed);
    }

    pub(crate) fn record_tlab_carve(&self) {
        self.tlab_carves.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_survivor(&self, size: Size) {
        self.survivor_objects.fetch_add(1, Ordering::Relaxed);
        self.survivor_bytes.fetch_add(size.bytes(), Ordering::Relaxed);
    }

    pub(crate) fn record_collection(&self) {
        self.collections.fetch_add(1, Ordering::Relaxed);
    }

    /// Cells allocated in this belt (mutator and collector).
    #[must_use]
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Bytes allocated in this belt, excluding debug tags.
    #[must_use]
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.load(Ordering::Relaxed)
    }

    /// TLABs carved from this belt.
    #[must_use]
    pub fn tlab_carves(&self) -> usize {
        self.tlab_carves.load(Ordering::Relaxed)
    }

    /// Objects that survived into this belt.
    #[must_use]
    pub fn survivor_objects(&self) -> usize {
        self.survivor_objects.load(Ordering::Relaxed)
    }

    /// Bytes that survived into this belt.
    #[must_use]
    pub fn survivor_bytes(&self) -> usize {
        self.survivor_bytes.load(Ordering::Relaxed)
    }

    /// Times this belt has been evacuated.
    #[must_use]
    pub fn collections(&self) -> usize {
        self.collections.load(Ordering::Relaxed)
    }
}

// ============================================================================
// HeapMetrics
// ============================================================================

/// All metrics of one heap: per-belt counters plus collection totals and
/// the last collection's snapshot. Reading never triggers collection.
#[derive(Debug)]
pub struct HeapMetrics {
    belts: Vec<BeltCounters>,
    collections: AtomicUsize,
    total_pause_ns: AtomicU64,
    last: Mutex<GcMetrics>,
}

impl HeapMetrics {
    pub(crate) fn new(belt_count: usize) -> Self {
        Self {
            belts: (0..belt_count).map(|_| BeltCounters::new()).collect(),
            collections: AtomicUsize::new(0),
            total_pause_ns: AtomicU64::new(0),
            last: Mutex::new(GcMetrics::new()),
        }
    }

    /// Counters for belt `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn belt(&self, index: usize) -> &BeltCounters {
        &self.belts[index]
    }

    /// Total collections run on this heap.
    #[must_use]
    pub fn total_collections(&self) -> usize {
        self.collections.load(Ordering::Relaxed)
    }

    /// Cumulative stop-the-world pause time in nanoseconds.
    #[must_use]
    pub fn total_pause_ns(&self) -> u64 {
        self.total_pause_ns.load(Ordering::Relaxed)
    }

    /// Snapshot of the most recent collection.
    #[must_use]
    pub fn last_collection(&self) -> GcMetrics {
        *self.last.lock()
    }

    pub(crate) fn record_collection(&self, mut metrics: GcMetrics) {
        let total = self.collections.fetch_add(1, Ordering::Relaxed) + 1;
        metrics.total_collections = total;
        self.total_pause_ns.fetch_add(
            metrics.duration.as_nanos().try_into().unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        *self.last.lock() = metrics;
    }
}
