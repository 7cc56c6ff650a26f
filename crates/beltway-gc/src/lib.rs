//! A belt-way generational copying garbage collector.
//!
//! The heap is partitioned into ordered **belts**: generations organized as
//! queues. Mutators bump-allocate at the tail of belt 0 through thread-local
//! allocation buffers; when a collection triggers, live objects are copied
//! forward into the next belt through a **grip** indirection layer, with a
//! forwarding slot in each object's header guaranteeing at-most-one-copy
//! semantics. Object shape comes from **hubs**: heap-allocated metadata
//! blocks (relocatable like everything else) that carry a layout kind and a
//! reference map, so the scanner needs no external type table.
//!
//! # Quick start
//!
//! ```ignore
//! use beltway_gc::{BeltHeap, LayoutKind, Offset, Size, layout};
//!
//! let heap = BeltHeap::with_default_config();
//! let mut alloc = heap.allocator();
//!
//! // A tuple class: two fields, the first a reference.
//! let hub = alloc.create_hub(
//!     LayoutKind::Tuple,
//!     layout::tuple_cell_size(2),
//!     &[Offset::from_words(0)],
//! );
//!
//! let mut node = alloc.create_tuple(hub);
//! let _keep = heap.root(&mut node);
//! alloc.collect_nursery(); // `node` survives into belt 1
//! ```
//!
//! # Collection model
//!
//! Collections are stop-the-world: every mutator thread registers through
//! its [`Allocator`] and parks at cooperative safepoints while one thread
//! scans. There is no concurrent marking or copying; the only concession to
//! motion during a scan is the to-belt frontier, whose bound is re-read on
//! every step.
//!
//! # Failure model
//!
//! Heap corruption (a bad debug cell tag, a grip outside the live spans) and
//! to-belt exhaustion during evacuation are unrecoverable: the crate prints
//! a diagnostic and panics. Nothing is retried; a corrupted heap cannot be
//! trusted for further collection work.

#![warn(missing_docs)]

pub mod gc;
mod grip;
mod heap;
pub mod layout;
mod metrics;
mod roots;
mod tlab;
mod tracing;
mod word;

pub use gc::{default_collect_condition, Action, CollectCondition, CollectInfo};
pub use grip::{Grip, Reference};
pub use heap::{
    Belt, BeltConfig, BeltHeap, BeltState, DEFAULT_BELT_PERCENTAGES, DEFAULT_CASCADE_THRESHOLD,
    DEFAULT_HEAP_SIZE, DEFAULT_TLAB_SIZE,
};
pub use layout::{Hub, LayoutKind};
pub use metrics::{BeltCounters, CollectionKind, GcMetrics, HeapMetrics, PhaseTimer};
pub use roots::{RootGuard, RootSet};
pub use tlab::{Allocator, Tlab};
pub use tracing::GcId;
pub use word::{Address, Offset, Size, WORD_BYTES};
