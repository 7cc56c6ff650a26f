//! Structured tracing for collections.
//!
//! With the `tracing` feature enabled, collections emit spans and events for
//! each phase; without it the stubs compile to nothing.

/// Span and event helpers used by the collection driver.
#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    /// Phases of one belt evacuation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[allow(dead_code)]
    pub enum GcPhase {
        /// Rewriting the root set.
        Roots,
        /// Scanning stable belt prefixes.
        Scan,
        /// Draining the to-belt frontier.
        Drain,
        /// Resetting and re-activating the evacuated belt.
        Swap,
    }

    /// Stable identifier correlating all events of one collection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    static NEXT_GC_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next collection identifier.
    pub fn next_gc_id() -> GcId {
        GcId(NEXT_GC_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Span covering an entire collection.
    pub fn trace_collection(kind: &str, gc_id: GcId) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_collect", kind = kind, gc_id = gc_id.0).entered()
    }

    /// Span covering one evacuation phase.
    #[allow(dead_code)]
    pub fn trace_phase(phase: GcPhase) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_phase", phase = ?phase).entered()
    }

    /// Log one belt's bounds and mark, the way the verbose heap report
    /// prints them.
    pub fn log_belt(index: usize, start: usize, mark: usize, end: usize) {
        tracing::debug!(belt = index, start, mark, end, "belt");
    }

    /// Log the end of an evacuation.
    pub fn log_evacuation(from: usize, to: usize, survivor_bytes: usize) {
        tracing::debug!(from, to, survivor_bytes, "evacuated");
    }
}

/// No-op stand-ins compiled when the `tracing` feature is off.
#[cfg(not(feature = "tracing"))]
pub mod internal {
    /// Stub identifier when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GcId(pub u64);

    /// Stub when tracing is disabled.
    pub fn next_gc_id() -> GcId {
        GcId(0)
    }

    /// Stub when tracing is disabled.
    pub fn log_belt(_index: usize, _start: usize, _mark: usize, _end: usize) {}

    /// Stub when tracing is disabled.
    pub fn log_evacuation(_from: usize, _to: usize, _survivor_bytes: usize) {}
}

pub use internal::GcId;
