//! Cooperative safepoints and the stop-the-world rendezvous.
//!
//! Every mutator thread registers itself (through its [`Allocator`]) and
//! polls for pending collections; in a full VM the polls are compiled into
//! generated code, here they sit on the allocation slow path and in
//! [`Allocator::safepoint`]. A thread that wants to collect raises the
//! request flag and waits until every other registered mutator has parked;
//! the collection then runs with exclusive access to the heap, and the
//! guard's drop releases the parked threads.
//!
//! There is no cancellation: a requested collection always runs to
//! completion (or dies fatally on corruption/exhaustion).
//!
//! [`Allocator`]: crate::Allocator
//! [`Allocator::safepoint`]: crate::Allocator::safepoint

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::gc::sync::{LockGuard, LockOrder};

#[derive(Debug, Default)]
struct RendezvousState {
    /// Mutator threads currently registered.
    registered: usize,
    /// Registered mutators currently parked at a safepoint.
    parked: usize,
    /// Whether a collection owns the heap right now.
    gc_active: bool,
}

/// The rendezvous state of one heap.
pub struct SafepointControl {
    gc_requested: AtomicBool,
    state: Mutex<RendezvousState>,
    /// Mutators wait here while a collection is active.
    mutator_cv: Condvar,
    /// The collector waits here for mutators to park (or unregister).
    collector_cv: Condvar,
}

impl SafepointControl {
    pub(crate) fn new() -> Self {
        Self {
            gc_requested: AtomicBool::new(false),
            state: Mutex::new(RendezvousState::default()),
            mutator_cv: Condvar::new(),
            collector_cv: Condvar::new(),
        }
    }

    /// Whether a collection has been requested. The fast check mutators
    /// poll before taking any lock.
    #[inline]
    #[must_use]
    pub fn pending(&self) -> bool {
        self.gc_requested.load(Ordering::Acquire)
    }

    /// Register the calling thread as a mutator. Blocks while a collection
    /// is active so a newcomer can never race the collector for the heap.
    pub(crate) fn register_mutator(&self) -> MutatorToken<'_> {
        let _order = LockGuard::new(LockOrder::Safepoint);
        let mut state = self.state.lock();
        while state.gc_active {
            self.mutator_cv.wait(&mut state);
        }
        state.registered += 1;
        MutatorToken { control: self }
    }

    fn unregister_mutator(&self) {
        let _order = LockGuard::new(LockOrder::Safepoint);
        let mut state = self.state.lock();
        state.registered -= 1;
        // The collector may be waiting on this thread's park.
        self.collector_cv.notify_one();
    }

    /// Park until the active collection (if any) finishes. Callers must
    /// have retired their TLAB first so the collector sees exact belts.
    pub(crate) fn park(&self) {
        let _order = LockGuard::new(LockOrder::Safepoint);
        let mut state = self.state.lock();
        if !state.gc_active {
            return;
        }
        state.parked += 1;
        self.collector_cv.notify_one();
        while state.gc_active {
            self.mutator_cv.wait(&mut state);
        }
        state.parked -= 1;
    }

    /// Bring all other mutators to a safepoint and claim exclusive heap
    /// access. `collector_holds_token` says whether the calling thread is
    /// itself a registered mutator (and therefore not waited for).
    ///
    /// Returns `None` if another thread is already collecting; in that case
    /// this call parks like a mutator until that collection completes, and
    /// the caller treats the finished collection as its own.
    pub(crate) fn stop_the_world(&self, collector_holds_token: bool) -> Option<StwGuard<'_>> {
        let order = LockGuard::new(LockOrder::Safepoint);
        let mut state = self.state.lock();
        if state.gc_active {
            // Lost the race to collect: wait the winner out. Only a
            // registered mutator counts toward the winner's rendezvous;
            // an unregistered caller must not inflate the parked count.
            if collector_holds_token {
                state.parked += 1;
                self.collector_cv.notify_one();
            }
            while state.gc_active {
                self.mutator_cv.wait(&mut state);
            }
            if collector_holds_token {
                state.parked -= 1;
            }
            return None;
        }
        state.gc_active = true;
        self.gc_requested.store(true, Ordering::Release);

        loop {
            let expected = state.registered - usize::from(collector_holds_token);
            if state.parked >= expected {
                break;
            }
            self.collector_cv.wait(&mut state);
        }
        drop(state);
        Some(StwGuard {
            control: self,
            _order: order,
        })
    }
}

/// A mutator thread's registration; dropped when its `Allocator` goes away.
pub struct MutatorToken<'h> {
    control: &'h SafepointControl,
}

impl Drop for MutatorToken<'_> {
    fn drop(&mut self) {
        self.control.unregister_mutator();
    }
}

/// Exclusive heap access for one collection. Dropping it releases every
/// parked mutator.
pub struct StwGuard<'c> {
    control: &'c SafepointControl,
    _order: LockGuard,
}

impl Drop for StwGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.control.state.lock();
        state.gc_active = false;
        self.control.gc_requested.store(false, Ordering::Release);
        self.control.mutator_cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn uncontended_stop_the_world() {
        let control = SafepointControl::new();
        assert!(!control.pending());
        {
            let _guard = control.stop_the_world(false).expect("no rival collector");
            assert!(control.pending());
        }
        assert!(!control.pending());
    }

    #[test]
    fn collector_excludes_itself_when_registered() {
        let control = SafepointControl::new();
        let token = control.register_mutator();
        // With one registered mutator (us), excluding self means no waiting.
        {
            let _guard = control.stop_the_world(true).expect("no rival collector");
        }
        drop(token);
    }

    #[test]
    fn park_returns_immediately_without_active_gc() {
        let control = SafepointControl::new();
        let token = control.register_mutator();
        control.park();
        drop(token);
    }

    #[test]
    fn rendezvous_with_a_parking_thread() {
        let control = Arc::new(SafepointControl::new());
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let control = Arc::clone(&control);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let token = control.register_mutator();
                while !stop.load(Ordering::Acquire) {
                    if control.pending() {
                        control.park();
                    }
                    std::thread::yield_now();
                }
                drop(token);
            })
        };

        // Wait until the worker is registered.
        while control.state.lock().registered == 0 {
            std::thread::yield_now();
        }

        for _ in 0..3 {
            let guard = control.stop_the_world(false).expect("no rival collector");
            // Exclusive window: the worker is parked right now.
            assert_eq!(control.state.lock().parked, 1);
            drop(guard);
        }

        stop.store(true, Ordering::Release);
        worker.join().expect("worker thread panicked");
    }
}
