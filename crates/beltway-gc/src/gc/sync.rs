//! Lock ordering discipline for deadlock prevention.
//!
//! Locks are acquired in increasing level and released in reverse:
//!
//! | Level | Lock        | Protects                              |
//! |-------|-------------|---------------------------------------|
//! | 1     | `BeltAlloc` | slow-path carves from a belt          |
//! | 2     | `Safepoint` | the stop-the-world rendezvous state   |
//! | 3     | `Roots`     | the root-slot registry                |
//!
//! The collector holds `Safepoint` for the whole stop-the-world window and
//! takes `Roots` inside it; mutators take each of these only transiently and
//! never nested.
//!
//! Debug builds validate every acquisition through [`LockGuard`]; release
//! builds compile the checks away.

#[cfg(debug_assertions)]
use std::cell::{Cell, RefCell};

#[cfg(debug_assertions)]
const MAX_LOCK_DEPTH: usize = 16;

#[cfg(debug_assertions)]
struct LockOrderState {
    stack: RefCell<Vec<u8>>,
    is_shutdown: Cell<bool>,
}

#[cfg(debug_assertions)]
thread_local!(static LOCK_ORDER_STATE: LockOrderState = LockOrderState {
    stack: RefCell::new(Vec::with_capacity(MAX_LOCK_DEPTH)),
    is_shutdown: Cell::new(false),
});

/// Lock order tags. A lock may only be acquired while holding locks of the
/// same or lower level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LockOrder {
    /// Belt slow-path allocation lock (level 1).
    BeltAlloc = 1,
    /// Safepoint rendezvous lock (level 2).
    Safepoint = 2,
    /// Root-registry lock (level 3).
    Roots = 3,
}

impl LockOrder {
    /// The lock's level in the acquisition hierarchy.
    #[must_use]
    pub const fn level(self) -> u8 {
        self as u8
    }
}

/// RAII acquisition marker with debug-build order validation.
#[must_use = "LockGuard must be held for the duration of the critical section"]
pub struct LockGuard {
    _tag: LockOrder,
}

impl LockGuard {
    /// Record the acquisition of a lock with the given order.
    ///
    /// # Panics
    ///
    /// Debug builds panic if a lock of a lower level than one already held
    /// is acquired.
    pub fn new(tag: LockOrder) -> Self {
        #[cfg(debug_assertions)]
        {
            let current_min = current_min_level();
            validate_lock_order(tag, current_min);
            push_level(tag);
        }
        Self { _tag: tag }
    }
}

#[cfg(debug_assertions)]
impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = LOCK_ORDER_STATE.try_with(|state| {
            if !state.is_shutdown.get() {
                state.stack.borrow_mut().pop();
            }
        });
    }
}

/// Disable order tracking for the current thread during teardown, when the
/// thread-local state may already be gone.
#[allow(clippy::missing_const_for_fn)]
pub fn enter_thread_shutdown() {
    #[cfg(debug_assertions)]
    {
        let _ = LOCK_ORDER_STATE.try_with(|state| {
            state.is_shutdown.set(true);
        });
    }
}

#[cfg(debug_assertions)]
fn validate_lock_order(tag: LockOrder, current_min: u8) {
    assert!(
        tag.level() >= current_min,
        "lock ordering violation: {:?} (level {}) acquired while holding a level-{} lock",
        tag,
        tag.level(),
        current_min
    );
}

#[cfg(debug_assertions)]
fn push_level(tag: LockOrder) {
    let _ = LOCK_ORDER_STATE.try_with(|state| {
        if !state.is_shutdown.get() {
            state.stack.borrow_mut().push(tag.level());
        }
    });
}

#[cfg(debug_assertions)]
fn current_min_level() -> u8 {
    LOCK_ORDER_STATE
        .try_with(|state| {
            if state.is_shutdown.get() {
                return 1;
            }
            state.stack.borrow().iter().copied().max().unwrap_or(1)
        })
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(LockOrder::BeltAlloc.level() < LockOrder::Safepoint.level());
        assert!(LockOrder::Safepoint.level() < LockOrder::Roots.level());
    }

    #[test]
    fn ascending_acquisition_is_allowed() {
        let _a = LockGuard::new(LockOrder::BeltAlloc);
        let _b = LockGuard::new(LockOrder::Safepoint);
        let _c = LockGuard::new(LockOrder::Roots);
    }

    #[test]
    fn same_level_reacquisition_is_allowed() {
        let _a = LockGuard::new(LockOrder::Roots);
        let _b = LockGuard::new(LockOrder::Roots);
    }

    #[test]
    fn state_restores_after_drop() {
        {
            let _a = LockGuard::new(LockOrder::Safepoint);
        }
        let _b = LockGuard::new(LockOrder::BeltAlloc);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "lock ordering violation"))]
    fn descending_acquisition_panics() {
        let _a = LockGuard::new(LockOrder::Roots);
        let _b = LockGuard::new(LockOrder::BeltAlloc);
        // Release builds do not validate; make the expectation explicit.
        #[cfg(not(debug_assertions))]
        panic!("lock ordering violation");
    }

    #[test]
    fn nested_scopes() {
        {
            let _a = LockGuard::new(LockOrder::BeltAlloc);
            {
                let _b = LockGuard::new(LockOrder::Safepoint);
            }
            let _c = LockGuard::new(LockOrder::Roots);
        }
        let _d = LockGuard::new(LockOrder::BeltAlloc);
    }
}
