//! The lifecycle gate: a fair reader/writer lock guarding the one-way
//! transition from "accepting reservations" to "draining".
use std::sync::{RwLock, RwLockReadGuard};

/// Guards the `shutdown` flag that separates ordinary reservation
/// operations from shutdown.
///
/// The boolean it protects *is* the flag. A read guard is a consistent
/// snapshot of "are we shutting down", held only across the flag check and
/// the enqueue of a waiter task, never across a semaphore acquisition.
/// That critical section never awaits anything (the enqueue is a plain
/// channel `send`, not a suspension point), so this uses
/// `std::sync::RwLock` rather than `tokio::sync::RwLock`, the same
/// reasoning the reference codebase applies to its own database state
/// lock: no async work happens while the lock is held, so an async-aware
/// lock would only add an unnecessary `.await` to every `create*` call.
/// The write lock is taken exactly once, by [`LifecycleGate::shut`], to
/// flip the flag from `false` to `true`; it never flips back.
#[derive(Debug)]
pub(crate) struct LifecycleGate {
    shutdown: RwLock<bool>,
}

impl LifecycleGate {
    pub(crate) fn new() -> Self {
        Self {
            shutdown: RwLock::new(false),
        }
    }

    /// Takes the read lock and returns a guard a caller can check
    /// `*guard` against before enqueueing work. Held only for the duration
    /// of that check-and-enqueue sequence.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, bool> {
        self.shutdown.read().unwrap()
    }

    /// `true` once [`LifecycleGate::shut`] has been called at least once.
    pub(crate) fn is_shutdown(&self) -> bool {
        *self.shutdown.read().unwrap()
    }

    /// Flips the flag to `true` under the write lock. Returns `true` if
    /// this call performed the transition, `false` if shutdown had already
    /// been initiated by a prior call. Callers use this to ensure only one
    /// caller drives the shutdown sequence.
    pub(crate) fn shut(&self) -> bool {
        let mut guard = self.shutdown.write().unwrap();
        if *guard {
            false
        } else {
            *guard = true;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_open() {
        let gate = LifecycleGate::new();
        assert!(!gate.is_shutdown());
    }

    #[test]
    fn shut_flips_once() {
        let gate = LifecycleGate::new();
        assert!(gate.shut());
        assert!(gate.is_shutdown());
        assert!(!gate.shut(), "second shut() is a no-op");
        assert!(gate.is_shutdown());
    }

    #[test]
    fn read_guard_reflects_current_flag() {
        let gate = LifecycleGate::new();
        {
            let guard = gate.read();
            assert!(!*guard);
        }
        gate.shut();
        let guard = gate.read();
        assert!(*guard);
    }
}
