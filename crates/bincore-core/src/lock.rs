//! Readers-writer lock shared by every engine subsystem
//!
//! `SubsystemLock<T>` wraps a `parking_lot::RwLock` and only hands out access
//! through closures, so a guard can never outlive the read or write it was
//! taken for. Each acquisition marks the calling thread as holding that
//! subsystem; debug builds assert that no second subsystem lock is taken
//! while one is held, which keeps the lock-order graph acyclic.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

thread_local! {
    static HELD: Cell<Option<&'static str>> = const { Cell::new(None) };
}

struct HeldMarker {
    previous: Option<&'static str>,
}

impl HeldMarker {
    fn enter(name: &'static str) -> Self {
        let previous = HELD.with(|held| held.replace(Some(name)));
        debug_assert!(
            previous.is_none(),
            "subsystem lock '{}' acquired while holding '{}'",
            name,
            previous.unwrap_or_default()
        );
        Self { previous }
    }
}

impl Drop for HeldMarker {
    fn drop(&mut self) {
        HELD.with(|held| held.set(self.previous));
    }
}

/// Name of the subsystem lock held by the current thread, if any
pub fn held_subsystem() -> Option<&'static str> {
    HELD.with(|held| held.get())
}

/// Acquisition counters for one lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    pub reads: u64,
    pub writes: u64,
}

/// Concurrent-readers / exclusive-writer lock owned by one subsystem
#[derive(Debug)]
pub struct SubsystemLock<T> {
    name: &'static str,
    inner: RwLock<T>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl<T> SubsystemLock<T> {
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            inner: RwLock::new(value),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Subsystem name used in diagnostics
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run `f` under a shared read lock
    ///
    /// Blocks while a writer holds the lock. Readers proceed in parallel.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let _marker = HeldMarker::enter(self.name);
        let guard = self.inner.read();
        self.reads.fetch_add(1, Ordering::Relaxed);
        f(&guard)
    }

    /// Run `f` under the exclusive write lock
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let _marker = HeldMarker::enter(self.name);
        let mut guard = self.inner.write();
        self.writes.fetch_add(1, Ordering::Relaxed);
        f(&mut guard)
    }

    pub fn stats(&self) -> LockStats {
        LockStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_read_and_write_counters() {
        let lock = SubsystemLock::new("flags", 0u32);
        lock.write(|v| *v += 1);
        assert_eq!(lock.read(|v| *v), 1);
        assert_eq!(lock.stats(), LockStats { reads: 1, writes: 1 });
    }

    #[test]
    fn test_held_marker_cleared_after_access() {
        let lock = SubsystemLock::new("analysis", ());
        lock.read(|_| assert_eq!(held_subsystem(), Some("analysis")));
        assert_eq!(held_subsystem(), None);
    }

    #[test]
    fn test_readers_never_observe_torn_writes() {
        let lock = Arc::new(SubsystemLock::new("store", vec![0u8; 512]));
        let mut workers = Vec::new();

        for w in 0..4u8 {
            let lock = lock.clone();
            workers.push(thread::spawn(move || {
                for i in 0..200u32 {
                    let value = w.wrapping_mul(61).wrapping_add(i as u8);
                    lock.write(|bytes| bytes.iter_mut().for_each(|b| *b = value));
                }
            }));
        }
        for _ in 0..4 {
            let lock = lock.clone();
            workers.push(thread::spawn(move || {
                for _ in 0..500 {
                    lock.read(|bytes| {
                        let first = bytes[0];
                        assert!(bytes.iter().all(|b| *b == first), "torn read");
                    });
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "acquired while holding")]
    fn test_nested_subsystem_locks_rejected() {
        let flags = SubsystemLock::new("flags", ());
        let analysis = SubsystemLock::new("analysis", ());
        flags.read(|_| analysis.read(|_| ()));
    }
}
