//! Thread-local task registry
//!
//! Each worker thread keeps a small stack of the contexts it is running,
//! tagged with the engine they belong to. Looking up "the context of the
//! task on this thread" never touches shared state, so there is no
//! engine-wide current-context pointer to race on. Nested execution
//! (`run_at`) pushes a child context and pops it when done.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::ContextHandle;

/// Identity of one engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(u64);

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

impl EngineId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

thread_local! {
    static ACTIVE: RefCell<Vec<(EngineId, ContextHandle)>> = const { RefCell::new(Vec::new()) };
}

/// Keeps a context registered on this thread until dropped
///
/// Not `Send`: it must be dropped on the thread that registered it.
#[derive(Debug)]
pub struct Registration {
    engine: EngineId,
    _not_send: PhantomData<*const ()>,
}

/// Register `handle` as the running context of `engine` on this thread
pub fn register(engine: EngineId, handle: ContextHandle) -> Registration {
    ACTIVE.with(|active| active.borrow_mut().push((engine, handle)));
    Registration {
        engine,
        _not_send: PhantomData,
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(pos) = active.iter().rposition(|(id, _)| *id == self.engine) {
                active.remove(pos);
            }
        });
    }
}

/// Innermost context registered for `engine` on this thread
pub fn current(engine: EngineId) -> Option<ContextHandle> {
    ACTIVE.with(|active| {
        active
            .borrow()
            .iter()
            .rev()
            .find(|(id, _)| *id == engine)
            .map(|(_, handle)| handle.clone())
    })
}

/// Number of registrations on this thread, across engines
pub fn depth() -> usize {
    ACTIVE.with(|active| active.borrow().len())
}
