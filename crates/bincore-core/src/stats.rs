//! Allocation accounting for execution contexts
//!
//! Every context, private working buffer and private configuration copy
//! holds an [`AllocToken`]. Dropping the token (on release, or when the
//! owner is dropped) gives the count back, so counters return to baseline
//! no matter how a task ended.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocKind {
    Context,
    PrivateBuffer,
    ConfigCopy,
}

#[derive(Debug, Default)]
pub struct AllocationStats {
    contexts: AtomicUsize,
    private_buffers: AtomicUsize,
    config_copies: AtomicUsize,
    buffer_bytes: AtomicUsize,
}

/// Point-in-time view of the live allocation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationSnapshot {
    pub contexts: usize,
    pub private_buffers: usize,
    pub config_copies: usize,
    pub buffer_bytes: usize,
}

impl AllocationStats {
    pub fn snapshot(&self) -> AllocationSnapshot {
        AllocationSnapshot {
            contexts: self.contexts.load(Ordering::Acquire),
            private_buffers: self.private_buffers.load(Ordering::Acquire),
            config_copies: self.config_copies.load(Ordering::Acquire),
            buffer_bytes: self.buffer_bytes.load(Ordering::Acquire),
        }
    }

    fn counter(&self, kind: AllocKind) -> &AtomicUsize {
        match kind {
            AllocKind::Context => &self.contexts,
            AllocKind::PrivateBuffer => &self.private_buffers,
            AllocKind::ConfigCopy => &self.config_copies,
        }
    }
}

/// Live allocation; decrements its counters when dropped
#[derive(Debug)]
pub struct AllocToken {
    stats: Arc<AllocationStats>,
    kind: AllocKind,
    bytes: usize,
}

impl AllocToken {
    pub fn acquire(stats: &Arc<AllocationStats>, kind: AllocKind, bytes: usize) -> Self {
        stats.counter(kind).fetch_add(1, Ordering::AcqRel);
        stats.buffer_bytes.fetch_add(bytes, Ordering::AcqRel);
        Self {
            stats: stats.clone(),
            kind,
            bytes,
        }
    }

    pub fn kind(&self) -> AllocKind {
        self.kind
    }
}

impl Drop for AllocToken {
    fn drop(&mut self) {
        self.stats.counter(self.kind).fetch_sub(1, Ordering::AcqRel);
        self.stats
            .buffer_bytes
            .fetch_sub(self.bytes, Ordering::AcqRel);
    }
}
