//! Working-buffer storage behind an execution context
//!
//! Shared contexts alias the engine's single [`LegacyState`] (cursor plus
//! block) so unmigrated callers and Shared contexts observe exactly the
//! same bytes. Snapshot and Isolated contexts own a [`PrivateBlock`] that
//! no other context can reach.

use std::sync::Arc;

use bincore_core_types::TaskId;
use parking_lot::Mutex;

use crate::errors::{BincoreError, Result};
use crate::stats::{AllocKind, AllocToken, AllocationStats};
use crate::subsystems::BackingStore;

/// The engine's canonical cursor and its one legacy block
#[derive(Debug)]
pub struct LegacyState {
    cursor: u64,
    block: Vec<u8>,
    valid: bool,
}

pub type SharedLegacy = Arc<Mutex<LegacyState>>;

impl LegacyState {
    pub fn new(cursor: u64, block_size: usize, fill: u8) -> Self {
        Self {
            cursor,
            block: vec![fill; block_size],
            valid: false,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn block_size(&self) -> usize {
        self.block.len()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Move the cursor; the block must be re-read before use
    pub fn seek(&mut self, addr: u64) {
        self.cursor = addr;
        self.valid = false;
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn refill(&mut self, store: &BackingStore) {
        store.read_into(self.cursor, &mut self.block);
        self.valid = true;
    }

    /// The block at the cursor, re-read only if it went stale
    pub fn block(&mut self, store: &BackingStore) -> &[u8] {
        self.block_mut(store)
    }

    pub fn block_mut(&mut self, store: &BackingStore) -> &mut [u8] {
        if !self.valid {
            self.refill(store);
        }
        &mut self.block
    }

    pub fn resize(&mut self, size: usize, fill: u8) {
        self.block.resize(size, fill);
        self.valid = false;
    }
}

/// A buffer owned by exactly one context
#[derive(Debug)]
pub struct PrivateBlock {
    bytes: Vec<u8>,
    _token: AllocToken,
}

impl PrivateBlock {
    /// Allocate `size` bytes, reporting failure instead of aborting
    pub fn allocate(
        stats: &Arc<AllocationStats>,
        task_id: TaskId,
        size: usize,
        fill: u8,
    ) -> Result<Self> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|_| BincoreError::AllocationFailed {
                task_id,
                bytes: size,
            })?;
        bytes.resize(size, fill);
        Ok(Self {
            bytes,
            _token: AllocToken::acquire(stats, AllocKind::PrivateBuffer, size),
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Cursor and buffer of one context
#[derive(Debug)]
pub(crate) enum BufferView {
    Legacy(SharedLegacy),
    Private {
        cursor: u64,
        block: Option<PrivateBlock>,
        valid: bool,
    },
}
