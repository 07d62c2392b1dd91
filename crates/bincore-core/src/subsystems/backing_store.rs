//! Byte-addressable backing store
//!
//! The backend is the external collaborator (file, process memory, remote
//! target). [`BackingStore`] puts it behind a subsystem lock and normalizes
//! short reads: any byte the backend cannot supply is filled with the
//! configured fill byte, so a short or empty read is never an error.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::lock::SubsystemLock;

/// Reader/writer of the target's bytes
pub trait IoBackend: Send + Sync + std::fmt::Debug {
    /// Read up to `len` bytes at `addr`. May return fewer (or none).
    fn read_at(&self, addr: u64, len: usize) -> Vec<u8>;

    /// Write `bytes` at `addr`, returning false when nothing was written
    fn write_at(&mut self, addr: u64, bytes: &[u8]) -> bool;

    /// Number of addressable bytes starting at `base()`
    fn size(&self) -> u64;

    /// Lowest mapped address
    fn base(&self) -> u64 {
        0
    }
}

/// In-memory backend mapping a byte vector at a base address
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    base: u64,
    data: Vec<u8>,
}

impl MemoryBackend {
    pub fn new(base: u64, data: Vec<u8>) -> Self {
        Self { base, data }
    }

    fn offset_of(&self, addr: u64) -> Option<usize> {
        let offset = addr.checked_sub(self.base)?;
        let offset = usize::try_from(offset).ok()?;
        (offset < self.data.len()).then_some(offset)
    }
}

impl IoBackend for MemoryBackend {
    fn read_at(&self, addr: u64, len: usize) -> Vec<u8> {
        match self.offset_of(addr) {
            Some(offset) => {
                let end = offset.saturating_add(len).min(self.data.len());
                self.data[offset..end].to_vec()
            }
            None => Vec::new(),
        }
    }

    fn write_at(&mut self, addr: u64, bytes: &[u8]) -> bool {
        let Some(offset) = self.offset_of(addr) else {
            return false;
        };
        let end = offset.saturating_add(bytes.len()).min(self.data.len());
        let count = end - offset;
        self.data[offset..end].copy_from_slice(&bytes[..count]);
        count > 0
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn base(&self) -> u64 {
        self.base
    }
}

/// Backing store subsystem
#[derive(Debug)]
pub struct BackingStore {
    lock: SubsystemLock<Box<dyn IoBackend>>,
    fill: u8,
    backend_reads: AtomicU64,
}

impl BackingStore {
    pub fn new(backend: Box<dyn IoBackend>, fill: u8) -> Self {
        Self {
            lock: SubsystemLock::new("backing_store", backend),
            fill,
            backend_reads: AtomicU64::new(0),
        }
    }

    /// Read exactly `len` bytes at `addr`, padding short reads with the fill byte
    pub fn read_at(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut out = vec![self.fill; len];
        self.read_into(addr, &mut out);
        out
    }

    /// Fill `buf` from `addr`, padding short reads with the fill byte
    pub fn read_into(&self, addr: u64, buf: &mut [u8]) {
        let bytes = self.lock.read(|backend| backend.read_at(addr, buf.len()));
        self.backend_reads.fetch_add(1, Ordering::Relaxed);
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        buf[n..].iter_mut().for_each(|b| *b = self.fill);
    }

    /// Write `bytes` at `addr` under the store's write lock
    pub fn write_at(&self, addr: u64, bytes: &[u8]) -> bool {
        self.lock.write(|backend| backend.write_at(addr, bytes))
    }

    pub fn size(&self) -> u64 {
        self.lock.read(|backend| backend.size())
    }

    pub fn base(&self) -> u64 {
        self.lock.read(|backend| backend.base())
    }

    pub fn fill_byte(&self) -> u8 {
        self.fill
    }

    /// Number of reads forwarded to the backend so far
    pub fn read_count(&self) -> u64 {
        self.backend_reads.load(Ordering::Relaxed)
    }
}
