//! Function-boundary scanner
//!
//! A function ends at its first `ret` (0xc3). The scanner works on
//! successive chunks so long scans can be cancelled between chunks.

pub const RET: u8 = 0xc3;

/// Result of feeding one chunk to the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// The function ends after this many bytes from its entry
    Found(u64),
    /// No terminator yet; `scanned` bytes consumed so far
    Continue { scanned: u64 },
}

#[derive(Debug, Clone, Default)]
pub struct FunctionScanner {
    scanned: u64,
}

impl FunctionScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Scan {
        match chunk.iter().position(|&b| b == RET) {
            Some(i) => Scan::Found(self.scanned + i as u64 + 1),
            None => {
                self.scanned += chunk.len() as u64;
                Scan::Continue {
                    scanned: self.scanned,
                }
            }
        }
    }
}
