//! Binary metadata table
//!
//! Written once by the loader, read by every command that needs the
//! architecture or the section layout.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub addr: u64,
    pub size: u64,
    pub perm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinInfo {
    pub arch: String,
    pub bits: u32,
    pub endian: Endian,
    pub entrypoints: Vec<u64>,
    pub sections: Vec<Section>,
}

impl Default for BinInfo {
    fn default() -> Self {
        Self {
            arch: "x86".to_string(),
            bits: 64,
            endian: Endian::Little,
            entrypoints: Vec::new(),
            sections: Vec::new(),
        }
    }
}

impl BinInfo {
    /// A single read-write-execute section covering `[base, base + size)`
    pub fn raw(base: u64, size: u64) -> Self {
        Self {
            entrypoints: vec![base],
            sections: vec![Section {
                name: "raw".to_string(),
                addr: base,
                size,
                perm: "rwx".to_string(),
            }],
            ..Self::default()
        }
    }

    pub fn section_at(&self, addr: u64) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| addr >= s.addr && addr - s.addr < s.size)
    }
}
