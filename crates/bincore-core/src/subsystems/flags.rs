//! Symbol/flag table
//!
//! Named addresses with an optional size. Flags are cheap to write, so
//! every task writes them under the table's write lock directly.

use std::collections::BTreeMap;

use serde::Serialize;

/// A named address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flag {
    pub name: String,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct FlagTable {
    by_name: BTreeMap<String, Flag>,
}

impl FlagTable {
    /// Create or move a flag; returns the previous definition
    pub fn set(&mut self, name: impl Into<String>, offset: u64, size: u64) -> Option<Flag> {
        let name = name.into();
        self.by_name.insert(
            name.clone(),
            Flag {
                name,
                offset,
                size: size.max(1),
            },
        )
    }

    pub fn remove(&mut self, name: &str) -> Option<Flag> {
        self.by_name.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Flag> {
        self.by_name.get(name)
    }

    /// Flags whose range covers `addr`, ordered by name
    pub fn at(&self, addr: u64) -> Vec<&Flag> {
        self.by_name
            .values()
            .filter(|f| addr >= f.offset && addr - f.offset < f.size)
            .collect()
    }

    /// All flags ordered by offset, then name
    pub fn list(&self) -> Vec<&Flag> {
        let mut flags: Vec<&Flag> = self.by_name.values().collect();
        flags.sort_by(|a, b| a.offset.cmp(&b.offset).then_with(|| a.name.cmp(&b.name)));
        flags
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
