//! Long-lived shared engine state
//!
//! Each subsystem owns exactly one [`SubsystemLock`]. Accessors touch one
//! subsystem at a time; nothing here nests two subsystem locks.

pub mod analysis;
pub mod backing_store;
pub mod bin_info;
pub mod flags;

use std::sync::Arc;

use crate::lock::SubsystemLock;

pub use analysis::{AnalysisDb, AnalysisMutation, Function, XRef, XRefKind};
pub use backing_store::{BackingStore, IoBackend, MemoryBackend};
pub use bin_info::{BinInfo, Endian, Section};
pub use flags::{Flag, FlagTable};

/// The subsystems shared by every task of one engine
#[derive(Debug)]
pub struct SharedSubsystems {
    pub store: Arc<BackingStore>,
    pub flags: SubsystemLock<FlagTable>,
    pub analysis: SubsystemLock<AnalysisDb>,
    pub bin_info: SubsystemLock<BinInfo>,
}

impl SharedSubsystems {
    pub fn new(store: BackingStore, bin_info: BinInfo) -> Self {
        Self {
            store: Arc::new(store),
            flags: SubsystemLock::new("flags", FlagTable::default()),
            analysis: SubsystemLock::new("analysis", AnalysisDb::default()),
            bin_info: SubsystemLock::new("bin_info", bin_info),
        }
    }
}
