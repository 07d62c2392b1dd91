//! Keeps the binary metadata table in step with the architecture variables
//!
//! `asm.arch`, `asm.bits` and `cfg.bigendian` have side effects: changing
//! them reconfigures the metadata table. The observer runs after each
//! change to the shared configuration, in the order the writes landed, so
//! racing writers leave the table agreeing with the value that won.

use std::sync::{Arc, Weak};

use bincore_core::subsystems::{BinInfo, Endian, SharedSubsystems};
use bincore_core::{CommandEngine, ConfigObserver, ConfigValue, Result};

pub struct ArchSync {
    subsystems: Weak<SharedSubsystems>,
}

impl ArchSync {
    pub fn new(subsystems: &Arc<SharedSubsystems>) -> Self {
        Self {
            subsystems: Arc::downgrade(subsystems),
        }
    }

    /// Write the loader's view of the binary into the configuration
    ///
    /// # Errors
    ///
    /// `ConfigTypeMismatch` if a default variable has an unexpected type.
    pub fn seed(engine: &CommandEngine, info: &BinInfo) -> Result<()> {
        let config = engine.config();
        config.set("asm.arch", ConfigValue::from(info.arch.as_str()))?;
        config.set("asm.bits", ConfigValue::Int(i64::from(info.bits)))?;
        config.set(
            "cfg.bigendian",
            ConfigValue::Bool(info.endian == Endian::Big),
        )?;
        Ok(())
    }
}

impl ConfigObserver for ArchSync {
    fn on_change(&self, key: &str, value: &ConfigValue) {
        let Some(subsystems) = self.subsystems.upgrade() else {
            return;
        };
        match (key, value) {
            ("asm.arch", ConfigValue::Str(arch)) => {
                subsystems.bin_info.write(|info| info.arch = arch.clone());
            }
            ("asm.bits", ConfigValue::Int(bits)) => match u32::try_from(*bits) {
                Ok(bits) => subsystems.bin_info.write(|info| info.bits = bits),
                Err(_) => tracing::warn!(bits, "asm.bits out of range; metadata unchanged"),
            },
            ("cfg.bigendian", ConfigValue::Bool(big)) => {
                let endian = if *big { Endian::Big } else { Endian::Little };
                subsystems.bin_info.write(|info| info.endian = endian);
            }
            _ => return,
        }
        tracing::debug!(key, value = %value, "binary metadata updated");
    }
}
