//! bincore Engine - command layer
//!
//! Parses command strings and runs them against a [`CommandEngine`]. Every
//! command reaches engine state through the running task's context or the
//! subsystem accessors, so the same command behaves correctly on the
//! prompt, in a background task or for a network request.

pub mod arch_sync;
pub mod commands;

use std::sync::Arc;

use bincore_core::subsystems::{BinInfo, IoBackend};
use bincore_core::{CommandEngine, EngineOptions, Result};

pub use arch_sync::ArchSync;
pub use commands::engine_command::{apply_engine_command, run_command, CommandSet};
pub use commands::parse::{parse_command, parse_line, EngineCommand, HashAlgo, Statement};

/// Create an engine running [`CommandSet`], with architecture settings
/// kept in sync with the binary metadata table
///
/// # Errors
///
/// Whatever [`CommandEngine::new`] refuses.
pub fn open(
    backend: Box<dyn IoBackend>,
    bin_info: BinInfo,
    options: EngineOptions,
) -> Result<CommandEngine> {
    let engine = CommandEngine::new(backend, bin_info.clone(), options, CommandSet)?;
    ArchSync::seed(&engine, &bin_info)?;
    engine.add_config_observer(Arc::new(ArchSync::new(engine.subsystems())));
    Ok(engine)
}
