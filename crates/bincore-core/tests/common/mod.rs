use bincore_core::subsystems::{BinInfo, MemoryBackend};
use bincore_core::{CommandEngine, CommandHandler, EngineOptions, Result};

/// Size of the in-memory image used by the tests
#[allow(dead_code)]
pub const IMAGE_SIZE: usize = 0x8000;

/// Deterministic image where every byte differs from its neighbours
#[allow(dead_code)]
pub fn image() -> Vec<u8> {
    (0..IMAGE_SIZE)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add((i >> 8) as u8))
        .collect()
}

/// Engine over [`image`] at address 0 with the given handler
#[allow(dead_code)]
pub fn engine_with(handler: impl CommandHandler + 'static) -> CommandEngine {
    engine_with_options(
        EngineOptions {
            block_size: 32,
            base_address: 0x1000,
            ..EngineOptions::default()
        },
        handler,
    )
}

#[allow(dead_code)]
pub fn engine_with_options(
    options: EngineOptions,
    handler: impl CommandHandler + 'static,
) -> CommandEngine {
    CommandEngine::new(
        Box::new(MemoryBackend::new(0, image())),
        BinInfo::raw(0, IMAGE_SIZE as u64),
        options,
        handler,
    )
    .unwrap()
}

/// Engine whose commands do nothing
#[allow(dead_code)]
pub fn idle_engine() -> CommandEngine {
    engine_with(|_: &CommandEngine, _: &str| -> Result<()> { Ok(()) })
}

/// Handler understanding `s <hex>` (seek) and `e key=int`
#[allow(dead_code)]
pub fn seek_handler(engine: &CommandEngine, command: &str) -> Result<()> {
    let handle = engine.ctx_of();
    if let Some(addr) = command.strip_prefix("s ") {
        let addr = u64::from_str_radix(addr.trim_start_matches("0x"), 16).unwrap();
        return handle.with(|ctx| ctx.set_cursor(addr, false));
    }
    if let Some(assign) = command.strip_prefix("e ") {
        let (key, value) = assign.split_once('=').unwrap();
        return handle.with(|ctx| ctx.write_config_str(key, value));
    }
    Ok(())
}
