use bincore_core::subsystems::{BinInfo, MemoryBackend};
use bincore_core::{CommandEngine, EngineOptions, TaskOptions};

#[allow(dead_code)]
pub const IMAGE_SIZE: usize = 0x1000;

/// `nop` sled with `ret` at 0x10 and 0x30, and "hello" at 0x80
#[allow(dead_code)]
pub fn image() -> Vec<u8> {
    let mut data = vec![0x90u8; IMAGE_SIZE];
    data[0x10] = 0xc3;
    data[0x30] = 0xc3;
    data[0x80..0x85].copy_from_slice(b"hello");
    data
}

/// Engine running the full command set over [`image`]
#[allow(dead_code)]
pub fn open_engine() -> CommandEngine {
    bincore_engine::open(
        Box::new(MemoryBackend::new(0, image())),
        BinInfo::raw(0, IMAGE_SIZE as u64),
        EngineOptions {
            block_size: 16,
            ..EngineOptions::default()
        },
    )
    .unwrap()
}

/// Dispatch a prompt line, panicking on failure, and drain the console
#[allow(dead_code)]
pub fn run(engine: &CommandEngine, line: &str) -> String {
    let outcome = engine.dispatch(line, TaskOptions::prompt());
    if let Err(err) = &outcome.result {
        panic!("'{}' failed: {}", line, err);
    }
    engine.console().drain()
}
