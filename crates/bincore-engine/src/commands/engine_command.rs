//! Applies parsed commands to a running engine.

use std::fmt::Write;

use bincore_core::subsystems::{AnalysisMutation, Endian, Function, XRefKind};
use bincore_core::{
    BincoreError, CommandEngine, CommandHandler, ContextHandle, Result, Submission, TaskOptions,
};
use sha2::{Digest, Sha256};

use crate::commands::parse::{
    parse_command, parse_line, parse_number, EngineCommand, HashAlgo, Statement,
};
use crate::commands::print::{hex_string, hexdump};
use crate::commands::scan::{FunctionScanner, Scan};

/// Used when `anal.maxsize` is missing or not a positive integer
const DEFAULT_SCAN_LIMIT: u64 = 4096;

/// The engine's command set
///
/// Executes a whole line: statements run in order and the first failing
/// one stops the line.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandSet;

impl CommandHandler for CommandSet {
    fn execute(&self, engine: &CommandEngine, command: &str) -> Result<()> {
        for statement in parse_line(command)? {
            engine.ctx_of().with(|ctx| ctx.check_alive())?;
            apply_statement(engine, statement)?;
        }
        Ok(())
    }
}

fn apply_statement(engine: &CommandEngine, statement: Statement) -> Result<()> {
    match statement {
        Statement::Run(cmd) => apply_engine_command(engine, cmd),
        Statement::At { command, addr } => {
            let addr = resolve_address(engine, &addr)?;
            engine.run_at(&command, addr)
        }
        Statement::Background { command, isolation } => {
            // Validate before handing the line to a worker.
            parse_line(&command)?;
            let options = TaskOptions::background().with_isolation(isolation);
            let handle = engine.spawn(&command, options)?;
            tracing::debug!(
                task_id = handle.id().as_u64(),
                isolation = %isolation,
                "background task started"
            );
            Ok(())
        }
        Statement::WaitAll => {
            engine.wait_all();
            engine.flush_pending().map(|_| ())
        }
        Statement::ListTasks => {
            let mut out = String::new();
            for task in engine.tasks() {
                let _ = writeln!(
                    out,
                    "{} {} {:?} {}",
                    task.id, task.isolation, task.origin, task.command
                );
            }
            emit(engine, &out)
        }
        Statement::Flush => {
            let report = engine.flush_pending()?;
            emit(
                engine,
                &format!("applied {} retained {}\n", report.applied, report.retained),
            )
        }
    }
}

/// Apply one command to the context of the calling task
///
/// # Errors
///
/// The command's own failure: `InvalidCommand` for bad arguments,
/// `InvalidBlockSize`, `FunctionNotFound`, `FlagNotFound`,
/// `UnknownConfigKey`, `ConfigTypeMismatch` or `Cancelled`.
pub fn apply_engine_command(engine: &CommandEngine, cmd: EngineCommand) -> Result<()> {
    let handle = engine.ctx_of();
    match cmd {
        EngineCommand::Seek(None) => {
            let cursor = handle.with(|ctx| ctx.cursor());
            emit_to(&handle, &format!("0x{:x}\n", cursor))
        }
        EngineCommand::Seek(Some(addr)) => {
            let addr = resolve_address(engine, &addr)?;
            handle.with(|ctx| ctx.set_cursor(addr, false))
        }
        EngineCommand::BlockSize(None) => {
            let size = handle.with(|ctx| ctx.block_size());
            emit_to(&handle, &format!("0x{:x}\n", size))
        }
        EngineCommand::BlockSize(Some(size)) => handle.with(|ctx| ctx.set_working_size(size)),
        EngineCommand::Hexdump(len) => {
            let cols = handle.with(|ctx| ctx.read_config("hex.cols"))?;
            let cols = cols
                .as_int()
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(16);
            let (cursor, bytes) = bytes_at_cursor(engine, &handle, len)?;
            let text = hexdump(cursor, &bytes, cols);
            handle.with(|ctx| {
                ctx.scratch_mut().last_rendered = Some(cursor);
                ctx.emit(&text)
            })
        }
        EngineCommand::HexBytes(len) => {
            let (_, bytes) = bytes_at_cursor(engine, &handle, len)?;
            emit_to(&handle, &format!("{}\n", hex_string(&bytes)))
        }
        EngineCommand::Hash { algo, len } => {
            let (_, bytes) = bytes_at_cursor(engine, &handle, len)?;
            let digest = match algo {
                HashAlgo::Sha256 => hex::encode(Sha256::digest(&bytes)),
            };
            emit_to(&handle, &format!("{}\n", digest))
        }
        EngineCommand::WriteHex(bytes) => {
            let cursor = handle.with(|ctx| ctx.cursor());
            if engine.write_bytes(cursor, &bytes) {
                Ok(())
            } else {
                Err(BincoreError::InvalidCommand {
                    command: format!("wx @ 0x{:x}", cursor),
                    reason: "write outside the backing store".to_string(),
                })
            }
        }
        EngineCommand::FlagList => {
            let out = engine.flags().read(|flags| {
                let mut out = String::new();
                for flag in flags.list() {
                    let _ = writeln!(out, "0x{:08x} {} {}", flag.offset, flag.size, flag.name);
                }
                out
            });
            emit_to(&handle, &out)
        }
        EngineCommand::FlagSet { name, size } => {
            let cursor = handle.with(|ctx| ctx.cursor());
            engine.flags().write(|flags| flags.set(name, cursor, size));
            handle.with(|ctx| ctx.scratch_mut().last_flagged = Some(cursor));
            Ok(())
        }
        EngineCommand::FlagRemove(name) => {
            match engine.flags().write(|flags| flags.remove(&name)) {
                Some(_) => Ok(()),
                None => Err(BincoreError::FlagNotFound { name }),
            }
        }
        EngineCommand::AnalyzeFunction(name) => analyze_function(engine, &handle, name),
        EngineCommand::RenameFunction(name) => {
            let cursor = handle.with(|ctx| ctx.cursor());
            let addr = engine
                .function_containing(cursor)
                .ok_or(BincoreError::FunctionNotFound { address: cursor })?;
            engine.submit_analysis(AnalysisMutation::RenameFunction { addr, name })?;
            Ok(())
        }
        EngineCommand::AddCallRef(target) => {
            let to = resolve_address(engine, &target)?;
            let from = handle.with(|ctx| ctx.cursor());
            engine.submit_analysis(AnalysisMutation::AddXref {
                from,
                to,
                kind: XRefKind::Call,
            })?;
            Ok(())
        }
        EngineCommand::ListFunctions { json } => {
            let functions: Vec<Function> =
                engine.analysis().read(|db| db.functions().cloned().collect());
            let out = if json {
                to_json(&functions)?
            } else {
                let mut out = String::new();
                for f in &functions {
                    let _ = writeln!(out, "0x{:08x} {:>6} {}", f.addr, f.size, f.name);
                }
                out
            };
            emit_to(&handle, &out)
        }
        EngineCommand::ConfigList => handle.with(|ctx| {
            let mut out = String::new();
            for (key, value) in ctx.config_snapshot()?.iter() {
                let _ = writeln!(out, "{} = {}", key, value);
            }
            ctx.emit(&out)
        }),
        EngineCommand::ConfigGet(key) => handle.with(|ctx| {
            let value = ctx.read_config(&key)?;
            ctx.emit(&format!("{}\n", value))
        }),
        EngineCommand::ConfigSet { key, value } => {
            handle.with(|ctx| ctx.write_config_str(&key, &value))
        }
        EngineCommand::Info { json } => {
            let info = engine.bin_info().read(|info| info.clone());
            let out = if json {
                to_json(&info)?
            } else {
                let endian = match info.endian {
                    Endian::Little => "little",
                    Endian::Big => "big",
                };
                let mut out = format!(
                    "arch {}\nbits {}\nendian {}\n",
                    info.arch, info.bits, endian
                );
                for entry in &info.entrypoints {
                    let _ = writeln!(out, "entry 0x{:x}", entry);
                }
                for section in &info.sections {
                    let _ = writeln!(
                        out,
                        "section {} 0x{:x} 0x{:x} {}",
                        section.name, section.addr, section.size, section.perm
                    );
                }
                out
            };
            emit_to(&handle, &out)
        }
        EngineCommand::Echo(text) => emit_to(&handle, &format!("{}\n", text)),
    }
}

/// Number, or the offset of a flag
fn resolve_address(engine: &CommandEngine, text: &str) -> Result<u64> {
    if let Some(addr) = parse_number(text) {
        return Ok(addr);
    }
    engine
        .flags()
        .read(|flags| flags.get(text).map(|f| f.offset))
        .ok_or_else(|| BincoreError::InvalidCommand {
            command: text.to_string(),
            reason: "not a number or known flag".to_string(),
        })
}

/// `len` bytes at the cursor, defaulting to the working size
///
/// `len` is bounded by the context's maximum block size.
/// Bytes inside the working buffer come from it, so a private buffer keeps
/// its snapshot. Anything past the buffer is read from the store.
fn bytes_at_cursor(
    engine: &CommandEngine,
    handle: &ContextHandle,
    len: Option<usize>,
) -> Result<(u64, Vec<u8>)> {
    let (cursor, max, mut bytes) = handle.with(|ctx| -> Result<_> {
        Ok((ctx.cursor(), ctx.max_block_size(), ctx.working_buffer()?))
    })?;
    if let Some(len) = len {
        if len > max {
            return Err(BincoreError::InvalidBlockSize {
                requested: len,
                max,
            });
        }
        if len <= bytes.len() {
            bytes.truncate(len);
        } else {
            let have = bytes.len();
            bytes.extend(engine.read_bytes(cursor.wrapping_add(have as u64), len - have));
        }
    }
    Ok((cursor, bytes))
}

/// `af`: scan forward from the cursor for the function's end
fn analyze_function(
    engine: &CommandEngine,
    handle: &ContextHandle,
    name: Option<String>,
) -> Result<()> {
    let (entry, first) = handle.with(|ctx| -> Result<_> {
        Ok((ctx.cursor(), ctx.working_buffer()?))
    })?;
    let limit = handle
        .with(|ctx| ctx.read_config("anal.maxsize"))
        .ok()
        .and_then(|value| value.as_int())
        .and_then(|n| u64::try_from(n).ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_SCAN_LIMIT);
    let chunk_len = first.len().max(1) as u64;

    let mut scanner = FunctionScanner::new();
    let mut chunk = first;
    let size = loop {
        handle.with(|ctx| ctx.check_alive())?;
        let remaining = limit - scanner.scanned();
        chunk.truncate(usize::try_from(remaining).unwrap_or(usize::MAX));
        match scanner.feed(&chunk) {
            Scan::Found(size) => break size,
            Scan::Continue { scanned } if scanned >= limit || chunk.is_empty() => {
                break scanned.max(1)
            }
            Scan::Continue { scanned } => {
                let next = chunk_len.min(limit - scanned) as usize;
                chunk = engine.read_bytes(entry.wrapping_add(scanned), next);
            }
        }
    };

    handle.with(|ctx| {
        ctx.scratch_mut().last_simulated_read = Some(entry.wrapping_add(size - 1));
    });
    let name = name.unwrap_or_else(|| format!("fcn.{:08x}", entry));
    match engine.submit_analysis(AnalysisMutation::AddFunction {
        addr: entry,
        size,
        name,
    })? {
        Submission::Applied => {}
        Submission::Queued(seq) => tracing::debug!(seq, addr = entry, "function queued"),
    }
    Ok(())
}

fn emit(engine: &CommandEngine, text: &str) -> Result<()> {
    emit_to(&engine.ctx_of(), text)
}

fn emit_to(handle: &ContextHandle, text: &str) -> Result<()> {
    handle.with(|ctx| ctx.emit(text))
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map(|mut text| {
            text.push('\n');
            text
        })
        .map_err(|e| BincoreError::Serialization {
            message: e.to_string(),
        })
}

/// Parse and apply a single command, without `;`, `@` or `&` forms
///
/// # Errors
///
/// `InvalidCommand` when the text does not parse, else as
/// [`apply_engine_command`].
pub fn run_command(engine: &CommandEngine, text: &str) -> Result<()> {
    apply_engine_command(engine, parse_command(text)?)
}
