//! Runs command lines against a loaded file

use std::io::BufRead;

use bincore_core::subsystems::{BinInfo, MemoryBackend};
use bincore_core::{CommandEngine, ExError, ExErrorKind, TaskOptions};

use crate::settings::Settings;
use crate::Cli;

pub fn execute(cli: Cli) -> Result<(), ExError> {
    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let mut options = settings.engine.clone();
    if let Some(base) = cli.base {
        options.base_address = base;
    }

    let data = std::fs::read(&cli.file).map_err(|e| {
        ExError::new(ExErrorKind::Io)
            .with_op("load")
            .with_message(format!("{}: {}", cli.file.display(), e))
    })?;
    let base = options.base_address;
    let bin_info = BinInfo::raw(base, data.len() as u64);
    let engine = bincore_engine::open(
        Box::new(MemoryBackend::new(base, data)),
        bin_info,
        options,
    )?;
    settings.apply_eval(&engine)?;
    tracing::info!(file = %cli.file.display(), base, "file loaded");

    let lines: Vec<String> = if cli.commands.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<Result<_, _>>()
            .map_err(|e| {
                ExError::new(ExErrorKind::Io)
                    .with_op("read_stdin")
                    .with_message(e.to_string())
            })?
    } else {
        cli.commands.clone()
    };

    let mut failures = 0usize;
    let mut first_failure = None;
    for line in lines.iter().map(|l| l.trim()) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let outcome = engine.dispatch(line, TaskOptions::prompt());
        print!("{}", engine.console().drain());
        if let Err(err) = outcome.result {
            let err = ExError::from(err);
            if !cli.keep_going {
                finish(&engine);
                return Err(err);
            }
            eprintln!("Error: {}", err);
            failures += 1;
            first_failure.get_or_insert(err);
        }
    }
    finish(&engine);

    if let Some(first) = first_failure {
        return Err(ExError::new(ExErrorKind::InvalidCommand)
            .with_message(format!("{} command line(s) failed", failures))
            .with_source(first));
    }
    Ok(())
}

/// Join background tasks, apply what they queued and print what they wrote
fn finish(engine: &CommandEngine) {
    let joined = engine.wait_all();
    if let Err(err) = engine.flush_pending() {
        eprintln!("Error: {}", ExError::from(err));
    }
    print!("{}", engine.console().drain());
    tracing::debug!(joined, "session finished");
}
