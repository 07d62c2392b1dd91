//! bincore CLI
//!
//! Loads a file as the backing store and runs command lines against it.

use std::path::PathBuf;

use bincore_core::logging_facility::{self, Profile};
use bincore_engine::commands::parse::parse_number;
use clap::Parser;

mod session;
mod settings;

#[derive(Debug, Parser)]
#[command(name = "bincore")]
#[command(about = "bincore - binary analysis command engine", long_about = None)]
pub struct Cli {
    /// File to load
    pub file: PathBuf,

    /// Address the file is mapped at; also the initial cursor
    #[arg(long, value_parser = parse_address)]
    pub base: Option<u64>,

    /// Command line to run (repeatable). Lines are read from stdin when absent
    #[arg(short = 'c', long = "command")]
    pub commands: Vec<String>,

    /// TOML settings file with `[engine]` and `[eval]` tables
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Emit JSON logs on stderr
    #[arg(long)]
    pub json_log: bool,

    /// Continue with the next line after a failing one
    #[arg(long)]
    pub keep_going: bool,
}

fn parse_address(text: &str) -> Result<u64, String> {
    parse_number(text).ok_or_else(|| format!("'{}' is not an address", text))
}

fn main() {
    let cli = Cli::parse();

    logging_facility::init(if cli.json_log {
        Profile::Production
    } else {
        Profile::Development
    });

    if let Err(e) = session::execute(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
