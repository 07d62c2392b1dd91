//! Command-line grammar
//!
//! A line is a `;`-separated list of statements. A statement is either a
//! background form (`& cmd`, `&i cmd`), a task-table command (`&w`, `&l`,
//! `&f`), a command run at a temporary address (`cmd @ addr`) or a plain
//! command.

use bincore_core::{BincoreError, IsolationLevel, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    Sha256,
}

/// One parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// `s [addr]` print or move the cursor
    Seek(Option<String>),
    /// `b [size]` print or change the working size
    BlockSize(Option<usize>),
    /// `px [n]` hexdump
    Hexdump(Option<usize>),
    /// `p8 [n]` bytes as one hex string
    HexBytes(Option<usize>),
    /// `ph <algo> [n]` digest of the bytes at the cursor
    Hash { algo: HashAlgo, len: Option<usize> },
    /// `wx <hex>` write bytes at the cursor
    WriteHex(Vec<u8>),
    /// `f` list flags
    FlagList,
    /// `f name [size]` flag the cursor
    FlagSet { name: String, size: u64 },
    /// `f-name` remove a flag
    FlagRemove(String),
    /// `af [name]` analyze the function at the cursor
    AnalyzeFunction(Option<String>),
    /// `afn name` rename the function containing the cursor
    RenameFunction(String),
    /// `axc addr` record a call from the cursor to `addr`
    AddCallRef(String),
    /// `afl` list functions, `aflj` as JSON
    ListFunctions { json: bool },
    /// `e` list configuration
    ConfigList,
    /// `e key` print one variable
    ConfigGet(String),
    /// `e key=value` set one variable
    ConfigSet { key: String, value: String },
    /// `i` binary metadata, `ij` as JSON
    Info { json: bool },
    /// `echo text`
    Echo(String),
}

/// One `;`-separated piece of a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Run(EngineCommand),
    /// `cmd @ addr`
    At { command: String, addr: String },
    /// `& cmd` (Snapshot) or `&i cmd` (Isolated)
    Background {
        command: String,
        isolation: IsolationLevel,
    },
    /// `&w`
    WaitAll,
    /// `&l`
    ListTasks,
    /// `&f`
    Flush,
}

fn invalid(command: &str, reason: impl Into<String>) -> BincoreError {
    BincoreError::InvalidCommand {
        command: command.to_string(),
        reason: reason.into(),
    }
}

/// Split a line into statements
///
/// # Errors
///
/// `InvalidCommand` for the first statement that does not parse.
pub fn parse_line(line: &str) -> Result<Vec<Statement>> {
    line.split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_statement)
        .collect()
}

fn parse_statement(text: &str) -> Result<Statement> {
    if let Some(rest) = text.strip_prefix('&') {
        return match rest.trim() {
            "w" => Ok(Statement::WaitAll),
            "l" => Ok(Statement::ListTasks),
            "f" => Ok(Statement::Flush),
            _ => {
                let (isolation, command) = match rest.strip_prefix("i ") {
                    Some(command) => (IsolationLevel::Isolated, command),
                    None => (IsolationLevel::Snapshot, rest),
                };
                let command = command.trim();
                if command.is_empty() {
                    return Err(invalid(text, "missing background command"));
                }
                Ok(Statement::Background {
                    command: command.to_string(),
                    isolation,
                })
            }
        };
    }
    if let Some((command, addr)) = text.rsplit_once(" @ ") {
        let (command, addr) = (command.trim(), addr.trim());
        if command.is_empty() || addr.is_empty() {
            return Err(invalid(text, "expected 'cmd @ addr'"));
        }
        return Ok(Statement::At {
            command: command.to_string(),
            addr: addr.to_string(),
        });
    }
    parse_command(text).map(Statement::Run)
}

fn parse_size(command: &str, text: &str) -> Result<usize> {
    parse_number(text)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| invalid(command, format!("bad size '{}'", text)))
}

/// Parse `0x`-prefixed hex or decimal
pub fn parse_number(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Parse a single command (no `;`, `@` or `&` forms)
///
/// # Errors
///
/// `InvalidCommand` for unknown commands or malformed arguments.
pub fn parse_command(text: &str) -> Result<EngineCommand> {
    let text = text.trim();
    if let Some(name) = text.strip_prefix("f-") {
        let name = name.trim();
        if name.is_empty() {
            return Err(invalid(text, "missing flag name"));
        }
        return Ok(EngineCommand::FlagRemove(name.to_string()));
    }

    let (verb, rest) = match text.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (text, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();
    let optional_size = |i: usize| -> Result<Option<usize>> {
        args.get(i).map(|arg| parse_size(text, arg)).transpose()
    };

    let command = match verb {
        "s" => EngineCommand::Seek(args.first().map(|a| a.to_string())),
        "b" => EngineCommand::BlockSize(optional_size(0)?),
        "px" => EngineCommand::Hexdump(optional_size(0)?),
        "p8" => EngineCommand::HexBytes(optional_size(0)?),
        "ph" => {
            let algo = match args.first() {
                Some(&"sha256") => HashAlgo::Sha256,
                Some(other) => return Err(invalid(text, format!("unknown hash '{}'", other))),
                None => return Err(invalid(text, "missing hash algorithm")),
            };
            EngineCommand::Hash {
                algo,
                len: optional_size(1)?,
            }
        }
        "wx" => {
            let bytes =
                hex::decode(rest.replace(' ', "")).map_err(|e| invalid(text, e.to_string()))?;
            if bytes.is_empty() {
                return Err(invalid(text, "nothing to write"));
            }
            EngineCommand::WriteHex(bytes)
        }
        "f" => match args.as_slice() {
            [] => EngineCommand::FlagList,
            [name] => EngineCommand::FlagSet {
                name: name.to_string(),
                size: 1,
            },
            [name, size] => EngineCommand::FlagSet {
                name: name.to_string(),
                size: parse_size(text, size)? as u64,
            },
            _ => return Err(invalid(text, "usage: f [name [size]]")),
        },
        "af" => EngineCommand::AnalyzeFunction(args.first().map(|a| a.to_string())),
        "afn" => match args.as_slice() {
            [name] => EngineCommand::RenameFunction(name.to_string()),
            _ => return Err(invalid(text, "usage: afn name")),
        },
        "axc" => match args.as_slice() {
            [addr] => EngineCommand::AddCallRef(addr.to_string()),
            _ => return Err(invalid(text, "usage: axc addr")),
        },
        "afl" => EngineCommand::ListFunctions { json: false },
        "aflj" => EngineCommand::ListFunctions { json: true },
        "e" => {
            if rest.is_empty() {
                EngineCommand::ConfigList
            } else if let Some((key, value)) = rest.split_once('=') {
                EngineCommand::ConfigSet {
                    key: key.trim().to_string(),
                    value: value.trim().to_string(),
                }
            } else {
                EngineCommand::ConfigGet(rest.to_string())
            }
        }
        "i" => EngineCommand::Info { json: false },
        "ij" => EngineCommand::Info { json: true },
        "echo" => EngineCommand::Echo(rest.to_string()),
        "" => return Err(invalid(text, "empty command")),
        other => return Err(invalid(text, format!("unknown command '{}'", other))),
    };
    Ok(command)
}
