//! Command layer.
//!
//! `parse` turns command text into [`parse::Statement`]s, `engine_command`
//! applies them, `print` renders bytes and `scan` finds function bounds.

pub mod engine_command;
pub mod parse;
pub mod print;
pub mod scan;
