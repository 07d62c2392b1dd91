//! Identifiers and log-schema names shared by every bincore crate

pub mod correlation;
pub mod schema;

pub use correlation::{RequestId, TaskId};
