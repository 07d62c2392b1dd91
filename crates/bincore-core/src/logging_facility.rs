//! Structured logging
//!
//! Every task run, commit and queue flush is logged as an operation with
//! `component`, `op` and `event` fields (see `bincore_core_types::schema`),
//! plus the `task_id` and `isolation` of the task involved. Binaries call
//! [`init`] once; tests install [`init_test_capture`] instead and assert on
//! the recorded fields.
//!
//! ```rust
//! use bincore_core::logging_facility::{init, Profile};
//!
//! init(Profile::Development);
//! ```

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
