//! bincore Core - execution contexts, isolation and locking for the command engine
//!
//! This crate lets arbitrary commands run concurrently against one engine
//! without corrupting its shared state:
//! - One readers-writer lock per shared subsystem (backing store, flags,
//!   analysis database, binary metadata, configuration)
//! - Per-task execution contexts with Shared, Snapshot and Isolated views
//! - Thread-local lookup of the running task's context
//! - A commit protocol deciding what a finished task propagates
//! - A pending-write queue for analysis writes from non-primary tasks

// Logging macros expand to paths under this re-export
pub use bincore_core_types;

pub mod commit;
pub mod config;
pub mod console;
pub mod context;
pub mod engine;
pub mod errors;
pub mod lock;
pub mod logging_facility;
pub mod pending;
pub mod registry;
pub mod stats;
pub mod subsystems;
pub mod task;

// Re-export commonly used types
pub use commit::{CommitReport, CommitTarget};
pub use config::{Config, ConfigObserver, ConfigValue, SharedConfig};
pub use context::{ContextHandle, ContextState, ExecutionContext, IsolationLevel, Scratch};
pub use engine::{ctx_of, CommandEngine, CommandHandler, EngineOptions, Submission};
pub use errors::{BincoreError, ExError, ExErrorKind, Result};
pub use lock::SubsystemLock;
pub use pending::{FlushReport, PendingWrite, PendingWriteQueue};
pub use stats::AllocationSnapshot;
pub use task::{Liveness, Origin, TaskHandle, TaskInfo, TaskOptions, TaskOutcome};
