//! Commit protocol
//!
//! Runs once per context, under the engine's top-level commit lock, when
//! the owning command returns (success or failure):
//!
//! 1. With cursor propagation, a private cursor is written into the
//!    engine's canonical cursor. Shared contexts moved it already.
//! 2. With configuration propagation and a dirty private copy, the keys
//!    written are merged into the shared configuration, last committer
//!    wins per key. Observers see the merged keys in commit order.
//! 3. Private console output is appended to the console stream as one
//!    block.
//!
//! Commit never fails part way: once the context enters Committing, every
//! step runs.

use std::sync::Arc;

use bincore_core_types::schema::OP_CONTEXT_COMMIT;
use bincore_core_types::TaskId;
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::SharedConfig;
use crate::console::Console;
use crate::context::{ExecutionContext, SharedLegacy};
use crate::errors::Result;

/// The shared state a commit writes into
#[derive(Debug, Clone)]
pub struct CommitTarget {
    pub legacy: SharedLegacy,
    pub config: Arc<SharedConfig>,
    pub console: Arc<Console>,
    pub lock: Arc<Mutex<()>>,
}

/// What a commit propagated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub task_id: Option<TaskId>,
    /// Canonical cursor after this commit, if this context owns it
    pub propagated_cursor: Option<u64>,
    /// Keys whose shared value changed
    pub merged_keys: Vec<String>,
    /// Private console output appended to the stream
    pub output: String,
}

/// Commit `ctx` into `target`
///
/// # Errors
///
/// `AlreadyCommitted` on a second commit; `ContextNotActive` if the context
/// was released first. Nothing is propagated in either case.
pub fn commit(ctx: &mut ExecutionContext, target: &CommitTarget) -> Result<CommitReport> {
    ctx.begin_commit()?;
    let _commit = target.lock.lock();

    let mut report = CommitReport {
        task_id: Some(ctx.task_id()),
        ..CommitReport::default()
    };

    if ctx.propagates_cursor() {
        let cursor = match ctx.private_cursor() {
            Some(cursor) => {
                target.legacy.lock().seek(cursor);
                cursor
            }
            None => target.legacy.lock().cursor(),
        };
        report.propagated_cursor = Some(cursor);
    }

    if ctx.propagates_config() && ctx.is_config_dirty() {
        if let Some((config, keys)) = ctx.private_config() {
            report.merged_keys = target.config.merge_from(config, keys);
        }
    }

    report.output = ctx.take_private_output();
    if !report.output.is_empty() {
        target.console.write(&report.output);
    }

    tracing::debug!(
        op = OP_CONTEXT_COMMIT,
        task_id = ctx.task_id().as_u64(),
        isolation = %ctx.isolation(),
        propagated_cursor = ?report.propagated_cursor,
        merged_keys = ?report.merged_keys,
        "context committed"
    );
    Ok(report)
}
