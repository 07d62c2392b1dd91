//! Field, event and operation names used in structured logs

pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_TASK_ID: &str = "task_id";
pub const FIELD_ISOLATION: &str = "isolation";
pub const FIELD_ERR_CODE: &str = "err.code";

pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";

/// One task, from context creation to release
pub const OP_TASK_RUN: &str = "task.run";
/// Draining the pending-write queue into the analysis database
pub const OP_PENDING_FLUSH: &str = "pending.flush";
/// Merging a finished context into engine state
pub const OP_CONTEXT_COMMIT: &str = "context.commit";
