//! Structured Logging Tests
//!
//! Verifies the events emitted around task runs and flushes. The capture
//! layer is process-global, so assertions filter by task id or op.

mod common;

use bincore_core::logging_facility::init_test_capture;
use bincore_core::subsystems::AnalysisMutation;
use bincore_core::{BincoreError, CommandEngine, IsolationLevel, Result, TaskOptions};
use bincore_core_types::schema::{
    EVENT_END, EVENT_END_ERROR, EVENT_START, FIELD_ERR_CODE, FIELD_ISOLATION, OP_PENDING_FLUSH,
    OP_TASK_RUN,
};

#[test]
fn test_task_run_emits_start_and_end() {
    // GIVEN log capture and an engine whose command succeeds
    let capture = init_test_capture();
    let engine = common::idle_engine();

    // WHEN an Isolated background task runs
    let outcome = engine.dispatch(
        "ok",
        TaskOptions::background().with_isolation(IsolationLevel::Isolated),
    );

    // THEN start and end were logged for that task with its isolation
    let task_id = outcome.task_id.as_u64();
    let start = capture.assert_task_event(task_id, OP_TASK_RUN, EVENT_START);
    assert_eq!(start.field(FIELD_ISOLATION), Some("isolated"));
    assert_eq!(start.component(), Some("bincore_core::engine"));
    capture.assert_task_event(task_id, OP_TASK_RUN, EVENT_END);
}

#[test]
fn test_failed_task_logs_error_code() {
    // GIVEN log capture and a command that fails
    let capture = init_test_capture();
    let engine = common::engine_with(|_: &CommandEngine, cmd: &str| -> Result<()> {
        Err(BincoreError::InvalidCommand {
            command: cmd.to_string(),
            reason: "unknown".to_string(),
        })
    });

    // WHEN it runs
    let outcome = engine.dispatch("zz", TaskOptions::prompt());

    // THEN the end_error event carries the stable code
    let failed =
        capture.assert_task_event(outcome.task_id.as_u64(), OP_TASK_RUN, EVENT_END_ERROR);
    assert_eq!(failed.field(FIELD_ERR_CODE), Some("ERR_INVALID_COMMAND"));
}

#[test]
fn test_flush_logs_counts() {
    // GIVEN log capture and one queued write
    let capture = init_test_capture();
    let engine = common::engine_with(|engine: &CommandEngine, _: &str| -> Result<()> {
        engine.submit_analysis(AnalysisMutation::AddFunction {
            addr: 0x10,
            size: 4,
            name: "logged".to_string(),
        })?;
        Ok(())
    });
    engine.spawn("q", TaskOptions::background()).unwrap().join();

    // WHEN the primary flushes
    engine.flush_pending().unwrap();

    // THEN a flush end event reports what was applied
    let ends = capture.count_events(|e| {
        e.is(OP_PENDING_FLUSH, EVENT_END) && e.field("applied") == Some("1")
    });
    assert!(ends >= 1);
}
