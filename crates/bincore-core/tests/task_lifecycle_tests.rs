//! Task Lifecycle Tests
//!
//! Verifies dispatch, spawn, cancellation, nesting and output merging.
//!
//! ## Scenarios Covered
//!
//! 1. Cooperative cancellation is observed at liveness checks
//! 2. The task table lists running tasks and wait_all drains it
//! 3. Isolated output is merged as one block per task
//! 4. run_at reads elsewhere without moving the caller
//! 5. Spawned tasks inherit depth and are bounded by max_depth
//! 6. Network requests are normalized, never refused

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use bincore_core::{
    BincoreError, CommandEngine, EngineOptions, IsolationLevel, Result, TaskOptions,
};
use parking_lot::Mutex;

#[test]
fn test_cancel_is_observed_cooperatively() {
    // GIVEN a command that polls its liveness signal
    let engine = common::engine_with(|engine: &CommandEngine, _: &str| -> Result<()> {
        loop {
            engine.ctx_of().with(|ctx| ctx.check_alive())?;
            thread::sleep(Duration::from_millis(1));
        }
    });
    let handle = engine.spawn("spin", TaskOptions::background()).unwrap();

    // WHEN the handle cancels it
    handle.cancel();
    let outcome = handle.join();

    // THEN the task stopped with Cancelled and still released its context
    assert!(matches!(outcome.result, Err(BincoreError::Cancelled { .. })));
    assert!(outcome.commit.is_some());
    assert_eq!(engine.stats().contexts, 1);
}

#[test]
fn test_task_table_lists_running_tasks() {
    // GIVEN a background task blocked until released
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Arc::new(Mutex::new(release_rx));
    let engine = common::engine_with(move |_: &CommandEngine, _: &str| -> Result<()> {
        release_rx.lock().recv().unwrap();
        Ok(())
    });
    let handle = engine
        .spawn(
            "block",
            TaskOptions::background().with_isolation(IsolationLevel::Isolated),
        )
        .unwrap();

    // WHEN the table is listed while it runs
    let running = engine.tasks();

    // THEN it shows the task, and wait_all drains it once released
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, handle.id());
    assert_eq!(running[0].isolation, IsolationLevel::Isolated);
    assert_eq!(running[0].command, "block");
    assert!(!handle.is_finished());

    release_tx.send(()).unwrap();
    assert_eq!(engine.wait_all(), 1);
    assert!(handle.is_finished());
    assert!(engine.tasks().is_empty());
}

#[test]
fn test_isolated_output_is_merged_per_task() {
    // GIVEN two Isolated tasks that alternate writes line by line
    let barrier = Arc::new(Barrier::new(2));
    let b = barrier.clone();
    let engine = common::engine_with(move |engine: &CommandEngine, cmd: &str| -> Result<()> {
        for i in 0..3 {
            engine
                .ctx_of()
                .with(|ctx| ctx.emit(&format!("{} line {}\n", cmd, i)))?;
            b.wait();
        }
        Ok(())
    });
    let isolated = || TaskOptions::background().with_isolation(IsolationLevel::Isolated);

    // WHEN both finish
    let a = engine.spawn("a", isolated()).unwrap();
    let b = engine.spawn("b", isolated()).unwrap();
    let out_a = a.join();
    let out_b = b.join();

    // THEN the console holds each task's output as one contiguous block
    let console = engine.console().contents();
    assert!(console.contains(&out_a.output));
    assert!(console.contains(&out_b.output));
    assert_eq!(out_a.output, "a line 0\na line 1\na line 2\n");
    assert_eq!(console.len(), out_a.output.len() + out_b.output.len());
}

#[test]
fn test_run_at_peeks_without_moving_caller() {
    // GIVEN a command that runs a sub-command at 0x40
    let peeked = Arc::new(Mutex::new(Vec::new()));
    let sink = peeked.clone();
    let engine = common::engine_with(move |engine: &CommandEngine, cmd: &str| -> Result<()> {
        match cmd {
            "outer" => engine.run_at("inner", 0x40),
            "inner" => {
                let bytes = engine.ctx_of().with(|ctx| ctx.working_buffer())?;
                *sink.lock() = bytes;
                engine.ctx_of().with(|ctx| ctx.emit("peeked\n"))
            }
            _ => Ok(()),
        }
    });

    // WHEN it runs on the primary task
    let outcome = engine.dispatch("outer", TaskOptions::prompt());

    // THEN the sub-command saw 0x40 and the legacy cursor never moved
    assert!(outcome.is_ok());
    assert_eq!(*peeked.lock(), engine.read_bytes(0x40, 32));
    assert_eq!(engine.legacy_cursor(), 0x1000);
    assert_eq!(engine.console().contents(), "peeked\n");
    assert_eq!(engine.stats().private_buffers, 0);
}

#[test]
fn test_spawn_depth_is_bounded() {
    // GIVEN a command that re-spawns itself
    let runs = Arc::new(AtomicUsize::new(0));
    let refused = Arc::new(AtomicUsize::new(0));
    let (r, f) = (runs.clone(), refused.clone());
    let engine = common::engine_with_options(
        EngineOptions {
            max_depth: 2,
            ..EngineOptions::default()
        },
        move |engine: &CommandEngine, _: &str| -> Result<()> {
            r.fetch_add(1, Ordering::SeqCst);
            match engine.spawn("fork", TaskOptions::background()) {
                Ok(_) => Ok(()),
                Err(err @ BincoreError::NestingTooDeep { .. }) => {
                    f.fetch_add(1, Ordering::SeqCst);
                    Err(err)
                }
                Err(err) => Err(err),
            }
        },
    );

    // WHEN the chain starts
    engine.spawn("fork", TaskOptions::background()).unwrap();
    engine.wait_all();

    // THEN depths 0, 1 and 2 ran and the next spawn was refused
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(refused.load(Ordering::SeqCst), 1);
}

#[test]
fn test_network_shared_request_is_served_as_snapshot() {
    // GIVEN a network request asking for Shared with cursor propagation
    let engine = common::engine_with(common::seek_handler);
    let options = TaskOptions::network()
        .with_isolation(IsolationLevel::Shared)
        .with_cursor_propagation(true);

    // WHEN it seeks
    let outcome = engine.dispatch("s 0x3000", options);

    // THEN it ran as Snapshot and the engine cursor stayed put
    assert!(outcome.is_ok());
    assert_eq!(outcome.isolation, IsolationLevel::Snapshot);
    assert_eq!(engine.legacy_cursor(), 0x1000);
}

#[test]
fn test_background_may_opt_into_cursor_propagation() {
    // GIVEN a background Snapshot task entitled to cursor propagation
    let engine = common::engine_with(common::seek_handler);
    let options = TaskOptions::background().with_cursor_propagation(true);

    // WHEN it seeks
    let outcome = engine.spawn("s 0x2800", options).unwrap().join();

    // THEN its cursor became the engine cursor at commit
    assert!(outcome.is_ok());
    assert_eq!(engine.legacy_cursor(), 0x2800);
}
