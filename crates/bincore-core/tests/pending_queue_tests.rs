//! Pending Write Queue Tests
//!
//! Verifies how analysis writes from non-primary tasks are deferred and
//! flushed by the primary task.
//!
//! ## Scenarios Covered
//!
//! 1. M1 (add function), M2 (xref into it), M3 (rename) apply in order
//! 2. Enqueue never waits for the analysis write lock
//! 3. A malformed entry stops the flush and is retained with its tail
//! 4. Primary writes apply directly
//! 5. Primary dispatch flushes after its command

mod common;

use std::sync::mpsc;
use std::thread;

use bincore_core::subsystems::{AnalysisDb, AnalysisMutation, XRef, XRefKind};
use bincore_core::{BincoreError, CommandEngine, Result, Submission, TaskOptions};

fn m1() -> AnalysisMutation {
    AnalysisMutation::AddFunction {
        addr: 0x1000,
        size: 0x40,
        name: "fcn.00001000".to_string(),
    }
}

fn m2() -> AnalysisMutation {
    AnalysisMutation::AddXref {
        from: 0x2000,
        to: 0x1010,
        kind: XRefKind::Call,
    }
}

fn m3() -> AnalysisMutation {
    AnalysisMutation::RenameFunction {
        addr: 0x1000,
        name: "main".to_string(),
    }
}

fn submitting_engine() -> CommandEngine {
    common::engine_with(|engine: &CommandEngine, cmd: &str| -> Result<()> {
        let mutations = match cmd {
            "ordered" => vec![m1(), m2(), m3()],
            "poisoned" => vec![m1(), m3(), AnalysisMutation::RenameFunction {
                addr: 0xdead,
                name: "ghost".to_string(),
            }, m2()],
            _ => Vec::new(),
        };
        for mutation in mutations {
            engine.submit_analysis(mutation)?;
        }
        Ok(())
    })
}

#[test]
fn test_flush_preserves_submission_order() {
    // GIVEN a non-primary task that submits M1, M2, M3
    let engine = submitting_engine();
    let outcome = engine
        .spawn("ordered", TaskOptions::background())
        .unwrap()
        .join();
    assert!(outcome.is_ok());
    assert_eq!(engine.pending().len(), 3);

    // WHEN the primary flushes
    let report = engine.flush_pending().unwrap();

    // THEN the state is the one only M1, M2, M3 in order can produce
    assert_eq!(report.applied, 3);
    assert_eq!(report.retained, 0);
    engine.analysis().read(|db| {
        let f = db.function_at(0x1000).unwrap();
        assert_eq!(f.name, "main");
        assert_eq!(
            db.xrefs_to(0x1010),
            vec![XRef {
                from: 0x2000,
                to: 0x1010,
                kind: XRefKind::Call
            }]
        );
    });
}

#[test]
fn test_xref_before_function_is_rejected() {
    // GIVEN an empty analysis database
    let mut db = AnalysisDb::default();

    // WHEN M2 is applied before M1
    let result = db.apply(&m2());

    // THEN it is refused and nothing changed
    assert!(result.is_err());
    assert_eq!(db.xref_count(), 0);
}

#[test]
fn test_enqueue_does_not_wait_for_analysis_writer() {
    // GIVEN a thread parked inside the analysis write lock
    let engine = submitting_engine();
    let (locked_tx, locked_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let writer = {
        let engine = engine.clone();
        thread::spawn(move || {
            engine.analysis().write(|_| {
                locked_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            });
        })
    };
    locked_rx.recv().unwrap();

    // WHEN a background task submits analysis writes
    let outcome = engine
        .spawn("ordered", TaskOptions::background())
        .unwrap()
        .join();

    // THEN it completed while the writer still held the lock
    assert!(outcome.is_ok());
    assert_eq!(engine.pending().len(), 3);
    release_tx.send(()).unwrap();
    writer.join().unwrap();
}

#[test]
fn test_malformed_entry_is_retained_with_tail() {
    // GIVEN a queue of M1, M3, a rename of a missing function, M2
    let engine = submitting_engine();
    assert!(engine
        .spawn("poisoned", TaskOptions::background())
        .unwrap()
        .join()
        .is_ok());

    // WHEN the primary flushes
    let err = engine.flush_pending().unwrap_err();

    // THEN the flush stopped at the bad entry and kept it and M2
    assert!(matches!(err, BincoreError::MalformedMutation { .. }));
    let left = engine.pending().snapshot();
    assert_eq!(left.len(), 2);
    assert_eq!(left[1].mutation, m2());
    assert_eq!(engine.analysis().read(|db| db.function_count()), 1);
    assert_eq!(engine.analysis().read(|db| db.xref_count()), 0);

    // AND once the bad entry is discarded the rest applies
    let dropped = engine.discard_pending_front().unwrap();
    assert!(matches!(
        dropped.mutation,
        AnalysisMutation::RenameFunction { addr: 0xdead, .. }
    ));
    assert_eq!(engine.flush_pending().unwrap().applied, 1);
    assert_eq!(engine.analysis().read(|db| db.xref_count()), 1);
}

#[test]
fn test_primary_writes_apply_directly() {
    // GIVEN the primary (default) context
    let engine = common::idle_engine();

    // WHEN it submits a mutation
    let submission = engine.submit_analysis(m1()).unwrap();

    // THEN the database changed at once
    assert_eq!(submission, Submission::Applied);
    assert!(engine.analysis().read(|db| db.function_at(0x1000).is_some()));

    // AND a bad primary write surfaces its error
    let err = engine
        .submit_analysis(AnalysisMutation::RenameFunction {
            addr: 0x5000,
            name: "nope".to_string(),
        })
        .unwrap_err();
    assert!(matches!(err, BincoreError::FunctionNotFound { address: 0x5000 }));
}

#[test]
fn test_non_primary_flush_request_is_deferred() {
    // GIVEN a background task that queues and then asks for a flush
    let engine = common::engine_with(|engine: &CommandEngine, _: &str| -> Result<()> {
        engine.submit_analysis(m1())?;
        let report = engine.flush_pending()?;
        assert_eq!(report.applied, 0);
        assert_eq!(report.retained, 1);
        Ok(())
    });

    // WHEN it runs
    let outcome = engine.spawn("x", TaskOptions::background()).unwrap().join();

    // THEN nothing was applied on its behalf
    assert!(outcome.is_ok());
    assert_eq!(engine.analysis().read(|db| db.function_count()), 0);
}

#[test]
fn test_primary_dispatch_flushes_queue() {
    // GIVEN queued writes from a background task
    let engine = submitting_engine();
    engine
        .spawn("ordered", TaskOptions::background())
        .unwrap()
        .join();

    // WHEN any primary command completes
    let outcome = engine.dispatch("noop", TaskOptions::prompt());

    // THEN the queue was drained into the database
    assert!(outcome.is_ok());
    assert!(engine.pending().is_empty());
    assert_eq!(engine.analysis().read(|db| db.function_count()), 1);
}
