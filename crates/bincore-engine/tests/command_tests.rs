//! Command Layer Tests
//!
//! Drives whole command lines through the prompt and background paths.
//!
//! ## Scenarios Covered
//!
//! 1. `cmd @ addr` reads elsewhere without moving the cursor
//! 2. Background analysis is queued, then applied by `&w`
//! 3. Background Isolated configuration merges on commit
//! 4. Isolated task output is returned and merged
//! 5. Network seeks never move the prompt cursor
//! 6. Function listing in text and JSON
//! 7. Block hash matches a direct digest
//! 8. Cross-references need a target function
//! 9. Oversize print lengths are refused before any read
//! 10. A background task renames the function it just queued

mod common;

use bincore_core::{BincoreError, ConfigValue, IsolationLevel, TaskOptions};
use sha2::{Digest, Sha256};

#[test]
fn test_temporary_address_leaves_cursor_alone() {
    // GIVEN the prompt at 0x20
    let engine = common::open_engine();
    common::run(&engine, "s 0x20");

    // WHEN bytes are printed at 0x80
    let out = common::run(&engine, "p8 5 @ 0x80; s");

    // THEN the bytes come from 0x80 and the cursor is still 0x20
    assert_eq!(out, "68656c6c6f\n0x20\n");
    assert_eq!(engine.legacy_cursor(), 0x20);
}

#[test]
fn test_temporary_address_accepts_flag_names() {
    let engine = common::open_engine();
    common::run(&engine, "s 0x80; f greeting 5; s 0");

    let out = common::run(&engine, "p8 5 @ greeting");

    assert_eq!(out, "68656c6c6f\n");
}

#[test]
fn test_background_analysis_is_queued_until_wait() {
    // GIVEN a background analysis of the function at 0x20
    let engine = common::open_engine();
    common::run(&engine, "s 0x20; & af worker");

    // WHEN the prompt waits for background tasks
    common::run(&engine, "&w");

    // THEN the queued function is in the database
    let function = engine
        .analysis()
        .read(|db| db.function_at(0x20).cloned())
        .unwrap();
    assert_eq!(function.name, "worker");
    assert_eq!(function.size, 0x11);
    assert!(engine.pending().is_empty());
}

#[test]
fn test_background_isolated_config_merges_on_commit() {
    // GIVEN an Isolated background task changing the architecture bits
    let engine = common::open_engine();

    // WHEN it runs to completion
    common::run(&engine, "&i e asm.bits=32; &w");

    // THEN the shared configuration and the metadata table agree
    assert_eq!(engine.config().get("asm.bits"), Some(ConfigValue::Int(32)));
    assert_eq!(engine.bin_info().read(|info| info.bits), 32);
}

#[test]
fn test_isolated_output_returned_and_merged() {
    let engine = common::open_engine();

    let outcome = engine.dispatch(
        "echo private",
        TaskOptions::background().with_isolation(IsolationLevel::Isolated),
    );

    assert!(outcome.is_ok());
    assert_eq!(outcome.output, "private\n");
    assert_eq!(engine.console().drain(), "private\n");
}

#[test]
fn test_network_seek_does_not_move_prompt() {
    // GIVEN the prompt at 0x40
    let engine = common::open_engine();
    common::run(&engine, "s 0x40");

    // WHEN a network request seeks and prints
    let outcome = engine.dispatch("s 0x80; p8 5", TaskOptions::network());

    // THEN it saw its own cursor and the prompt did not move
    assert!(outcome.is_ok());
    assert_eq!(engine.console().drain(), "68656c6c6f\n");
    assert_eq!(engine.legacy_cursor(), 0x40);
}

#[test]
fn test_function_listing_text_and_json() {
    let engine = common::open_engine();
    common::run(&engine, "af; s 0x20; af");

    let text = common::run(&engine, "afl");
    let json = common::run(&engine, "aflj");

    assert_eq!(
        text,
        "0x00000000     17 fcn.00000000\n0x00000020     17 fcn.00000020\n"
    );
    let parsed: serde_json::Value = serde_json::from_str(json.trim()).unwrap();
    assert_eq!(parsed.as_array().map(Vec::len), Some(2));
    assert_eq!(parsed[1]["addr"], 0x20);
}

#[test]
fn test_block_hash_matches_direct_digest() {
    let engine = common::open_engine();

    let out = common::run(&engine, "s 0x80; ph sha256 5");

    assert_eq!(out.trim(), hex::encode(Sha256::digest(b"hello")));
}

#[test]
fn test_call_reference_requires_target_function() {
    // GIVEN one function at 0
    let engine = common::open_engine();
    common::run(&engine, "af");

    // WHEN references are added into it and into nothing
    common::run(&engine, "s 0x20; axc 0x4");
    let outcome = engine.dispatch("axc 0x200", TaskOptions::prompt());

    // THEN only the first is recorded
    assert!(matches!(
        outcome.result,
        Err(BincoreError::MalformedMutation { .. })
    ));
    assert_eq!(engine.analysis().read(|db| db.xrefs_to(0x4).len()), 1);
    assert_eq!(engine.analysis().read(|db| db.xref_count()), 1);
}

#[test]
fn test_unknown_command_reports_invalid_command() {
    let engine = common::open_engine();

    let outcome = engine.dispatch("frobnicate", TaskOptions::prompt());

    assert!(matches!(
        outcome.result,
        Err(BincoreError::InvalidCommand { .. })
    ));
}

#[test]
fn test_oversize_print_length_is_refused() {
    // GIVEN an engine with the default maximum block size
    let engine = common::open_engine();

    // WHEN a print asks for far more than the maximum
    for line in [
        "p8 0x7fffffffffffffff",
        "px 0x7fffffffffffffff",
        "ph sha256 0x7fffffffffffffff",
    ] {
        let outcome = engine.dispatch(line, TaskOptions::prompt());

        // THEN it fails with the block-size error and the engine stays usable
        assert!(
            matches!(outcome.result, Err(BincoreError::InvalidBlockSize { .. })),
            "{}: {:?}",
            line,
            outcome.result
        );
    }
    engine.console().drain();
    assert_eq!(common::run(&engine, "p8 5 @ 0x80"), "68656c6c6f
");
}

#[test]
fn test_background_rename_of_queued_function() {
    // GIVEN a background task that adds a function, a call into it and renames it
    let engine = common::open_engine();
    common::run(&engine, "s 0x20");
    let handle = engine
        .spawn("af; axc 0x28; afn main", TaskOptions::background())
        .unwrap();

    // WHEN it finishes and the prompt flushes
    let outcome = handle.join();
    assert!(outcome.result.is_ok(), "{:?}", outcome.result);
    common::run(&engine, "&f");

    // THEN the function carries the new name and the reference exists
    let function = engine
        .analysis()
        .read(|db| db.function_at(0x20).cloned())
        .unwrap();
    assert_eq!(function.name, "main");
    assert_eq!(engine.analysis().read(|db| db.xrefs_to(0x28).len()), 1);
    assert!(engine.pending().is_empty());
}
