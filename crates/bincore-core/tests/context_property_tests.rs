//! Property tests for context buffers, configuration merge and queue order

mod common;

use std::collections::BTreeSet;

use bincore_core::subsystems::{AnalysisDb, AnalysisMutation};
use bincore_core::{
    Config, ConfigValue, IsolationLevel, PendingWriteQueue, SubsystemLock, TaskOptions,
};
use bincore_core_types::TaskId;
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;

fn isolation() -> impl Strategy<Value = TaskOptions> {
    prop_oneof![
        Just(TaskOptions::prompt()),
        Just(TaskOptions::background()),
        Just(TaskOptions::background().with_isolation(IsolationLevel::Isolated)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn buffer_reads_are_idempotent(
        options in isolation(),
        moves in prop::collection::vec(0u64..0x9000, 1..6),
        size in 1usize..128,
    ) {
        let engine = common::idle_engine();
        let mut ctx = engine.create_context(&options).unwrap();
        ctx.set_working_size(size).unwrap();
        for addr in &moves {
            ctx.set_cursor(*addr, false).unwrap();
        }
        let reads = engine.store().read_count();
        let first = ctx.working_buffer().unwrap();
        let second = ctx.working_buffer().unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert!(engine.store().read_count() - reads <= 1);
        let last = *moves.last().unwrap();
        prop_assert_eq!(first, engine.read_bytes(last, size));
    }

    #[test]
    fn merge_is_last_writer_wins_per_key(
        writes in prop::collection::vec((0usize..4, 0i64..100), 0..12),
    ) {
        let keys = ["k.a", "k.b", "k.c", "k.d"];
        let mut target = Config::default();
        let mut expected = Config::default();
        for (key, value) in &writes {
            let mut source = Config::default();
            source.set(keys[*key], ConfigValue::Int(*value)).unwrap();
            let dirty: BTreeSet<String> = [keys[*key].to_string()].into_iter().collect();
            target.merge_keys(&source, &dirty);
            expected.set(keys[*key], ConfigValue::Int(*value)).unwrap();
        }
        prop_assert_eq!(target, expected);
    }

    #[test]
    fn flush_applies_in_submission_order(names in prop::collection::vec("[a-z]{1,8}", 1..10)) {
        let queue = PendingWriteQueue::new();
        let db = SubsystemLock::new("analysis", AnalysisDb::default());
        let task = TaskId::from_raw(1);
        queue.enqueue(task, AnalysisMutation::AddFunction {
            addr: 0x400,
            size: 8,
            name: "start".to_string(),
        });
        for name in &names {
            queue.enqueue(task, AnalysisMutation::RenameFunction {
                addr: 0x400,
                name: name.clone(),
            });
        }
        let report = queue.flush(&db).unwrap();
        prop_assert_eq!(report.applied, names.len() + 1);
        let final_name = db.read(|db| db.function_at(0x400).map(|f| f.name.clone()));
        prop_assert_eq!(final_name.as_deref(), names.last().map(String::as_str));
    }
}
