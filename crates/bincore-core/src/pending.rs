//! Deferred analysis-database writes
//!
//! Non-primary tasks never take the analysis write lock. Their mutations
//! go into a [`PendingWriteQueue`] whose own lock is held only long enough
//! to push. The primary task flushes the queue under one acquisition of
//! the analysis write lock, applying entries strictly in submission order.
//!
//! A malformed entry stops the flush. It and every entry after it stay at
//! the front of the queue, ahead of anything enqueued meanwhile, so the
//! causal order survives for a later flush. [`PendingWriteQueue::discard_front`]
//! drops a poisoned head entry once it has been inspected.

use std::collections::VecDeque;
use std::time::Instant;

use bincore_core_types::schema::OP_PENDING_FLUSH;
use bincore_core_types::TaskId;
use parking_lot::Mutex;
use serde::Serialize;

use crate::errors::Result;
use crate::lock::SubsystemLock;
use crate::subsystems::{AnalysisDb, AnalysisMutation};
use crate::{log_op_end, log_op_error, log_op_start};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingWrite {
    pub seq: u64,
    pub task_id: TaskId,
    pub mutation: AnalysisMutation,
}

/// Counts from one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub applied: usize,
    pub retained: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<PendingWrite>,
    next_seq: u64,
}

#[derive(Debug, Default)]
pub struct PendingWriteQueue {
    state: Mutex<QueueState>,
    flush_lock: Mutex<()>,
}

impl PendingWriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mutation; returns its sequence number
    pub fn enqueue(&self, task_id: TaskId, mutation: AnalysisMutation) -> u64 {
        let mut state = self.state.lock();
        state.next_seq += 1;
        let seq = state.next_seq;
        state.entries.push_back(PendingWrite {
            seq,
            task_id,
            mutation,
        });
        tracing::trace!(seq, task_id = task_id.as_u64(), "analysis write queued");
        seq
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Copy of the queued entries, oldest first
    pub fn snapshot(&self) -> Vec<PendingWrite> {
        self.state.lock().entries.iter().cloned().collect()
    }

    /// Entry of a function queued by `task_id` that contains `addr`
    ///
    /// Replays the task's own entries in order, so a later queued removal
    /// hides an earlier add.
    pub fn queued_function_containing(&self, task_id: TaskId, addr: u64) -> Option<u64> {
        let state = self.state.lock();
        let mut found = None;
        for entry in state.entries.iter().filter(|e| e.task_id == task_id) {
            match &entry.mutation {
                AnalysisMutation::AddFunction {
                    addr: entry_addr,
                    size,
                    ..
                } if addr >= *entry_addr && addr - entry_addr < *size => {
                    found = Some(*entry_addr);
                }
                AnalysisMutation::RemoveFunction { addr: removed } if found == Some(*removed) => {
                    found = None;
                }
                _ => {}
            }
        }
        found
    }

    /// Drop the oldest entry
    pub fn discard_front(&self) -> Option<PendingWrite> {
        let dropped = self.state.lock().entries.pop_front();
        if let Some(entry) = &dropped {
            tracing::warn!(
                seq = entry.seq,
                task_id = entry.task_id.as_u64(),
                "pending analysis write discarded"
            );
        }
        dropped
    }

    /// Apply every queued mutation under one analysis write lock
    ///
    /// # Errors
    ///
    /// Returns `MalformedMutation` naming the first entry that failed
    /// validation; that entry and all later ones are retained.
    pub fn flush(&self, analysis: &SubsystemLock<AnalysisDb>) -> Result<FlushReport> {
        let _flushing = self.flush_lock.lock();
        let batch: Vec<PendingWrite> = self.state.lock().entries.drain(..).collect();
        if batch.is_empty() {
            return Ok(FlushReport::default());
        }

        let start = Instant::now();
        log_op_start!(OP_PENDING_FLUSH, queued = batch.len());

        let failed = analysis.write(|db| {
            batch
                .iter()
                .enumerate()
                .find_map(|(i, entry)| db.apply(&entry.mutation).err().map(|r| (i, r)))
        });

        let duration_ms = start.elapsed().as_millis() as u64;
        match failed {
            None => {
                let report = FlushReport {
                    applied: batch.len(),
                    retained: 0,
                };
                log_op_end!(
                    OP_PENDING_FLUSH,
                    duration_ms = duration_ms,
                    applied = report.applied,
                    retained = 0usize
                );
                Ok(report)
            }
            Some((index, rejection)) => {
                let seq = batch[index].seq;
                let retained = batch.len() - index;
                {
                    let mut state = self.state.lock();
                    for entry in batch.into_iter().skip(index).rev() {
                        state.entries.push_front(entry);
                    }
                }
                let err = rejection.into_queued_error(seq);
                log_op_error!(
                    OP_PENDING_FLUSH,
                    err.clone(),
                    duration_ms = duration_ms,
                    applied = index,
                    retained = retained
                );
                Err(err)
            }
        }
    }
}
