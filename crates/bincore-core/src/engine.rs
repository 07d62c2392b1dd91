//! Command engine
//!
//! The engine owns the shared subsystems, the legacy cursor and block, the
//! shared configuration and console, the pending-write queue, the default
//! (primary, always Shared) context and the table of spawned tasks. It is
//! cheap to clone; every clone refers to the same engine.
//!
//! Commands reach engine state only through [`CommandEngine::ctx_of`] and
//! the subsystem accessors. A command must not hold its context guard
//! across a call back into the engine.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use bincore_core_types::schema::OP_TASK_RUN;
use bincore_core_types::{RequestId, TaskId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::commit::{self, CommitReport, CommitTarget};
use crate::config::{Config, ConfigObserver, SharedConfig};
use crate::console::Console;
use crate::context::{
    ContextHandle, ContextParts, ExecutionContext, IsolationLevel, LegacyState,
};
use crate::errors::{BincoreError, Result};
use crate::lock::SubsystemLock;
use crate::pending::{FlushReport, PendingWrite, PendingWriteQueue};
use crate::registry::{self, EngineId};
use crate::stats::{AllocationSnapshot, AllocationStats};
use crate::subsystems::{
    AnalysisDb, AnalysisMutation, BackingStore, BinInfo, FlagTable, IoBackend, SharedSubsystems,
};
use crate::task::{
    Completion, Liveness, ResolvedOptions, TaskHandle, TaskInfo, TaskOptions, TaskOutcome,
};
use crate::{log_op_end, log_op_error, log_op_start};

/// Engine-wide settings, fixed at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineOptions {
    /// Initial size of the legacy block and of new private buffers
    pub block_size: usize,
    /// Upper bound for `set_working_size`
    pub max_block_size: usize,
    /// Maximum nesting of sub-commands and spawned tasks
    pub max_depth: usize,
    /// Initial legacy cursor
    pub base_address: u64,
    /// Byte used where the backing store has no data
    pub fill_byte: u8,
    /// Queue length at which a primary analysis write flushes first
    pub flush_threshold: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            block_size: 0x100,
            max_block_size: 1024 * 1024,
            max_depth: 16,
            base_address: 0,
            fill_byte: 0xff,
            flush_threshold: 64,
        }
    }
}

/// Executes one command string against the engine
///
/// Implemented by the command layer. The engine calls it for dispatched
/// and spawned tasks, and for `run_nested`/`run_at`.
pub trait CommandHandler: Send + Sync {
    /// # Errors
    ///
    /// Any failure of the command; the task still commits and releases.
    fn execute(&self, engine: &CommandEngine, command: &str) -> Result<()>;
}

impl<F> CommandHandler for F
where
    F: Fn(&CommandEngine, &str) -> Result<()> + Send + Sync,
{
    fn execute(&self, engine: &CommandEngine, command: &str) -> Result<()> {
        self(engine, command)
    }
}

/// How an analysis mutation was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Applied under the analysis write lock (primary task)
    Applied,
    /// Queued with this sequence number (non-primary task)
    Queued(u64),
}

struct SpawnedTask {
    info: TaskInfo,
    completion: Arc<Completion>,
    thread: JoinHandle<()>,
}

/// Join and drop entries whose worker thread has exited
fn prune_exited(tasks: &mut Vec<SpawnedTask>) {
    let (exited, running): (Vec<_>, Vec<_>) = std::mem::take(tasks)
        .into_iter()
        .partition(|task| task.thread.is_finished());
    *tasks = running;
    for task in exited {
        if task.thread.join().is_err() {
            tracing::warn!(task_id = task.info.id.as_u64(), "worker thread panicked");
        }
    }
}

struct EngineInner {
    id: EngineId,
    options: EngineOptions,
    subsystems: Arc<SharedSubsystems>,
    target: CommitTarget,
    stats: Arc<AllocationStats>,
    pending: PendingWriteQueue,
    default_ctx: ContextHandle,
    handler: Arc<dyn CommandHandler>,
    tasks: Mutex<Vec<SpawnedTask>>,
}

#[derive(Clone)]
pub struct CommandEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for CommandEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEngine")
            .field("id", &self.inner.id)
            .field("options", &self.inner.options)
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

impl CommandEngine {
    /// Create an engine over `backend`
    ///
    /// # Errors
    ///
    /// `InvalidBlockSize` when `block_size` is zero or above `max_block_size`.
    pub fn new(
        backend: Box<dyn IoBackend>,
        bin_info: BinInfo,
        options: EngineOptions,
        handler: impl CommandHandler + 'static,
    ) -> Result<Self> {
        if options.block_size == 0 || options.block_size > options.max_block_size {
            return Err(BincoreError::InvalidBlockSize {
                requested: options.block_size,
                max: options.max_block_size,
            });
        }

        let store = BackingStore::new(backend, options.fill_byte);
        let subsystems = Arc::new(SharedSubsystems::new(store, bin_info));
        let target = CommitTarget {
            legacy: Arc::new(Mutex::new(LegacyState::new(
                options.base_address,
                options.block_size,
                options.fill_byte,
            ))),
            config: Arc::new(SharedConfig::new(Config::with_defaults())),
            console: Arc::new(Console::new()),
            lock: Arc::new(Mutex::new(())),
        };
        let stats = Arc::new(AllocationStats::default());

        let default_ctx = ExecutionContext::create(ContextParts {
            task_id: TaskId::next(),
            isolation: IsolationLevel::Shared,
            primary: true,
            propagate_cursor: true,
            propagate_config: true,
            depth: 0,
            max_depth: options.max_depth,
            max_block_size: options.max_block_size,
            liveness: Liveness::default(),
            store: subsystems.store.clone(),
            stats: stats.clone(),
            legacy: target.legacy.clone(),
            config: target.config.clone(),
            console: target.console.clone(),
        })?;

        let id = EngineId::next();
        tracing::debug!(engine = ?id, block_size = options.block_size, "engine created");

        Ok(Self {
            inner: Arc::new(EngineInner {
                id,
                options,
                subsystems,
                target,
                stats,
                pending: PendingWriteQueue::new(),
                default_ctx: ContextHandle::new(default_ctx),
                handler: Arc::new(handler),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn id(&self) -> EngineId {
        self.inner.id
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    pub fn subsystems(&self) -> &Arc<SharedSubsystems> {
        &self.inner.subsystems
    }

    pub fn store(&self) -> &BackingStore {
        &self.inner.subsystems.store
    }

    pub fn flags(&self) -> &SubsystemLock<FlagTable> {
        &self.inner.subsystems.flags
    }

    pub fn analysis(&self) -> &SubsystemLock<AnalysisDb> {
        &self.inner.subsystems.analysis
    }

    pub fn bin_info(&self) -> &SubsystemLock<BinInfo> {
        &self.inner.subsystems.bin_info
    }

    pub fn config(&self) -> &Arc<SharedConfig> {
        &self.inner.target.config
    }

    pub fn console(&self) -> &Arc<Console> {
        &self.inner.target.console
    }

    pub fn pending(&self) -> &PendingWriteQueue {
        &self.inner.pending
    }

    /// Live allocation counters
    pub fn stats(&self) -> AllocationSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn add_config_observer(&self, observer: Arc<dyn ConfigObserver>) {
        self.inner.target.config.add_observer(observer);
    }

    /// Context of the task running on this thread, else the default one
    pub fn ctx_of(&self) -> ContextHandle {
        registry::current(self.inner.id).unwrap_or_else(|| self.inner.default_ctx.clone())
    }

    /// The primary Shared context used when no task is registered
    pub fn default_context(&self) -> ContextHandle {
        self.inner.default_ctx.clone()
    }

    // ===== Legacy access for unmigrated callers =====

    pub fn legacy_cursor(&self) -> u64 {
        self.inner.target.legacy.lock().cursor()
    }

    pub fn legacy_seek(&self, addr: u64) {
        self.inner.target.legacy.lock().seek(addr);
    }

    /// The one legacy block, re-read if stale
    pub fn legacy_block(&self) -> Vec<u8> {
        let store = &self.inner.subsystems.store;
        self.inner.target.legacy.lock().block(store).to_vec()
    }

    // ===== Backing store =====

    /// Read `len` bytes at `addr`; short reads are padded with the fill byte
    pub fn read_bytes(&self, addr: u64, len: usize) -> Vec<u8> {
        self.inner.subsystems.store.read_at(addr, len)
    }

    /// Write through to the backing store
    ///
    /// The caller's buffer and the legacy block are invalidated when they
    /// overlap the write. Private buffers of other tasks keep their snapshot.
    pub fn write_bytes(&self, addr: u64, bytes: &[u8]) -> bool {
        let written = self.inner.subsystems.store.write_at(addr, bytes);
        if written {
            self.ctx_of()
                .with(|ctx| ctx.invalidate_range(addr, bytes.len()));
            let mut legacy = self.inner.target.legacy.lock();
            let start = legacy.cursor();
            let end = start.saturating_add(legacy.block_size() as u64);
            if addr < end && addr.saturating_add(bytes.len() as u64) > start {
                legacy.invalidate();
            }
        }
        written
    }

    // ===== Analysis database =====

    /// Apply (primary) or queue (non-primary) an analysis mutation
    ///
    /// # Errors
    ///
    /// For the primary task, the mutation's validation failure. Queued
    /// mutations are validated at flush time.
    pub fn submit_analysis(&self, mutation: AnalysisMutation) -> Result<Submission> {
        let (task_id, primary) = self.ctx_of().with(|ctx| (ctx.task_id(), ctx.is_primary()));
        if !primary {
            let seq = self.inner.pending.enqueue(task_id, mutation);
            return Ok(Submission::Queued(seq));
        }

        if self.inner.pending.len() >= self.inner.options.flush_threshold {
            if let Err(err) = self.inner.pending.flush(self.analysis()) {
                tracing::warn!(error = %err, "pre-write flush stopped on a malformed entry");
            }
        }
        self.analysis()
            .write(|db| db.apply(&mutation))
            .map_err(|rejection| rejection.into_direct_error())?;
        Ok(Submission::Applied)
    }

    /// Entry address of the function containing `addr`
    ///
    /// A non-primary task also sees functions it queued itself and that
    /// are not flushed yet.
    pub fn function_containing(&self, addr: u64) -> Option<u64> {
        let found = self
            .analysis()
            .read(|db| db.function_containing(addr).map(|f| f.addr));
        if found.is_some() {
            return found;
        }
        let (task_id, primary) = self.ctx_of().with(|ctx| (ctx.task_id(), ctx.is_primary()));
        if primary {
            return None;
        }
        self.inner.pending.queued_function_containing(task_id, addr)
    }

    /// Flush queued analysis writes; only the primary task flushes
    ///
    /// # Errors
    ///
    /// `MalformedMutation` when an entry fails validation. The entry and
    /// everything after it stay queued.
    pub fn flush_pending(&self) -> Result<FlushReport> {
        let primary = self.ctx_of().with(|ctx| ctx.is_primary());
        if !primary {
            tracing::debug!("flush requested by non-primary task; left for the primary");
            return Ok(FlushReport {
                applied: 0,
                retained: self.inner.pending.len(),
            });
        }
        self.inner.pending.flush(self.analysis())
    }

    /// Drop the oldest queued analysis write
    pub fn discard_pending_front(&self) -> Option<PendingWrite> {
        self.inner.pending.discard_front()
    }

    // ===== Context lifecycle =====

    /// Create a context for a caller that drives the lifecycle itself
    ///
    /// # Errors
    ///
    /// `AllocationFailed` when the private buffer cannot be allocated,
    /// `NestingTooDeep` when called too deep inside nested tasks.
    pub fn create_context(&self, options: &TaskOptions) -> Result<ExecutionContext> {
        let depth = self.next_depth()?;
        self.build_context(TaskId::next(), &options.resolve(), depth, Liveness::default())
    }

    /// Run the commit protocol on `ctx`
    ///
    /// # Errors
    ///
    /// `AlreadyCommitted` or `ContextNotActive`.
    pub fn commit(&self, ctx: &mut ExecutionContext) -> Result<CommitReport> {
        commit::commit(ctx, &self.inner.target)
    }

    fn build_context(
        &self,
        task_id: TaskId,
        resolved: &ResolvedOptions,
        depth: usize,
        liveness: Liveness,
    ) -> Result<ExecutionContext> {
        ExecutionContext::create(ContextParts {
            task_id,
            isolation: resolved.isolation,
            primary: resolved.primary,
            propagate_cursor: resolved.propagate_cursor,
            propagate_config: resolved.propagate_config,
            depth,
            max_depth: self.inner.options.max_depth,
            max_block_size: self.inner.options.max_block_size,
            liveness,
            store: self.inner.subsystems.store.clone(),
            stats: self.inner.stats.clone(),
            legacy: self.inner.target.legacy.clone(),
            config: self.inner.target.config.clone(),
            console: self.inner.target.console.clone(),
        })
    }

    /// Depth for a task started from this thread
    fn next_depth(&self) -> Result<usize> {
        let depth = match registry::current(self.inner.id) {
            Some(handle) => handle.with(|ctx| ctx.depth()) + 1,
            None => 0,
        };
        if depth > self.inner.options.max_depth {
            return Err(BincoreError::NestingTooDeep {
                depth,
                max: self.inner.options.max_depth,
            });
        }
        Ok(depth)
    }

    // ===== Task dispatch =====

    /// Run `command` as a task on the calling thread
    ///
    /// A primary task flushes the pending-write queue after its command.
    pub fn dispatch(&self, command: &str, options: TaskOptions) -> TaskOutcome {
        let resolved = options.resolve();
        let task_id = TaskId::next();
        let outcome = match self.next_depth() {
            Ok(depth) => self.run_task(
                command,
                task_id,
                resolved,
                depth,
                Liveness::default(),
                options.request_id,
            ),
            Err(err) => TaskOutcome::aborted(task_id, resolved.isolation, err),
        };
        if resolved.primary {
            if let Err(err) = self.inner.pending.flush(self.analysis()) {
                tracing::warn!(
                    task_id = task_id.as_u64(),
                    error = %err,
                    "flush after primary command stopped on a malformed entry"
                );
            }
        }
        outcome
    }

    /// Run `command` as a task on a new worker thread
    ///
    /// # Errors
    ///
    /// `NestingTooDeep` when spawned too deep inside nested tasks, or
    /// `Internal` when the thread cannot be started.
    pub fn spawn(&self, command: &str, options: TaskOptions) -> Result<TaskHandle> {
        let resolved = options.resolve();
        let depth = self.next_depth()?;
        let task_id = TaskId::next();
        let liveness = Liveness::default();
        let completion = Arc::new(Completion::default());

        let engine = self.clone();
        let owned = command.to_string();
        let worker_liveness = liveness.clone();
        let worker_completion = completion.clone();
        let request_id = options.request_id.clone();
        let thread = thread::Builder::new()
            .name(format!("bincore-{}", task_id))
            .spawn(move || {
                let outcome = engine.run_task(
                    &owned,
                    task_id,
                    resolved,
                    depth,
                    worker_liveness,
                    request_id,
                );
                worker_completion.complete(outcome);
            })
            .map_err(|e| BincoreError::Internal {
                message: format!("failed to start worker for {}: {}", task_id, e),
            })?;

        let mut tasks = self.inner.tasks.lock();
        prune_exited(&mut tasks);
        tasks.push(SpawnedTask {
            info: TaskInfo {
                id: task_id,
                origin: resolved.origin,
                isolation: resolved.isolation,
                command: command.to_string(),
            },
            completion: completion.clone(),
            thread,
        });
        drop(tasks);

        Ok(TaskHandle::new(task_id, resolved.isolation, liveness, completion))
    }

    /// Spawned tasks that have not finished yet
    pub fn tasks(&self) -> Vec<TaskInfo> {
        prune_exited(&mut self.inner.tasks.lock());
        self.inner
            .tasks
            .lock()
            .iter()
            .filter(|task| !task.completion.is_finished())
            .map(|task| task.info.clone())
            .collect()
    }

    /// Join every spawned task, including ones spawned meanwhile
    ///
    /// Returns how many tasks were joined. A task calling this never waits
    /// for itself.
    pub fn wait_all(&self) -> usize {
        let me = thread::current().id();
        let mut joined = 0;
        let mut own = Vec::new();
        loop {
            let batch = std::mem::take(&mut *self.inner.tasks.lock());
            let mut progressed = false;
            for task in batch {
                if task.thread.thread().id() == me {
                    own.push(task);
                    continue;
                }
                if task.thread.join().is_err() {
                    tracing::warn!(task_id = task.info.id.as_u64(), "worker thread panicked");
                }
                joined += 1;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        self.inner.tasks.lock().extend(own);
        joined
    }

    fn run_task(
        &self,
        command: &str,
        task_id: TaskId,
        resolved: ResolvedOptions,
        depth: usize,
        liveness: Liveness,
        request_id: Option<RequestId>,
    ) -> TaskOutcome {
        let start = Instant::now();
        let request = request_id.map(|id| id.to_string()).unwrap_or_default();
        log_op_start!(
            OP_TASK_RUN,
            task_id = task_id.as_u64(),
            isolation = %resolved.isolation,
            origin = ?resolved.origin,
            request_id = %request
        );

        let ctx = match self.build_context(task_id, &resolved, depth, liveness) {
            Ok(ctx) => ctx,
            Err(err) => {
                log_op_error!(
                    OP_TASK_RUN,
                    err.clone(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    task_id = task_id.as_u64(),
                    isolation = %resolved.isolation
                );
                return TaskOutcome::aborted(task_id, resolved.isolation, err);
            }
        };

        let handle = ContextHandle::new(ctx);
        let result = {
            let _registration = registry::register(self.inner.id, handle.clone());
            let handler = self.inner.handler.clone();
            panic::catch_unwind(AssertUnwindSafe(|| handler.execute(self, command)))
                .unwrap_or_else(|payload| {
                    Err(BincoreError::TaskPanicked {
                        task_id,
                        message: panic_message(payload.as_ref()),
                    })
                })
        };

        let commit = handle.with(|ctx| {
            let report = self.commit(ctx);
            ctx.release();
            report
        });
        let commit = match commit {
            Ok(report) => Some(report),
            Err(err) => {
                tracing::warn!(task_id = task_id.as_u64(), error = %err, "commit skipped");
                None
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => log_op_end!(
                OP_TASK_RUN,
                duration_ms = duration_ms,
                task_id = task_id.as_u64(),
                isolation = %resolved.isolation
            ),
            Err(err) => log_op_error!(
                OP_TASK_RUN,
                err.clone(),
                duration_ms = duration_ms,
                task_id = task_id.as_u64(),
                isolation = %resolved.isolation
            ),
        }

        TaskOutcome {
            task_id,
            isolation: resolved.isolation,
            result,
            output: commit
                .as_ref()
                .map(|report| report.output.clone())
                .unwrap_or_default(),
            commit,
        }
    }

    // ===== Nested execution =====

    /// Run a sub-command in the current task and context
    ///
    /// # Errors
    ///
    /// `NestingTooDeep`, or whatever the sub-command returns.
    pub fn run_nested(&self, command: &str) -> Result<()> {
        let handle = self.ctx_of();
        handle.with(|ctx| ctx.enter_nested())?;
        let result = self.inner.handler.execute(self, command);
        handle.with(|ctx| ctx.leave_nested());
        result
    }

    /// Run a sub-command with a temporary context at `addr`
    ///
    /// The current context's cursor and buffer are untouched. Output and
    /// configuration writes of the sub-command are folded back into it.
    ///
    /// # Errors
    ///
    /// `NestingTooDeep`, `AllocationFailed`, or whatever the sub-command
    /// returns.
    pub fn run_at(&self, command: &str, addr: u64) -> Result<()> {
        let parent = self.ctx_of();
        let child = ContextHandle::new(parent.with(|ctx| ctx.child_at(addr))?);
        let result = {
            let _registration = registry::register(self.inner.id, child.clone());
            self.inner.handler.execute(self, command)
        };
        let mut child = child.lock();
        parent.with(|ctx| ctx.absorb_child(&mut child))?;
        result
    }
}

/// Context of the task running on this thread for `engine`
pub fn ctx_of(engine: &CommandEngine) -> ContextHandle {
    engine.ctx_of()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::MemoryBackend;

    fn engine_with(handler: impl CommandHandler + 'static) -> CommandEngine {
        let data: Vec<u8> = (0..=255u8).cycle().take(0x4000).collect();
        CommandEngine::new(
            Box::new(MemoryBackend::new(0, data)),
            BinInfo::raw(0, 0x4000),
            EngineOptions {
                block_size: 16,
                max_depth: 3,
                ..EngineOptions::default()
            },
            handler,
        )
        .unwrap()
    }

    fn noop(_: &CommandEngine, _: &str) -> Result<()> {
        Ok(())
    }

    #[test]
    fn test_invalid_block_size_refused() {
        let err = CommandEngine::new(
            Box::new(MemoryBackend::default()),
            BinInfo::default(),
            EngineOptions {
                block_size: 0,
                ..EngineOptions::default()
            },
            noop,
        )
        .unwrap_err();
        assert!(matches!(err, BincoreError::InvalidBlockSize { .. }));
    }

    #[test]
    fn test_ctx_of_falls_back_to_default() {
        let engine = engine_with(noop);
        assert!(engine.ctx_of().ptr_eq(&engine.default_context()));
        assert!(engine.default_context().with(|ctx| ctx.is_primary()));
    }

    #[test]
    fn test_dispatch_registers_task_context() {
        let engine = engine_with(|engine: &CommandEngine, _: &str| -> Result<()> {
            let isolation = engine.ctx_of().with(|ctx| ctx.isolation());
            assert_eq!(isolation, IsolationLevel::Snapshot);
            assert!(!engine.ctx_of().ptr_eq(&engine.default_context()));
            Ok(())
        });
        let outcome = engine.dispatch("x", TaskOptions::background());
        assert!(outcome.is_ok());
        assert!(engine.ctx_of().ptr_eq(&engine.default_context()));
    }

    #[test]
    fn test_panicking_command_still_releases() {
        let engine = engine_with(|_: &CommandEngine, _: &str| -> Result<()> {
            panic!("boom");
        });
        let baseline = engine.stats();
        let outcome = engine.dispatch("x", TaskOptions::background());
        assert!(matches!(
            outcome.result,
            Err(BincoreError::TaskPanicked { ref message, .. }) if message == "boom"
        ));
        assert!(outcome.commit.is_some());
        assert_eq!(engine.stats(), baseline);
    }

    #[test]
    fn test_non_primary_analysis_writes_are_queued() {
        let engine = engine_with(|engine: &CommandEngine, _: &str| -> Result<()> {
            let submission = engine.submit_analysis(AnalysisMutation::AddFunction {
                addr: 0x100,
                size: 0x10,
                name: "bg".to_string(),
            })?;
            assert!(matches!(submission, Submission::Queued(_)));
            Ok(())
        });
        let handle = engine.spawn("x", TaskOptions::background()).unwrap();
        assert!(handle.join().is_ok());
        assert_eq!(engine.pending().len(), 1);
        assert_eq!(engine.analysis().read(|db| db.function_count()), 0);

        assert_eq!(engine.flush_pending().unwrap().applied, 1);
        assert_eq!(engine.analysis().read(|db| db.function_count()), 1);
    }

    #[test]
    fn test_nested_depth_is_bounded() {
        let engine = engine_with(|engine: &CommandEngine, _: &str| -> Result<()> {
            engine.run_nested("again")
        });
        let outcome = engine.dispatch("x", TaskOptions::prompt());
        assert!(matches!(
            outcome.result,
            Err(BincoreError::NestingTooDeep { depth: 4, max: 3 })
        ));
        assert_eq!(engine.default_context().with(|ctx| ctx.depth()), 0);
    }

    #[test]
    fn test_wait_all_joins_spawned_tasks() {
        let engine = engine_with(noop);
        for _ in 0..4 {
            engine.spawn("x", TaskOptions::background()).unwrap();
        }
        assert!(engine.wait_all() <= 4);
        assert!(engine.tasks().is_empty());
        assert!(engine.inner.tasks.lock().is_empty());
    }

    #[test]
    fn test_spawn_drops_exited_workers() {
        let engine = engine_with(noop);
        let first = engine.spawn("x", TaskOptions::background()).unwrap();
        assert!(first.join().is_ok());
        for _ in 0..200 {
            if engine.inner.tasks.lock().iter().all(|t| t.thread.is_finished()) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let second = engine.spawn("x", TaskOptions::background()).unwrap();

        let tracked: Vec<TaskId> = engine.inner.tasks.lock().iter().map(|t| t.info.id).collect();
        assert_eq!(tracked, vec![second.id()]);
        engine.wait_all();
    }
}
