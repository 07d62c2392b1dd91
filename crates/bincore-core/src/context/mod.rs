//! Per-task execution context
//!
//! An [`ExecutionContext`] is one task's view of the mutable engine state:
//! cursor, working buffer, configuration, console and nesting counters,
//! plus the scratch fields stateful commands keep between calls. How much
//! of that view is private depends on the [`IsolationLevel`] chosen when
//! the context is created:
//!
//! | level    | cursor/buffer        | configuration     | console          |
//! |----------|----------------------|-------------------|------------------|
//! | Shared   | aliases legacy state | aliases shared    | shared stream    |
//! | Snapshot | private              | aliases shared    | shared stream    |
//! | Isolated | private              | private deep copy | private, merged  |
//!
//! The lifecycle is `Created -> Active -> Committing -> Released`. Every
//! operation except release requires the Active state.

mod buffer;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use bincore_core_types::TaskId;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigValue, SharedConfig};
use crate::console::{Console, ConsoleBuffer};
use crate::errors::{BincoreError, Result};
use crate::stats::{AllocKind, AllocToken, AllocationStats};
use crate::subsystems::BackingStore;
use crate::task::Liveness;

pub(crate) use buffer::BufferView;
pub use buffer::{LegacyState, PrivateBlock, SharedLegacy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    /// Aliases the engine's legacy state; compatibility bridge for unmigrated callers
    Shared,
    /// Private cursor and buffer; configuration and console still shared
    Snapshot,
    /// Private cursor, buffer, configuration and console
    Isolated,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IsolationLevel::Shared => "shared",
            IsolationLevel::Snapshot => "snapshot",
            IsolationLevel::Isolated => "isolated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Created,
    Active,
    Committing,
    Released,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-task state of stateful commands
///
/// These used to be free-floating globals; as fields of the context they
/// cannot be observed by any other task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scratch {
    /// Last address read by the function-boundary scanner
    pub last_simulated_read: Option<u64>,
    /// Address of the last hexdump rendered
    pub last_rendered: Option<u64>,
    /// Last address flagged by a command
    pub last_flagged: Option<u64>,
}

pub(crate) enum ConfigView {
    Shared(Arc<SharedConfig>),
    Private {
        config: Config,
        dirty_keys: BTreeSet<String>,
        _token: AllocToken,
    },
    Released,
}

impl fmt::Debug for ConfigView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigView::Shared(_) => f.write_str("Shared"),
            ConfigView::Private { dirty_keys, .. } => f
                .debug_struct("Private")
                .field("dirty_keys", dirty_keys)
                .finish(),
            ConfigView::Released => f.write_str("Released"),
        }
    }
}

/// Everything needed to build a context; assembled by the engine
pub(crate) struct ContextParts {
    pub task_id: TaskId,
    pub isolation: IsolationLevel,
    pub primary: bool,
    pub propagate_cursor: bool,
    pub propagate_config: bool,
    pub depth: usize,
    pub max_depth: usize,
    pub max_block_size: usize,
    pub liveness: Liveness,
    pub store: Arc<BackingStore>,
    pub stats: Arc<AllocationStats>,
    pub legacy: SharedLegacy,
    pub config: Arc<SharedConfig>,
    pub console: Arc<Console>,
}

#[derive(Debug)]
pub struct ExecutionContext {
    task_id: TaskId,
    isolation: IsolationLevel,
    primary: bool,
    state: ContextState,
    committed: bool,
    store: Arc<BackingStore>,
    stats: Arc<AllocationStats>,
    view: BufferView,
    config: ConfigView,
    config_dirty: bool,
    console: ConsoleBuffer,
    propagate_cursor: bool,
    propagate_config: bool,
    depth: usize,
    max_depth: usize,
    max_block_size: usize,
    liveness: Liveness,
    scratch: Scratch,
    token: Option<AllocToken>,
}

impl ExecutionContext {
    /// Build a context and move it to Active
    ///
    /// Snapshot and Isolated contexts allocate their private buffer here
    /// and fill it from the backing store at the legacy cursor, so an
    /// allocation failure surfaces before any command runs.
    pub(crate) fn create(parts: ContextParts) -> Result<Self> {
        let ContextParts {
            task_id,
            isolation,
            primary,
            propagate_cursor,
            propagate_config,
            depth,
            max_depth,
            max_block_size,
            liveness,
            store,
            stats,
            legacy,
            config,
            console,
        } = parts;

        let view = match isolation {
            IsolationLevel::Shared => BufferView::Legacy(legacy),
            IsolationLevel::Snapshot | IsolationLevel::Isolated => {
                let (cursor, size) = {
                    let legacy = legacy.lock();
                    (legacy.cursor(), legacy.block_size())
                };
                private_view(&store, &stats, task_id, cursor, size)?
            }
        };

        let (config, console) = match isolation {
            IsolationLevel::Shared | IsolationLevel::Snapshot => {
                (ConfigView::Shared(config), ConsoleBuffer::Shared(console))
            }
            IsolationLevel::Isolated => (
                private_config(&stats, config.snapshot()),
                ConsoleBuffer::Private(String::new()),
            ),
        };

        let mut ctx = Self {
            task_id,
            isolation,
            primary,
            state: ContextState::Created,
            committed: false,
            store,
            token: Some(AllocToken::acquire(&stats, AllocKind::Context, 0)),
            stats,
            view,
            config,
            config_dirty: false,
            console,
            propagate_cursor: isolation == IsolationLevel::Shared || propagate_cursor,
            propagate_config: isolation == IsolationLevel::Shared || propagate_config,
            depth,
            max_depth,
            max_block_size,
            liveness,
            scratch: Scratch::default(),
        };
        ctx.state = ContextState::Active;
        Ok(ctx)
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Whether this context belongs to the primary (prompt) task
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn propagates_cursor(&self) -> bool {
        self.propagate_cursor
    }

    pub fn propagates_config(&self) -> bool {
        self.propagate_config
    }

    pub fn is_config_dirty(&self) -> bool {
        self.config_dirty
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn scratch(&self) -> &Scratch {
        &self.scratch
    }

    pub fn scratch_mut(&mut self) -> &mut Scratch {
        &mut self.scratch
    }

    /// Cooperative cancellation point
    pub fn check_alive(&self) -> Result<()> {
        if self.liveness.is_cancelled() {
            return Err(BincoreError::Cancelled {
                task_id: self.task_id,
            });
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != ContextState::Active {
            return Err(BincoreError::ContextNotActive {
                task_id: self.task_id,
                state: self.state.to_string(),
            });
        }
        Ok(())
    }

    pub fn cursor(&self) -> u64 {
        match &self.view {
            BufferView::Legacy(legacy) => legacy.lock().cursor(),
            BufferView::Private { cursor, .. } => *cursor,
        }
    }

    pub fn block_size(&self) -> usize {
        match &self.view {
            BufferView::Legacy(legacy) => legacy.lock().block_size(),
            BufferView::Private { block, .. } => block.as_ref().map_or(0, PrivateBlock::len),
        }
    }

    /// False whenever the cursor moved since the last read of the buffer
    pub fn is_buffer_valid(&self) -> bool {
        match &self.view {
            BufferView::Legacy(legacy) => legacy.lock().is_valid(),
            BufferView::Private { valid, .. } => *valid,
        }
    }

    /// Run `f` over the working buffer, re-reading it first if stale
    pub fn with_working_buffer<R>(&mut self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.with_working_buffer_mut(|bytes| f(bytes))
    }

    /// Mutable access to the working buffer
    ///
    /// Under Shared this edits the legacy block every Shared context sees.
    /// Edits are not written to the backing store and are lost on the next
    /// refill.
    pub fn with_working_buffer_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        self.ensure_active()?;
        match &mut self.view {
            BufferView::Legacy(legacy) => {
                let mut legacy = legacy.lock();
                Ok(f(legacy.block_mut(&self.store)))
            }
            BufferView::Private {
                cursor,
                block,
                valid,
            } => {
                let block = block.as_mut().ok_or_else(|| BincoreError::Internal {
                    message: "private buffer missing on active context".to_string(),
                })?;
                if !*valid {
                    self.store.read_into(*cursor, block.as_mut_slice());
                    *valid = true;
                }
                Ok(f(block.as_mut_slice()))
            }
        }
    }

    /// Copy of the working buffer at the cursor
    pub fn working_buffer(&mut self) -> Result<Vec<u8>> {
        self.with_working_buffer(<[u8]>::to_vec)
    }

    /// Move the cursor; the buffer is re-read now or on next access
    pub fn set_cursor(&mut self, addr: u64, refill_now: bool) -> Result<()> {
        self.ensure_active()?;
        match &mut self.view {
            BufferView::Legacy(legacy) => legacy.lock().seek(addr),
            BufferView::Private { cursor, valid, .. } => {
                *cursor = addr;
                *valid = false;
            }
        }
        if refill_now {
            self.with_working_buffer(|_| ())?;
        }
        Ok(())
    }

    /// Resize the working buffer; zero or above the maximum is refused
    ///
    /// On failure the buffer is left untouched.
    pub fn set_working_size(&mut self, size: usize) -> Result<()> {
        self.ensure_active()?;
        if size == 0 || size > self.max_block_size {
            return Err(BincoreError::InvalidBlockSize {
                requested: size,
                max: self.max_block_size,
            });
        }
        let fill = self.store.fill_byte();
        match &mut self.view {
            BufferView::Legacy(legacy) => {
                let mut legacy = legacy.lock();
                legacy.resize(size, fill);
                legacy.refill(&self.store);
            }
            BufferView::Private {
                cursor,
                block,
                valid,
            } => {
                let mut fresh = PrivateBlock::allocate(&self.stats, self.task_id, size, fill)?;
                self.store.read_into(*cursor, fresh.as_mut_slice());
                *block = Some(fresh);
                *valid = true;
            }
        }
        Ok(())
    }

    /// Mark the buffer stale if it overlaps `[addr, addr + len)`
    pub fn invalidate_range(&mut self, addr: u64, len: usize) {
        let cursor = self.cursor();
        let size = self.block_size() as u64;
        let end = addr.saturating_add(len as u64);
        if addr >= cursor.saturating_add(size) || end <= cursor {
            return;
        }
        match &mut self.view {
            BufferView::Legacy(legacy) => legacy.lock().invalidate(),
            BufferView::Private { valid, .. } => *valid = false,
        }
    }

    pub fn read_config(&self, key: &str) -> Result<ConfigValue> {
        self.ensure_active()?;
        let value = match &self.config {
            ConfigView::Shared(shared) => shared.get(key),
            ConfigView::Private { config, .. } => config.get(key).cloned(),
            ConfigView::Released => None,
        };
        value.ok_or_else(|| BincoreError::UnknownConfigKey {
            key: key.to_string(),
        })
    }

    /// Write a configuration key and mark the view dirty
    ///
    /// Shared and Snapshot contexts write through to the shared
    /// configuration. Isolated contexts only touch their copy.
    pub fn write_config(&mut self, key: &str, value: impl Into<ConfigValue>) -> Result<()> {
        self.ensure_active()?;
        let value = value.into();
        match &mut self.config {
            ConfigView::Shared(shared) => shared.set(key, value)?,
            ConfigView::Private {
                config, dirty_keys, ..
            } => {
                config.set(key, value)?;
                dirty_keys.insert(key.to_string());
            }
            ConfigView::Released => {}
        }
        self.config_dirty = true;
        Ok(())
    }

    /// Parse `text` for the type `key` already has, then write it
    pub fn write_config_str(&mut self, key: &str, text: &str) -> Result<()> {
        self.ensure_active()?;
        let value = match &self.config {
            ConfigView::Shared(shared) => shared.parse_for(key, text)?,
            ConfigView::Private { config, .. } => config.parse_for(key, text)?,
            ConfigView::Released => ConfigValue::Str(text.to_string()),
        };
        self.write_config(key, value)
    }

    /// The configuration as this context sees it
    pub fn config_snapshot(&self) -> Result<Config> {
        self.ensure_active()?;
        Ok(match &self.config {
            ConfigView::Shared(shared) => shared.snapshot(),
            ConfigView::Private { config, .. } => config.clone(),
            ConfigView::Released => Config::default(),
        })
    }

    /// Append text to this context's console
    pub fn emit(&mut self, text: &str) -> Result<()> {
        self.ensure_active()?;
        self.console.write(text);
        Ok(())
    }

    /// Enter one level of nested command execution
    pub fn enter_nested(&mut self) -> Result<()> {
        self.ensure_active()?;
        let depth = self.depth + 1;
        if depth > self.max_depth {
            return Err(BincoreError::NestingTooDeep {
                depth,
                max: self.max_depth,
            });
        }
        self.depth = depth;
        Ok(())
    }

    pub fn leave_nested(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Temporary child context for running a command at `addr`
    ///
    /// The child owns a private buffer at `addr` and a private console. Its
    /// configuration view is the parent's: aliased when the parent aliases
    /// the shared configuration, a copy of the parent's copy otherwise. The
    /// child never propagates anything itself; [`absorb_child`] hands its
    /// output and configuration writes back to the parent.
    ///
    /// [`absorb_child`]: ExecutionContext::absorb_child
    pub fn child_at(&self, addr: u64) -> Result<ExecutionContext> {
        self.ensure_active()?;
        let depth = self.depth + 1;
        if depth > self.max_depth {
            return Err(BincoreError::NestingTooDeep {
                depth,
                max: self.max_depth,
            });
        }
        let view = private_view(
            &self.store,
            &self.stats,
            self.task_id,
            addr,
            self.block_size(),
        )?;
        let config = match &self.config {
            ConfigView::Shared(shared) => ConfigView::Shared(shared.clone()),
            ConfigView::Private { config, .. } => private_config(&self.stats, config.clone()),
            ConfigView::Released => ConfigView::Released,
        };
        Ok(ExecutionContext {
            task_id: self.task_id,
            isolation: self.isolation,
            primary: self.primary,
            state: ContextState::Active,
            committed: false,
            store: self.store.clone(),
            token: Some(AllocToken::acquire(&self.stats, AllocKind::Context, 0)),
            stats: self.stats.clone(),
            view,
            config,
            config_dirty: false,
            console: ConsoleBuffer::Private(String::new()),
            propagate_cursor: false,
            propagate_config: false,
            depth,
            max_depth: self.max_depth,
            max_block_size: self.max_block_size,
            liveness: self.liveness.clone(),
            scratch: self.scratch.clone(),
        })
    }

    /// Fold a finished child back in, then release it
    pub fn absorb_child(&mut self, child: &mut ExecutionContext) -> Result<()> {
        self.ensure_active()?;
        let output = child.console.take_private();
        self.console.write(&output);
        if let (
            ConfigView::Private {
                config, dirty_keys, ..
            },
            ConfigView::Private {
                config: child_config,
                dirty_keys: child_keys,
                ..
            },
        ) = (&mut self.config, &child.config)
        {
            config.merge_keys(child_config, child_keys);
            dirty_keys.extend(child_keys.iter().cloned());
        }
        self.config_dirty |= child.config_dirty;
        self.scratch = child.scratch.clone();
        child.release();
        Ok(())
    }

    /// Move Active to Committing; a context commits at most once
    pub(crate) fn begin_commit(&mut self) -> Result<()> {
        if self.committed {
            return Err(BincoreError::AlreadyCommitted {
                task_id: self.task_id,
            });
        }
        self.ensure_active()?;
        self.state = ContextState::Committing;
        self.committed = true;
        Ok(())
    }

    /// Cursor of a private view; Shared contexts already moved the legacy one
    pub(crate) fn private_cursor(&self) -> Option<u64> {
        match &self.view {
            BufferView::Legacy(_) => None,
            BufferView::Private { cursor, .. } => Some(*cursor),
        }
    }

    /// Private configuration copy and the keys written to it
    pub(crate) fn private_config(&self) -> Option<(&Config, &BTreeSet<String>)> {
        match &self.config {
            ConfigView::Private {
                config, dirty_keys, ..
            } => Some((config, dirty_keys)),
            _ => None,
        }
    }

    pub(crate) fn take_private_output(&mut self) -> String {
        self.console.take_private()
    }

    /// Free private resources; safe to call any number of times
    ///
    /// The aliased legacy buffer of a Shared context is never freed here.
    pub fn release(&mut self) {
        if self.state == ContextState::Released {
            return;
        }
        if let BufferView::Private { block, valid, .. } = &mut self.view {
            *block = None;
            *valid = false;
        }
        if matches!(self.config, ConfigView::Private { .. }) {
            self.config = ConfigView::Released;
        }
        self.console.take_private();
        self.token = None;
        self.state = ContextState::Released;
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.release();
    }
}

fn private_view(
    store: &BackingStore,
    stats: &Arc<AllocationStats>,
    task_id: TaskId,
    cursor: u64,
    size: usize,
) -> Result<BufferView> {
    let mut block = PrivateBlock::allocate(stats, task_id, size, store.fill_byte())?;
    store.read_into(cursor, block.as_mut_slice());
    Ok(BufferView::Private {
        cursor,
        block: Some(block),
        valid: true,
    })
}

fn private_config(stats: &Arc<AllocationStats>, config: Config) -> ConfigView {
    ConfigView::Private {
        config,
        dirty_keys: BTreeSet::new(),
        _token: AllocToken::acquire(stats, AllocKind::ConfigCopy, 0),
    }
}

/// Shared ownership of a context between its task and the registry
///
/// Lock it only for the duration of one context operation; never hold the
/// guard across a call back into the engine.
#[derive(Debug, Clone)]
pub struct ContextHandle(Arc<Mutex<ExecutionContext>>);

impl ContextHandle {
    pub fn new(ctx: ExecutionContext) -> Self {
        Self(Arc::new(Mutex::new(ctx)))
    }

    pub fn lock(&self) -> MutexGuard<'_, ExecutionContext> {
        self.0.lock()
    }

    /// Run `f` with exclusive access to the context
    pub fn with<R>(&self, f: impl FnOnce(&mut ExecutionContext) -> R) -> R {
        f(&mut self.0.lock())
    }

    pub fn ptr_eq(&self, other: &ContextHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
