//! Task dispatch options, liveness and handles
//!
//! A task is one in-flight command execution. Its [`TaskOptions`] say where
//! it came from and what isolation and propagation it asks for;
//! [`TaskOptions::resolve`] turns that request into what the task is
//! actually entitled to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bincore_core_types::{RequestId, TaskId};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::commit::CommitReport;
use crate::context::IsolationLevel;
use crate::errors::{BincoreError, Result};

/// Where a command came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// The interactive caller; its task is the primary one
    Prompt,
    /// A detached background form
    Background,
    /// A request served by the network command endpoint
    Network,
}

impl Origin {
    pub fn default_isolation(self) -> IsolationLevel {
        match self {
            Origin::Prompt => IsolationLevel::Shared,
            Origin::Background | Origin::Network => IsolationLevel::Snapshot,
        }
    }
}

/// What a dispatcher asks for
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub origin: Origin,
    pub isolation: Option<IsolationLevel>,
    pub propagate_cursor: Option<bool>,
    pub propagate_config: Option<bool>,
    pub request_id: Option<RequestId>,
}

impl TaskOptions {
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            isolation: None,
            propagate_cursor: None,
            propagate_config: None,
            request_id: None,
        }
    }

    pub fn prompt() -> Self {
        Self::new(Origin::Prompt)
    }

    pub fn background() -> Self {
        Self::new(Origin::Background)
    }

    pub fn network() -> Self {
        Self::new(Origin::Network)
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }

    pub fn with_cursor_propagation(mut self, propagate: bool) -> Self {
        self.propagate_cursor = Some(propagate);
        self
    }

    pub fn with_config_propagation(mut self, propagate: bool) -> Self {
        self.propagate_config = Some(propagate);
        self
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Normalize the request to what the origin and level are entitled to
    ///
    /// | level    | cursor                          | configuration        |
    /// |----------|---------------------------------|----------------------|
    /// | Shared   | always                          | always               |
    /// | Snapshot | on request, never from Network  | never                |
    /// | Isolated | on request, never from Network  | unless opted out     |
    ///
    /// Network requests for Shared are served as Snapshot, since aliasing
    /// the legacy cursor would propagate it. A request that is not
    /// entitled is dropped, never refused.
    pub fn resolve(&self) -> ResolvedOptions {
        let requested = self.isolation.unwrap_or(self.origin.default_isolation());
        let isolation = if requested == IsolationLevel::Shared && self.origin == Origin::Network {
            tracing::debug!(
                origin = ?self.origin,
                "shared isolation normalized to snapshot"
            );
            IsolationLevel::Snapshot
        } else {
            requested
        };

        let cursor_entitled = self.origin != Origin::Network;
        let (propagate_cursor, propagate_config) = match isolation {
            IsolationLevel::Shared => (true, true),
            IsolationLevel::Snapshot => (
                cursor_entitled && self.propagate_cursor.unwrap_or(false),
                false,
            ),
            IsolationLevel::Isolated => (
                cursor_entitled && self.propagate_cursor.unwrap_or(false),
                self.propagate_config.unwrap_or(true),
            ),
        };

        if self.propagate_cursor.is_some_and(|want| want != propagate_cursor) {
            tracing::debug!(
                origin = ?self.origin,
                isolation = %isolation,
                requested = ?self.propagate_cursor,
                "cursor propagation request normalized"
            );
        }
        if self.propagate_config.is_some_and(|want| want != propagate_config) {
            tracing::debug!(
                origin = ?self.origin,
                isolation = %isolation,
                requested = ?self.propagate_config,
                "configuration propagation request normalized"
            );
        }

        ResolvedOptions {
            origin: self.origin,
            isolation,
            primary: self.origin == Origin::Prompt,
            propagate_cursor,
            propagate_config,
        }
    }
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self::prompt()
    }
}

/// Options after entitlement normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub origin: Origin,
    pub isolation: IsolationLevel,
    pub primary: bool,
    pub propagate_cursor: bool,
    pub propagate_config: bool,
}

/// Cooperative cancellation signal shared by a task and its handle
#[derive(Debug, Clone, Default)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Result of one task
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub isolation: IsolationLevel,
    pub result: Result<()>,
    /// Private console text of an Isolated task (also merged into the console)
    pub output: String,
    /// `None` when the context could not be created
    pub commit: Option<CommitReport>,
}

impl TaskOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub(crate) fn aborted(task_id: TaskId, isolation: IsolationLevel, err: BincoreError) -> Self {
        Self {
            task_id,
            isolation,
            result: Err(err),
            output: String::new(),
            commit: None,
        }
    }
}

/// Row of the background task table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub origin: Origin,
    pub isolation: IsolationLevel,
    pub command: String,
}

#[derive(Debug, Default)]
pub(crate) struct Completion {
    outcome: Mutex<Option<TaskOutcome>>,
    done: Condvar,
    finished: AtomicBool,
}

impl Completion {
    pub(crate) fn complete(&self, outcome: TaskOutcome) {
        let mut slot = self.outcome.lock();
        *slot = Some(outcome);
        self.finished.store(true, Ordering::Release);
        self.done.notify_all();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn wait(&self) -> Option<TaskOutcome> {
        let mut slot = self.outcome.lock();
        while !self.is_finished() {
            self.done.wait(&mut slot);
        }
        slot.take()
    }
}

/// Handle to a spawned task
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    isolation: IsolationLevel,
    liveness: Liveness,
    completion: Arc<Completion>,
}

impl TaskHandle {
    pub(crate) fn new(
        id: TaskId,
        isolation: IsolationLevel,
        liveness: Liveness,
        completion: Arc<Completion>,
    ) -> Self {
        Self {
            id,
            isolation,
            liveness,
            completion,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Ask the task to stop at its next liveness check
    pub fn cancel(&self) {
        self.liveness.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.completion.is_finished()
    }

    /// Block until the task has committed and released its context
    pub fn join(self) -> TaskOutcome {
        let (id, isolation) = (self.id, self.isolation);
        self.completion.wait().unwrap_or_else(|| {
            TaskOutcome::aborted(
                id,
                isolation,
                BincoreError::Internal {
                    message: "task outcome already taken".to_string(),
                },
            )
        })
    }
}
