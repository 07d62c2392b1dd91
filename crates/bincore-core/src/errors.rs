use bincore_core_types::{RequestId, TaskId};
use thiserror::Error;

/// Result type alias using BincoreError
pub type Result<T> = std::result::Result<T, BincoreError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code that callers (the command layer,
/// the CLI, the network endpoint) can match on without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Input/Validation
    InvalidInput,
    InvalidCommand,
    InvalidBlockSize,
    ConfigTypeMismatch,
    NotFound,

    // Context lifecycle
    AllocationFailed,
    InvalidState,
    NestingTooDeep,

    // Analysis database
    MalformedMutation,

    // Task execution
    Cancelled,
    TaskPanicked,

    // Integration/IO
    Io,
    Serialization,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::InvalidCommand => "ERR_INVALID_COMMAND",
            ExErrorKind::InvalidBlockSize => "ERR_INVALID_BLOCK_SIZE",
            ExErrorKind::ConfigTypeMismatch => "ERR_CONFIG_TYPE_MISMATCH",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::AllocationFailed => "ERR_ALLOCATION_FAILED",
            ExErrorKind::InvalidState => "ERR_INVALID_STATE",
            ExErrorKind::NestingTooDeep => "ERR_NESTING_TOO_DEEP",
            ExErrorKind::MalformedMutation => "ERR_MALFORMED_MUTATION",
            ExErrorKind::Cancelled => "ERR_CANCELLED",
            ExErrorKind::TaskPanicked => "ERR_TASK_PANICKED",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// Carries classification fields for programmatic handling and the task and
/// address context needed to debug a failure after the fact.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    task_id: Option<TaskId>,
    request_id: Option<RequestId>,
    address: Option<u64>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            task_id: None,
            request_id: None,
            address: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add task context
    pub fn with_task_id(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Add request ID context
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Add address context
    pub fn with_address(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the task context, if any
    pub fn task_id(&self) -> Option<TaskId> {
        self.task_id
    }

    /// Get the request ID context, if any
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Get the address context, if any
    pub fn address(&self) -> Option<u64> {
        self.address
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(task_id) = self.task_id {
            write!(f, " ({})", task_id)?;
        }
        if let Some(address) = self.address {
            write!(f, " (address: {:#x})", address)?;
        }
        if let Some(source) = &self.source {
            write!(f, "; caused by {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Error taxonomy for engine, context and subsystem operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BincoreError {
    // ===== Context lifecycle =====
    /// A private buffer or configuration copy could not be allocated
    #[error("Allocation of {bytes} bytes failed while creating context for {task_id}")]
    AllocationFailed { task_id: TaskId, bytes: usize },

    /// Requested working size is zero or above the configured maximum
    #[error("Invalid block size {requested}: must be between 1 and {max}")]
    InvalidBlockSize { requested: usize, max: usize },

    /// Operation attempted on a context that is not in the Active state
    #[error("Context of {task_id} is not active (state: {state})")]
    ContextNotActive { task_id: TaskId, state: String },

    /// Commit invoked twice on the same context
    #[error("Context of {task_id} was already committed")]
    AlreadyCommitted { task_id: TaskId },

    /// Nested command or spawned task depth exceeded the configured maximum
    #[error("Nesting depth {depth} exceeds maximum {max}")]
    NestingTooDeep { depth: usize, max: usize },

    // ===== Configuration =====
    /// Configuration write with a value of the wrong type
    #[error("Configuration key '{key}' expects {expected}, got {actual}")]
    ConfigTypeMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// Configuration read of a key that does not exist
    #[error("Unknown configuration key: {key}")]
    UnknownConfigKey { key: String },

    // ===== Analysis database =====
    /// A mutation failed validation against the analysis database
    #[error("Malformed analysis mutation #{seq}: {reason}")]
    MalformedMutation { seq: u64, reason: String },

    /// No function starts at (or contains) the address
    #[error("No function at {address:#x}")]
    FunctionNotFound { address: u64 },

    /// Flag lookup by name failed
    #[error("Flag not found: {name}")]
    FlagNotFound { name: String },

    // ===== Task execution =====
    /// Command string could not be parsed
    #[error("Invalid command '{command}': {reason}")]
    InvalidCommand { command: String, reason: String },

    /// The task observed its cancellation signal
    #[error("Task {task_id} was cancelled")]
    Cancelled { task_id: TaskId },

    /// The command body panicked; cleanup still ran
    #[error("Task {task_id} panicked: {message}")]
    TaskPanicked { task_id: TaskId, message: String },

    // ===== Generic Errors =====
    /// Serialization error (JSON encoding/decoding)
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Conversion from BincoreError to ExError
///
/// Lets the command layer and the CLI report every core failure through
/// the canonical error facility.
impl From<BincoreError> for ExError {
    fn from(err: BincoreError) -> Self {
        match err {
            BincoreError::AllocationFailed { task_id, bytes } => {
                ExError::new(ExErrorKind::AllocationFailed)
                    .with_op("context_create")
                    .with_task_id(task_id)
                    .with_message(format!("Failed to allocate {} bytes", bytes))
            }

            BincoreError::InvalidBlockSize { requested, max } => {
                ExError::new(ExErrorKind::InvalidBlockSize)
                    .with_op("set_working_size")
                    .with_message(format!(
                        "Block size {} outside 1..={}",
                        requested, max
                    ))
            }

            BincoreError::ContextNotActive { task_id, state } => {
                ExError::new(ExErrorKind::InvalidState)
                    .with_task_id(task_id)
                    .with_message(format!("Context is {}", state))
            }

            BincoreError::AlreadyCommitted { task_id } => ExError::new(ExErrorKind::InvalidState)
                .with_op("commit")
                .with_task_id(task_id)
                .with_message("Context was already committed"),

            BincoreError::NestingTooDeep { depth, max } => {
                ExError::new(ExErrorKind::NestingTooDeep)
                    .with_message(format!("Depth {} exceeds maximum {}", depth, max))
            }

            BincoreError::ConfigTypeMismatch {
                key,
                expected,
                actual,
            } => ExError::new(ExErrorKind::ConfigTypeMismatch)
                .with_op("write_config")
                .with_message(format!("'{}' expects {}, got {}", key, expected, actual)),

            BincoreError::UnknownConfigKey { key } => ExError::new(ExErrorKind::NotFound)
                .with_op("read_config")
                .with_message(format!("Unknown configuration key '{}'", key)),

            BincoreError::MalformedMutation { seq, reason } => {
                ExError::new(ExErrorKind::MalformedMutation)
                    .with_op("pending_flush")
                    .with_message(format!("Mutation #{}: {}", seq, reason))
            }

            BincoreError::FunctionNotFound { address } => ExError::new(ExErrorKind::NotFound)
                .with_address(address)
                .with_message("Function not found"),

            BincoreError::FlagNotFound { name } => ExError::new(ExErrorKind::NotFound)
                .with_message(format!("Flag '{}' not found", name)),

            BincoreError::InvalidCommand { command, reason } => {
                ExError::new(ExErrorKind::InvalidCommand)
                    .with_op("parse_command")
                    .with_message(format!("'{}': {}", command, reason))
            }

            BincoreError::Cancelled { task_id } => ExError::new(ExErrorKind::Cancelled)
                .with_task_id(task_id)
                .with_message("Task was cancelled"),

            BincoreError::TaskPanicked { task_id, message } => {
                ExError::new(ExErrorKind::TaskPanicked)
                    .with_op("task_run")
                    .with_task_id(task_id)
                    .with_message(message)
            }

            BincoreError::Serialization { message } => {
                ExError::new(ExErrorKind::Serialization).with_message(message)
            }

            BincoreError::Internal { message } => {
                ExError::new(ExErrorKind::Internal).with_message(message)
            }
        }
    }
}

/// Conversion from serde_json::Error to BincoreError
impl From<serde_json::Error> for BincoreError {
    fn from(err: serde_json::Error) -> Self {
        BincoreError::Serialization {
            message: err.to_string(),
        }
    }
}
