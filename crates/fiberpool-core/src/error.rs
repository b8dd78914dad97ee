//! Error types for fiber scheduling and pool dispatch

use core::fmt;

/// Result type for scheduler and pool operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur in scheduler and pool operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Operation was cancelled via CancellationToken
    Cancelled,

    /// Dispatch was invoked on a pool that already has a round in flight
    Reentrant,

    /// Invalid state for the requested operation (e.g. a fiber joining itself)
    InvalidState,

    /// Scheduler for this thread is gone (thread is shutting down)
    NotInitialized,

    /// Scheduler for this thread was already created
    AlreadyInitialized,

    /// A joined fiber panicked; carries the panic message
    FiberPanicked(String),

    /// One or more task invocations panicked during a round
    TaskFailed(Vec<TaskFailure>),

    /// Stack allocation/mapping failed
    MemoryError(MemoryError),

    /// Worker (fiber or thread) error
    WorkerError(WorkerError),

    /// Invalid configuration
    Config(ConfigError),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::Cancelled => write!(f, "operation cancelled"),
            SchedError::Reentrant => write!(f, "pool already has a round in flight"),
            SchedError::InvalidState => write!(f, "invalid state for operation"),
            SchedError::NotInitialized => write!(f, "scheduler not initialized"),
            SchedError::AlreadyInitialized => write!(f, "scheduler already initialized"),
            SchedError::FiberPanicked(msg) => write!(f, "fiber panicked: {}", msg),
            SchedError::TaskFailed(failures) => {
                write!(f, "{} task(s) failed", failures.len())?;
                if let Some(first) = failures.first() {
                    write!(f, " (first: {})", first)?;
                }
                Ok(())
            }
            SchedError::MemoryError(e) => write!(f, "memory error: {}", e),
            SchedError::WorkerError(e) => write!(f, "worker error: {}", e),
            SchedError::Config(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SchedError {}

/// A task invocation that panicked, captured by the worker that ran it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Worker index the task was invoked with
    pub worker: usize,

    /// Panic message, or a placeholder for non-string payloads
    pub message: String,
}

impl TaskFailure {
    pub fn new(worker: usize, message: impl Into<String>) -> Self {
        Self { worker, message: message.into() }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {} panicked: {}", self.worker, self.message)
    }
}

/// Stack memory errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// mmap failed
    AllocationFailed,

    /// mprotect failed (guard page setup)
    ProtectionFailed,

    /// Requested stack size overflows the address computation
    InvalidSize,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "stack allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "guard page protection failed"),
            MemoryError::InvalidSize => write!(f, "invalid stack size"),
        }
    }
}

impl From<MemoryError> for SchedError {
    fn from(e: MemoryError) -> Self {
        SchedError::MemoryError(e)
    }
}

/// Worker related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Failed to spawn a worker thread
    SpawnFailed,

    /// Worker thread panicked outside of a task
    Panicked,

    /// Fiber id space exhausted
    NoIdsAvailable,

    /// Requested worker count exceeds the configured maximum
    TooManyWorkers(usize),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::SpawnFailed => write!(f, "failed to spawn worker thread"),
            WorkerError::Panicked => write!(f, "worker thread panicked"),
            WorkerError::NoIdsAvailable => write!(f, "fiber ids exhausted"),
            WorkerError::TooManyWorkers(n) => write!(f, "{} workers exceeds the configured maximum", n),
        }
    }
}

impl From<WorkerError> for SchedError {
    fn from(e: WorkerError) -> Self {
        SchedError::WorkerError(e)
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for SchedError {
    fn from(e: ConfigError) -> Self {
        SchedError::Config(e)
    }
}
