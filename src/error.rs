//! Error types for the mixdesk-daemon.
//!
//! Defines all error codes and types used throughout the daemon for
//! consistent error handling and reporting.

use std::fmt;

/// Error codes returned by the daemon in error responses.
///
/// These codes are used in JSON-RPC error responses and allow clients
/// to programmatically handle specific error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Persistent cache tier could not be read or written.
    /// Trigger: Cache directory unavailable, disk full, corrupt record.
    StorageError,

    /// A dispatched task did not complete within the configured window.
    /// Trigger: Worker busy for longer than the task timeout.
    TaskTimeout,

    /// A worker reported a logical failure for a task and retries ran out.
    /// Trigger: Malformed audio buffer, invalid operation options.
    TaskExecutionFailed,

    /// A worker thread crashed while executing a task.
    /// Trigger: Panic inside the audio processor.
    WorkerFault,

    /// The task was cancelled before a result was delivered.
    /// Trigger: Explicit cancel request.
    TaskCancelled,

    /// The task was still queued when the queue was cleared.
    /// Trigger: Explicit queue clear request.
    QueueCleared,

    /// The worker pool is shut down and no longer accepts work.
    /// Trigger: Submission after shutdown, or shutdown with pending work.
    PoolShutdown,

    /// Audio input could not be decoded.
    /// Trigger: Not a WAV file, truncated data, unsupported sample format.
    InvalidAudio,

    /// Task or request payload is malformed.
    /// Trigger: Payload does not match the task kind, bad option values.
    InvalidPayload,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::StorageError => "STORAGE_ERROR",
            ErrorCode::TaskTimeout => "TASK_TIMEOUT",
            ErrorCode::TaskExecutionFailed => "TASK_EXECUTION_FAILED",
            ErrorCode::WorkerFault => "WORKER_FAULT",
            ErrorCode::TaskCancelled => "TASK_CANCELLED",
            ErrorCode::QueueCleared => "QUEUE_CLEARED",
            ErrorCode::PoolShutdown => "POOL_SHUTDOWN",
            ErrorCode::InvalidAudio => "INVALID_AUDIO",
            ErrorCode::InvalidPayload => "INVALID_PAYLOAD",
        }
    }

    /// Returns a human-readable description of the error.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::StorageError => "Persistent cache storage failed",
            ErrorCode::TaskTimeout => "Task did not complete within the timeout",
            ErrorCode::TaskExecutionFailed => "Task failed after all retries",
            ErrorCode::WorkerFault => "Worker thread crashed",
            ErrorCode::TaskCancelled => "Task was cancelled",
            ErrorCode::QueueCleared => "Task was removed when the queue was cleared",
            ErrorCode::PoolShutdown => "Worker pool is shut down",
            ErrorCode::InvalidAudio => "Audio data could not be decoded",
            ErrorCode::InvalidPayload => "Task payload is invalid",
        }
    }

    /// Returns a recovery hint suggesting how to resolve this error.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ErrorCode::StorageError => {
                "Check that the cache directory is writable and the disk has free space. \
                 The memory cache keeps working in the meantime"
            }
            ErrorCode::TaskTimeout => {
                "Split the audio into shorter segments or raise MIXDESK_TASK_TIMEOUT_MS"
            }
            ErrorCode::TaskExecutionFailed => {
                "Inspect the error details; the input audio or operation options are \
                 likely invalid"
            }
            ErrorCode::WorkerFault => {
                "The worker was replaced automatically. If this repeats, the input \
                 triggers a bug in the processor"
            }
            ErrorCode::TaskCancelled => "Resubmit the task if the result is still needed",
            ErrorCode::QueueCleared => "Resubmit the task if the result is still needed",
            ErrorCode::PoolShutdown => "Restart the daemon before submitting new work",
            ErrorCode::InvalidAudio => {
                "Provide PCM or float WAV data (8, 16, 24 or 32 bit)"
            }
            ErrorCode::InvalidPayload => {
                "Check the payload fields against the task type (e.g. 'normalize-audio' \
                 requires 'channelData')"
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for daemon operations.
#[derive(Debug)]
pub struct DaemonError {
    /// The error code identifying the type of error.
    pub code: ErrorCode,
    /// Human-readable error message with context.
    pub message: String,
    /// Optional underlying cause of the error.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DaemonError {
    /// Creates a new DaemonError with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new DaemonError with an underlying cause.
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a STORAGE_ERROR wrapping an I/O failure.
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        let context = context.into();
        Self::with_source(
            ErrorCode::StorageError,
            format!("{}: {}", context, source),
            source,
        )
    }

    /// Creates a STORAGE_ERROR for a record that could not be decoded.
    pub fn corrupt_record(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::StorageError,
            format!("Corrupt cache record: {}", reason.into()),
        )
    }

    /// Creates a TASK_TIMEOUT error.
    pub fn task_timeout(task_id: impl fmt::Display, timeout_ms: u64) -> Self {
        Self::new(
            ErrorCode::TaskTimeout,
            format!("Task {} timed out after {} ms", task_id, timeout_ms),
        )
    }

    /// Creates a TASK_EXECUTION_FAILED error.
    pub fn task_failed(task_id: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::TaskExecutionFailed,
            format!("Task {} failed: {}", task_id, reason.into()),
        )
    }

    /// Creates a WORKER_FAULT error.
    pub fn worker_fault(worker_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::WorkerFault,
            format!("Worker {} crashed", worker_id),
        )
    }

    /// Creates a TASK_CANCELLED error.
    pub fn cancelled(task_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::TaskCancelled,
            format!("Task {} was cancelled", task_id),
        )
    }

    /// Creates a QUEUE_CLEARED error.
    pub fn queue_cleared(task_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::QueueCleared,
            format!("Task {} was removed from the queue", task_id),
        )
    }

    /// Creates a POOL_SHUTDOWN error.
    pub fn pool_shutdown() -> Self {
        Self::new(ErrorCode::PoolShutdown, "Worker pool is shut down")
    }

    /// Creates an INVALID_AUDIO error.
    pub fn invalid_audio(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InvalidAudio,
            format!("Invalid audio: {}", reason.into()),
        )
    }

    /// Creates an INVALID_PAYLOAD error.
    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InvalidPayload,
            format!("Invalid payload: {}", reason.into()),
        )
    }
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}. Recovery: {}",
            self.code,
            self.message,
            self.code.recovery_hint()
        )
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Result type alias using DaemonError.
pub type Result<T> = std::result::Result<T, DaemonError>;
