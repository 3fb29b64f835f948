//! Task processing status and result types.

use thiserror::Error;

/// Result of processing a single table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Success,
    /// The entry is malformed and will never succeed as written.
    InvalidEntry,
    /// Programming failed.
    Failed,
    /// A dependency is missing; the entry may succeed later.
    NeedRetry,
    /// Nothing to do for this entry.
    Ignore,
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Ignore)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskStatus::NeedRetry)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TaskStatus::InvalidEntry | TaskStatus::Failed)
    }
}

/// Error type for task processing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Invalid entry: {message}")]
    InvalidEntry { message: String },

    #[error("Task failed: {message}")]
    Failed { message: String },

    #[error("Retry needed: {reason}")]
    NeedRetry { reason: String },

    #[error("Ignored: {reason}")]
    Ignored { reason: String },
}

impl TaskError {
    pub fn invalid_entry(message: impl Into<String>) -> Self {
        TaskError::InvalidEntry {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed {
            message: message.into(),
        }
    }

    pub fn need_retry(reason: impl Into<String>) -> Self {
        TaskError::NeedRetry {
            reason: reason.into(),
        }
    }

    pub fn ignored(reason: impl Into<String>) -> Self {
        TaskError::Ignored {
            reason: reason.into(),
        }
    }

    pub fn to_status(&self) -> TaskStatus {
        match self {
            TaskError::InvalidEntry { .. } => TaskStatus::InvalidEntry,
            TaskError::Failed { .. } => TaskStatus::Failed,
            TaskError::NeedRetry { .. } => TaskStatus::NeedRetry,
            TaskError::Ignored { .. } => TaskStatus::Ignore,
        }
    }
}

/// Result type for task processing.
pub type TaskResult<T> = Result<T, TaskError>;

/// Extension trait for converting TaskResult to TaskStatus.
pub trait TaskResultExt {
    fn to_status(&self) -> TaskStatus;
}

impl<T> TaskResultExt for TaskResult<T> {
    fn to_status(&self) -> TaskStatus {
        match self {
            Ok(_) => TaskStatus::Success,
            Err(e) => e.to_status(),
        }
    }
}
