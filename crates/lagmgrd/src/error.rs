//! Error types for lagmgrd

use sonic_cfgmgr_common::CfgMgrError;
use sonic_orch_common::TaskError;
use sonic_sai::SaiError;
use thiserror::Error;

/// LAG manager errors
#[derive(Error, Debug)]
pub enum LagError {
    /// Referenced group or member is absent
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// Duplicate creation
    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: &'static str, key: String },

    /// Hardware aggregation call failed
    #[error("Hardware {operation} failed: {source}")]
    Hardware {
        operation: &'static str,
        #[source]
        source: SaiError,
    },

    /// Kernel/OS interface call failed
    #[error("Kernel {operation} failed: {source}")]
    Kernel {
        operation: &'static str,
        #[source]
        source: CfgMgrError,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation would break a registry invariant
    #[error("Inconsistent LAG state: {0}")]
    Inconsistent(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Kernel link notification socket failure
    #[error("Netlink error: {0}")]
    Netlink(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LagError {
    pub fn group_not_found(key: impl ToString) -> Self {
        LagError::NotFound {
            kind: "LAG",
            key: key.to_string(),
        }
    }

    pub fn member_not_found(key: impl ToString) -> Self {
        LagError::NotFound {
            kind: "LAG member",
            key: key.to_string(),
        }
    }

    pub fn group_exists(key: impl ToString) -> Self {
        LagError::AlreadyExists {
            kind: "LAG",
            key: key.to_string(),
        }
    }

    pub fn member_exists(key: impl ToString) -> Self {
        LagError::AlreadyExists {
            kind: "LAG member",
            key: key.to_string(),
        }
    }

    pub fn hardware(operation: &'static str, source: SaiError) -> Self {
        LagError::Hardware { operation, source }
    }

    pub fn kernel(operation: &'static str, source: CfgMgrError) -> Self {
        LagError::Kernel { operation, source }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        LagError::InvalidArgument(message.into())
    }

    pub fn inconsistent(message: impl Into<String>) -> Self {
        LagError::Inconsistent(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LagError::NotFound { .. })
    }
}

impl From<LagError> for TaskError {
    fn from(err: LagError) -> Self {
        match &err {
            LagError::InvalidArgument(_) | LagError::Config(_) => {
                TaskError::invalid_entry(err.to_string())
            }
            LagError::Kernel { source, .. } if source.is_retryable() => {
                TaskError::need_retry(err.to_string())
            }
            LagError::NotFound { .. } => TaskError::need_retry(err.to_string()),
            _ => TaskError::failed(err.to_string()),
        }
    }
}

/// Result type for lagmgrd operations
pub type Result<T> = std::result::Result<T, LagError>;
