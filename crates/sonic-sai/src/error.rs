//! SAI error types and status handling.
//!
//! Hardware calls made on behalf of the LAG manager report `sai_status_t`
//! codes; this module turns them into `SaiResult` values.

use std::fmt;
use thiserror::Error;

/// SAI status codes returned by the LAG, LAG member and port APIs.
///
/// Values match `sai_status_t` in the SAI headers.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaiStatus {
    Success = 0,
    Failure = -1,
    NotSupported = -2,
    NoMemory = -3,
    InsufficientResources = -4,
    InvalidParameter = -5,
    ItemAlreadyExists = -6,
    ItemNotFound = -7,
    InvalidPortNumber = -9,
    InvalidPortMember = -10,
    Uninitialized = -12,
    TableFull = -13,
    ObjectInUse = -17,
    InvalidObjectId = -19,
    NotExecuted = -23,
}

impl SaiStatus {
    /// Creates a SaiStatus from a raw i32 value.
    ///
    /// Codes outside the LAG-relevant subset collapse to `Failure`.
    pub fn from_raw(status: i32) -> Self {
        match status {
            0 => SaiStatus::Success,
            -2 => SaiStatus::NotSupported,
            -3 => SaiStatus::NoMemory,
            -4 => SaiStatus::InsufficientResources,
            -5 => SaiStatus::InvalidParameter,
            -6 => SaiStatus::ItemAlreadyExists,
            -7 => SaiStatus::ItemNotFound,
            -9 => SaiStatus::InvalidPortNumber,
            -10 => SaiStatus::InvalidPortMember,
            -12 => SaiStatus::Uninitialized,
            -13 => SaiStatus::TableFull,
            -17 => SaiStatus::ObjectInUse,
            -19 => SaiStatus::InvalidObjectId,
            -23 => SaiStatus::NotExecuted,
            _ => SaiStatus::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == SaiStatus::Success
    }

    /// Converts to a Result, returning Ok(()) for success.
    pub fn into_result(self) -> SaiResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(SaiError::from_status(self))
        }
    }
}

impl fmt::Display for SaiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SaiStatus::Success => "SAI_STATUS_SUCCESS",
            SaiStatus::Failure => "SAI_STATUS_FAILURE",
            SaiStatus::NotSupported => "SAI_STATUS_NOT_SUPPORTED",
            SaiStatus::NoMemory => "SAI_STATUS_NO_MEMORY",
            SaiStatus::InsufficientResources => "SAI_STATUS_INSUFFICIENT_RESOURCES",
            SaiStatus::InvalidParameter => "SAI_STATUS_INVALID_PARAMETER",
            SaiStatus::ItemAlreadyExists => "SAI_STATUS_ITEM_ALREADY_EXISTS",
            SaiStatus::ItemNotFound => "SAI_STATUS_ITEM_NOT_FOUND",
            SaiStatus::InvalidPortNumber => "SAI_STATUS_INVALID_PORT_NUMBER",
            SaiStatus::InvalidPortMember => "SAI_STATUS_INVALID_PORT_MEMBER",
            SaiStatus::Uninitialized => "SAI_STATUS_UNINITIALIZED",
            SaiStatus::TableFull => "SAI_STATUS_TABLE_FULL",
            SaiStatus::ObjectInUse => "SAI_STATUS_OBJECT_IN_USE",
            SaiStatus::InvalidObjectId => "SAI_STATUS_INVALID_OBJECT_ID",
            SaiStatus::NotExecuted => "SAI_STATUS_NOT_EXECUTED",
        };
        write!(f, "{}", s)
    }
}

/// Error type for SAI operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaiError {
    /// SAI API returned an error status.
    #[error("SAI operation failed: {status}")]
    Status { status: SaiStatus },

    #[error("Feature not supported: {feature}")]
    NotSupported { feature: String },

    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    #[error("Item not found: {item}")]
    NotFound { item: String },

    #[error("Item already exists: {item}")]
    AlreadyExists { item: String },

    /// No more aggregates or members can be allocated.
    #[error("Table full: {table}")]
    TableFull { table: String },

    /// Object is in use and cannot be removed.
    #[error("Object in use: {object}")]
    ObjectInUse { object: String },
}

impl SaiError {
    /// Creates an error from a SAI status code.
    pub fn from_status(status: SaiStatus) -> Self {
        match status {
            SaiStatus::NotSupported => SaiError::NotSupported {
                feature: "unknown".to_string(),
            },
            SaiStatus::InvalidParameter
            | SaiStatus::InvalidPortNumber
            | SaiStatus::InvalidPortMember
            | SaiStatus::InvalidObjectId => SaiError::InvalidParameter {
                message: format!("SAI returned {}", status),
            },
            SaiStatus::ItemNotFound => SaiError::NotFound {
                item: "unknown".to_string(),
            },
            SaiStatus::ItemAlreadyExists => SaiError::AlreadyExists {
                item: "unknown".to_string(),
            },
            SaiStatus::TableFull => SaiError::TableFull {
                table: "unknown".to_string(),
            },
            SaiStatus::ObjectInUse => SaiError::ObjectInUse {
                object: "unknown".to_string(),
            },
            _ => SaiError::Status { status },
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        SaiError::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn not_found(item: impl Into<String>) -> Self {
        SaiError::NotFound { item: item.into() }
    }

    pub fn already_exists(item: impl Into<String>) -> Self {
        SaiError::AlreadyExists { item: item.into() }
    }

    pub fn table_full(table: impl Into<String>) -> Self {
        SaiError::TableFull {
            table: table.into(),
        }
    }

    pub fn object_in_use(object: impl Into<String>) -> Self {
        SaiError::ObjectInUse {
            object: object.into(),
        }
    }

    /// Returns the underlying SAI status if this is a Status error.
    pub fn status(&self) -> Option<SaiStatus> {
        match self {
            SaiError::Status { status } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for SAI operations.
pub type SaiResult<T> = Result<T, SaiError>;
