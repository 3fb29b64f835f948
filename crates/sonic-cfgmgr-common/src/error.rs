//! Error types for cfgmgr operations.
//!
//! Errors raised while programming the Linux network stack: spawn failures,
//! non-zero exits, and lookups of interfaces the manager does not know.

use std::io;
use thiserror::Error;

/// Result type alias for cfgmgr operations.
pub type CfgMgrResult<T> = Result<T, CfgMgrError>;

/// Errors that can occur during cfgmgr operations.
#[derive(Debug, Error)]
pub enum CfgMgrError {
    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Port/interface not found or not ready.
    #[error("Port '{port}' not found or not ready")]
    PortNotReady {
        /// The port alias or interface index.
        port: String,
    },

    /// Table entry not found.
    #[error("Table entry not found: {table}:{key}")]
    EntryNotFound {
        /// The table name (e.g., "PORT", "BOND").
        table: String,
        /// The key.
        key: String,
    },

    /// Interface name or index is already registered.
    #[error("Interface '{name}' is already registered")]
    AlreadyRegistered {
        /// The interface name.
        name: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl CfgMgrError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a port not ready error.
    pub fn port_not_ready(port: impl Into<String>) -> Self {
        Self::PortNotReady { port: port.into() }
    }

    /// Creates an entry not found error.
    pub fn entry_not_found(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self::EntryNotFound {
            table: table.into(),
            key: key.into(),
        }
    }

    /// Creates an already registered error.
    pub fn already_registered(name: impl Into<String>) -> Self {
        Self::AlreadyRegistered { name: name.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CfgMgrError::PortNotReady { .. }
                | CfgMgrError::ShellCommandFailed { .. }
        )
    }
}
