//! Error types for ifsyncd operations.
//!
//! The variants follow the failure taxonomy of the reconciliation path:
//! a source that cannot be reached (kernel channel, datastore, persistent
//! store), a write that was rejected, and a probe that could not run.
//! A missing value is never an error; callers model it as `Option::None`.

use std::io;
use thiserror::Error;

/// Result type alias for ifsyncd operations.
pub type IfsyncResult<T> = Result<T, IfsyncError>;

/// Errors that can occur while reconciling interface configuration.
#[derive(Debug, Error)]
pub enum IfsyncError {
    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Management datastore operation failed.
    #[error("Datastore operation failed: {operation}: {message}")]
    Datastore {
        /// The operation that failed (e.g., "get_item", "set_item", "commit").
        operation: String,
        /// Error message.
        message: String,
    },

    /// Persistent configuration store operation failed.
    #[error("Config store operation failed on package '{package}': {operation}: {message}")]
    Store {
        /// The UCI package involved.
        package: String,
        /// The operation that failed (e.g., "load", "set", "save").
        operation: String,
        /// Error message.
        message: String,
    },

    /// Netlink socket operation failed.
    #[error("Netlink operation failed: {operation}: {message}")]
    Netlink {
        /// The operation that failed.
        operation: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// An interface with this name is already registered.
    #[error("Interface '{name}' is already registered")]
    DuplicateInterface {
        /// The interface name.
        name: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl IfsyncError {
    /// Creates a datastore error.
    pub fn datastore(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Datastore {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a persistent store error.
    pub fn store(
        package: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Store {
            package: package.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a netlink error.
    pub fn netlink(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Netlink {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a duplicate interface error.
    pub fn duplicate_interface(name: impl Into<String>) -> Self {
        Self::DuplicateInterface { name: name.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error means a whole source (kernel channel,
    /// datastore, persistent store) could not be reached, as opposed to a
    /// single rejected write.
    pub fn is_source_unavailable(&self) -> bool {
        match self {
            IfsyncError::Netlink { .. } => true,
            IfsyncError::Datastore { operation, .. } => operation == "connect",
            IfsyncError::Store { operation, .. } => operation == "load",
            _ => false,
        }
    }
}
