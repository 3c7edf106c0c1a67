//! Error types for chartdiff-state

use thiserror::Error;

/// Errors reported by host collaborators (tree reader, working tree, ref
/// commands, pull-request and comment services).
#[derive(Error, Debug)]
pub enum HostError {
    /// A revision, object or path could not be resolved
    #[error("not found: {what}")]
    NotFound { what: String },

    /// A version-control command failed
    #[error("command `{command}` failed: {detail}")]
    Command { command: String, detail: String },

    /// Ref name rejected by the host
    #[error("invalid ref name: {name}")]
    InvalidRef { name: String },

    /// Working tree is in a state that does not allow the operation
    #[error("working tree error: {0}")]
    WorkingTree(String),

    /// Principal is not allowed to perform an operation
    #[error("permission {permission} denied for {reason}")]
    PermissionDenied { permission: String, reason: String },

    /// Underlying I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    pub fn not_found(what: impl Into<String>) -> Self {
        HostError::NotFound { what: what.into() }
    }

    pub fn command(command: impl Into<String>, detail: impl Into<String>) -> Self {
        HostError::Command {
            command: command.into(),
            detail: detail.into(),
        }
    }
}
