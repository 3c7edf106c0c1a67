//! Error taxonomy for chartdiff-core.
//!
//! Render failures of the external tools are not errors: they are captured
//! as [`crate::render::RenderResult::Failed`] and written into the diff.
//! Everything here is an infrastructure failure that aborts a publish.

use chartdiff_exec::ExecError;
use chartdiff_state::HostError;

/// Core errors.
#[derive(Debug, thiserror::Error)]
pub enum ChartDiffError {
    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error("exec error: {0}")]
    Exec(#[from] ExecError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("{mode} output cannot hold a {result} result")]
    ResultMismatch {
        mode: &'static str,
        result: &'static str,
    },
}

impl From<tokio::task::JoinError> for ChartDiffError {
    fn from(err: tokio::task::JoinError) -> Self {
        ChartDiffError::Task(err.to_string())
    }
}

/// Result type for chartdiff-core operations.
pub type Result<T> = std::result::Result<T, ChartDiffError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChartDiffError::UnknownTool("kustomize".to_string());
        assert!(err.to_string().contains("unknown tool"));

        let err: ChartDiffError = HostError::not_found("refs/heads/main").into();
        assert!(err.to_string().contains("host error"));
        assert!(err.to_string().contains("refs/heads/main"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "scratch");
        let err: ChartDiffError = io.into();
        assert!(matches!(err, ChartDiffError::Io(_)));
    }
}
