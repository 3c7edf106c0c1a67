//! Error types for chartdiff-exec

use thiserror::Error;

/// Failures to run a process at all. A process that runs and fails is not an
/// error; it is reported through `ExitOutcome`.
#[derive(Error, Debug)]
pub enum ExecError {
    /// Command has no program to run
    #[error("empty command")]
    EmptyCommand,

    /// Program could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting for the process failed
    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for process execution
pub type Result<T> = std::result::Result<T, ExecError>;
