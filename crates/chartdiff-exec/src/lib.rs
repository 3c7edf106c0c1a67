//! chartdiff-exec: external process execution for chartdiff
//!
//! Runs rendering tools (`helm`, `helmfile`, …) with environment overrides
//! and a hard, deployment-wide timeout. Distinguishes normal exit, non-zero
//! exit and timeout, and keeps whatever stderr was captured before a kill.

pub mod command;
mod error;
pub mod runner;

pub use command::CommandSpec;
pub use error::{ExecError, Result};
pub use runner::{ExitOutcome, ProcessOutput, ProcessRunner};
