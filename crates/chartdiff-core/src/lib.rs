//! chartdiff core library
//!
//! Detects Helm and Helmfile roots touched by a pull request, renders them
//! at both sides of the pull request and publishes the rendered output as a
//! two-commit synthetic ref (`refs/pull-requests/<id>/<tool>`) whose diff
//! is linked back into the pull request.

pub mod classifier;
pub mod config;
mod error;
pub mod events;
pub mod fetch;
pub mod git_cli;
pub mod job;
pub mod layout;
pub mod lifecycle;
pub mod obs;
pub mod orchestrator;
pub mod output;
pub mod principal;
pub mod publisher;
pub mod render;
pub mod service;
pub mod services;
pub mod singleflight;
pub mod telemetry;

pub use classifier::{affected_directories, candidate_directories, classify, ChartRoot};
pub use config::{
    probe_versions, Binaries, BinaryVersions, DeploymentConfig, RepositorySettings, ScopedConfig,
    SettingKey, TemplateMode,
};
pub use error::{ChartDiffError, Result};
pub use events::{EventDispatcher, PullRequestEvent};
pub use git_cli::GitCliHost;
pub use job::{DiffJob, DiffJobRunner, JobKey, JobOutcome};
pub use lifecycle::{synthetic_ref_name, RefLifecycle};
pub use orchestrator::TemplateOrchestrator;
pub use output::OutputWriter;
pub use principal::with_elevated_principal;
pub use publisher::{DiffPublisher, PublishRun, PublishState};
pub use render::{
    strategies, strategy_for, HelmStrategy, HelmfileStrategy, RenderContext, RenderResult,
    RenderStrategy,
};
pub use service::ChartDiffService;
pub use services::{HostServices, MemoryHost};
pub use singleflight::KeyedLocks;
pub use telemetry::init_tracing;

/// chartdiff version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
