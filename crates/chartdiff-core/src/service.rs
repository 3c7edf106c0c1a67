//! Event-to-job wiring with out-of-band execution.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::Result;
use crate::events::{EventDispatcher, PullRequestEvent};
use crate::job::{DiffJob, DiffJobRunner, JobOutcome};
use crate::orchestrator::TemplateOrchestrator;
use crate::publisher::DiffPublisher;
use crate::render::{self, RenderStrategy};
use crate::services::HostServices;

/// Receives pull-request events and runs the resulting jobs on the tokio
/// runtime, off the caller's task.
#[derive(Clone)]
pub struct ChartDiffService {
    dispatcher: EventDispatcher,
    runner: Arc<DiffJobRunner>,
}

impl ChartDiffService {
    /// Service over the built-in strategies.
    pub fn new(services: HostServices, scratch_dir: Option<PathBuf>) -> Self {
        Self::with_strategies(services, scratch_dir, render::strategies())
    }

    pub fn with_strategies(
        services: HostServices,
        scratch_dir: Option<PathBuf>,
        strategies: Vec<Arc<dyn RenderStrategy>>,
    ) -> Self {
        let publisher = DiffPublisher::new(services.clone(), TemplateOrchestrator::new(scratch_dir));
        Self {
            dispatcher: EventDispatcher::new(services.clone(), strategies.clone()),
            runner: Arc::new(DiffJobRunner::new(services, publisher, strategies)),
        }
    }

    pub fn runner(&self) -> Arc<DiffJobRunner> {
        Arc::clone(&self.runner)
    }

    /// Dispatch `event` and spawn one task per resulting job.
    pub async fn handle_event(
        &self,
        event: &PullRequestEvent,
    ) -> Result<Vec<JoinHandle<Result<JobOutcome>>>> {
        let jobs = self.dispatcher.handle(event).await?;
        Ok(jobs.into_iter().map(|job| self.spawn(job)).collect())
    }

    pub fn spawn(&self, job: DiffJob) -> JoinHandle<Result<JobOutcome>> {
        let runner = Arc::clone(&self.runner);
        info!(job = %job.id, tool = %job.tool, pr = job.pull_request_id, "scheduling diff job");
        tokio::spawn(async move {
            let outcome = runner.run(&job).await;
            if let Err(e) = &outcome {
                warn!(job = %job.id, tool = %job.tool, error = %e, "diff job failed");
            }
            outcome
        })
    }
}
