//! Pull-request event dispatch.

use std::sync::Arc;

use chartdiff_state::PullRequest;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classifier::affected_directories;
use crate::error::{ChartDiffError, Result};
use crate::job::DiffJob;
use crate::lifecycle::RefLifecycle;
use crate::render::RenderStrategy;
use crate::services::HostServices;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "pull_request", rename_all = "snake_case")]
pub enum PullRequestEvent {
    Opened(PullRequest),
    Rescoped(PullRequest),
    Deleted(PullRequest),
    Merged(PullRequest),
    Declined(PullRequest),
}

impl PullRequestEvent {
    pub fn pull_request(&self) -> &PullRequest {
        match self {
            PullRequestEvent::Opened(pr)
            | PullRequestEvent::Rescoped(pr)
            | PullRequestEvent::Deleted(pr)
            | PullRequestEvent::Merged(pr)
            | PullRequestEvent::Declined(pr) => pr,
        }
    }

    /// Deleted, merged or declined.
    pub fn closes(&self) -> bool {
        matches!(
            self,
            PullRequestEvent::Deleted(_) | PullRequestEvent::Merged(_) | PullRequestEvent::Declined(_)
        )
    }
}

/// Turns pull-request events into diff jobs or ref removals.
#[derive(Clone)]
pub struct EventDispatcher {
    services: HostServices,
    strategies: Vec<Arc<dyn RenderStrategy>>,
    lifecycle: RefLifecycle,
}

impl EventDispatcher {
    pub fn new(services: HostServices, strategies: Vec<Arc<dyn RenderStrategy>>) -> Self {
        let lifecycle = RefLifecycle::new(Arc::clone(&services.refs));
        Self {
            services,
            strategies,
            lifecycle,
        }
    }

    /// Jobs to schedule for `event`; always empty for close events.
    pub async fn handle(&self, event: &PullRequestEvent) -> Result<Vec<DiffJob>> {
        let pull_request = event.pull_request();
        if event.closes() {
            self.remove_references(pull_request).await;
            return Ok(Vec::new());
        }
        if !self.services.config().is_active(pull_request.repository()) {
            debug!(repository = pull_request.repository().id, "repository inactive, ignoring event");
            return Ok(Vec::new());
        }

        let changes = self.services.pull_requests.changes(pull_request).await?;
        let trees = self.services.trees.as_ref();
        let classified = join_all(self.strategies.iter().map(|strategy| {
            let changes = &changes;
            async move {
                let directories = affected_directories(
                    trees,
                    &pull_request.from_ref,
                    changes,
                    strategy.marker_filenames(),
                )
                .await?;
                Ok::<_, ChartDiffError>((strategy.tool_name(), directories))
            }
        }))
        .await;

        let mut jobs = Vec::new();
        for result in classified {
            let (tool, directories) = result?;
            if directories.is_empty() {
                continue;
            }
            debug!(tool = %tool, directories = ?directories, "chart roots detected");
            jobs.push(DiffJob::new(pull_request, tool, directories));
        }
        Ok(jobs)
    }

    async fn remove_references(&self, pull_request: &PullRequest) {
        for strategy in &self.strategies {
            if let Err(e) = self
                .lifecycle
                .remove_reference(pull_request, strategy.as_ref())
                .await
            {
                warn!(
                    pr = pull_request.id,
                    tool = strategy.tool_name(),
                    error = %e,
                    "failed to remove synthetic ref"
                );
            }
        }
    }
}
