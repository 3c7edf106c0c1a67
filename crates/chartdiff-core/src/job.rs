//! Deferred diff jobs.
//!
//! A [`DiffJob`] carries only ids and directory names so a host scheduler
//! can persist it. [`DiffJobRunner`] re-fetches the pull request when the
//! job runs, publishes under a per-key lock and posts the diff link.

use std::collections::BTreeSet;
use std::sync::Arc;

use chartdiff_state::{Permission, PullRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ChartDiffError, Result};
use crate::obs;
use crate::principal::with_elevated_principal;
use crate::publisher::DiffPublisher;
use crate::render::RenderStrategy;
use crate::services::HostServices;
use crate::singleflight::KeyedLocks;

/// Lock key: repository id, pull request id, tool.
pub type JobKey = (u64, u64, String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffJob {
    pub id: Uuid,
    pub repository_id: u64,
    pub pull_request_id: u64,
    pub tool: String,
    pub directories: BTreeSet<String>,
    pub scheduled_at: DateTime<Utc>,
}

impl DiffJob {
    pub fn new(pull_request: &PullRequest, tool: &str, directories: BTreeSet<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            repository_id: pull_request.repository().id,
            pull_request_id: pull_request.id,
            tool: tool.to_string(),
            directories,
            scheduled_at: Utc::now(),
        }
    }

    pub fn key(&self) -> JobKey {
        (self.repository_id, self.pull_request_id, self.tool.clone())
    }
}

/// What a job run ended with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The pull request disappeared before or during the run.
    PullRequestGone,
    /// Fewer than two revisions; no comment posted.
    NoDiff { revisions: Vec<String> },
    /// A diff link was posted.
    Commented { revisions: Vec<String> },
}

pub struct DiffJobRunner {
    services: HostServices,
    publisher: DiffPublisher,
    strategies: Vec<Arc<dyn RenderStrategy>>,
    locks: KeyedLocks<JobKey>,
}

impl DiffJobRunner {
    pub fn new(
        services: HostServices,
        publisher: DiffPublisher,
        strategies: Vec<Arc<dyn RenderStrategy>>,
    ) -> Self {
        Self {
            services,
            publisher,
            strategies,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn run(&self, job: &DiffJob) -> Result<JobOutcome> {
        let strategy = self
            .strategies
            .iter()
            .find(|s| s.tool_name() == job.tool)
            .ok_or_else(|| ChartDiffError::UnknownTool(job.tool.clone()))?;

        let Some(pull_request) = self.fetch(job.repository_id, job.pull_request_id).await? else {
            obs::emit_pull_request_gone(job.repository_id, job.pull_request_id);
            return Ok(JobOutcome::PullRequestGone);
        };

        let _guard = self.locks.lock(job.key()).await;
        debug!(job = %job.id, tool = %job.tool, "running diff job");
        let revisions = self
            .publisher
            .add_templated_commits(&pull_request, strategy.as_ref(), &job.directories)
            .await;
        if revisions.len() < 2 {
            return Ok(JobOutcome::NoDiff { revisions });
        }

        // Rendering can take minutes; commenting on a deleted pull request must not happen.
        if self
            .fetch(job.repository_id, job.pull_request_id)
            .await?
            .is_none()
        {
            obs::emit_pull_request_gone(job.repository_id, job.pull_request_id);
            return Ok(JobOutcome::PullRequestGone);
        }

        let url = self
            .services
            .links
            .commit_diff_url(&pull_request, &revisions[0], &revisions[1]);
        let text = format!(
            "{} template diff generated ([view changes]({url}))",
            strategy.display_name()
        );
        with_elevated_principal(
            self.services.principal.as_ref(),
            "add pr comment",
            Permission::RepoRead,
            async {
                self.services
                    .comments
                    .add_comment(&pull_request, &text)
                    .await?;
                Ok(())
            },
        )
        .await?;
        info!(event = "comment.posted", pr = pull_request.id, tool = %job.tool);
        Ok(JobOutcome::Commented { revisions })
    }

    async fn fetch(&self, repository_id: u64, pull_request_id: u64) -> Result<Option<PullRequest>> {
        with_elevated_principal(
            self.services.principal.as_ref(),
            "get pr",
            Permission::RepoRead,
            async {
                Ok(self
                    .services
                    .pull_requests
                    .get(repository_id, pull_request_id)
                    .await?)
            },
        )
        .await
    }
}
