//! Two-snapshot publishing of rendered output.
//!
//! A publish renders the destination ref, commits, clears the tree, renders
//! the source ref, commits again, then publishes the history under
//! `refs/heads/<synthetic ref>` and moves it to the synthetic ref itself.
//! The steps are an explicit state machine ([`PublishState`]) driven by
//! [`PublishRun::step`], so each transition can be observed and tested.

use std::collections::BTreeSet;
use std::time::Instant;

use chartdiff_exec::ProcessRunner;
use chartdiff_state::{HookPolicy, PullRequest, RepositoryRef, WorkingTree};
use tracing::{debug, warn, Instrument};

use crate::error::{ChartDiffError, Result};
use crate::fetch::materialize_root;
use crate::lifecycle::synthetic_ref_name;
use crate::obs;
use crate::orchestrator::TemplateOrchestrator;
use crate::output::OutputWriter;
use crate::render::{RenderContext, RenderStrategy};
use crate::services::HostServices;

/// Number of revisions handed back for diffing.
const DIFF_DEPTH: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishState {
    Idle,
    RenderingToRef,
    RenderingFromRef,
    Publishing,
    Renaming,
    /// Newest first; fewer than two means there is nothing to diff.
    Done { revisions: Vec<String> },
    Failed { error: String },
}

impl PublishState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PublishState::Done { .. } | PublishState::Failed { .. })
    }
}

/// Renders pull requests and publishes the result as a synthetic ref.
#[derive(Clone)]
pub struct DiffPublisher {
    services: HostServices,
    orchestrator: TemplateOrchestrator,
}

impl DiffPublisher {
    pub fn new(services: HostServices, orchestrator: TemplateOrchestrator) -> Self {
        Self {
            services,
            orchestrator,
        }
    }

    /// Begin a publish of `roots` for `pull_request`.
    pub fn start<'a>(
        &'a self,
        pull_request: &'a PullRequest,
        strategy: &'a dyn RenderStrategy,
        roots: &'a BTreeSet<String>,
    ) -> PublishRun<'a> {
        let config = self.services.config();
        let repository = pull_request.repository().clone();
        let ctx = RenderContext {
            settings: config.repository_settings(&repository),
            binaries: config.binaries(),
            runner: ProcessRunner::new(config.execution_timeout()),
            repository,
        };
        PublishRun {
            publisher: self,
            pull_request,
            strategy,
            roots,
            ctx,
            ref_name: synthetic_ref_name(pull_request.id, strategy.tool_name()),
            tree: None,
            state: PublishState::Idle,
        }
    }

    /// Run a publish to completion and return the revisions to diff.
    pub async fn publish(
        &self,
        pull_request: &PullRequest,
        strategy: &dyn RenderStrategy,
        roots: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let mut run = self.start(pull_request, strategy, roots);
        loop {
            if let PublishState::Done { revisions } = run.step().await? {
                return Ok(revisions.clone());
            }
        }
    }

    /// [`publish`](Self::publish), logging infrastructure failures and
    /// reporting them as no revisions.
    pub async fn add_templated_commits(
        &self,
        pull_request: &PullRequest,
        strategy: &dyn RenderStrategy,
        roots: &BTreeSet<String>,
    ) -> Vec<String> {
        let tool = strategy.tool_name();
        let span = obs::publish_span(pull_request.repository().id, pull_request.id, tool);
        let started = Instant::now();
        obs::emit_publish_started(tool, pull_request.id, roots.len());

        match self
            .publish(pull_request, strategy, roots)
            .instrument(span)
            .await
        {
            Ok(revisions) => {
                obs::emit_publish_finished(
                    tool,
                    pull_request.id,
                    revisions.len(),
                    started.elapsed().as_millis() as u64,
                );
                revisions
            }
            Err(e) => {
                obs::emit_publish_failed(tool, pull_request.id, &e);
                Vec::new()
            }
        }
    }
}

/// One in-flight publish. Owns the working tree until it is published or
/// the run is dropped.
pub struct PublishRun<'a> {
    publisher: &'a DiffPublisher,
    pull_request: &'a PullRequest,
    strategy: &'a dyn RenderStrategy,
    roots: &'a BTreeSet<String>,
    ctx: RenderContext,
    ref_name: String,
    tree: Option<Box<dyn WorkingTree>>,
    state: PublishState,
}

impl<'a> PublishRun<'a> {
    pub fn state(&self) -> &PublishState {
        &self.state
    }

    pub fn ref_name(&self) -> &str {
        &self.ref_name
    }

    /// Whether a working tree is currently held.
    pub fn holds_working_tree(&self) -> bool {
        self.tree.is_some()
    }

    /// Perform the next transition. Any error moves the run to
    /// [`PublishState::Failed`] and releases the working tree.
    pub async fn step(&mut self) -> Result<&PublishState> {
        match self.advance().await {
            Ok(next) => {
                debug!(from = ?self.state, to = ?next, "publish transition");
                self.state = next;
                Ok(&self.state)
            }
            Err(e) => {
                self.tree = None;
                self.state = PublishState::Failed {
                    error: e.to_string(),
                };
                Err(e)
            }
        }
    }

    async fn advance(&mut self) -> Result<PublishState> {
        let publisher = self.publisher;
        let pull_request = self.pull_request;
        let services = &publisher.services;
        match self.state.clone() {
            PublishState::Idle => {
                let tree = services
                    .working_trees
                    .acquire(pull_request.repository(), None)
                    .await?;
                self.tree = Some(tree);
                Ok(PublishState::RenderingToRef)
            }
            PublishState::RenderingToRef => {
                self.render_ref(&pull_request.to_ref).await?;
                Ok(PublishState::RenderingFromRef)
            }
            PublishState::RenderingFromRef => {
                self.tree_mut()?.remove_all().await?;
                self.render_ref(&pull_request.from_ref).await?;
                Ok(PublishState::Publishing)
            }
            PublishState::Publishing => {
                let mut tree = self
                    .tree
                    .take()
                    .ok_or_else(|| ChartDiffError::Task("working tree already released".into()))?;
                if tree.head().is_none() {
                    // Nothing rendered on either side; drop a ref left by an earlier run.
                    services
                        .refs
                        .delete_ref(pull_request.repository(), &self.ref_name)
                        .await?;
                    return Ok(PublishState::Done {
                        revisions: Vec::new(),
                    });
                }
                tree.publish(&self.ref_name, HookPolicy::Suppress).await?;
                Ok(PublishState::Renaming)
            }
            PublishState::Renaming => {
                let repository = pull_request.repository();
                let temporary = format!("refs/heads/{}", self.ref_name);
                if let Err(e) = services
                    .refs
                    .set_ref(repository, &self.ref_name, &temporary, false)
                    .await
                {
                    if let Err(cleanup) = services.refs.delete_ref(repository, &temporary).await {
                        warn!(branch = %temporary, error = %cleanup, "failed to remove temporary branch");
                    }
                    return Err(e.into());
                }
                services.refs.delete_ref(repository, &temporary).await?;
                let revisions = services
                    .refs
                    .rev_list(repository, &self.ref_name, DIFF_DEPTH)
                    .await?;
                Ok(PublishState::Done { revisions })
            }
            terminal @ (PublishState::Done { .. } | PublishState::Failed { .. }) => Ok(terminal),
        }
    }

    fn tree_mut(&mut self) -> Result<&mut Box<dyn WorkingTree>> {
        self.tree
            .as_mut()
            .ok_or_else(|| ChartDiffError::Task("no working tree acquired".into()))
    }

    /// Render every root as it exists in `source` and commit if anything
    /// changed.
    async fn render_ref(&mut self, source: &RepositoryRef) -> Result<()> {
        let publisher = self.publisher;
        let services = &publisher.services;
        let orchestrator = &publisher.orchestrator;
        let tool = self.strategy.tool_name();
        let tree = self
            .tree
            .as_mut()
            .ok_or_else(|| ChartDiffError::Task("no working tree acquired".into()))?;

        for root in self.roots {
            let content = orchestrator.scratch("content-")?;
            let files = materialize_root(
                services.trees.as_ref(),
                &source.repository,
                &source.latest_commit,
                root,
                content.path(),
            )
            .await?;
            if files == 0 {
                debug!(root = %root, rev = %source.latest_commit, "chart root absent, skipping");
                continue;
            }
            let mut writer = OutputWriter::new(tree.as_mut(), tool);
            orchestrator
                .render(&self.ctx, self.strategy, content.path(), &mut writer, root)
                .await?;
        }

        let changed = tree.status().await?;
        debug!(rev = %source.latest_commit, changed = changed.len(), "rendered ref");
        if !changed.is_empty() {
            tree.commit(&self.pull_request.author, &format!("{tool} template"))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(PublishState::Done { revisions: vec![] }.is_terminal());
        assert!(PublishState::Failed { error: "x".into() }.is_terminal());
        assert!(!PublishState::Publishing.is_terminal());
    }
}
