//! Bundle of host collaborators shared by the publisher, job runner and
//! event dispatcher.

use std::sync::Arc;

use chartdiff_state::fakes::{
    MemoryPullRequestService, MemoryRepositoryHost, MemorySettingsStore, RecordingCommentService,
    RecordingPrincipal, StaticLinkBuilder,
};
use chartdiff_state::{
    CommentService, DiffLinkBuilder, ElevatedPrincipal, PullRequestService, RefCommands,
    RefTreeReader, SettingsStore, WorkingTreeProvider,
};

use crate::config::ScopedConfig;

#[derive(Clone)]
pub struct HostServices {
    pub trees: Arc<dyn RefTreeReader>,
    pub working_trees: Arc<dyn WorkingTreeProvider>,
    pub refs: Arc<dyn RefCommands>,
    pub pull_requests: Arc<dyn PullRequestService>,
    pub comments: Arc<dyn CommentService>,
    pub links: Arc<dyn DiffLinkBuilder>,
    pub principal: Arc<dyn ElevatedPrincipal>,
    pub settings: Arc<dyn SettingsStore>,
}

impl HostServices {
    pub fn config(&self) -> ScopedConfig {
        ScopedConfig::new(Arc::clone(&self.settings))
    }
}

/// Handles onto the in-memory fakes behind a [`HostServices`].
#[derive(Clone)]
pub struct MemoryHost {
    pub repositories: Arc<MemoryRepositoryHost>,
    pub pull_requests: Arc<MemoryPullRequestService>,
    pub comments: Arc<RecordingCommentService>,
    pub principal: Arc<RecordingPrincipal>,
    pub settings: Arc<MemorySettingsStore>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self {
            repositories: Arc::new(MemoryRepositoryHost::new()),
            pull_requests: Arc::new(MemoryPullRequestService::new()),
            comments: Arc::new(RecordingCommentService::new()),
            principal: Arc::new(RecordingPrincipal::new("chartdiff")),
            settings: Arc::new(MemorySettingsStore::new()),
        }
    }

    pub fn services(&self, link_base: &str) -> HostServices {
        HostServices {
            trees: self.repositories.clone(),
            working_trees: self.repositories.clone(),
            refs: self.repositories.clone(),
            pull_requests: self.pull_requests.clone(),
            comments: self.comments.clone(),
            links: Arc::new(StaticLinkBuilder::new(link_base)),
            principal: self.principal.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}
