//! Synthetic ref naming and removal.

use std::sync::Arc;

use chartdiff_state::{PullRequest, RefCommands, Repository};

use crate::error::Result;
use crate::obs;
use crate::render::RenderStrategy;

/// `refs/pull-requests/<id>/<tool>`
pub fn synthetic_ref_name(pull_request_id: u64, tool: &str) -> String {
    format!("refs/pull-requests/{pull_request_id}/{tool}")
}

/// Deletes synthetic refs when a pull request closes.
#[derive(Clone)]
pub struct RefLifecycle {
    refs: Arc<dyn RefCommands>,
}

impl RefLifecycle {
    pub fn new(refs: Arc<dyn RefCommands>) -> Self {
        Self { refs }
    }

    /// Delete the strategy's ref for `pull_request`. Missing refs are fine.
    pub async fn remove_reference(
        &self,
        pull_request: &PullRequest,
        strategy: &dyn RenderStrategy,
    ) -> Result<()> {
        self.remove(pull_request.repository(), pull_request.id, strategy.tool_name())
            .await?;
        Ok(())
    }

    /// Delete `refs/pull-requests/<pull_request_id>/<tool>` by id, returning
    /// the ref name.
    pub async fn remove(
        &self,
        repository: &Repository,
        pull_request_id: u64,
        tool: &str,
    ) -> Result<String> {
        let name = synthetic_ref_name(pull_request_id, tool);
        self.refs.delete_ref(repository, &name).await?;
        obs::emit_ref_removed(&name);
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartdiff_state::fakes::MemoryRepositoryHost;
    use tracing_test::traced_test;

    #[test]
    fn ref_name_is_namespaced_per_pr_and_tool() {
        assert_eq!(synthetic_ref_name(42, "helm"), "refs/pull-requests/42/helm");
        assert_eq!(synthetic_ref_name(7, "helmfile"), "refs/pull-requests/7/helmfile");
    }

    #[tokio::test]
    #[traced_test]
    async fn remove_by_id_deletes_only_that_tool_and_is_idempotent() {
        let host = Arc::new(MemoryRepositoryHost::new());
        let repo = Repository::new(1, 1, "charts");
        let commit = host.add_commit(&repo, None, &[("a.yaml", "a")]);
        host.set_branch(&repo, "refs/pull-requests/3/helm", &commit);
        host.set_branch(&repo, "refs/pull-requests/3/helmfile", &commit);
        let lifecycle = RefLifecycle::new(host.clone());

        let name = lifecycle.remove(&repo, 3, "helm").await.unwrap();
        lifecycle.remove(&repo, 3, "helm").await.unwrap();

        assert_eq!(name, "refs/pull-requests/3/helm");
        assert_eq!(host.ref_names(&repo), vec!["refs/pull-requests/3/helmfile"]);
        assert!(logs_contain("ref.removed"));
    }
}
