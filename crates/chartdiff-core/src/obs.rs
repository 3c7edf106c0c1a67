//! Structured observability hooks for the publish lifecycle.
//!
//! This module provides:
//! - Publish-scoped tracing spans via [`publish_span`], with a
//!   [`render_span`] per chart root variant inside it
//! - Emission functions for key lifecycle events: publish start/finish,
//!   render failures, ref removal, skipped jobs
//!
//! Events are emitted at `info!` level, failures at `warn!`.

use tracing::{info, warn};

/// Span for one publish.
///
/// Everything logged inside it carries `pr`, `repository` and `tool`. Attach
/// it with `Instrument::instrument` so it follows the future across threads.
pub fn publish_span(repository_id: u64, pull_request_id: u64, tool: &str) -> tracing::Span {
    tracing::info_span!(
        "chartdiff.publish",
        repository = repository_id,
        pr = pull_request_id,
        tool = %tool,
    )
}

/// Span for one variant of one chart root, nested in the publish span.
pub fn render_span(tool: &str, root: &str, variant: Option<&str>) -> tracing::Span {
    tracing::debug_span!(
        "chartdiff.render",
        tool = %tool,
        root = %root,
        variant = %variant.unwrap_or(crate::layout::DEFAULT_VARIANT),
    )
}

/// Emit event: publish started for a set of chart roots.
pub fn emit_publish_started(tool: &str, pull_request_id: u64, roots: usize) {
    info!(event = "publish.started", tool = %tool, pr = pull_request_id, roots = roots);
}

/// Emit event: publish finished with the number of revisions returned.
pub fn emit_publish_finished(tool: &str, pull_request_id: u64, revisions: usize, duration_ms: u64) {
    info!(
        event = "publish.finished",
        tool = %tool,
        pr = pull_request_id,
        revisions = revisions,
        duration_ms = duration_ms,
    );
}

/// Emit event: publish aborted by an infrastructure failure.
pub fn emit_publish_failed(tool: &str, pull_request_id: u64, error: &dyn std::fmt::Display) {
    warn!(
        event = "publish.failed",
        tool = %tool,
        pr = pull_request_id,
        error = %error,
        "Failed to add {tool} templated files"
    );
}

/// Emit event: one render variant failed and was written as diagnostic content.
pub fn emit_render_failed(tool: &str, target: &str, timed_out: bool) {
    warn!(event = "render.failed", tool = %tool, target = %target, timed_out = timed_out);
}

/// Emit event: synthetic ref removed.
pub fn emit_ref_removed(ref_name: &str) {
    info!(event = "ref.removed", ref_name = %ref_name);
}

/// Emit event: a job was skipped because its pull request is gone.
pub fn emit_pull_request_gone(repository_id: u64, pull_request_id: u64) {
    warn!(
        event = "job.skipped",
        repository = repository_id,
        pr = pull_request_id,
        "pull request {pull_request_id} for repository {repository_id} no longer exists"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_publish_span_create() {
        let _span = publish_span(1, 2, "helm").entered();
        emit_publish_started("helm", 2, 1);
        emit_render_failed("helm", "app/default.yaml", false);
    }

    #[test]
    #[traced_test]
    fn render_span_names_the_default_variant() {
        let span = render_span("helmfile", "deploy", None);
        let _entered = span.enter();
        emit_render_failed("helmfile", "deploy/default.yaml", true);
        assert!(logs_contain("variant=default"));
        assert!(logs_contain("render.failed"));
    }
}
