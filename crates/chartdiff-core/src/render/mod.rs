//! Render strategies.
//!
//! A [`RenderStrategy`] knows how to recognise its chart roots, which
//! configuration variants a root has, and how to invoke its tool in
//! single-file or directory mode. Tool failures are returned as
//! [`RenderResult::Failed`]; `Err` is reserved for infrastructure problems
//! such as an unwritable cache directory.

mod helm;
mod helmfile;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chartdiff_exec::{CommandSpec, ExitOutcome, ProcessOutput, ProcessRunner};
use chartdiff_state::Repository;

use crate::config::{Binaries, RepositorySettings};
use crate::error::{ChartDiffError, Result};

pub use helm::HelmStrategy;
pub use helmfile::HelmfileStrategy;

/// Everything a strategy needs to know about the repository being rendered.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub repository: Repository,
    pub settings: RepositorySettings,
    pub binaries: Binaries,
    pub runner: ProcessRunner,
}

/// Outcome of one render invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderResult {
    /// Single-file mode: the tool's stdout, verbatim.
    Rendered(String),
    /// Directory mode: output files keyed by slash path relative to the
    /// variant folder.
    RenderedTree(BTreeMap<String, Vec<u8>>),
    /// The tool failed; `diagnostic` is written in place of the output.
    Failed { diagnostic: String, timed_out: bool },
}

impl RenderResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, RenderResult::Failed { .. })
    }
}

/// One rendering tool.
#[async_trait]
pub trait RenderStrategy: Send + Sync {
    /// Short lowercase name used in ref names and job correlation.
    fn tool_name(&self) -> &'static str;

    /// Capitalised name for user-facing text.
    fn display_name(&self) -> &'static str;

    /// Files whose presence marks a directory as a chart root.
    fn marker_filenames(&self) -> &'static [&'static str];

    /// Named variants for the chart root materialised at `root_dir`, in the
    /// order they are rendered. Empty means only the default render runs.
    async fn config_variants(&self, ctx: &RenderContext, root_dir: &Path) -> Result<Vec<String>>;

    async fn render_single_file(
        &self,
        ctx: &RenderContext,
        root_dir: &Path,
        variant: Option<&str>,
        cache_dir: &Path,
    ) -> Result<RenderResult>;

    /// Render into the empty `output_dir` and collect the written files.
    async fn render_to_directory(
        &self,
        ctx: &RenderContext,
        root_dir: &Path,
        variant: Option<&str>,
        output_dir: &Path,
        cache_dir: &Path,
    ) -> Result<RenderResult>;
}

/// All built-in strategies, in registration order.
pub fn strategies() -> Vec<Arc<dyn RenderStrategy>> {
    vec![Arc::new(HelmStrategy), Arc::new(HelmfileStrategy)]
}

/// Look up a built-in strategy by tool name.
pub fn strategy_for(tool: &str) -> Result<Arc<dyn RenderStrategy>> {
    strategies()
        .into_iter()
        .find(|strategy| strategy.tool_name() == tool)
        .ok_or_else(|| ChartDiffError::UnknownTool(tool.to_string()))
}

/// Run `spec`, turning a failure to start the tool into a render failure.
pub(crate) async fn run_tool(
    runner: &ProcessRunner,
    spec: &CommandSpec,
) -> std::result::Result<ProcessOutput, RenderResult> {
    runner.run(spec).await.map_err(|e| RenderResult::Failed {
        diagnostic: format!("{e}\n"),
        timed_out: false,
    })
}

/// Diagnostic text for a failed run: stderr plus a timeout marker.
pub(crate) fn diagnostic(output: &ProcessOutput) -> String {
    let mut text = output.stderr.clone();
    match &output.outcome {
        ExitOutcome::TimedOut { elapsed } => {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("timeout after {elapsed:?}\n"));
        }
        ExitOutcome::Failed { code } if text.trim().is_empty() => {
            text = match code {
                Some(code) => format!("exited with status {code}\n"),
                None => "terminated by signal\n".to_string(),
            };
        }
        _ => {}
    }
    text
}

fn failed(output: &ProcessOutput) -> RenderResult {
    RenderResult::Failed {
        diagnostic: diagnostic(output),
        timed_out: output.timed_out(),
    }
}

/// Classify a single-file run.
///
/// Timeouts and non-zero exits fail. A zero exit fails only when stdout is
/// empty and stderr is not; warnings next to real output are ignored.
pub(crate) fn classify_single(output: ProcessOutput) -> RenderResult {
    if !output.succeeded() || (output.stdout.is_empty() && !output.stderr.is_empty()) {
        return failed(&output);
    }
    RenderResult::Rendered(output.stdout)
}

/// Classify a directory-mode run by walking `output_dir`.
///
/// `strip_release` drops the first path segment the tool adds for the
/// release name. A zero exit that wrote nothing but said something on
/// stderr is a failure.
pub(crate) async fn classify_directory(
    output: ProcessOutput,
    output_dir: &Path,
    strip_release: bool,
) -> Result<RenderResult> {
    if !output.succeeded() {
        return Ok(failed(&output));
    }
    let dir = output_dir.to_path_buf();
    let files = tokio::task::spawn_blocking(move || collect_tree(&dir, strip_release)).await??;
    if files.is_empty() && !output.stderr.is_empty() {
        return Ok(failed(&output));
    }
    Ok(RenderResult::RenderedTree(files))
}

fn collect_tree(root: &Path, strip_release: bool) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();
    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| ChartDiffError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| ChartDiffError::Io(std::io::Error::other(e)))?;
        let mut components: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if strip_release && components.len() > 1 {
            components.remove(0);
        }
        files.insert(components.join("/"), std::fs::read(entry.path())?);
    }
    Ok(files)
}

/// Create `dir` and its parents, returning it.
pub(crate) async fn ensure_dir(dir: PathBuf) -> Result<PathBuf> {
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn output(stdout: &str, stderr: &str, outcome: ExitOutcome) -> ProcessOutput {
        ProcessOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            outcome,
            duration_ms: 1,
        }
    }

    #[test]
    fn empty_stdout_with_stderr_is_failure() {
        let result = classify_single(output("", "Error: boom\n", ExitOutcome::Success));
        assert_eq!(
            result,
            RenderResult::Failed {
                diagnostic: "Error: boom\n".to_string(),
                timed_out: false
            }
        );
    }

    #[test]
    fn warnings_next_to_output_are_success() {
        let result = classify_single(output("kind: A\n", "WARNING: deprecated\n", ExitOutcome::Success));
        assert_eq!(result, RenderResult::Rendered("kind: A\n".to_string()));
    }

    #[test]
    fn empty_success_is_empty_render() {
        let result = classify_single(output("", "", ExitOutcome::Success));
        assert_eq!(result, RenderResult::Rendered(String::new()));
    }

    #[test]
    fn non_zero_exit_fails_even_with_stdout() {
        let result = classify_single(output(
            "partial",
            "Error: bad\n",
            ExitOutcome::Failed { code: Some(1) },
        ));
        assert!(result.is_failure());
    }

    #[test]
    fn silent_non_zero_exit_reports_status() {
        let text = diagnostic(&output("", "", ExitOutcome::Failed { code: Some(2) }));
        assert_eq!(text, "exited with status 2\n");
    }

    #[test]
    fn timeout_appends_marker_to_partial_stderr() {
        let text = diagnostic(&output(
            "",
            "fetching deps",
            ExitOutcome::TimedOut {
                elapsed: Duration::from_millis(1500),
            },
        ));
        assert!(text.starts_with("fetching deps\n"));
        assert!(text.contains("timeout after 1.5s"));
    }

    #[tokio::test]
    async fn directory_mode_strips_release_segment() {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("release-name/templates");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(templates.join("cm.yaml"), "kind: ConfigMap\n").unwrap();

        let result = classify_directory(output("", "", ExitOutcome::Success), dir.path(), true)
            .await
            .unwrap();
        let RenderResult::RenderedTree(files) = result else {
            panic!("expected tree, got {result:?}");
        };
        assert_eq!(
            files.keys().collect::<Vec<_>>(),
            vec!["templates/cm.yaml"]
        );
    }

    #[tokio::test]
    async fn directory_mode_keeps_release_segment_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("web/app")).unwrap();
        std::fs::write(dir.path().join("web/app/svc.yaml"), "kind: Service\n").unwrap();

        let result = classify_directory(output("", "", ExitOutcome::Success), dir.path(), false)
            .await
            .unwrap();
        let RenderResult::RenderedTree(files) = result else {
            panic!("expected tree, got {result:?}");
        };
        assert!(files.contains_key("web/app/svc.yaml"));
    }

    #[tokio::test]
    async fn directory_mode_without_files_but_stderr_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = classify_directory(
            output("", "Error: no releases\n", ExitOutcome::Success),
            dir.path(),
            true,
        )
        .await
        .unwrap();
        assert!(result.is_failure());
    }

    #[test]
    fn strategy_lookup() {
        assert_eq!(strategy_for("helm").unwrap().tool_name(), "helm");
        assert_eq!(strategy_for("helmfile").unwrap().display_name(), "Helmfile");
        assert!(matches!(
            strategy_for("kustomize"),
            Err(ChartDiffError::UnknownTool(_))
        ));
    }
}
