//! Renders one chart root for every variant and output mode.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn, Instrument};

use crate::error::Result;
use crate::layout::DEFAULT_VARIANT;
use crate::obs;
use crate::output::OutputWriter;
use crate::render::{RenderContext, RenderStrategy};

/// Drives a strategy over the variants of a chart root and writes each
/// result through an [`OutputWriter`].
///
/// Scratch directories are created under `scratch_dir` (the system temp
/// dir when `None`) and removed when the root is done, on every path.
#[derive(Debug, Clone, Default)]
pub struct TemplateOrchestrator {
    scratch_dir: Option<PathBuf>,
}

impl TemplateOrchestrator {
    pub fn new(scratch_dir: Option<PathBuf>) -> Self {
        Self { scratch_dir }
    }

    /// Fresh scratch directory named `<prefix>XXXX`.
    pub fn scratch(&self, prefix: &str) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        Ok(match &self.scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)?
            }
            None => builder.tempdir()?,
        })
    }

    /// Render the root materialised at `root_dir` into `<target_base>/...`.
    pub async fn render(
        &self,
        ctx: &RenderContext,
        strategy: &dyn RenderStrategy,
        root_dir: &Path,
        writer: &mut OutputWriter<'_>,
        target_base: &str,
    ) -> Result<()> {
        let cache = self.scratch("cache-")?;

        let mut variants: Vec<Option<String>> = vec![None];
        for variant in strategy.config_variants(ctx, root_dir).await? {
            if variant == DEFAULT_VARIANT {
                warn!(
                    tool = strategy.tool_name(),
                    root = %target_base,
                    "variant named default ignored, the variant-less render owns that name"
                );
            } else if !variants.contains(&Some(variant.clone())) {
                variants.push(Some(variant));
            }
        }
        debug!(
            tool = strategy.tool_name(),
            root = %target_base,
            variants = variants.len(),
            "rendering chart root"
        );

        for variant in variants.iter().map(Option::as_deref) {
            let span = obs::render_span(strategy.tool_name(), target_base, variant);
            self.render_variant(ctx, strategy, root_dir, writer, target_base, variant, cache.path())
                .instrument(span)
                .await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn render_variant(
        &self,
        ctx: &RenderContext,
        strategy: &dyn RenderStrategy,
        root_dir: &Path,
        writer: &mut OutputWriter<'_>,
        target_base: &str,
        variant: Option<&str>,
        cache: &Path,
    ) -> Result<()> {
        let mode = ctx.settings.template_mode;
        if mode.separate_files() {
            let output = self.scratch("rendered-")?;
            let result = strategy
                .render_to_directory(ctx, root_dir, variant, output.path(), cache)
                .await?;
            writer.write_directory(target_base, variant, &result).await?;
        }
        if mode.single_file() {
            let result = strategy
                .render_single_file(ctx, root_dir, variant, cache)
                .await?;
            writer.write_single(target_base, variant, &result).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Binaries, RepositorySettings, TemplateMode};
    use crate::render::RenderResult;
    use async_trait::async_trait;
    use chartdiff_exec::ProcessRunner;
    use chartdiff_state::fakes::MemoryRepositoryHost;
    use chartdiff_state::{Repository, WorkingTreeProvider};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    /// Records calls and checks that every output dir starts empty.
    #[derive(Default)]
    struct ProbeStrategy {
        calls: Mutex<Vec<String>>,
        caches: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl RenderStrategy for ProbeStrategy {
        fn tool_name(&self) -> &'static str {
            "probe"
        }
        fn display_name(&self) -> &'static str {
            "Probe"
        }
        fn marker_filenames(&self) -> &'static [&'static str] {
            &["probe.yaml"]
        }
        async fn config_variants(&self, _ctx: &RenderContext, _root: &Path) -> Result<Vec<String>> {
            Ok(vec!["b".to_string(), "default".to_string(), "a".to_string(), "b".to_string()])
        }
        async fn render_single_file(
            &self,
            _ctx: &RenderContext,
            _root: &Path,
            variant: Option<&str>,
            cache_dir: &Path,
        ) -> Result<RenderResult> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("single:{}", variant.unwrap_or("-")));
            self.caches.lock().unwrap().push(cache_dir.to_path_buf());
            Ok(RenderResult::Rendered(format!("variant: {variant:?}\n")))
        }
        async fn render_to_directory(
            &self,
            _ctx: &RenderContext,
            _root: &Path,
            variant: Option<&str>,
            output_dir: &Path,
            cache_dir: &Path,
        ) -> Result<RenderResult> {
            assert_eq!(std::fs::read_dir(output_dir).unwrap().count(), 0);
            std::fs::write(output_dir.join("stale"), "x").unwrap();
            self.calls
                .lock()
                .unwrap()
                .push(format!("dir:{}", variant.unwrap_or("-")));
            self.caches.lock().unwrap().push(cache_dir.to_path_buf());
            let mut files = BTreeMap::new();
            files.insert("templates/x.yaml".to_string(), b"x".to_vec());
            Ok(RenderResult::RenderedTree(files))
        }
    }

    fn context(mode: TemplateMode) -> RenderContext {
        RenderContext {
            repository: Repository::new(1, 1, "charts"),
            settings: RepositorySettings {
                template_mode: mode,
                ..RepositorySettings::default()
            },
            binaries: Binaries::default(),
            runner: ProcessRunner::default(),
        }
    }

    #[tokio::test]
    async fn default_first_then_variants_directory_before_single() {
        let scratch = tempfile::tempdir().unwrap();
        let orchestrator = TemplateOrchestrator::new(Some(scratch.path().to_path_buf()));
        let host = MemoryRepositoryHost::new();
        let repo = Repository::new(1, 1, "charts");
        let mut tree = host.acquire(&repo, None).await.unwrap();
        let strategy = ProbeStrategy::default();

        let mut writer = OutputWriter::new(tree.as_mut(), "probe");
        orchestrator
            .render(&context(TemplateMode::Both), &strategy, scratch.path(), &mut writer, "app")
            .await
            .unwrap();

        assert_eq!(
            *strategy.calls.lock().unwrap(),
            vec!["dir:-", "single:-", "dir:b", "single:b", "dir:a", "single:a"]
        );
        let caches = strategy.caches.lock().unwrap();
        assert!(caches.iter().all(|c| c == &caches[0]));
        assert!(!caches[0].exists(), "cache dir must be removed");

        let remaining: Vec<_> = std::fs::read_dir(scratch.path()).unwrap().collect();
        assert!(remaining.is_empty(), "scratch dirs leaked: {remaining:?}");
    }

    #[tokio::test]
    async fn single_file_mode_skips_directory_renders() {
        let orchestrator = TemplateOrchestrator::default();
        let host = MemoryRepositoryHost::new();
        let repo = Repository::new(1, 1, "charts");
        let mut tree = host.acquire(&repo, None).await.unwrap();
        let strategy = ProbeStrategy::default();

        {
            let mut writer = OutputWriter::new(tree.as_mut(), "probe");
            orchestrator
                .render(
                    &context(TemplateMode::SingleFile),
                    &strategy,
                    Path::new("/unused"),
                    &mut writer,
                    "app",
                )
                .await
                .unwrap();
        }

        assert!(strategy.calls.lock().unwrap().iter().all(|c| c.starts_with("single:")));
        let mut status = tree.status().await.unwrap();
        status.sort();
        assert_eq!(status, vec!["app/a.yaml", "app/b.yaml", "app/default.yaml"]);
    }

    #[tokio::test]
    #[traced_test]
    async fn default_named_variant_is_dropped_with_warning() {
        let orchestrator = TemplateOrchestrator::default();
        let host = MemoryRepositoryHost::new();
        let repo = Repository::new(1, 1, "charts");
        let mut tree = host.acquire(&repo, None).await.unwrap();
        let strategy = ProbeStrategy::default();

        {
            let mut writer = OutputWriter::new(tree.as_mut(), "probe");
            orchestrator
                .render(
                    &context(TemplateMode::SingleFile),
                    &strategy,
                    Path::new("/unused"),
                    &mut writer,
                    "app",
                )
                .await
                .unwrap();
        }

        let defaults = strategy
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == "single:-")
            .count();
        assert_eq!(defaults, 1);
        assert!(logs_contain("variant named default ignored"));
    }
}
