use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chartdiff_exec::CommandSpec;
use tracing::{debug, warn};

use super::{
    classify_directory, classify_single, ensure_dir, run_tool, RenderContext, RenderResult,
    RenderStrategy,
};
use crate::error::Result;

/// Release name passed to `helm template`.
pub const RELEASE_NAME: &str = "release-name";

const DEFAULTS_FILE: &str = "defaults.yaml";

/// Renders Helm charts with `helm template`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelmStrategy;

impl HelmStrategy {
    /// Environment isolating helm state under `cache_dir`.
    fn environment(ctx: &RenderContext, cache_dir: &Path) -> BTreeMap<String, String> {
        let mut env = ctx.settings.env.clone();
        for (key, sub) in [
            ("HELM_CACHE_HOME", "helm-cache"),
            ("HELM_CONFIG_HOME", "helm-config"),
            ("HELM_DATA_HOME", "helm-data"),
            ("HELM_REPOSITORY_CACHE", "repo"),
        ] {
            env.insert(key.to_string(), path_string(&cache_dir.join(sub)));
        }
        env
    }

    /// Write `defaults.yaml` and build chart dependencies, once per cache dir.
    /// The defaults file doubles as the marker that this already happened.
    async fn prepare(&self, ctx: &RenderContext, root_dir: &Path, cache_dir: &Path) -> Result<PathBuf> {
        let defaults = cache_dir.join(DEFAULTS_FILE);
        if tokio::fs::try_exists(&defaults).await? {
            return Ok(defaults);
        }
        ensure_dir(cache_dir.join("repo")).await?;
        tokio::fs::write(&defaults, ctx.settings.default_values.as_bytes()).await?;

        let spec = CommandSpec::new(path_string(&ctx.binaries.helm))
            .args(["dependency", "build"])
            .arg(path_string(root_dir))
            .envs(Self::environment(ctx, cache_dir));
        match ctx.runner.run(&spec).await {
            Ok(output) if output.succeeded() => debug!("helm dependencies built"),
            Ok(output) => warn!(
                chart = %root_dir.display(),
                stderr = %output.stderr.trim(),
                "helm dependency build failed, templating anyway"
            ),
            Err(e) => warn!(
                chart = %root_dir.display(),
                error = %e,
                "helm dependency build failed, templating anyway"
            ),
        }
        Ok(defaults)
    }

    fn template_command(
        ctx: &RenderContext,
        root_dir: &Path,
        variant: Option<&str>,
        defaults: &Path,
        cache_dir: &Path,
    ) -> CommandSpec {
        let mut spec = CommandSpec::new(path_string(&ctx.binaries.helm))
            .args(["template", RELEASE_NAME])
            .arg(path_string(root_dir))
            .arg("--include-crds")
            .arg("--values")
            .arg(path_string(defaults));
        if let Some(variant) = variant {
            let values = root_dir
                .join(&ctx.settings.test_values_directory)
                .join(format!("{variant}.yaml"));
            spec = spec.arg("--values").arg(path_string(&values));
        }
        spec.envs(Self::environment(ctx, cache_dir))
    }
}

#[async_trait]
impl RenderStrategy for HelmStrategy {
    fn tool_name(&self) -> &'static str {
        "helm"
    }

    fn display_name(&self) -> &'static str {
        "Helm"
    }

    fn marker_filenames(&self) -> &'static [&'static str] {
        &["Chart.yaml"]
    }

    /// Stems of the `.yaml` files in the test-values directory, sorted.
    async fn config_variants(&self, ctx: &RenderContext, root_dir: &Path) -> Result<Vec<String>> {
        let dir = root_dir.join(&ctx.settings.test_values_directory);
        if !tokio::fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
            return Ok(Vec::new());
        }
        let mut variants = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(".yaml") {
                variants.push(stem.to_string());
            }
        }
        variants.sort();
        Ok(variants)
    }

    async fn render_single_file(
        &self,
        ctx: &RenderContext,
        root_dir: &Path,
        variant: Option<&str>,
        cache_dir: &Path,
    ) -> Result<RenderResult> {
        let defaults = self.prepare(ctx, root_dir, cache_dir).await?;
        let spec = Self::template_command(ctx, root_dir, variant, &defaults, cache_dir);
        Ok(match run_tool(&ctx.runner, &spec).await {
            Ok(output) => classify_single(output),
            Err(failure) => failure,
        })
    }

    async fn render_to_directory(
        &self,
        ctx: &RenderContext,
        root_dir: &Path,
        variant: Option<&str>,
        output_dir: &Path,
        cache_dir: &Path,
    ) -> Result<RenderResult> {
        let defaults = self.prepare(ctx, root_dir, cache_dir).await?;
        let spec = Self::template_command(ctx, root_dir, variant, &defaults, cache_dir)
            .arg("--output-dir")
            .arg(path_string(output_dir));
        match run_tool(&ctx.runner, &spec).await {
            Ok(output) => classify_directory(output, output_dir, true).await,
            Err(failure) => Ok(failure),
        }
    }
}

pub(super) fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Binaries, RepositorySettings};
    use chartdiff_exec::ProcessRunner;
    use chartdiff_state::Repository;

    fn context(settings: RepositorySettings) -> RenderContext {
        RenderContext {
            repository: Repository::new(1, 1, "charts"),
            settings,
            binaries: Binaries::default(),
            runner: ProcessRunner::default(),
        }
    }

    #[tokio::test]
    async fn variants_are_sorted_yaml_stems() {
        let root = tempfile::tempdir().unwrap();
        let values = root.path().join("test-values");
        std::fs::create_dir_all(values.join("nested.yaml")).unwrap();
        for name in ["prod.yaml", "dev.yaml", "notes.txt", "stage.yml"] {
            std::fs::write(values.join(name), "").unwrap();
        }

        let variants = HelmStrategy
            .config_variants(&context(RepositorySettings::default()), root.path())
            .await
            .unwrap();
        assert_eq!(variants, vec!["dev".to_string(), "prod".to_string()]);
    }

    #[tokio::test]
    async fn missing_values_directory_means_no_variants() {
        let root = tempfile::tempdir().unwrap();
        let variants = HelmStrategy
            .config_variants(&context(RepositorySettings::default()), root.path())
            .await
            .unwrap();
        assert!(variants.is_empty());
    }

    #[test]
    fn template_command_layers_values() {
        let settings = RepositorySettings {
            test_values_directory: "ci".to_string(),
            ..RepositorySettings::default()
        };
        let ctx = context(settings);
        let spec = HelmStrategy::template_command(
            &ctx,
            Path::new("/work/chart"),
            Some("prod"),
            Path::new("/cache/defaults.yaml"),
            Path::new("/cache"),
        );

        assert_eq!(
            spec.args,
            vec![
                "template",
                "release-name",
                "/work/chart",
                "--include-crds",
                "--values",
                "/cache/defaults.yaml",
                "--values",
                "/work/chart/ci/prod.yaml",
            ]
        );
        assert_eq!(
            spec.env.get("HELM_CACHE_HOME").map(String::as_str),
            Some("/cache/helm-cache")
        );
    }

    #[test]
    fn repository_env_entries_do_not_override_isolation() {
        let mut settings = RepositorySettings::default();
        settings
            .env
            .insert("HELM_DATA_HOME".to_string(), "/shared".to_string());
        settings
            .env
            .insert("HTTPS_PROXY".to_string(), "http://proxy".to_string());
        let env = HelmStrategy::environment(&context(settings), Path::new("/cache"));

        assert_eq!(env.get("HELM_DATA_HOME").map(String::as_str), Some("/cache/helm-data"));
        assert_eq!(env.get("HTTPS_PROXY").map(String::as_str), Some("http://proxy"));
    }
}
