use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chartdiff_exec::CommandSpec;
use tracing::{debug, warn};

use super::helm::path_string;
use super::{
    classify_directory, classify_single, ensure_dir, run_tool, RenderContext, RenderResult,
    RenderStrategy,
};
use crate::error::Result;
use crate::layout::DEFAULT_VARIANT;

const SECRETS_PLUGIN_YAML: &str = include_str!("../../assets/simple-helm-secrets/plugin.yaml");
const SECRETS_PLUGIN_SCRIPT: &str = include_str!("../../assets/simple-helm-secrets/secrets.sh");

/// Renders Helmfile definitions with `helmfile template`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelmfileStrategy;

/// Cache-scoped paths prepared before the first helmfile run.
struct Prepared {
    env: BTreeMap<String, String>,
    kustomize: Option<PathBuf>,
}

impl HelmfileStrategy {
    /// Materialise the secrets plugin and kustomize into `cache_dir`.
    /// Both steps are skipped when already present.
    async fn prepare(&self, ctx: &RenderContext, cache_dir: &Path) -> Result<Prepared> {
        let plugin_dir = cache_dir.join("helm-data").join("plugins").join("secrets");
        if !tokio::fs::try_exists(&plugin_dir).await? {
            ensure_dir(plugin_dir.clone()).await?;
            tokio::fs::write(plugin_dir.join("plugin.yaml"), SECRETS_PLUGIN_YAML).await?;
            let script = plugin_dir.join("secrets.sh");
            tokio::fs::write(&script, SECRETS_PLUGIN_SCRIPT).await?;
            set_owner_executable(&script).await?;
            debug!(dir = %plugin_dir.display(), "secrets plugin materialised");
        }

        let bin_dir = cache_dir.join("bin");
        let kustomize = bin_dir.join("kustomize");
        let kustomize = if tokio::fs::try_exists(&kustomize).await? {
            Some(kustomize)
        } else {
            match resolve_binary(&ctx.binaries.kustomize) {
                Some(source) => {
                    ensure_dir(bin_dir.clone()).await?;
                    tokio::fs::copy(&source, &kustomize).await?;
                    Some(kustomize)
                }
                None => {
                    warn!(
                        binary = %ctx.binaries.kustomize.display(),
                        "kustomize binary not found, rendering without it"
                    );
                    None
                }
            }
        };

        Ok(Prepared {
            env: Self::environment(ctx, cache_dir),
            kustomize,
        })
    }

    fn environment(ctx: &RenderContext, cache_dir: &Path) -> BTreeMap<String, String> {
        let mut env = ctx.settings.env.clone();
        let mut search_path = vec![cache_dir.join("bin")];
        if let Some(path) = std::env::var_os("PATH") {
            search_path.extend(std::env::split_paths(&path));
        }
        if let Ok(joined) = std::env::join_paths(search_path) {
            env.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
        }
        for (key, sub) in [
            ("XDG_CACHE_HOME", "helmfile-cache"),
            ("HELMFILE_TEMPDIR", "helmfile-temp"),
            ("HELM_CACHE_HOME", "helm-cache"),
            ("HELM_CONFIG_HOME", "helm-config"),
            ("HELM_DATA_HOME", "helm-data"),
        ] {
            env.insert(key.to_string(), path_string(&cache_dir.join(sub)));
        }
        env.insert("HELMFILE_UPGRADE_NOTICE_DISABLED".to_string(), "true".to_string());
        env
    }

    fn template_command(
        ctx: &RenderContext,
        root_dir: &Path,
        variant: Option<&str>,
        prepared: &Prepared,
    ) -> CommandSpec {
        let mut spec = CommandSpec::new(path_string(&ctx.binaries.helmfile))
            .arg("-b")
            .arg(path_string(&ctx.binaries.helm));
        if let Some(kustomize) = &prepared.kustomize {
            spec = spec.arg("-k").arg(path_string(kustomize));
        }
        spec.arg("-f")
            .arg(path_string(root_dir))
            .arg("-e")
            .arg(variant.unwrap_or(DEFAULT_VARIANT))
            .args(["-q", "template", "--include-crds"])
            .envs(prepared.env.clone())
    }
}

#[async_trait]
impl RenderStrategy for HelmfileStrategy {
    fn tool_name(&self) -> &'static str {
        "helmfile"
    }

    fn display_name(&self) -> &'static str {
        "Helmfile"
    }

    fn marker_filenames(&self) -> &'static [&'static str] {
        &["helmfile.yaml", "helmfile.yaml.gotmpl"]
    }

    /// The repository's configured environments, in declaration order.
    async fn config_variants(&self, ctx: &RenderContext, _root_dir: &Path) -> Result<Vec<String>> {
        Ok(ctx.settings.helmfile_environments.clone())
    }

    async fn render_single_file(
        &self,
        ctx: &RenderContext,
        root_dir: &Path,
        variant: Option<&str>,
        cache_dir: &Path,
    ) -> Result<RenderResult> {
        let prepared = self.prepare(ctx, cache_dir).await?;
        let spec = Self::template_command(ctx, root_dir, variant, &prepared);
        Ok(match run_tool(&ctx.runner, &spec).await {
            Ok(output) => classify_single(output),
            Err(failure) => failure,
        })
    }

    /// Releases fan out into `<output_dir>/<release>/...`; the release
    /// segment is kept so multi-release environments stay distinguishable.
    async fn render_to_directory(
        &self,
        ctx: &RenderContext,
        root_dir: &Path,
        variant: Option<&str>,
        output_dir: &Path,
        cache_dir: &Path,
    ) -> Result<RenderResult> {
        let prepared = self.prepare(ctx, cache_dir).await?;
        let spec = Self::template_command(ctx, root_dir, variant, &prepared)
            .arg("--output-dir-template")
            .arg(format!("{}/{{{{ .Release.Name }}}}", path_string(output_dir)));
        match run_tool(&ctx.runner, &spec).await {
            Ok(output) => classify_directory(output, output_dir, false).await,
            Err(failure) => Ok(failure),
        }
    }
}

/// Resolve a configured binary: paths are taken as-is, bare names are
/// looked up on `PATH`.
fn resolve_binary(binary: &Path) -> Option<PathBuf> {
    if binary.components().count() > 1 || binary.is_absolute() {
        return binary.is_file().then(|| binary.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}

#[cfg(unix)]
async fn set_owner_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_owner_executable(_path: &Path) -> Result<()> {
    Ok(())
}
