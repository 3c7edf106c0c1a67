//! Typed, scoped configuration.
//!
//! Settings are stored as raw strings per scope by a [`SettingsStore`]. This
//! module defines the schema once ([`SettingKey`]) and resolves each key by
//! trying the repository scope, then the project scope, then the global
//! scope, falling back to the key's typed default. Values that do not parse
//! fall back to the default with a warning.

mod file;
mod probe;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chartdiff_state::{Repository, SettingsScope, SettingsStore};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use file::{DeploymentConfig, ENV_OVERRIDES};
pub use probe::{probe_versions, BinaryVersions};

/// Every setting the pipeline reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    Active,
    TemplateMode,
    TestValuesDirectory,
    DefaultValues,
    HelmfileEnvironments,
    EnvEntries,
    HelmBinary,
    HelmfileBinary,
    KustomizeBinary,
    ExecutionTimeoutMs,
}

impl SettingKey {
    pub const ALL: [SettingKey; 10] = [
        SettingKey::Active,
        SettingKey::TemplateMode,
        SettingKey::TestValuesDirectory,
        SettingKey::DefaultValues,
        SettingKey::HelmfileEnvironments,
        SettingKey::EnvEntries,
        SettingKey::HelmBinary,
        SettingKey::HelmfileBinary,
        SettingKey::KustomizeBinary,
        SettingKey::ExecutionTimeoutMs,
    ];

    /// Storage key.
    pub fn name(&self) -> &'static str {
        match self {
            SettingKey::Active => "active",
            SettingKey::TemplateMode => "template-mode",
            SettingKey::TestValuesDirectory => "test-values-directory",
            SettingKey::DefaultValues => "default-values",
            SettingKey::HelmfileEnvironments => "helmfile-environments",
            SettingKey::EnvEntries => "env-entries",
            SettingKey::HelmBinary => "helm-binary",
            SettingKey::HelmfileBinary => "helmfile-binary",
            SettingKey::KustomizeBinary => "kustomize-binary",
            SettingKey::ExecutionTimeoutMs => "execution-timeout-ms",
        }
    }

    /// Raw default used when no scope defines the key.
    pub fn default_value(&self) -> &'static str {
        match self {
            SettingKey::Active => "true",
            SettingKey::TemplateMode => "BOTH",
            SettingKey::TestValuesDirectory => "test-values",
            SettingKey::DefaultValues => "",
            SettingKey::HelmfileEnvironments => "",
            SettingKey::EnvEntries => "",
            SettingKey::HelmBinary => "helm",
            SettingKey::HelmfileBinary => "helmfile",
            SettingKey::KustomizeBinary => "kustomize",
            SettingKey::ExecutionTimeoutMs => "600000",
        }
    }

    /// Deployment-wide keys are only read from the global scope.
    pub fn global_only(&self) -> bool {
        matches!(
            self,
            SettingKey::HelmBinary
                | SettingKey::HelmfileBinary
                | SettingKey::KustomizeBinary
                | SettingKey::ExecutionTimeoutMs
        )
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.name() == name)
    }
}

/// Which output shapes a repository wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateMode {
    /// One aggregated file per variant.
    SingleFile,
    /// One file per rendered template, mirrored as a directory tree.
    SeparateFiles,
    Both,
}

impl TemplateMode {
    pub fn single_file(&self) -> bool {
        matches!(self, TemplateMode::SingleFile | TemplateMode::Both)
    }

    pub fn separate_files(&self) -> bool {
        matches!(self, TemplateMode::SeparateFiles | TemplateMode::Both)
    }
}

impl FromStr for TemplateMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "SINGLE_FILE" => Ok(TemplateMode::SingleFile),
            "SEPARATE_FILES" => Ok(TemplateMode::SeparateFiles),
            "BOTH" => Ok(TemplateMode::Both),
            other => Err(format!("unknown template mode {other}")),
        }
    }
}

/// Paths or names of the external binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binaries {
    pub helm: PathBuf,
    pub helmfile: PathBuf,
    pub kustomize: PathBuf,
}

impl Default for Binaries {
    fn default() -> Self {
        Self {
            helm: PathBuf::from("helm"),
            helmfile: PathBuf::from("helmfile"),
            kustomize: PathBuf::from("kustomize"),
        }
    }
}

/// Effective settings for one repository, resolved once per render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySettings {
    pub active: bool,
    pub template_mode: TemplateMode,
    pub test_values_directory: String,
    pub default_values: String,
    /// Trimmed, non-empty environment names in declaration order.
    pub helmfile_environments: Vec<String>,
    /// Extra environment for every render process.
    pub env: BTreeMap<String, String>,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            active: true,
            template_mode: TemplateMode::Both,
            test_values_directory: SettingKey::TestValuesDirectory.default_value().to_string(),
            default_values: String::new(),
            helmfile_environments: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

/// Resolves typed settings over a [`SettingsStore`] with
/// repository > project > global precedence.
#[derive(Clone)]
pub struct ScopedConfig {
    store: Arc<dyn SettingsStore>,
}

impl ScopedConfig {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Scopes to consult for `repository`, closest first.
    fn scopes(repository: Option<&Repository>) -> Vec<SettingsScope> {
        match repository {
            Some(repo) => vec![
                SettingsScope::Repository(repo.id),
                SettingsScope::Project(repo.project_id),
                SettingsScope::Global,
            ],
            None => vec![SettingsScope::Global],
        }
    }

    /// Raw value for `key`, or its default.
    pub fn raw(&self, repository: Option<&Repository>, key: SettingKey) -> String {
        let repository = if key.global_only() { None } else { repository };
        Self::scopes(repository)
            .into_iter()
            .find_map(|scope| self.store.get(scope, key.name()))
            .unwrap_or_else(|| key.default_value().to_string())
    }

    fn parsed<T>(&self, repository: Option<&Repository>, key: SettingKey) -> T
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.raw(repository, key);
        match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key.name(), value = %raw, error = %e, "unknown setting value, will use default");
                // Defaults are part of the schema and always parse.
                key.default_value().parse().unwrap_or_else(|_| unreachable!())
            }
        }
    }

    pub fn is_active(&self, repository: &Repository) -> bool {
        self.parsed(Some(repository), SettingKey::Active)
    }

    pub fn template_mode(&self, repository: &Repository) -> TemplateMode {
        self.parsed(Some(repository), SettingKey::TemplateMode)
    }

    pub fn test_values_directory(&self, repository: &Repository) -> String {
        self.raw(Some(repository), SettingKey::TestValuesDirectory)
            .trim()
            .to_string()
    }

    pub fn default_values(&self, repository: &Repository) -> String {
        self.raw(Some(repository), SettingKey::DefaultValues)
    }

    pub fn helmfile_environments(&self, repository: &Repository) -> Vec<String> {
        parse_lines(&self.raw(Some(repository), SettingKey::HelmfileEnvironments))
    }

    pub fn env_entries(&self, repository: &Repository) -> BTreeMap<String, String> {
        parse_env_entries(&self.raw(Some(repository), SettingKey::EnvEntries))
    }

    pub fn binaries(&self) -> Binaries {
        Binaries {
            helm: PathBuf::from(self.raw(None, SettingKey::HelmBinary).trim()),
            helmfile: PathBuf::from(self.raw(None, SettingKey::HelmfileBinary).trim()),
            kustomize: PathBuf::from(self.raw(None, SettingKey::KustomizeBinary).trim()),
        }
    }

    /// Per-process render timeout. Zero is rejected like an unparsable value.
    pub fn execution_timeout(&self) -> Duration {
        let key = SettingKey::ExecutionTimeoutMs;
        let millis: u64 = match self.parsed(None, key) {
            0 => {
                warn!(key = key.name(), "timeout must be positive, will use default");
                key.default_value().parse().unwrap_or_else(|_| unreachable!())
            }
            millis => millis,
        };
        Duration::from_millis(millis)
    }

    pub fn repository_settings(&self, repository: &Repository) -> RepositorySettings {
        RepositorySettings {
            active: self.is_active(repository),
            template_mode: self.template_mode(repository),
            test_values_directory: self.test_values_directory(repository),
            default_values: self.default_values(repository),
            helmfile_environments: self.helmfile_environments(repository),
            env: self.env_entries(repository),
        }
    }
}

/// Newline-delimited list, trimmed, blanks dropped.
pub fn parse_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// `KEY=VALUE` lines. Keys are trimmed, trailing `\r` is stripped from
/// values, and lines without `=` are skipped.
pub fn parse_env_entries(raw: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for line in raw.split('\n') {
        if line.trim().is_empty() {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                entries.insert(
                    key.trim().to_string(),
                    value.trim_end_matches('\r').to_string(),
                );
            }
            _ => warn!(line = %line, "ignoring malformed env entry"),
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartdiff_state::fakes::MemorySettingsStore;
    use tracing_test::traced_test;

    fn repo() -> Repository {
        Repository::new(7, 3, "charts")
    }

    fn config_with(store: MemorySettingsStore) -> ScopedConfig {
        ScopedConfig::new(Arc::new(store))
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_with(MemorySettingsStore::new());
        let settings = config.repository_settings(&repo());

        assert_eq!(settings, RepositorySettings::default());
        assert_eq!(config.binaries(), Binaries::default());
        assert_eq!(config.execution_timeout(), Duration::from_millis(600_000));
    }

    #[test]
    fn repository_beats_project_beats_global() {
        let store = MemorySettingsStore::new();
        store.set(SettingsScope::Global, "test-values-directory", "global-values");
        store.set(SettingsScope::Project(3), "test-values-directory", "project-values");
        let config = config_with(store);
        assert_eq!(config.test_values_directory(&repo()), "project-values");

        let store = MemorySettingsStore::new();
        store.set(SettingsScope::Global, "template-mode", "SINGLE_FILE");
        store.set(SettingsScope::Project(3), "template-mode", "SEPARATE_FILES");
        store.set(SettingsScope::Repository(7), "template-mode", "BOTH");
        let config = config_with(store);
        assert_eq!(config.template_mode(&repo()), TemplateMode::Both);
    }

    #[test]
    fn other_project_settings_do_not_leak() {
        let store = MemorySettingsStore::new();
        store.set(SettingsScope::Project(99), "active", "false");
        let config = config_with(store);
        assert!(config.is_active(&repo()));
    }

    #[test]
    fn unknown_enum_value_falls_back_to_default() {
        let store = MemorySettingsStore::new();
        store.set(SettingsScope::Repository(7), "template-mode", "EVERYTHING");
        store.set(SettingsScope::Global, "execution-timeout-ms", "soon");
        let config = config_with(store);

        assert_eq!(config.template_mode(&repo()), TemplateMode::Both);
        assert_eq!(config.execution_timeout(), Duration::from_millis(600_000));
    }

    #[test]
    #[traced_test]
    fn non_positive_timeouts_fall_back_to_default() {
        for raw in ["0", "-5", " 0 "] {
            let store = MemorySettingsStore::new();
            store.set(SettingsScope::Global, "execution-timeout-ms", raw);
            let config = config_with(store);
            assert_eq!(config.execution_timeout(), Duration::from_millis(600_000), "{raw:?}");
        }
        assert!(logs_contain("timeout must be positive"));

        let store = MemorySettingsStore::new();
        store.set(SettingsScope::Global, "execution-timeout-ms", "1500");
        assert_eq!(config_with(store).execution_timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn binaries_ignore_repository_scope() {
        let store = MemorySettingsStore::new();
        store.set(SettingsScope::Repository(7), "helm-binary", "/tmp/evil-helm");
        store.set(SettingsScope::Global, "helm-binary", "/opt/helm/bin/helm");
        let config = config_with(store);

        assert_eq!(config.binaries().helm, PathBuf::from("/opt/helm/bin/helm"));
    }

    #[test]
    fn template_mode_flags() {
        assert!(TemplateMode::SingleFile.single_file());
        assert!(!TemplateMode::SingleFile.separate_files());
        assert!(!TemplateMode::SeparateFiles.single_file());
        assert!(TemplateMode::SeparateFiles.separate_files());
        assert!(TemplateMode::Both.single_file() && TemplateMode::Both.separate_files());
    }

    #[test]
    fn helmfile_environments_are_trimmed_and_blank_lines_dropped() {
        assert_eq!(
            parse_lines(" dev \r\n\nprod\n  \n"),
            vec!["dev".to_string(), "prod".to_string()]
        );
        assert!(parse_lines("").is_empty());
    }

    #[test]
    fn env_entries_parse_like_properties() {
        let entries = parse_env_entries("HTTPS_PROXY=http://proxy:3128\r\n\n NO_PROXY =a=b\ngarbage\n");
        assert_eq!(
            entries.get("HTTPS_PROXY").map(String::as_str),
            Some("http://proxy:3128")
        );
        assert_eq!(entries.get("NO_PROXY").map(String::as_str), Some("a=b"));
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn setting_key_names_round_trip() {
        for key in SettingKey::ALL {
            assert_eq!(SettingKey::from_name(key.name()), Some(key));
        }
    }
}
