//! TOML deployment file backing [`SettingsStore`].
//!
//! ```toml
//! scratch-dir = "/var/tmp/chartdiff"
//!
//! [global]
//! helm-binary = "/opt/helm/bin/helm"
//! execution-timeout-ms = 300000
//!
//! [projects.3]
//! template-mode = "SINGLE_FILE"
//!
//! [repositories.7]
//! helmfile-environments = """
//! dev
//! prod
//! """
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chartdiff_state::{SettingsScope, SettingsStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ChartDiffError, Result};

use super::SettingKey;

/// Environment variables that override global settings, applied last.
pub const ENV_OVERRIDES: [(&str, SettingKey); 4] = [
    ("CHARTDIFF_HELM_BINARY", SettingKey::HelmBinary),
    ("CHARTDIFF_HELMFILE_BINARY", SettingKey::HelmfileBinary),
    ("CHARTDIFF_KUSTOMIZE_BINARY", SettingKey::KustomizeBinary),
    ("CHARTDIFF_EXECUTION_TIMEOUT_MS", SettingKey::ExecutionTimeoutMs),
];

type Table = BTreeMap<String, toml::Value>;

/// Deployment configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DeploymentConfig {
    /// Parent directory for scratch directories; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    pub global: Table,
    pub projects: BTreeMap<String, Table>,
    pub repositories: BTreeMap<String, Table>,
}

impl DeploymentConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        config.warn_unknown_keys();
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ChartDiffError::Config(e.to_string()))
    }

    /// Apply `CHARTDIFF_*` overrides from the given variables.
    pub fn with_env_overrides<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in vars {
            if let Some((_, key)) = ENV_OVERRIDES.iter().find(|(var, _)| *var == name.as_ref()) {
                self.global
                    .insert(key.name().to_string(), toml::Value::String(value.into()));
            }
        }
        self
    }

    /// Apply overrides from the process environment.
    pub fn from_env(self) -> Self {
        self.with_env_overrides(std::env::vars())
    }

    fn table(&self, scope: SettingsScope) -> Option<&Table> {
        match scope {
            SettingsScope::Global => Some(&self.global),
            SettingsScope::Project(id) => self.projects.get(&id.to_string()),
            SettingsScope::Repository(id) => self.repositories.get(&id.to_string()),
        }
    }

    fn warn_unknown_keys(&self) {
        let tables = std::iter::once(&self.global)
            .chain(self.projects.values())
            .chain(self.repositories.values());
        for table in tables {
            for key in table.keys() {
                if SettingKey::from_name(key).is_none() {
                    warn!(key = %key, "unknown setting in config file");
                }
            }
        }
    }
}

impl SettingsStore for DeploymentConfig {
    fn get(&self, scope: SettingsScope, key: &str) -> Option<String> {
        let value = self.table(scope)?.get(key)?;
        match value {
            toml::Value::String(s) => Some(s.clone()),
            toml::Value::Integer(i) => Some(i.to_string()),
            toml::Value::Boolean(b) => Some(b.to_string()),
            toml::Value::Float(f) => Some(f.to_string()),
            other => {
                warn!(key = %key, kind = other.type_str(), "unsupported setting type");
                None
            }
        }
    }
}
