//! Version probe for the configured rendering binaries.

use std::time::Duration;

use chartdiff_exec::{CommandSpec, ProcessRunner};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Binaries;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Reported versions; empty when a binary is missing or fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryVersions {
    pub helm: String,
    pub helmfile: String,
    pub kustomize: String,
}

pub async fn probe_versions(binaries: &Binaries) -> BinaryVersions {
    let helm = CommandSpec::new(binaries.helm.to_string_lossy()).args(["version", "--short"]);
    let helmfile = CommandSpec::new(binaries.helmfile.to_string_lossy())
        .args(["version", "--output=short"])
        .env("HELMFILE_UPGRADE_NOTICE_DISABLED", "true");
    let kustomize = CommandSpec::new(binaries.kustomize.to_string_lossy()).arg("version");

    let (helm, helmfile, kustomize) =
        tokio::join!(version_of(&helm), version_of(&helmfile), version_of(&kustomize));
    BinaryVersions {
        helm,
        helmfile,
        kustomize,
    }
}

async fn version_of(spec: &CommandSpec) -> String {
    match ProcessRunner::new(PROBE_TIMEOUT).run(spec).await {
        Ok(output) if output.succeeded() => output.stdout.trim().to_string(),
        Ok(output) => {
            debug!(command = %spec.display(), outcome = ?output.outcome, "version probe failed");
            String::new()
        }
        Err(e) => {
            debug!(command = %spec.display(), error = %e, "version probe failed");
            String::new()
        }
    }
}
