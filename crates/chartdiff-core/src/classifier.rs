//! Chart-root discovery from a pull request's changed paths.

use std::collections::BTreeSet;

use chartdiff_state::{Change, ChangeType, HostError, NodeKind, RefTreeReader, RepositoryRef};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::layout;

/// A directory believed to contain one renderable unit for `tool`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChartRoot {
    pub path: String,
    pub tool: String,
}

/// Every directory that could be a chart root for `changes`, sorted.
///
/// For a file change every ancestor directory is a candidate; for a
/// directory change the directory itself is too. Deletions and submodules
/// contribute nothing, and the repository root is never a candidate.
pub fn candidate_directories(changes: &[Change]) -> BTreeSet<String> {
    let mut candidates = BTreeSet::new();
    for change in changes {
        if change.change_type == ChangeType::Delete || change.node_kind == NodeKind::Submodule {
            continue;
        }
        let components: Vec<&str> = change.components().collect();
        let depth = match change.node_kind {
            NodeKind::File => components.len().saturating_sub(1),
            _ => components.len(),
        };
        for end in 1..=depth {
            candidates.insert(components[..end].join("/"));
        }
    }
    candidates
}

/// Candidates that contain one of `markers` as a regular file in `source`.
pub async fn affected_directories(
    reader: &dyn RefTreeReader,
    source: &RepositoryRef,
    changes: &[Change],
    markers: &[&str],
) -> Result<BTreeSet<String>> {
    let mut roots = BTreeSet::new();
    for candidate in candidate_directories(changes) {
        for marker in markers {
            let path = layout::join(&candidate, marker);
            let kind = match reader
                .node_kind(&source.repository, &source.latest_commit, &path)
                .await
            {
                Ok(kind) => kind,
                Err(HostError::NotFound { .. }) => None,
                Err(e) => return Err(e.into()),
            };
            if kind == Some(NodeKind::File) {
                roots.insert(candidate.clone());
                break;
            }
        }
    }
    debug!(roots = ?roots, markers = ?markers, "classified chart roots");
    Ok(roots)
}

/// [`affected_directories`] as typed chart roots for `tool`.
pub async fn classify(
    reader: &dyn RefTreeReader,
    source: &RepositoryRef,
    changes: &[Change],
    markers: &[&str],
    tool: &str,
) -> Result<Vec<ChartRoot>> {
    Ok(affected_directories(reader, source, changes, markers)
        .await?
        .into_iter()
        .map(|path| ChartRoot {
            path,
            tool: tool.to_string(),
        })
        .collect())
}
