//! Read-only materialisation of one chart root from a ref's tree.

use std::path::Path;

use chartdiff_state::{NodeKind, RefTreeReader, Repository};
use tracing::debug;

use crate::error::Result;

/// Copy every file below `root` at `rev` into `into`, relative to `root`.
///
/// Returns the number of files written. Submodule links are skipped.
pub async fn materialize_root(
    reader: &dyn RefTreeReader,
    repository: &Repository,
    rev: &str,
    root: &str,
    into: &Path,
) -> Result<usize> {
    let entries = reader.list_tree(repository, rev, root, true).await?;
    let prefix = normalized(root);

    let mut written = 0;
    for entry in entries {
        if entry.kind != NodeKind::File {
            continue;
        }
        let path = normalized(&entry.path);
        let relative = if prefix.is_empty() {
            path.as_str()
        } else {
            match path.strip_prefix(&prefix).and_then(|p| p.strip_prefix('/')) {
                Some(relative) => relative,
                None => continue,
            }
        };
        let target = into.join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = reader.read_blob(repository, &entry.object_id).await?;
        tokio::fs::write(&target, content).await?;
        written += 1;
    }
    debug!(root = %root, rev = %rev, files = written, "materialized chart root");
    Ok(written)
}

fn normalized(path: &str) -> String {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/")
}
