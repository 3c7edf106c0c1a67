//! Writes render results into a working tree and stages them.

use chartdiff_state::WorkingTree;
use tracing::debug;

use crate::error::{ChartDiffError, Result};
use crate::layout;
use crate::obs;
use crate::render::RenderResult;

/// Stages rendered content at layout-computed paths.
pub struct OutputWriter<'a> {
    tree: &'a mut dyn WorkingTree,
    tool: &'a str,
}

impl<'a> OutputWriter<'a> {
    pub fn new(tree: &'a mut dyn WorkingTree, tool: &'a str) -> Self {
        Self { tree, tool }
    }

    /// Write one file, creating its parent and staging it.
    pub async fn write_file(&mut self, path: &str, content: &[u8]) -> Result<()> {
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.tree.mkdir(parent).await?;
        }
        self.tree.write(path, content).await?;
        self.tree.stage_add(path).await?;
        debug!(path = %path, bytes = content.len(), "staged rendered file");
        Ok(())
    }

    /// Single-file result for `variant` under `base`. A failure is written
    /// in place of the rendered file; a tree is rejected.
    pub async fn write_single(
        &mut self,
        base: &str,
        variant: Option<&str>,
        result: &RenderResult,
    ) -> Result<()> {
        let path = layout::single_file_path(base, variant);
        match result {
            RenderResult::Rendered(content) => self.write_file(&path, content.as_bytes()).await,
            RenderResult::RenderedTree(_) => Err(ChartDiffError::ResultMismatch {
                mode: "single-file",
                result: "directory",
            }),
            RenderResult::Failed {
                diagnostic,
                timed_out,
            } => {
                obs::emit_render_failed(self.tool, &path, *timed_out);
                self.write_file(&path, diagnostic.as_bytes()).await
            }
        }
    }

    /// Directory result for `variant` under `base`. A failure becomes
    /// `<base>/<variant>/error.txt`; a single-file result is rejected.
    pub async fn write_directory(
        &mut self,
        base: &str,
        variant: Option<&str>,
        result: &RenderResult,
    ) -> Result<()> {
        let folder = layout::directory_path(base, variant);
        match result {
            RenderResult::RenderedTree(files) => {
                for (relative, content) in files {
                    self.write_file(&layout::join(&folder, relative), content)
                        .await?;
                }
                Ok(())
            }
            RenderResult::Rendered(_) => Err(ChartDiffError::ResultMismatch {
                mode: "directory",
                result: "single-file",
            }),
            RenderResult::Failed {
                diagnostic,
                timed_out,
            } => {
                let path = layout::error_path(base, variant);
                obs::emit_render_failed(self.tool, &path, *timed_out);
                self.write_file(&path, diagnostic.as_bytes()).await
            }
        }
    }
}
