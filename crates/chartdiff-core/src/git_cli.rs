//! Host backend over a local git repository.
//!
//! [`GitCliHost`] shells out to `git` for tree reads, ref updates and
//! working trees. A working tree is a scratch directory plus a private
//! index file, so the repository's own HEAD, index and checkout are never
//! touched. One host serves one repository; the `Repository` arguments of
//! the trait methods only identify it to the caller.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chartdiff_state::{
    Author, Change, ChangeType, HookPolicy, HostError, HostResult, NodeKind, RefCommands,
    RefTreeReader, Repository, TreeEntry, WorkingTree, WorkingTreeProvider,
};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

const SUBMODULE_MODE: &str = "160000";

/// Git CLI implementation of the tree, ref and working-tree contracts.
#[derive(Debug, Clone)]
pub struct GitCliHost {
    git_dir: PathBuf,
    scratch_dir: Option<PathBuf>,
}

impl GitCliHost {
    /// Open the repository containing `path` (bare or not).
    pub async fn open(path: &Path) -> HostResult<Self> {
        let output = Command::new("git")
            .arg("-C")
            .arg(path)
            .args(["rev-parse", "--absolute-git-dir"])
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(HostError::command(
                format!("git -C {} rev-parse --absolute-git-dir", path.display()),
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        let git_dir = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Self {
            git_dir: PathBuf::from(git_dir),
            scratch_dir: None,
        })
    }

    /// Create working trees under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn command(&self) -> Command {
        git_command(&self.git_dir)
    }

    /// Changed paths between the merge base of `to` and `from`, and `from`.
    pub async fn changes(&self, from: &str, to: &str) -> HostResult<Vec<Change>> {
        let range = format!("{to}...{from}");
        let mut cmd = self.command();
        cmd.args(["diff", "--raw", "-z", "-r", "--no-renames", "--no-ext-diff", range.as_str(), "--"]);
        let stdout = run(cmd, &format!("git diff --raw {range}")).await?;
        parse_raw_diff(&stdout)
    }

    fn scratch(&self, prefix: &str) -> HostResult<TempDir> {
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
}

fn git_command(git_dir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("--git-dir")
        .arg(git_dir)
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE")
        .env_remove("GIT_INDEX_FILE")
        .stdin(Stdio::null())
        .kill_on_drop(true);
    cmd
}

/// Run to completion; non-zero exit becomes [`HostError::Command`].
async fn run(mut cmd: Command, display: &str) -> HostResult<Vec<u8>> {
    let output = cmd.output().await?;
    if output.status.success() {
        return Ok(output.stdout);
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.contains("Not a valid object name") || stderr.contains("not a tree object") {
        return Err(HostError::not_found(display.to_string()));
    }
    Err(HostError::command(display, stderr))
}

/// Run and report whether it exited zero, for `--verify --quiet` probes.
async fn probe(mut cmd: Command) -> HostResult<Option<Vec<u8>>> {
    let output = cmd.output().await?;
    Ok(output.status.success().then_some(output.stdout))
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// Parse `git ls-tree -z` output: `<mode> <type> <oid>\t<path>\0`.
fn parse_ls_tree(stdout: &[u8]) -> HostResult<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    for record in stdout.split(|b| *b == 0).filter(|r| !r.is_empty()) {
        let record = String::from_utf8_lossy(record);
        let (meta, path) = record
            .split_once('\t')
            .ok_or_else(|| HostError::command("git ls-tree", format!("malformed entry {record}")))?;
        let mut fields = meta.split(' ');
        let (Some(_mode), Some(kind), Some(oid)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(HostError::command("git ls-tree", format!("malformed entry {record}")));
        };
        let kind = match kind {
            "blob" => NodeKind::File,
            "tree" => NodeKind::Directory,
            _ => NodeKind::Submodule,
        };
        entries.push(TreeEntry {
            object_id: oid.to_string(),
            path: path.to_string(),
            kind,
        });
    }
    Ok(entries)
}

/// Parse `git diff --raw -z` output.
fn parse_raw_diff(stdout: &[u8]) -> HostResult<Vec<Change>> {
    let mut tokens = stdout
        .split(|b| *b == 0)
        .map(|t| String::from_utf8_lossy(t).into_owned());
    let mut changes = Vec::new();
    while let Some(meta) = tokens.next() {
        if meta.is_empty() {
            continue;
        }
        let fields: Vec<&str> = meta.trim_start_matches(':').split(' ').collect();
        let [src_mode, dst_mode, _, _, status] = fields[..] else {
            return Err(HostError::command("git diff --raw", format!("malformed record {meta}")));
        };
        let letter = status.chars().next().unwrap_or('M');
        let mut path = tokens
            .next()
            .ok_or_else(|| HostError::command("git diff --raw", "missing path"))?;
        if matches!(letter, 'R' | 'C') {
            // Source then destination path.
            path = tokens
                .next()
                .ok_or_else(|| HostError::command("git diff --raw", "missing destination path"))?;
        }
        let change_type = match letter {
            'A' => ChangeType::Add,
            'D' => ChangeType::Delete,
            'R' => ChangeType::Move,
            'C' => ChangeType::Copy,
            _ => ChangeType::Modify,
        };
        let node_kind = if src_mode == SUBMODULE_MODE || dst_mode == SUBMODULE_MODE {
            NodeKind::Submodule
        } else {
            NodeKind::File
        };
        changes.push(Change::new(path, change_type, node_kind));
    }
    Ok(changes)
}

#[async_trait]
impl RefTreeReader for GitCliHost {
    async fn list_tree(
        &self,
        _repository: &Repository,
        rev: &str,
        path: &str,
        recursive: bool,
    ) -> HostResult<Vec<TreeEntry>> {
        let path = normalize(path);
        let mut cmd = self.command();
        cmd.args(["ls-tree", "-z", "--full-tree"]);
        if recursive {
            cmd.arg("-r");
        }
        cmd.arg(rev).arg("--");
        if !path.is_empty() {
            // A trailing slash lists the directory's contents, not the directory.
            cmd.arg(if recursive { path.clone() } else { format!("{path}/") });
        }
        let stdout = run(cmd, &format!("git ls-tree {rev} -- {path}")).await?;
        parse_ls_tree(&stdout)
    }

    async fn read_blob(&self, _repository: &Repository, object_id: &str) -> HostResult<Vec<u8>> {
        let mut cmd = self.command();
        cmd.args(["cat-file", "blob", object_id]);
        run(cmd, &format!("git cat-file blob {object_id}")).await
    }

    async fn node_kind(
        &self,
        _repository: &Repository,
        rev: &str,
        path: &str,
    ) -> HostResult<Option<NodeKind>> {
        let path = normalize(path);
        if path.is_empty() {
            return Ok(Some(NodeKind::Directory));
        }
        let mut cmd = self.command();
        cmd.args(["ls-tree", "-z", "--full-tree", rev, "--", path.as_str()]);
        let stdout = run(cmd, &format!("git ls-tree {rev} -- {path}")).await?;
        Ok(parse_ls_tree(&stdout)?
            .into_iter()
            .find(|entry| entry.path == path)
            .map(|entry| entry.kind))
    }
}

#[async_trait]
impl RefCommands for GitCliHost {
    async fn set_ref(
        &self,
        _repository: &Repository,
        name: &str,
        target: &str,
        dereference: bool,
    ) -> HostResult<()> {
        let mut cmd = self.command();
        cmd.args(["-c", "core.hooksPath=/dev/null", "update-ref"]);
        if !dereference {
            cmd.arg("--no-deref");
        }
        cmd.args([name, target]);
        run(cmd, &format!("git update-ref {name} {target}")).await?;
        Ok(())
    }

    async fn delete_ref(&self, repository: &Repository, name: &str) -> HostResult<()> {
        if self.resolve(repository, name).await?.is_none() {
            return Ok(());
        }
        let mut cmd = self.command();
        cmd.args(["-c", "core.hooksPath=/dev/null", "update-ref", "--no-deref", "-d", name]);
        run(cmd, &format!("git update-ref -d {name}")).await?;
        Ok(())
    }

    async fn resolve(&self, _repository: &Repository, rev: &str) -> HostResult<Option<String>> {
        let mut cmd = self.command();
        cmd.args(["rev-parse", "--verify", "--quiet", format!("{rev}^{{commit}}").as_str()]);
        Ok(probe(cmd).await?.map(|stdout| text(&stdout)))
    }

    async fn rev_list(
        &self,
        _repository: &Repository,
        rev: &str,
        limit: usize,
    ) -> HostResult<Vec<String>> {
        let mut cmd = self.command();
        cmd.args(["rev-list", format!("--max-count={limit}").as_str(), rev, "--"]);
        let stdout = run(cmd, &format!("git rev-list {rev}")).await?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl WorkingTreeProvider for GitCliHost {
    async fn acquire(
        &self,
        repository: &Repository,
        base_commit: Option<&str>,
    ) -> HostResult<Box<dyn WorkingTree>> {
        let work = self.scratch("worktree-")?;
        let meta = self.scratch("worktree-index-")?;
        let mut tree = GitWorkingTree {
            git_dir: self.git_dir.clone(),
            index: meta.path().join("index"),
            work,
            _meta: meta,
            head: None,
        };
        if let Some(base) = base_commit {
            let commit = self
                .resolve(repository, base)
                .await?
                .ok_or_else(|| HostError::not_found(base.to_string()))?;
            let mut cmd = tree.command();
            cmd.args(["read-tree", commit.as_str()]);
            run(cmd, "git read-tree").await?;
            let mut cmd = tree.command();
            cmd.args(["checkout-index", "-a", "-f", "-u"]);
            run(cmd, "git checkout-index").await?;
            tree.head = Some(commit);
        }
        debug!(work_tree = %tree.work.path().display(), "acquired working tree");
        Ok(Box::new(tree))
    }
}

/// Scratch checkout with a private index. Both directories are removed on drop.
struct GitWorkingTree {
    git_dir: PathBuf,
    index: PathBuf,
    work: TempDir,
    _meta: TempDir,
    head: Option<String>,
}

impl GitWorkingTree {
    fn command(&self) -> Command {
        let mut cmd = git_command(&self.git_dir);
        cmd.arg("--work-tree")
            .arg(self.work.path())
            .current_dir(self.work.path())
            .env("GIT_INDEX_FILE", &self.index);
        cmd
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = normalize(path);
        if path.is_empty() {
            self.work.path().to_path_buf()
        } else {
            self.work.path().join(path)
        }
    }

    async fn check_parent(&self, target: &Path) -> HostResult<()> {
        match target.parent() {
            Some(parent) if !tokio::fs::metadata(parent).await.is_ok_and(|m| m.is_dir()) => {
                Err(HostError::WorkingTree(format!(
                    "parent directory of {} does not exist",
                    target.display()
                )))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl WorkingTree for GitWorkingTree {
    async fn mkdir(&mut self, path: &str) -> HostResult<()> {
        tokio::fs::create_dir_all(self.resolve_path(path)).await?;
        Ok(())
    }

    async fn write(&mut self, path: &str, content: &[u8]) -> HostResult<()> {
        let target = self.resolve_path(path);
        self.check_parent(&target).await?;
        tokio::fs::write(&target, content).await?;
        Ok(())
    }

    async fn write_from(&mut self, path: &str, source: &Path) -> HostResult<()> {
        let target = self.resolve_path(path);
        self.check_parent(&target).await?;
        tokio::fs::copy(source, &target).await?;
        Ok(())
    }

    async fn stage_add(&mut self, path: &str) -> HostResult<()> {
        let path = normalize(path);
        let pathspec = if path.is_empty() { ".".to_string() } else { path };
        let mut cmd = self.command();
        cmd.args(["add", "-A", "-f", "--", pathspec.as_str()]);
        run(cmd, &format!("git add {pathspec}")).await?;
        Ok(())
    }

    async fn remove_all(&mut self) -> HostResult<()> {
        match tokio::fs::remove_file(&self.index).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let mut entries = tokio::fs::read_dir(self.work.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            } else {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    async fn status(&mut self) -> HostResult<Vec<String>> {
        let mut paths = BTreeSet::new();

        let mut cmd = self.command();
        match &self.head {
            Some(head) => cmd.args(["diff-index", "--cached", "--name-only", "-z", head.as_str(), "--"]),
            None => cmd.args(["ls-files", "-z", "--cached"]),
        };
        let staged = run(cmd, "git status (index)").await?;

        let mut cmd = self.command();
        cmd.args(["ls-files", "-z", "--others", "--modified"]);
        let unstaged = run(cmd, "git status (work tree)").await?;

        for record in staged.split(|b| *b == 0).chain(unstaged.split(|b| *b == 0)) {
            if !record.is_empty() {
                paths.insert(String::from_utf8_lossy(record).into_owned());
            }
        }
        Ok(paths.into_iter().collect())
    }

    async fn commit(&mut self, author: &Author, message: &str) -> HostResult<String> {
        let mut cmd = self.command();
        cmd.arg("write-tree");
        let tree = text(&run(cmd, "git write-tree").await?);

        let unchanged = match &self.head {
            Some(head) => {
                let mut cmd = self.command();
                cmd.args(["rev-parse", format!("{head}^{{tree}}").as_str()]);
                text(&run(cmd, "git rev-parse").await?) == tree
            }
            None => {
                let mut cmd = self.command();
                cmd.args(["ls-files", "-z", "--cached"]);
                run(cmd, "git ls-files").await?.is_empty()
            }
        };
        if unchanged {
            return Err(HostError::WorkingTree("nothing to commit".to_string()));
        }

        let mut cmd = self.command();
        cmd.args(["commit-tree", tree.as_str(), "-m", message]);
        if let Some(head) = &self.head {
            cmd.args(["-p", head.as_str()]);
        }
        cmd.env("GIT_AUTHOR_NAME", &author.name)
            .env("GIT_AUTHOR_EMAIL", &author.email)
            .env("GIT_COMMITTER_NAME", &author.name)
            .env("GIT_COMMITTER_EMAIL", &author.email);
        let commit = text(&run(cmd, "git commit-tree").await?);
        debug!(commit = %commit, message = %message, "created commit");
        self.head = Some(commit.clone());
        Ok(commit)
    }

    async fn publish(&mut self, branch: &str, hooks: HookPolicy) -> HostResult<()> {
        let head = self
            .head
            .clone()
            .ok_or_else(|| HostError::WorkingTree("no commits to publish".to_string()))?;
        let name = format!("refs/heads/{branch}");
        let mut cmd = self.command();
        if hooks == HookPolicy::Suppress {
            cmd.args(["-c", "core.hooksPath=/dev/null"]);
        }
        cmd.args(["update-ref", name.as_str(), head.as_str()]);
        run(cmd, &format!("git update-ref {name}")).await?;
        Ok(())
    }

    fn head(&self) -> Option<&str> {
        self.head.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ls_tree_records() {
        let out = b"100644 blob aaa\tcharts/app/Chart.yaml\0040000 tree bbb\tcharts/app/templates\0160000 commit ccc\tvendor/lib\0";
        let entries = parse_ls_tree(out).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind, NodeKind::File);
        assert_eq!(entries[0].path, "charts/app/Chart.yaml");
        assert_eq!(entries[1].kind, NodeKind::Directory);
        assert_eq!(entries[2].kind, NodeKind::Submodule);
    }

    #[test]
    fn parses_raw_diff_records() {
        let out = b":000000 100644 0000000 aaaaaaa A\0charts/app/Chart.yaml\0:100644 000000 bbbbbbb 0000000 D\0old.yaml\0:160000 160000 ccccccc ddddddd M\0vendor/lib\0:100644 100644 eeeeeee fffffff R100\0a.yaml\0b.yaml\0";
        let changes = parse_raw_diff(out).unwrap();
        assert_eq!(
            changes,
            vec![
                Change::new("charts/app/Chart.yaml", ChangeType::Add, NodeKind::File),
                Change::new("old.yaml", ChangeType::Delete, NodeKind::File),
                Change::new("vendor/lib", ChangeType::Modify, NodeKind::Submodule),
                Change::new("b.yaml", ChangeType::Move, NodeKind::File),
            ]
        );
    }

    #[test]
    fn malformed_raw_diff_is_error() {
        assert!(parse_raw_diff(b":100644 broken\0path\0").is_err());
    }
}
