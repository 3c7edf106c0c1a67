//! Host collaborator contracts for chartdiff
//!
//! The rendering pipeline never talks to a source-control server directly.
//! Everything it needs from the host is expressed as one of these traits:
//! - `RefTreeReader`: list a ref's tree and read blobs without a checkout
//! - `WorkingTreeProvider` / `WorkingTree`: an ephemeral, isolated working copy
//! - `RefCommands`: low-level ref updates and history queries
//! - `SettingsStore`: raw per-scope configuration values
//! - `PullRequestService`, `CommentService`, `DiffLinkBuilder`: the PR surface
//! - `ElevatedPrincipal`: privileged identity for host operations
//!
//! All I/O traits are async and backend-agnostic. In-memory fakes are
//! provided for testing via the `fakes` module.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HostError;

/// Result type for host operations
pub type HostResult<T> = std::result::Result<T, HostError>;

// ---------------------------------------------------------------------------
// Domain records
// ---------------------------------------------------------------------------

/// A repository known to the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    pub id: u64,
    pub project_id: u64,
    pub slug: String,
}

impl Repository {
    pub fn new(id: u64, project_id: u64, slug: impl Into<String>) -> Self {
        Self {
            id,
            project_id,
            slug: slug.into(),
        }
    }
}

/// One side of a pull request: repository, ref id and its latest commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub repository: Repository,
    /// Fully qualified ref, e.g. `refs/heads/feature`
    pub id: String,
    pub latest_commit: String,
}

/// Commit identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// A pull request as delivered by the host's event surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: u64,
    /// Source side (the branch being merged)
    pub from_ref: RepositoryRef,
    /// Destination side (the branch merged into)
    pub to_ref: RepositoryRef,
    pub author: Author,
}

impl PullRequest {
    /// The repository that owns the pull request (its destination).
    pub fn repository(&self) -> &Repository {
        &self.to_ref.repository
    }
}

/// Kind of change reported for a path in a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Add,
    Modify,
    Move,
    Copy,
    Delete,
}

/// Kind of tree node at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Directory,
    Submodule,
}

/// A changed path in a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Slash-separated, repository-relative path
    pub path: String,
    pub change_type: ChangeType,
    pub node_kind: NodeKind,
}

impl Change {
    pub fn new(path: impl Into<String>, change_type: ChangeType, node_kind: NodeKind) -> Self {
        Self {
            path: path.into(),
            change_type,
            node_kind,
        }
    }

    /// Non-empty path components.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|c| !c.is_empty() && *c != ".")
    }
}

/// An entry returned by a tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub object_id: String,
    /// Repository-relative path of the entry
    pub path: String,
    pub kind: NodeKind,
}

/// Whether repository hooks run when a working tree is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPolicy {
    Run,
    Suppress,
}

/// Permission requested when running under an elevated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    RepoRead,
    RepoWrite,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::RepoRead => write!(f, "REPO_READ"),
            Permission::RepoWrite => write!(f, "REPO_WRITE"),
        }
    }
}

/// Scope a raw setting is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsScope {
    Global,
    Project(u64),
    Repository(u64),
}

// ---------------------------------------------------------------------------
// Tree access
// ---------------------------------------------------------------------------

/// Read access to the trees of arbitrary revisions.
///
/// A `path` of `""` or `"."` denotes the repository root.
#[async_trait]
pub trait RefTreeReader: Send + Sync {
    /// List entries below `path` at `rev`. Recursive listings only return
    /// files (and submodule links), never directory entries.
    async fn list_tree(
        &self,
        repository: &Repository,
        rev: &str,
        path: &str,
        recursive: bool,
    ) -> HostResult<Vec<TreeEntry>>;

    /// Read a blob by object id.
    async fn read_blob(&self, repository: &Repository, object_id: &str) -> HostResult<Vec<u8>>;

    /// Kind of node at `path` in `rev`, or `None` when the path does not exist.
    async fn node_kind(
        &self,
        repository: &Repository,
        rev: &str,
        path: &str,
    ) -> HostResult<Option<NodeKind>>;
}

// ---------------------------------------------------------------------------
// Working trees
// ---------------------------------------------------------------------------

/// An ephemeral, isolated working copy. Dropping it releases it.
#[async_trait]
pub trait WorkingTree: Send {
    /// Create a directory and any missing parents.
    async fn mkdir(&mut self, path: &str) -> HostResult<()>;

    /// Write bytes to a file; the parent directory must exist.
    async fn write(&mut self, path: &str, content: &[u8]) -> HostResult<()>;

    /// Copy a local file into the tree; the parent directory must exist.
    async fn write_from(&mut self, path: &str, source: &Path) -> HostResult<()>;

    /// Stage a file or directory for the next commit.
    async fn stage_add(&mut self, path: &str) -> HostResult<()>;

    /// Recursively remove everything from the tree and the index.
    async fn remove_all(&mut self) -> HostResult<()>;

    /// Paths that differ from the last commit (staged or not).
    async fn status(&mut self) -> HostResult<Vec<String>>;

    /// Commit the staged content and return the new commit id.
    async fn commit(&mut self, author: &Author, message: &str) -> HostResult<String>;

    /// Publish the current history as `refs/heads/<branch>`.
    async fn publish(&mut self, branch: &str, hooks: HookPolicy) -> HostResult<()>;

    /// Current tip of the tree's history, if anything was committed.
    fn head(&self) -> Option<&str>;
}

/// Hands out working trees.
#[async_trait]
pub trait WorkingTreeProvider: Send + Sync {
    /// Acquire a working tree on `repository`. With `base_commit == None`
    /// the tree starts empty with no history.
    async fn acquire(
        &self,
        repository: &Repository,
        base_commit: Option<&str>,
    ) -> HostResult<Box<dyn WorkingTree>>;
}

// ---------------------------------------------------------------------------
// Refs
// ---------------------------------------------------------------------------

/// Low-level ref commands.
#[async_trait]
pub trait RefCommands: Send + Sync {
    /// Point `name` at whatever `target` resolves to. With
    /// `dereference == false` a symbolic `name` is overwritten, not followed.
    async fn set_ref(
        &self,
        repository: &Repository,
        name: &str,
        target: &str,
        dereference: bool,
    ) -> HostResult<()>;

    /// Delete `name`. Deleting a missing ref succeeds.
    async fn delete_ref(&self, repository: &Repository, name: &str) -> HostResult<()>;

    /// Resolve a ref or revision to a commit id.
    async fn resolve(&self, repository: &Repository, rev: &str) -> HostResult<Option<String>>;

    /// Commits reachable from `rev`, newest first, at most `limit`.
    async fn rev_list(
        &self,
        repository: &Repository,
        rev: &str,
        limit: usize,
    ) -> HostResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Raw settings storage. Typed resolution and precedence live in the core.
pub trait SettingsStore: Send + Sync {
    fn get(&self, scope: SettingsScope, key: &str) -> Option<String>;
}

// ---------------------------------------------------------------------------
// Pull-request surface
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PullRequestService: Send + Sync {
    /// Fetch a pull request; `None` once it no longer exists.
    async fn get(&self, repository_id: u64, pull_request_id: u64)
        -> HostResult<Option<PullRequest>>;

    /// Changed paths between the pull request's merge base and source ref.
    async fn changes(&self, pull_request: &PullRequest) -> HostResult<Vec<Change>>;
}

#[async_trait]
pub trait CommentService: Send + Sync {
    async fn add_comment(&self, pull_request: &PullRequest, text: &str) -> HostResult<()>;
}

/// Builds links to the host's commit diff view.
pub trait DiffLinkBuilder: Send + Sync {
    fn commit_diff_url(&self, pull_request: &PullRequest, commit: &str, since: &str) -> String;
}

/// A consistently-identified principal used for privileged operations.
#[async_trait]
pub trait ElevatedPrincipal: Send + Sync {
    /// Display name of the principal.
    fn name(&self) -> &str;

    /// Check that the principal may perform `permission` for `reason`.
    async fn authorize(&self, reason: &str, permission: Permission) -> HostResult<()>;
}
