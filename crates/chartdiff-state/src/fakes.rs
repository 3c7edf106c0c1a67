//! In-memory fakes for host traits (testing only)
//!
//! Provides `MemoryRepositoryHost` (tree reader, ref commands and working
//! tree provider over one shared object store), `MemorySettingsStore`,
//! `MemoryPullRequestService`, `RecordingCommentService`,
//! `StaticLinkBuilder` and `RecordingPrincipal`.
//!
//! Object and commit ids are SHA-256 digests of their content, so identical
//! inputs always produce identical ids.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::HostError;
use crate::host_traits::*;

fn digest(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn is_under(path: &str, prefix: &str) -> bool {
    prefix.is_empty() || path == prefix || path.starts_with(&format!("{prefix}/"))
}

// ---------------------------------------------------------------------------
// MemoryRepositoryHost
// ---------------------------------------------------------------------------

/// A commit stored by `MemoryRepositoryHost`.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub id: String,
    pub parent: Option<String>,
    /// path -> blob id
    pub tree: BTreeMap<String, String>,
    pub author: Author,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RepoState {
    blobs: HashMap<String, Vec<u8>>,
    commits: HashMap<String, CommitRecord>,
    refs: BTreeMap<String, String>,
    publishes: Vec<(String, HookPolicy)>,
}

impl RepoState {
    fn store_blob(&mut self, content: &[u8]) -> String {
        let id = digest(&[b"blob".as_slice(), content]);
        self.blobs
            .entry(id.clone())
            .or_insert_with(|| content.to_vec());
        id
    }

    fn resolve(&self, rev: &str) -> Option<String> {
        if let Some(id) = self.refs.get(rev) {
            return Some(id.clone());
        }
        if let Some(id) = self.refs.get(&format!("refs/heads/{rev}")) {
            return Some(id.clone());
        }
        self.commits.contains_key(rev).then(|| rev.to_string())
    }

    fn create_commit(
        &mut self,
        parent: Option<String>,
        files: &BTreeMap<String, Vec<u8>>,
        author: &Author,
        message: &str,
    ) -> String {
        let tree: BTreeMap<String, String> = files
            .iter()
            .map(|(path, content)| (path.clone(), self.store_blob(content)))
            .collect();

        let parent_id = parent.clone().unwrap_or_default();
        let mut parts: Vec<&[u8]> = vec![
            b"commit".as_slice(),
            parent_id.as_bytes(),
            author.name.as_bytes(),
            author.email.as_bytes(),
            message.as_bytes(),
        ];
        for (path, blob) in &tree {
            parts.push(path.as_bytes());
            parts.push(blob.as_bytes());
        }
        let id = digest(&parts);

        self.commits.entry(id.clone()).or_insert_with(|| CommitRecord {
            id: id.clone(),
            parent,
            tree,
            author: author.clone(),
            message: message.to_string(),
            created_at: Utc::now(),
        });
        id
    }

    fn tree_contents(&self, commit: &str) -> BTreeMap<String, Vec<u8>> {
        self.commits
            .get(commit)
            .map(|record| {
                record
                    .tree
                    .iter()
                    .filter_map(|(path, blob)| {
                        self.blobs.get(blob).map(|c| (path.clone(), c.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

type SharedRepos = Arc<Mutex<HashMap<u64, RepoState>>>;

/// In-memory repository host shared by readers, ref commands and working trees.
#[derive(Debug, Default)]
pub struct MemoryRepositoryHost {
    repos: SharedRepos,
    live_trees: Arc<AtomicUsize>,
    fail_ref_updates: AtomicBool,
}

impl MemoryRepositoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a commit containing exactly `files` and return its id.
    pub fn add_commit(
        &self,
        repository: &Repository,
        parent: Option<&str>,
        files: &[(&str, &str)],
    ) -> String {
        let files: BTreeMap<String, Vec<u8>> = files
            .iter()
            .map(|(path, content)| (normalize(path), content.as_bytes().to_vec()))
            .collect();
        let mut repos = self.repos.lock().unwrap();
        let state = repos.entry(repository.id).or_default();
        state.create_commit(
            parent.map(str::to_string),
            &files,
            &Author::new("fixture", "fixture@example.com"),
            "fixture",
        )
    }

    /// Point a ref at a commit without going through `RefCommands`.
    pub fn set_branch(&self, repository: &Repository, name: &str, commit: &str) {
        let mut repos = self.repos.lock().unwrap();
        repos
            .entry(repository.id)
            .or_default()
            .refs
            .insert(name.to_string(), commit.to_string());
    }

    pub fn ref_target(&self, repository: &Repository, name: &str) -> Option<String> {
        let repos = self.repos.lock().unwrap();
        repos
            .get(&repository.id)
            .and_then(|state| state.refs.get(name).cloned())
    }

    pub fn ref_names(&self, repository: &Repository) -> Vec<String> {
        let repos = self.repos.lock().unwrap();
        repos
            .get(&repository.id)
            .map(|state| state.refs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn commit(&self, repository: &Repository, id: &str) -> Option<CommitRecord> {
        let repos = self.repos.lock().unwrap();
        repos
            .get(&repository.id)
            .and_then(|state| state.commits.get(id).cloned())
    }

    /// Files of a commit decoded as UTF-8 (lossy).
    pub fn commit_files(&self, repository: &Repository, id: &str) -> BTreeMap<String, String> {
        let repos = self.repos.lock().unwrap();
        repos
            .get(&repository.id)
            .map(|state| {
                state
                    .tree_contents(id)
                    .into_iter()
                    .map(|(path, content)| (path, String::from_utf8_lossy(&content).into_owned()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every `WorkingTree::publish` call seen for `repository`.
    pub fn publishes(&self, repository: &Repository) -> Vec<(String, HookPolicy)> {
        let repos = self.repos.lock().unwrap();
        repos
            .get(&repository.id)
            .map(|state| state.publishes.clone())
            .unwrap_or_default()
    }

    /// Number of working trees acquired and not yet dropped.
    pub fn live_working_trees(&self) -> usize {
        self.live_trees.load(Ordering::SeqCst)
    }

    /// Make every subsequent `set_ref` fail.
    pub fn fail_ref_updates(&self, fail: bool) {
        self.fail_ref_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RefTreeReader for MemoryRepositoryHost {
    async fn list_tree(
        &self,
        repository: &Repository,
        rev: &str,
        path: &str,
        recursive: bool,
    ) -> HostResult<Vec<TreeEntry>> {
        let repos = self.repos.lock().unwrap();
        let state = repos
            .get(&repository.id)
            .ok_or_else(|| HostError::not_found(format!("repository {}", repository.id)))?;
        let commit = state
            .resolve(rev)
            .ok_or_else(|| HostError::not_found(rev.to_string()))?;
        let record = &state.commits[&commit];
        let prefix = normalize(path);

        let mut entries = Vec::new();
        let mut seen_dirs = BTreeSet::new();
        for (file, blob) in &record.tree {
            if !is_under(file, &prefix) {
                continue;
            }
            if file == &prefix {
                entries.push(TreeEntry {
                    object_id: blob.clone(),
                    path: file.clone(),
                    kind: NodeKind::File,
                });
                continue;
            }
            let rest = if prefix.is_empty() {
                file.as_str()
            } else {
                &file[prefix.len() + 1..]
            };
            match rest.split_once('/') {
                Some((dir, _)) if !recursive => {
                    let dir_path = if prefix.is_empty() {
                        dir.to_string()
                    } else {
                        format!("{prefix}/{dir}")
                    };
                    if seen_dirs.insert(dir_path.clone()) {
                        entries.push(TreeEntry {
                            object_id: digest(&[b"tree".as_slice(), commit.as_bytes(), dir_path.as_bytes()]),
                            path: dir_path,
                            kind: NodeKind::Directory,
                        });
                    }
                }
                _ => entries.push(TreeEntry {
                    object_id: blob.clone(),
                    path: file.clone(),
                    kind: NodeKind::File,
                }),
            }
        }
        Ok(entries)
    }

    async fn read_blob(&self, repository: &Repository, object_id: &str) -> HostResult<Vec<u8>> {
        let repos = self.repos.lock().unwrap();
        repos
            .get(&repository.id)
            .and_then(|state| state.blobs.get(object_id).cloned())
            .ok_or_else(|| HostError::not_found(format!("blob {object_id}")))
    }

    async fn node_kind(
        &self,
        repository: &Repository,
        rev: &str,
        path: &str,
    ) -> HostResult<Option<NodeKind>> {
        let repos = self.repos.lock().unwrap();
        let state = repos
            .get(&repository.id)
            .ok_or_else(|| HostError::not_found(format!("repository {}", repository.id)))?;
        let commit = state
            .resolve(rev)
            .ok_or_else(|| HostError::not_found(rev.to_string()))?;
        let tree = &state.commits[&commit].tree;
        let path = normalize(path);

        if path.is_empty() {
            return Ok(Some(NodeKind::Directory));
        }
        if tree.contains_key(&path) {
            return Ok(Some(NodeKind::File));
        }
        let dir_prefix = format!("{path}/");
        if tree.keys().any(|file| file.starts_with(&dir_prefix)) {
            return Ok(Some(NodeKind::Directory));
        }
        Ok(None)
    }
}

#[async_trait]
impl RefCommands for MemoryRepositoryHost {
    async fn set_ref(
        &self,
        repository: &Repository,
        name: &str,
        target: &str,
        _dereference: bool,
    ) -> HostResult<()> {
        if self.fail_ref_updates.load(Ordering::SeqCst) {
            return Err(HostError::command(
                format!("update-ref {name} {target}"),
                "ref updates disabled",
            ));
        }
        let mut repos = self.repos.lock().unwrap();
        let state = repos.entry(repository.id).or_default();
        let commit = state
            .resolve(target)
            .ok_or_else(|| HostError::not_found(target.to_string()))?;
        state.refs.insert(name.to_string(), commit);
        Ok(())
    }

    async fn delete_ref(&self, repository: &Repository, name: &str) -> HostResult<()> {
        let mut repos = self.repos.lock().unwrap();
        if let Some(state) = repos.get_mut(&repository.id) {
            state.refs.remove(name);
        }
        Ok(())
    }

    async fn resolve(&self, repository: &Repository, rev: &str) -> HostResult<Option<String>> {
        let repos = self.repos.lock().unwrap();
        Ok(repos.get(&repository.id).and_then(|state| state.resolve(rev)))
    }

    async fn rev_list(
        &self,
        repository: &Repository,
        rev: &str,
        limit: usize,
    ) -> HostResult<Vec<String>> {
        let repos = self.repos.lock().unwrap();
        let state = repos
            .get(&repository.id)
            .ok_or_else(|| HostError::not_found(format!("repository {}", repository.id)))?;
        let mut next = state.resolve(rev);
        let mut revisions = Vec::new();
        while let Some(id) = next {
            if revisions.len() >= limit {
                break;
            }
            next = state.commits.get(&id).and_then(|c| c.parent.clone());
            revisions.push(id);
        }
        Ok(revisions)
    }
}

#[async_trait]
impl WorkingTreeProvider for MemoryRepositoryHost {
    async fn acquire(
        &self,
        repository: &Repository,
        base_commit: Option<&str>,
    ) -> HostResult<Box<dyn WorkingTree>> {
        let (head, files) = {
            let mut repos = self.repos.lock().unwrap();
            let state = repos.entry(repository.id).or_default();
            match base_commit {
                Some(rev) => {
                    let commit = state
                        .resolve(rev)
                        .ok_or_else(|| HostError::not_found(rev.to_string()))?;
                    let files = state.tree_contents(&commit);
                    (Some(commit), files)
                }
                None => (None, BTreeMap::new()),
            }
        };

        let mut dirs = BTreeSet::new();
        for path in files.keys() {
            let mut current = path.as_str();
            while let Some((parent, _)) = current.rsplit_once('/') {
                dirs.insert(parent.to_string());
                current = parent;
            }
        }

        self.live_trees.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryWorkingTree {
            repos: Arc::clone(&self.repos),
            repository_id: repository.id,
            live: Arc::clone(&self.live_trees),
            dirs,
            index: files.clone(),
            files,
            head,
        }))
    }
}

// ---------------------------------------------------------------------------
// MemoryWorkingTree
// ---------------------------------------------------------------------------

/// Working tree handed out by `MemoryRepositoryHost`.
///
/// Writes require the parent directory to exist, like a real filesystem.
#[derive(Debug)]
pub struct MemoryWorkingTree {
    repos: SharedRepos,
    repository_id: u64,
    live: Arc<AtomicUsize>,
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    index: BTreeMap<String, Vec<u8>>,
    head: Option<String>,
}

impl MemoryWorkingTree {
    fn head_files(&self) -> BTreeMap<String, Vec<u8>> {
        let Some(head) = &self.head else {
            return BTreeMap::new();
        };
        let repos = self.repos.lock().unwrap();
        repos
            .get(&self.repository_id)
            .map(|state| state.tree_contents(head))
            .unwrap_or_default()
    }

    fn check_parent(&self, path: &str) -> HostResult<()> {
        match path.rsplit_once('/') {
            Some((parent, _)) if !self.dirs.contains(parent) => Err(HostError::WorkingTree(
                format!("parent directory of {path} does not exist"),
            )),
            _ => Ok(()),
        }
    }
}

impl Drop for MemoryWorkingTree {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkingTree for MemoryWorkingTree {
    async fn mkdir(&mut self, path: &str) -> HostResult<()> {
        let path = normalize(path);
        let mut current = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(component);
            self.dirs.insert(current.clone());
        }
        Ok(())
    }

    async fn write(&mut self, path: &str, content: &[u8]) -> HostResult<()> {
        let path = normalize(path);
        self.check_parent(&path)?;
        self.files.insert(path, content.to_vec());
        Ok(())
    }

    async fn write_from(&mut self, path: &str, source: &Path) -> HostResult<()> {
        let content = std::fs::read(source)?;
        self.write(path, &content).await
    }

    async fn stage_add(&mut self, path: &str) -> HostResult<()> {
        let prefix = normalize(path);
        let matching: BTreeSet<String> = self
            .files
            .keys()
            .chain(self.index.keys())
            .filter(|file| is_under(file, &prefix))
            .cloned()
            .collect();
        if matching.is_empty() {
            return Err(HostError::not_found(format!("pathspec {path}")));
        }
        for file in matching {
            match self.files.get(&file) {
                Some(content) => {
                    self.index.insert(file, content.clone());
                }
                None => {
                    self.index.remove(&file);
                }
            }
        }
        Ok(())
    }

    async fn remove_all(&mut self) -> HostResult<()> {
        self.files.clear();
        self.index.clear();
        self.dirs.clear();
        Ok(())
    }

    async fn status(&mut self) -> HostResult<Vec<String>> {
        let head = self.head_files();
        let paths: BTreeSet<&String> = self
            .files
            .keys()
            .chain(self.index.keys())
            .chain(head.keys())
            .collect();
        Ok(paths
            .into_iter()
            .filter(|path| {
                let committed = head.get(*path);
                self.files.get(*path) != committed || self.index.get(*path) != committed
            })
            .cloned()
            .collect())
    }

    async fn commit(&mut self, author: &Author, message: &str) -> HostResult<String> {
        if self.index == self.head_files() {
            return Err(HostError::WorkingTree("nothing to commit".to_string()));
        }
        let mut repos = self.repos.lock().unwrap();
        let state = repos.entry(self.repository_id).or_default();
        let id = state.create_commit(self.head.clone(), &self.index, author, message);
        self.head = Some(id.clone());
        Ok(id)
    }

    async fn publish(&mut self, branch: &str, hooks: HookPolicy) -> HostResult<()> {
        let head = self
            .head
            .clone()
            .ok_or_else(|| HostError::WorkingTree("no commits to publish".to_string()))?;
        let mut repos = self.repos.lock().unwrap();
        let state = repos.entry(self.repository_id).or_default();
        state.refs.insert(format!("refs/heads/{branch}"), head);
        state.publishes.push((branch.to_string(), hooks));
        Ok(())
    }

    fn head(&self) -> Option<&str> {
        self.head.as_deref()
    }
}

// ---------------------------------------------------------------------------
// MemorySettingsStore
// ---------------------------------------------------------------------------

/// In-memory settings backed by a `HashMap<(scope, key), value>`.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<HashMap<(SettingsScope, String), String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, scope: SettingsScope, key: &str, value: impl Into<String>) {
        let mut values = self.values.lock().unwrap();
        values.insert((scope, key.to_string()), value.into());
    }

    pub fn remove(&self, scope: SettingsScope, key: &str) {
        let mut values = self.values.lock().unwrap();
        values.remove(&(scope, key.to_string()));
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, scope: SettingsScope, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap();
        values.get(&(scope, key.to_string())).cloned()
    }
}

// ---------------------------------------------------------------------------
// Pull-request surface
// ---------------------------------------------------------------------------

/// In-memory pull requests keyed by `(repository id, pull request id)`.
#[derive(Debug, Default)]
pub struct MemoryPullRequestService {
    pulls: Mutex<HashMap<(u64, u64), (PullRequest, Vec<Change>)>>,
}

impl MemoryPullRequestService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pull_request: PullRequest, changes: Vec<Change>) {
        let key = (pull_request.repository().id, pull_request.id);
        let mut pulls = self.pulls.lock().unwrap();
        pulls.insert(key, (pull_request, changes));
    }

    pub fn remove(&self, repository_id: u64, pull_request_id: u64) {
        let mut pulls = self.pulls.lock().unwrap();
        pulls.remove(&(repository_id, pull_request_id));
    }
}

#[async_trait]
impl PullRequestService for MemoryPullRequestService {
    async fn get(
        &self,
        repository_id: u64,
        pull_request_id: u64,
    ) -> HostResult<Option<PullRequest>> {
        let pulls = self.pulls.lock().unwrap();
        Ok(pulls
            .get(&(repository_id, pull_request_id))
            .map(|(pr, _)| pr.clone()))
    }

    async fn changes(&self, pull_request: &PullRequest) -> HostResult<Vec<Change>> {
        let pulls = self.pulls.lock().unwrap();
        pulls
            .get(&(pull_request.repository().id, pull_request.id))
            .map(|(_, changes)| changes.clone())
            .ok_or_else(|| HostError::not_found(format!("pull request {}", pull_request.id)))
    }
}

/// Records every posted comment as `(pull request id, text)`.
#[derive(Debug, Default)]
pub struct RecordingCommentService {
    comments: Mutex<Vec<(u64, String)>>,
}

impl RecordingCommentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        self.comments.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommentService for RecordingCommentService {
    async fn add_comment(&self, pull_request: &PullRequest, text: &str) -> HostResult<()> {
        let mut comments = self.comments.lock().unwrap();
        comments.push((pull_request.id, text.to_string()));
        Ok(())
    }
}

/// Builds `<base>/projects/<p>/repos/<slug>/pull-requests/<id>/commits/<c>?since=<s>` links.
#[derive(Debug, Clone)]
pub struct StaticLinkBuilder {
    pub base_url: String,
}

impl StaticLinkBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl DiffLinkBuilder for StaticLinkBuilder {
    fn commit_diff_url(&self, pull_request: &PullRequest, commit: &str, since: &str) -> String {
        let repository = pull_request.repository();
        format!(
            "{}/projects/{}/repos/{}/pull-requests/{}/commits/{}?since={}",
            self.base_url.trim_end_matches('/'),
            repository.project_id,
            repository.slug,
            pull_request.id,
            commit,
            since
        )
    }
}

/// Principal that records every authorisation request.
#[derive(Debug, Default)]
pub struct RecordingPrincipal {
    name: String,
    deny: AtomicBool,
    requests: Mutex<Vec<(String, Permission)>>,
}

impl RecordingPrincipal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Reject every subsequent request.
    pub fn deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<(String, Permission)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ElevatedPrincipal for RecordingPrincipal {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authorize(&self, reason: &str, permission: Permission) -> HostResult<()> {
        self.requests
            .lock()
            .unwrap()
            .push((reason.to_string(), permission));
        if self.deny.load(Ordering::SeqCst) {
            return Err(HostError::PermissionDenied {
                permission: permission.to_string(),
                reason: reason.to_string(),
            });
        }
        Ok(())
    }
}
