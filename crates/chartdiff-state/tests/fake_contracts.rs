//! Contract tests for the host traits.
//!
//! These tests pin down the behaviour the pipeline relies on, using the
//! in-memory fakes. Any conforming host implementation must pass them.

use chartdiff_state::fakes::{
    MemoryPullRequestService, MemoryRepositoryHost, MemorySettingsStore, RecordingCommentService,
    RecordingPrincipal, StaticLinkBuilder,
};
use chartdiff_state::*;

fn repo() -> Repository {
    Repository::new(1, 10, "charts")
}

fn author() -> Author {
    Author::new("dev", "dev@example.com")
}

// ===========================================================================
// RefTreeReader
// ===========================================================================

#[tokio::test]
async fn list_tree_recursive_returns_files_below_path() {
    let host = MemoryRepositoryHost::new();
    let commit = host.add_commit(
        &repo(),
        None,
        &[
            ("app/Chart.yaml", "name: app"),
            ("app/templates/svc.yaml", "kind: Service"),
            ("other/readme.md", "hi"),
        ],
    );

    let entries = host.list_tree(&repo(), &commit, "app", true).await.unwrap();
    let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();

    assert_eq!(paths, vec!["app/Chart.yaml", "app/templates/svc.yaml"]);
    assert!(entries.iter().all(|e| e.kind == NodeKind::File));
}

#[tokio::test]
async fn list_tree_flat_reports_directories_once() {
    let host = MemoryRepositoryHost::new();
    let commit = host.add_commit(
        &repo(),
        None,
        &[
            ("app/Chart.yaml", "name: app"),
            ("app/templates/a.yaml", "a"),
            ("app/templates/b.yaml", "b"),
        ],
    );

    let entries = host.list_tree(&repo(), &commit, "app", false).await.unwrap();
    let listed: Vec<(&str, NodeKind)> = entries.iter().map(|e| (e.path.as_str(), e.kind)).collect();

    assert_eq!(
        listed,
        vec![
            ("app/Chart.yaml", NodeKind::File),
            ("app/templates", NodeKind::Directory),
        ]
    );
}

#[tokio::test]
async fn read_blob_returns_listed_content() {
    let host = MemoryRepositoryHost::new();
    let commit = host.add_commit(&repo(), None, &[("a/values.yaml", "replicas: 2")]);

    let entries = host.list_tree(&repo(), &commit, ".", true).await.unwrap();
    let blob = host.read_blob(&repo(), &entries[0].object_id).await.unwrap();

    assert_eq!(blob, b"replicas: 2");
}

#[tokio::test]
async fn node_kind_distinguishes_file_directory_and_missing() {
    let host = MemoryRepositoryHost::new();
    let commit = host.add_commit(&repo(), None, &[("a/Chart.yaml", "name: a")]);
    host.set_branch(&repo(), "refs/heads/main", &commit);

    let kind = |path: &'static str| {
        let host = &host;
        async move { host.node_kind(&repo(), "refs/heads/main", path).await.unwrap() }
    };

    assert_eq!(kind("a/Chart.yaml").await, Some(NodeKind::File));
    assert_eq!(kind("a").await, Some(NodeKind::Directory));
    assert_eq!(kind("b/Chart.yaml").await, None);
}

#[tokio::test]
async fn unknown_revision_is_not_found() {
    let host = MemoryRepositoryHost::new();
    host.add_commit(&repo(), None, &[("a", "a")]);

    let err = host.list_tree(&repo(), "deadbeef", ".", true).await.unwrap_err();
    assert!(matches!(err, HostError::NotFound { .. }));
}

// ===========================================================================
// WorkingTree
// ===========================================================================

#[tokio::test]
async fn working_tree_requires_parent_directory() {
    let host = MemoryRepositoryHost::new();
    let mut tree = host.acquire(&repo(), None).await.unwrap();

    let err = tree.write("a/b.yaml", b"x").await.unwrap_err();
    assert!(matches!(err, HostError::WorkingTree(_)));

    tree.mkdir("a").await.unwrap();
    tree.write("a/b.yaml", b"x").await.unwrap();
}

#[tokio::test]
async fn working_tree_commit_chain_and_status() {
    let host = MemoryRepositoryHost::new();
    let mut tree = host.acquire(&repo(), None).await.unwrap();
    assert!(tree.status().await.unwrap().is_empty());

    tree.mkdir("app").await.unwrap();
    tree.write("app/default.yaml", b"one").await.unwrap();
    tree.stage_add("app/default.yaml").await.unwrap();
    assert_eq!(tree.status().await.unwrap(), vec!["app/default.yaml"]);

    let first = tree.commit(&author(), "helm template").await.unwrap();
    assert!(tree.status().await.unwrap().is_empty());

    tree.remove_all().await.unwrap();
    tree.mkdir("app").await.unwrap();
    tree.write("app/default.yaml", b"two").await.unwrap();
    tree.stage_add("app").await.unwrap();
    let second = tree.commit(&author(), "helm template").await.unwrap();

    assert_eq!(host.commit(&repo(), &first).unwrap().parent, None);
    assert_eq!(host.commit(&repo(), &second).unwrap().parent, Some(first));
    assert_eq!(tree.head(), Some(second.as_str()));
}

#[tokio::test]
async fn working_tree_refuses_empty_commit() {
    let host = MemoryRepositoryHost::new();
    let mut tree = host.acquire(&repo(), None).await.unwrap();

    assert!(tree.commit(&author(), "nothing").await.is_err());
}

#[tokio::test]
async fn publish_creates_branch_and_records_hook_policy() {
    let host = MemoryRepositoryHost::new();
    let mut tree = host.acquire(&repo(), None).await.unwrap();
    tree.write("a.yaml", b"a").await.unwrap();
    tree.stage_add(".").await.unwrap();
    let head = tree.commit(&author(), "msg").await.unwrap();

    tree.publish("refs/pull-requests/1/helm", HookPolicy::Suppress)
        .await
        .unwrap();

    assert_eq!(
        host.ref_target(&repo(), "refs/heads/refs/pull-requests/1/helm"),
        Some(head)
    );
    assert_eq!(
        host.publishes(&repo()),
        vec![("refs/pull-requests/1/helm".to_string(), HookPolicy::Suppress)]
    );
}

#[tokio::test]
async fn dropping_working_tree_releases_it() {
    let host = MemoryRepositoryHost::new();
    let tree = host.acquire(&repo(), None).await.unwrap();
    assert_eq!(host.live_working_trees(), 1);

    drop(tree);
    assert_eq!(host.live_working_trees(), 0);
}

// ===========================================================================
// RefCommands
// ===========================================================================

#[tokio::test]
async fn delete_missing_ref_is_not_an_error() {
    let host = MemoryRepositoryHost::new();
    host.delete_ref(&repo(), "refs/pull-requests/9/helm")
        .await
        .unwrap();
}

#[tokio::test]
async fn set_ref_resolves_target_and_rev_list_walks_parents() {
    let host = MemoryRepositoryHost::new();
    let first = host.add_commit(&repo(), None, &[("a", "1")]);
    let second = host.add_commit(&repo(), Some(&first), &[("a", "2")]);
    host.set_branch(&repo(), "refs/heads/tmp", &second);

    host.set_ref(&repo(), "refs/pull-requests/1/helm", "refs/heads/tmp", false)
        .await
        .unwrap();

    let revs = host
        .rev_list(&repo(), "refs/pull-requests/1/helm", 2)
        .await
        .unwrap();
    assert_eq!(revs, vec![second.clone(), first]);

    let limited = host
        .rev_list(&repo(), "refs/pull-requests/1/helm", 1)
        .await
        .unwrap();
    assert_eq!(limited, vec![second]);
}

// ===========================================================================
// Settings and PR surface
// ===========================================================================

#[test]
fn settings_store_is_scoped() {
    let store = MemorySettingsStore::new();
    store.set(SettingsScope::Repository(1), "template-mode", "SINGLE_FILE");

    assert_eq!(
        store.get(SettingsScope::Repository(1), "template-mode"),
        Some("SINGLE_FILE".to_string())
    );
    assert_eq!(store.get(SettingsScope::Global, "template-mode"), None);
}

#[tokio::test]
async fn pull_request_service_forgets_removed_pull_requests() {
    let service = MemoryPullRequestService::new();
    let pr = PullRequest {
        id: 3,
        from_ref: RepositoryRef {
            repository: repo(),
            id: "refs/heads/feature".into(),
            latest_commit: "b".into(),
        },
        to_ref: RepositoryRef {
            repository: repo(),
            id: "refs/heads/main".into(),
            latest_commit: "a".into(),
        },
        author: author(),
    };
    service.insert(pr.clone(), vec![]);
    assert_eq!(service.get(1, 3).await.unwrap(), Some(pr));

    service.remove(1, 3);
    assert_eq!(service.get(1, 3).await.unwrap(), None);
}

#[tokio::test]
async fn comment_link_and_principal_fakes_record_calls() {
    let comments = RecordingCommentService::new();
    let links = StaticLinkBuilder::new("https://scm.example.com/");
    let principal = RecordingPrincipal::new("chartdiff");
    let pr = PullRequest {
        id: 5,
        from_ref: RepositoryRef {
            repository: repo(),
            id: "refs/heads/f".into(),
            latest_commit: "b".into(),
        },
        to_ref: RepositoryRef {
            repository: repo(),
            id: "refs/heads/main".into(),
            latest_commit: "a".into(),
        },
        author: author(),
    };

    comments.add_comment(&pr, "hello").await.unwrap();
    assert_eq!(comments.comments(), vec![(5, "hello".to_string())]);

    assert_eq!(
        links.commit_diff_url(&pr, "c2", "c1"),
        "https://scm.example.com/projects/10/repos/charts/pull-requests/5/commits/c2?since=c1"
    );

    principal
        .authorize("add pr comment", Permission::RepoRead)
        .await
        .unwrap();
    principal.deny(true);
    assert!(principal
        .authorize("add pr comment", Permission::RepoRead)
        .await
        .is_err());
    assert_eq!(principal.requests().len(), 2);
}
