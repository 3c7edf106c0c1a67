//! chartdiff-state: host collaborator contracts for chartdiff
//!
//! The templating pipeline consumes the source-control host as a set of
//! black-box services. This crate defines those services as async traits and
//! ships in-memory fakes that satisfy the same contracts.
//!
//! ## Layer 0 - Host contracts
//!
//! Focus: stable seams between the pipeline and whatever hosts the
//! repositories (a source-control server, a local git CLI, or memory).
//!
//! ## Key Components
//!
//! - `RefTreeReader`, `RefCommands`: read trees and move refs
//! - `WorkingTreeProvider` / `WorkingTree`: ephemeral working copies
//! - `PullRequestService`, `CommentService`, `DiffLinkBuilder`: PR surface
//! - `ElevatedPrincipal`: privileged identity for host operations
//! - `SettingsStore`: raw scoped settings

mod error;
pub mod fakes;
pub mod host_traits;

pub use error::HostError;
pub use host_traits::{
    Author, Change, ChangeType, CommentService, DiffLinkBuilder, ElevatedPrincipal, HookPolicy,
    HostResult, NodeKind, Permission, PullRequest, PullRequestService, RefCommands,
    RefTreeReader, Repository, RepositoryRef, SettingsScope, SettingsStore, TreeEntry,
    WorkingTree, WorkingTreeProvider,
};
