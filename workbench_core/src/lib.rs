//! Core library for Workbench's workspace and review workflow.
//!
//! The crate is layered around four responsibilities:
//! - repository handles over on-disk git checkouts, and the factory that creates them
//! - line diffs between texts and revisions
//! - the workspace manager owning `<base>/ws/<name>/<repo>` checkouts
//! - the review service and its in-process and loopback transports

#![warn(
    clippy::all,
    clippy::cargo,
    clippy::nursery,
    clippy::pedantic,
    missing_docs
)]
#![cfg_attr(
    not(test),
    deny(
        clippy::dbg_macro,
        clippy::expect_used,
        clippy::panic,
        clippy::print_stderr,
        clippy::print_stdout,
        clippy::todo,
        clippy::unwrap_used
    )
)]

/// Explicit configuration consumed by the manager and service.
pub mod config;
/// Line diff computation, patch application, and memoization.
pub mod diff;
/// Per-path serialization of repository access.
pub mod locks;
/// Git repository handles and the factory that creates them.
pub mod repository;
/// Loopback and in-process transports for the review service.
pub mod rpc;
/// Request handling for the review service.
pub mod service;
/// Workspace lifecycle under a base directory.
pub mod workspace;

pub use config::Config;
pub use workbench_api as api;

/// Common result type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of [`Error`] used for status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Workspace, revision, or path absent.
    NotFound,
    /// Workspace name taken, base or repository already initialized.
    Conflict,
    /// Caller supplied malformed input.
    InvalidInput,
    /// Input is valid but the current state rejects it.
    PreconditionFailed,
    /// VCS, filesystem, or configuration failure.
    Backend,
}

/// Errors surfaced by the core library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying git operation failed.
    #[error("git error: {source}")]
    Git {
        /// Original libgit2 error bubbled up by the core library.
        #[from]
        source: git2::Error,
    },
    /// Filesystem interaction failed.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Filesystem path involved in the failed operation.
        path: String,
        /// Source I/O error returned by the standard library.
        #[source]
        source: std::io::Error,
    },
    /// Provided path does not correspond to a git repository.
    #[error("path does not reference a git repository: {path}")]
    NotARepository {
        /// Path that failed to resolve to a repository.
        path: String,
    },
    /// `init` was called on a path that already holds repository metadata.
    #[error("repository already initialized at {path}")]
    AlreadyInitialized {
        /// Path of the existing repository.
        path: String,
    },
    /// Revision id did not resolve to a commit.
    #[error("revision not found: {revision}")]
    RevisionNotFound {
        /// Revision as supplied by the caller.
        revision: String,
    },
    /// Path is absent at the requested revision.
    #[error("path {path} not found at {revision}")]
    PathNotFound {
        /// Path relative to the repository root.
        path: String,
        /// Revision that was searched, or `working tree`.
        revision: String,
    },
    /// File content is not valid UTF-8 text.
    #[error("{path} is not a text file")]
    BinaryFile {
        /// Path relative to the repository root.
        path: String,
    },
    /// Commit requested with an empty path set.
    #[error("commit requires at least one path")]
    EmptyCommit,
    /// None of the paths to commit differ from HEAD.
    #[error("nothing to commit: none of {paths:?} differ from HEAD")]
    NothingToCommit {
        /// Paths the caller asked to commit.
        paths: Vec<String>,
    },
    /// The VCS refused to create the commit (for example, no identity).
    #[error("commit failed: {source}")]
    Commit {
        /// Original libgit2 error.
        #[source]
        source: git2::Error,
    },
    /// Workspace name is not mapped.
    #[error("workspace '{name}' not found")]
    WorkspaceNotFound {
        /// Requested workspace name.
        name: String,
    },
    /// Workspace name is already mapped or being created.
    #[error("workspace '{name}' already exists")]
    WorkspaceExists {
        /// Requested workspace name.
        name: String,
    },
    /// Workspace is mid-creation and blocks the requested operation.
    #[error("workspace '{name}' is still being created")]
    WorkspaceBusy {
        /// Workspace being created.
        name: String,
    },
    /// Workspace name cannot be used as a directory name.
    #[error("invalid workspace name '{name}'")]
    InvalidWorkspaceName {
        /// Rejected name.
        name: String,
    },
    /// Base directory already carries a base marker.
    #[error("base already initialized at {path}")]
    BaseAlreadyInitialized {
        /// Base directory.
        path: String,
    },
    /// Base directory has not been initialized.
    #[error("base not initialized at {path}")]
    BaseNotInitialized {
        /// Base directory.
        path: String,
    },
    /// Cloning a checkout failed.
    #[error("failed to clone into {target}: {source}")]
    Clone {
        /// Destination of the clone.
        target: String,
        /// Original libgit2 error.
        #[source]
        source: git2::Error,
    },
    /// A diff did not fit the text it was applied to.
    #[error("diff does not apply at old line {line}")]
    PatchMismatch {
        /// 1-based old-side line where application failed.
        line: u32,
    },
    /// The loopback HTTP client could not be built.
    #[error("http client for {address} failed: {source}")]
    Http {
        /// Server address the client targets.
        address: String,
        /// Source reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Runtime or socket setup for the loopback transport failed.
    #[error("transport error on {address}: {source}")]
    Transport {
        /// Address being bound or connected.
        address: String,
        /// Source I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Configuration is missing or malformed.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

impl Error {
    /// Classify the error for status mapping.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RevisionNotFound { .. }
            | Self::PathNotFound { .. }
            | Self::WorkspaceNotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyInitialized { .. }
            | Self::WorkspaceExists { .. }
            | Self::BaseAlreadyInitialized { .. } => ErrorKind::Conflict,
            Self::EmptyCommit | Self::InvalidWorkspaceName { .. } => ErrorKind::InvalidInput,
            Self::NothingToCommit { .. }
            | Self::BaseNotInitialized { .. }
            | Self::WorkspaceBusy { .. }
            | Self::BinaryFile { .. }
            | Self::PatchMismatch { .. } => ErrorKind::PreconditionFailed,
            Self::Git { .. }
            | Self::Io { .. }
            | Self::NotARepository { .. }
            | Self::Commit { .. }
            | Self::Clone { .. }
            | Self::Transport { .. }
            | Self::Http { .. }
            | Self::Config { .. } => ErrorKind::Backend,
        }
    }

    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: display_path(path),
            source,
        }
    }
}

pub(crate) fn display_path(path: &std::path::Path) -> String {
    path.to_path_buf()
        .into_os_string()
        .to_string_lossy()
        .into_owned()
}
