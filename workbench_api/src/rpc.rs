//! Request/response envelopes for the review service.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Commit, TextDiff, WorkspaceInfo};

/// A call against the review service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum ReviewRequest {
    /// Paths with working-tree changes in a workspace.
    GetUncommittedFiles {
        /// Workspace name.
        workspace: String,
    },
    /// Line diff of one path between two revisions.
    GetDiff {
        /// Workspace name.
        workspace: String,
        /// Path relative to the repository root.
        path: String,
        /// Old side revision id.
        revision_a: String,
        /// New side revision id; `None` reads the working tree.
        #[serde(default)]
        revision_b: Option<String>,
    },
    /// Stage exactly `paths` and commit them.
    Commit {
        /// Workspace name.
        workspace: String,
        /// Paths to stage.
        paths: Vec<String>,
        /// Commit message.
        message: String,
    },
    /// Contents of a file at a revision, or in the working tree.
    GetFile {
        /// Workspace name.
        workspace: String,
        /// Path relative to the repository root.
        path: String,
        /// Revision id; `None` reads the working tree.
        #[serde(default)]
        revision: Option<String>,
    },
    /// Commits reachable from HEAD, newest first.
    GetCommits {
        /// Workspace name.
        workspace: String,
        /// Maximum number of commits to return.
        #[serde(default)]
        limit: Option<usize>,
    },
    /// Current HEAD commit id.
    GetHeadCommit {
        /// Workspace name.
        workspace: String,
    },
    /// Clone a new workspace from the canonical repository.
    CreateWorkspace {
        /// Name of the workspace to create.
        name: String,
    },
    /// Remove a workspace and its checkout.
    DeleteWorkspace {
        /// Name of the workspace to delete.
        name: String,
    },
    /// All registered workspaces.
    ListWorkspaces,
}

impl ReviewRequest {
    /// Stable method name used in logs.
    pub const fn method(&self) -> &'static str {
        match self {
            Self::GetUncommittedFiles { .. } => "GetUncommittedFiles",
            Self::GetDiff { .. } => "GetDiff",
            Self::Commit { .. } => "Commit",
            Self::GetFile { .. } => "GetFile",
            Self::GetCommits { .. } => "GetCommits",
            Self::GetHeadCommit { .. } => "GetHeadCommit",
            Self::CreateWorkspace { .. } => "CreateWorkspace",
            Self::DeleteWorkspace { .. } => "DeleteWorkspace",
            Self::ListWorkspaces => "ListWorkspaces",
        }
    }
}

/// Successful result of a [`ReviewRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReviewResponse {
    /// Reply to `GetUncommittedFiles`.
    UncommittedFiles {
        /// Sorted changed paths.
        paths: Vec<String>,
    },
    /// Reply to `GetDiff`.
    Diff {
        /// Computed diff.
        diff: TextDiff,
    },
    /// Reply to `Commit`.
    Commit {
        /// The new commit.
        commit: Commit,
    },
    /// Reply to `GetFile`.
    File {
        /// File contents.
        content: String,
    },
    /// Reply to `GetCommits`.
    Commits {
        /// Commits, newest first.
        commits: Vec<Commit>,
    },
    /// Reply to `GetHeadCommit`.
    HeadCommit {
        /// HEAD id; `None` for an unborn HEAD.
        #[serde(default)]
        id: Option<String>,
    },
    /// Reply to `CreateWorkspace`.
    Workspace {
        /// The created workspace.
        workspace: WorkspaceInfo,
    },
    /// Reply to `DeleteWorkspace`.
    Deleted {
        /// Name of the removed workspace.
        name: String,
    },
    /// Reply to `ListWorkspaces`.
    Workspaces {
        /// Registered workspaces, sorted by name.
        workspaces: Vec<WorkspaceInfo>,
    },
}

/// Remote-procedure status codes returned on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    /// Workspace, revision, or path absent.
    NotFound,
    /// Workspace or base already exists.
    AlreadyExists,
    /// Malformed request, such as an empty commit path set.
    InvalidArgument,
    /// Request is valid but the current state does not allow it.
    FailedPrecondition,
    /// Backend failure; details are logged server-side.
    Internal,
    /// Transport failure between client and server.
    Unavailable,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
        };
        f.write_str(name)
    }
}

/// Failure status of a remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Status code.
    pub code: StatusCode,
    /// Human-readable description.
    pub message: String,
}

impl Status {
    /// Create a status with the given code and message.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for an `Internal` status.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    /// Shorthand for an `Unavailable` status.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Status {}

/// Result of a remote call as carried over the wire.
pub type RpcResult = Result<ReviewResponse, Status>;
