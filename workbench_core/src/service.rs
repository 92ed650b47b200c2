use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::{
    Commit, ReviewRequest, ReviewResponse, RpcResult, Status, StatusCode, TextDiff, WorkspaceInfo,
};
use crate::config::Config;
use crate::diff::{DiffCache, TextDifferencer};
use crate::locks::PathLocks;
use crate::repository::{FileBlob, GitRepositoryFactory, RepositoryFactory, RepositoryHandle};
use crate::workspace::{WorkspaceManager, Workspaces};
use crate::{Error, ErrorKind, Result};

const DEFAULT_LOG_LIMIT: usize = 100;
pub(crate) const INTERNAL_MESSAGE: &str = "internal error";

/// Front end answering review requests against named workspaces.
///
/// Each call resolves the workspace, takes that checkout's path lock, runs
/// one handle operation, and releases the lock. Calls on different
/// workspaces run in parallel; calls on the same workspace are serialized.
/// Lock entries outlive deletes, so a workspace re-created under the same
/// name queues behind calls still holding the old entry.
pub struct ReviewService {
    workspaces: Arc<dyn Workspaces>,
    repositories: Arc<dyn RepositoryFactory>,
    differencer: TextDifferencer,
    locks: PathLocks,
    diff_cache: Option<DiffCache>,
}

impl ReviewService {
    /// Wire a service from its collaborators.
    #[must_use]
    pub fn new(workspaces: Arc<dyn Workspaces>, repositories: Arc<dyn RepositoryFactory>) -> Self {
        Self {
            workspaces,
            repositories,
            differencer: TextDifferencer::new(),
            locks: PathLocks::new(),
            diff_cache: None,
        }
    }

    /// Memoize diffs between committed blobs.
    #[must_use]
    pub fn with_diff_cache(mut self, cache: DiffCache) -> Self {
        self.diff_cache = Some(cache);
        self
    }

    /// Production wiring: a [`WorkspaceManager`] and a [`GitRepositoryFactory`]
    /// built from `config`.
    ///
    /// # Errors
    ///
    /// Propagates failures recovering existing workspaces.
    pub fn from_config(config: &Config) -> Result<Self> {
        let manager = WorkspaceManager::new(config.clone())?;
        let factory = GitRepositoryFactory::from_config(config);
        let service = Self::new(Arc::new(manager), Arc::new(factory));
        Ok(match DiffCache::with_capacity(config.diff_cache_capacity) {
            Some(cache) => service.with_diff_cache(cache),
            None => service,
        })
    }

    /// Workspace manager backing the service.
    #[must_use]
    pub fn workspaces(&self) -> Arc<dyn Workspaces> {
        Arc::clone(&self.workspaces)
    }

    /// Memoized diff count, if caching is enabled.
    #[must_use]
    pub fn cached_diffs(&self) -> Option<usize> {
        self.diff_cache.as_ref().map(DiffCache::len)
    }

    /// Paths with working-tree changes in `workspace`.
    ///
    /// # Errors
    ///
    /// [`Error::WorkspaceNotFound`] or repository failures.
    pub fn get_uncommitted_files(&self, workspace: &str) -> Result<Vec<String>> {
        self.with_repository(workspace, |repo| repo.uncommitted_files())
    }

    /// Diff `path` between `revision_a` and `revision_b` (or the working tree).
    ///
    /// A path present at only one side diffs against empty text.
    ///
    /// # Errors
    ///
    /// [`Error::RevisionNotFound`] for an unknown revision,
    /// [`Error::PathNotFound`] when the path exists on neither side.
    pub fn get_diff(
        &self,
        workspace: &str,
        path: &str,
        revision_a: &str,
        revision_b: Option<&str>,
    ) -> Result<TextDiff> {
        let (old, new) = self.with_repository(workspace, |repo| {
            let old = optional(repo.file_at_revision(revision_a, path))?.map(Side::from);
            let new = match revision_b {
                Some(revision) => optional(repo.file_at_revision(revision, path))?.map(Side::from),
                None => repo.working_file(path)?.map(Side::working),
            };
            Ok((old, new))
        })?;

        if old.is_none() && new.is_none() {
            return Err(Error::PathNotFound {
                path: path.to_owned(),
                revision: format!("{revision_a} or {}", revision_b.unwrap_or("working tree")),
            });
        }

        let old = old.unwrap_or_default();
        let new = new.unwrap_or_default();
        match (&self.diff_cache, &old.id, &new.id) {
            (Some(cache), Some(old_id), Some(new_id)) => {
                let diff = cache.get_or_compute(old_id, new_id, || {
                    self.differencer.diff(&old.contents, &new.contents)
                });
                Ok(TextDiff::clone(&diff))
            }
            _ => Ok(self.differencer.diff(&old.contents, &new.contents)),
        }
    }

    /// Stage exactly `paths` in `workspace` and commit them.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyCommit`] for an empty path set, [`Error::NothingToCommit`]
    /// when nothing changed, or backend failures.
    pub fn commit(&self, workspace: &str, paths: &[String], message: &str) -> Result<Commit> {
        self.with_repository(workspace, |repo| repo.commit(paths, message))
    }

    /// Contents of `path` at `revision`, or in the working tree when `None`.
    ///
    /// # Errors
    ///
    /// [`Error::RevisionNotFound`] or [`Error::PathNotFound`].
    pub fn get_file(&self, workspace: &str, path: &str, revision: Option<&str>) -> Result<String> {
        self.with_repository(workspace, |repo| match revision {
            Some(revision) => repo
                .file_at_revision(revision, path)
                .map(|blob| blob.contents),
            None => repo.working_file(path)?.ok_or_else(|| Error::PathNotFound {
                path: path.to_owned(),
                revision: "working tree".to_owned(),
            }),
        })
    }

    /// Commits reachable from HEAD, newest first.
    ///
    /// # Errors
    ///
    /// [`Error::WorkspaceNotFound`] or repository failures.
    pub fn get_commits(&self, workspace: &str, limit: Option<usize>) -> Result<Vec<Commit>> {
        let limit = limit.unwrap_or(DEFAULT_LOG_LIMIT);
        self.with_repository(workspace, |repo| repo.log(limit))
    }

    /// HEAD commit id of `workspace`.
    ///
    /// # Errors
    ///
    /// [`Error::WorkspaceNotFound`] or repository failures.
    pub fn get_head_commit(&self, workspace: &str) -> Result<Option<String>> {
        self.with_repository(workspace, |repo| repo.head_commit_id())
    }

    /// Clone a new workspace.
    ///
    /// # Errors
    ///
    /// See [`Workspaces::create_workspace`].
    pub fn create_workspace(&self, name: &str) -> Result<WorkspaceInfo> {
        self.workspaces.create_workspace(name)
    }

    /// Delete a workspace once in-flight calls against it have finished.
    ///
    /// # Errors
    ///
    /// [`Error::WorkspaceNotFound`] if `name` is not mapped.
    pub fn delete_workspace(&self, name: &str) -> Result<()> {
        self.with_path_lock(name, |_| self.workspaces.delete_workspace(name))
    }

    /// Every registered workspace.
    ///
    /// # Errors
    ///
    /// See [`Workspaces::list_workspaces`].
    pub fn list_workspaces(&self) -> Result<Vec<WorkspaceInfo>> {
        self.workspaces.list_workspaces()
    }

    /// Dispatch one request and map failures to a [`Status`].
    pub fn handle(&self, request: ReviewRequest) -> RpcResult {
        let method = request.method();
        debug!(method, "handling request");
        self.dispatch(request).map_err(|err| {
            if err.kind() == ErrorKind::Backend {
                warn!(method, error = %err, "request failed");
            } else {
                debug!(method, error = %err, "request rejected");
            }
            Status::from(err)
        })
    }

    fn dispatch(&self, request: ReviewRequest) -> Result<ReviewResponse> {
        Ok(match request {
            ReviewRequest::GetUncommittedFiles { workspace } => ReviewResponse::UncommittedFiles {
                paths: self.get_uncommitted_files(&workspace)?,
            },
            ReviewRequest::GetDiff {
                workspace,
                path,
                revision_a,
                revision_b,
            } => ReviewResponse::Diff {
                diff: self.get_diff(&workspace, &path, &revision_a, revision_b.as_deref())?,
            },
            ReviewRequest::Commit {
                workspace,
                paths,
                message,
            } => ReviewResponse::Commit {
                commit: self.commit(&workspace, &paths, &message)?,
            },
            ReviewRequest::GetFile {
                workspace,
                path,
                revision,
            } => ReviewResponse::File {
                content: self.get_file(&workspace, &path, revision.as_deref())?,
            },
            ReviewRequest::GetCommits { workspace, limit } => ReviewResponse::Commits {
                commits: self.get_commits(&workspace, limit)?,
            },
            ReviewRequest::GetHeadCommit { workspace } => ReviewResponse::HeadCommit {
                id: self.get_head_commit(&workspace)?,
            },
            ReviewRequest::CreateWorkspace { name } => ReviewResponse::Workspace {
                workspace: self.create_workspace(&name)?,
            },
            ReviewRequest::DeleteWorkspace { name } => {
                self.delete_workspace(&name)?;
                ReviewResponse::Deleted { name }
            }
            ReviewRequest::ListWorkspaces => ReviewResponse::Workspaces {
                workspaces: self.list_workspaces()?,
            },
        })
    }

    fn with_repository<F, T>(&self, workspace: &str, op: F) -> Result<T>
    where
        F: FnOnce(&dyn RepositoryHandle) -> Result<T>,
    {
        self.with_path_lock(workspace, |path| {
            let repository = self.repositories.create(path);
            op(repository.as_ref())
        })
    }

    /// Run `op` holding the lock of the path `workspace` maps to.
    ///
    /// The mapping is checked again once the lock is held: a call queued
    /// behind a delete sees [`Error::WorkspaceNotFound`], and one queued
    /// behind a remap follows the new path.
    fn with_path_lock<F, T>(&self, workspace: &str, op: F) -> Result<T>
    where
        F: FnOnce(&Path) -> Result<T>,
    {
        let mut path = self.workspaces.resolve_workspace_path(workspace)?;
        loop {
            let lock = self.locks.get(&path);
            let _guard = lock.lock();
            let current = self.workspaces.resolve_workspace_path(workspace)?;
            if current == path {
                return op(&path);
            }
            path = current;
        }
    }
}

impl fmt::Debug for ReviewService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReviewService")
            .field("locked_paths", &self.locks.len())
            .field("diff_cache", &self.diff_cache)
            .finish_non_exhaustive()
    }
}

impl From<Error> for Status {
    fn from(error: Error) -> Self {
        let code = match error.kind() {
            ErrorKind::NotFound => StatusCode::NotFound,
            ErrorKind::Conflict => StatusCode::AlreadyExists,
            ErrorKind::InvalidInput => StatusCode::InvalidArgument,
            ErrorKind::PreconditionFailed => StatusCode::FailedPrecondition,
            ErrorKind::Backend => return Self::internal(INTERNAL_MESSAGE),
        };
        Self::new(code, error.to_string())
    }
}

#[derive(Debug, Default)]
struct Side {
    id: Option<String>,
    contents: String,
}

impl Side {
    const fn working(contents: String) -> Self {
        Self { id: None, contents }
    }
}

impl From<FileBlob> for Side {
    fn from(blob: FileBlob) -> Self {
        Self {
            id: Some(blob.id),
            contents: blob.contents,
        }
    }
}

fn optional(result: Result<FileBlob>) -> Result<Option<FileBlob>> {
    match result {
        Ok(blob) => Ok(Some(blob)),
        Err(Error::PathNotFound { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}
