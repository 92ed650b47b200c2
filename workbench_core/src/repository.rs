//! Repository handles over on-disk checkouts, built on top of libgit2.
//!
//! A handle is a cheap view bound to a path. It opens the repository for each
//! operation and drops it afterwards, so handles hold no lock and can be
//! created speculatively. Serializing mutations of one path is the caller's
//! job (see [`crate::locks::PathLocks`]).

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use git2::{
    ConfigLevel, ErrorClass, ErrorCode, Repository as GitRepository, Sort, Status, StatusOptions,
};
use tracing::debug;

use crate::api::{Commit, Identity};
use crate::config::Config;
use crate::{display_path, Error, Result};

/// Identity written by [`RepositoryHandle::set_fake_users_data`].
pub const FAKE_USER_NAME: &str = "Workbench Test User";
/// Email written by [`RepositoryHandle::set_fake_users_data`].
pub const FAKE_USER_EMAIL: &str = "test-user@workbench.invalid";

/// Content of a file at a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlob {
    /// Blob object id; identical content always has the same id.
    pub id: String,
    /// Decoded UTF-8 contents.
    pub contents: String,
}

/// Operations available on one repository checkout.
pub trait RepositoryHandle: Send + Sync + fmt::Debug {
    /// Path the handle is bound to.
    fn root(&self) -> &Path;

    /// Create repository metadata at the bound path.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyInitialized`] if metadata already exists; I/O or git
    /// errors if the path is not writable.
    fn init(&self) -> Result<()>;

    /// Sorted paths with changes relative to HEAD, untracked files included.
    ///
    /// # Errors
    ///
    /// Fails when the path holds no repository or status enumeration fails.
    fn uncommitted_files(&self) -> Result<Vec<String>>;

    /// Stage exactly `paths` and commit them on HEAD.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyCommit`] for an empty path set, [`Error::NothingToCommit`]
    /// when no path differs from HEAD, [`Error::Commit`] when the VCS refuses
    /// the commit.
    fn commit(&self, paths: &[String], message: &str) -> Result<Commit>;

    /// Write a fixed test identity into the repository-local config.
    ///
    /// # Errors
    ///
    /// Fails when the repository config cannot be written.
    fn set_fake_users_data(&self) -> Result<()>;

    /// Id of the HEAD commit, `None` on an unborn branch.
    ///
    /// # Errors
    ///
    /// Propagates failures resolving HEAD.
    fn head_commit_id(&self) -> Result<Option<String>>;

    /// Contents of `path` as of `revision`.
    ///
    /// # Errors
    ///
    /// [`Error::RevisionNotFound`] or [`Error::PathNotFound`] when either is
    /// absent, [`Error::BinaryFile`] for non UTF-8 content.
    fn file_at_revision(&self, revision: &str, path: &str) -> Result<FileBlob>;

    /// Contents of `path` in the working tree, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// [`Error::PathNotFound`] for paths escaping the checkout, I/O errors,
    /// [`Error::BinaryFile`] for non UTF-8 content.
    fn working_file(&self, path: &str) -> Result<Option<String>>;

    /// Commit metadata for an existing revision.
    ///
    /// # Errors
    ///
    /// [`Error::RevisionNotFound`] when the revision does not resolve.
    fn get_commit(&self, revision: &str) -> Result<Commit>;

    /// Up to `limit` commits reachable from HEAD, newest first.
    ///
    /// # Errors
    ///
    /// Propagates revision walk failures.
    fn log(&self, limit: usize) -> Result<Vec<Commit>>;
}

/// Creates handles bound to filesystem paths.
pub trait RepositoryFactory: Send + Sync {
    /// Bind a handle to `path` without touching disk.
    fn create(&self, path: &Path) -> Box<dyn RepositoryHandle>;
}

/// Factory producing git-backed [`Repository`] handles.
#[derive(Debug, Clone, Default)]
pub struct GitRepositoryFactory {
    identity: Option<Identity>,
}

impl GitRepositoryFactory {
    /// Factory whose handles use the identity found in repository config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose handles commit as `identity`.
    #[must_use]
    pub const fn with_identity(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
        }
    }

    /// Factory carrying the identity configured in `config`, if any.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            identity: config.identity.clone(),
        }
    }
}

impl RepositoryFactory for GitRepositoryFactory {
    fn create(&self, path: &Path) -> Box<dyn RepositoryHandle> {
        Box::new(Repository {
            root: path.to_path_buf(),
            identity: self.identity.clone(),
        })
    }
}

/// Git-backed repository handle.
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
    identity: Option<Identity>,
}

impl Repository {
    /// Bind a handle to `path`. Nothing is read until an operation runs.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            root: path.into(),
            identity: None,
        }
    }

    /// Commit as `identity` instead of the identity from repository config.
    #[must_use]
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    fn open(&self) -> Result<GitRepository> {
        let repo = match GitRepository::open(&self.root) {
            Ok(repo) => repo,
            Err(err) if err.code() == ErrorCode::NotFound => {
                return Err(Error::NotARepository {
                    path: display_path(&self.root),
                })
            }
            Err(err) => return Err(Error::from(err)),
        };
        if repo.is_bare() {
            return Err(Error::NotARepository {
                path: display_path(&self.root),
            });
        }
        Ok(repo)
    }

    fn signature(&self, repo: &GitRepository) -> Result<git2::Signature<'static>> {
        let signature = match &self.identity {
            Some(identity) => git2::Signature::now(&identity.name, &identity.email),
            None => repo.signature(),
        };
        signature.map_err(|source| Error::Commit { source })
    }

    /// Stage `changed` in the in-memory index and commit the resulting tree.
    ///
    /// Returns `None` when the staged tree matches HEAD. The on-disk index is
    /// left alone; the caller writes it only once the commit exists.
    fn commit_index(
        &self,
        repo: &GitRepository,
        index: &mut git2::Index,
        changed: &[&str],
        signature: &git2::Signature<'_>,
        message: &str,
    ) -> Result<Option<git2::Oid>> {
        for path in changed {
            let relative = Path::new(path);
            if self.root.join(relative).symlink_metadata().is_ok() {
                index.add_path(relative)?;
            } else {
                index.remove_path(relative)?;
            }
        }

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let parent = head_commit(repo)?;
        if parent
            .as_ref()
            .is_some_and(|parent| parent.tree_id() == tree_id)
        {
            return Ok(None);
        }

        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = repo
            .commit(
                Some("HEAD"),
                signature,
                signature,
                message,
                &tree,
                &parents,
            )
            .map_err(|source| Error::Commit { source })?;
        Ok(Some(oid))
    }
}

impl RepositoryHandle for Repository {
    fn root(&self) -> &Path {
        &self.root
    }

    fn init(&self) -> Result<()> {
        if self.root.join(".git").exists() {
            return Err(Error::AlreadyInitialized {
                path: display_path(&self.root),
            });
        }
        std::fs::create_dir_all(&self.root).map_err(|source| Error::io(&self.root, source))?;
        GitRepository::init(&self.root)?;
        debug!(path = %self.root.display(), "initialized repository");
        Ok(())
    }

    fn uncommitted_files(&self) -> Result<Vec<String>> {
        let repo = self.open()?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        let statuses = repo.statuses(Some(&mut opts))?;
        let files: BTreeSet<String> = statuses
            .iter()
            .filter(|entry| is_changed(entry.status()))
            .map(|entry| String::from_utf8_lossy(entry.path_bytes()).into_owned())
            .collect();
        Ok(files.into_iter().collect())
    }

    fn commit(&self, paths: &[String], message: &str) -> Result<Commit> {
        if paths.is_empty() {
            return Err(Error::EmptyCommit);
        }

        let repo = self.open()?;
        let mut changed = Vec::with_capacity(paths.len());
        for path in paths {
            if path_differs(&repo, path)? {
                changed.push(path.as_str());
            }
        }
        if changed.is_empty() {
            return Err(Error::NothingToCommit {
                paths: paths.to_vec(),
            });
        }

        let signature = self.signature(&repo)?;
        let mut index = repo.index()?;
        let oid = match self.commit_index(&repo, &mut index, &changed, &signature, message) {
            Ok(Some(oid)) => oid,
            result => {
                // Drop the staged entries so a failed commit leaves no trace.
                if let Err(err) = index.read(true) {
                    debug!(path = %self.root.display(), error = %err, "index reload failed");
                }
                return match result {
                    Ok(_) => Err(Error::NothingToCommit {
                        paths: paths.to_vec(),
                    }),
                    Err(err) => Err(err),
                };
            }
        };
        index.write()?;

        let commit = repo.find_commit(oid)?;
        debug!(path = %self.root.display(), id = %oid, files = changed.len(), "created commit");
        commit_to_model(&repo, &commit)
    }

    fn set_fake_users_data(&self) -> Result<()> {
        let repo = self.open()?;
        let mut config = repo.config()?.open_level(ConfigLevel::Local)?;
        config.set_str("user.name", FAKE_USER_NAME)?;
        config.set_str("user.email", FAKE_USER_EMAIL)?;
        Ok(())
    }

    fn head_commit_id(&self) -> Result<Option<String>> {
        let repo = self.open()?;
        let id = head_commit(&repo)?.map(|commit| commit.id().to_string());
        Ok(id)
    }

    fn file_at_revision(&self, revision: &str, path: &str) -> Result<FileBlob> {
        let repo = self.open()?;
        let commit = resolve_commit(&repo, revision)?;
        let tree = commit.tree()?;
        let not_found = || Error::PathNotFound {
            path: path.to_owned(),
            revision: revision.to_owned(),
        };

        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(err) if err.code() == ErrorCode::NotFound => return Err(not_found()),
            Err(err) => return Err(Error::from(err)),
        };
        let blob = entry
            .to_object(&repo)?
            .into_blob()
            .map_err(|_| not_found())?;
        let contents = std::str::from_utf8(blob.content())
            .map_err(|_| Error::BinaryFile {
                path: path.to_owned(),
            })?
            .to_owned();

        Ok(FileBlob {
            id: blob.id().to_string(),
            contents,
        })
    }

    fn working_file(&self, path: &str) -> Result<Option<String>> {
        let absolute = sanitize_path(&self.root, path)?;
        match std::fs::metadata(&absolute) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(Error::io(&absolute, source)),
        }
        let bytes = std::fs::read(&absolute).map_err(|source| Error::io(&absolute, source))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| Error::BinaryFile {
                path: path.to_owned(),
            })
    }

    fn get_commit(&self, revision: &str) -> Result<Commit> {
        let repo = self.open()?;
        let commit = resolve_commit(&repo, revision)?;
        commit_to_model(&repo, &commit)
    }

    fn log(&self, limit: usize) -> Result<Vec<Commit>> {
        let repo = self.open()?;
        if head_commit(&repo)?.is_none() {
            return Ok(Vec::new());
        }

        let mut walk = repo.revwalk()?;
        walk.push_head()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

        let mut commits = Vec::new();
        for oid in walk.take(limit) {
            let commit = repo.find_commit(oid?)?;
            commits.push(commit_to_model(&repo, &commit)?);
        }
        Ok(commits)
    }
}

const fn is_changed(status: Status) -> bool {
    !status.is_empty() && !status.contains(Status::IGNORED)
}

fn path_differs(repo: &GitRepository, path: &str) -> Result<bool> {
    match repo.status_file(Path::new(path)) {
        Ok(status) => Ok(is_changed(status)),
        Err(err) if matches!(err.code(), ErrorCode::NotFound | ErrorCode::Ambiguous) => Ok(false),
        Err(err) => Err(Error::from(err)),
    }
}

fn head_commit(repo: &GitRepository) -> Result<Option<git2::Commit<'_>>> {
    let head = match repo.head() {
        Ok(head) => head,
        Err(err)
            if matches!(
                (err.class(), err.code()),
                (
                    ErrorClass::Reference,
                    ErrorCode::NotFound | ErrorCode::UnbornBranch
                )
            ) =>
        {
            return Ok(None)
        }
        Err(err) if err.code() == ErrorCode::UnbornBranch => return Ok(None),
        Err(err) => return Err(Error::from(err)),
    };

    let resolved = head.resolve()?;
    Ok(Some(resolved.peel_to_commit()?))
}

fn resolve_commit<'repo>(repo: &'repo GitRepository, revision: &str) -> Result<git2::Commit<'repo>> {
    let not_found = || Error::RevisionNotFound {
        revision: revision.to_owned(),
    };
    let object = match repo.revparse_single(revision) {
        Ok(object) => object,
        Err(err)
            if matches!(
                err.code(),
                ErrorCode::NotFound | ErrorCode::InvalidSpec | ErrorCode::Ambiguous
            ) =>
        {
            return Err(not_found())
        }
        Err(err) => return Err(Error::from(err)),
    };
    object.peel_to_commit().map_err(|_| not_found())
}

fn commit_to_model(repo: &GitRepository, commit: &git2::Commit<'_>) -> Result<Commit> {
    let author = commit.author();
    Ok(Commit {
        id: commit.id().to_string(),
        message: String::from_utf8_lossy(commit.message_bytes()).into_owned(),
        author: Identity::new(
            String::from_utf8_lossy(author.name_bytes()),
            String::from_utf8_lossy(author.email_bytes()),
        ),
        files: changed_files(repo, commit)?,
        timestamp: Some(commit.time().seconds()),
    })
}

fn changed_files(repo: &GitRepository, commit: &git2::Commit<'_>) -> Result<Vec<String>> {
    let tree = commit.tree()?;
    let parent_tree = if commit.parent_count() == 0 {
        None
    } else {
        Some(commit.parent(0)?.tree()?)
    };

    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
    let files: BTreeSet<String> = diff
        .deltas()
        .filter_map(|delta| delta.new_file().path().or_else(|| delta.old_file().path()))
        .map(|path| path.to_string_lossy().into_owned())
        .collect();
    Ok(files.into_iter().collect())
}

fn sanitize_path(root: &Path, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path);
    let escapes = relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(Error::PathNotFound {
            path: path.to_owned(),
            revision: "working tree".to_owned(),
        });
    }
    Ok(root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Repository) {
        let temp = TempDir::new().expect("tempdir");
        let repo = Repository::new(temp.path().join("repo"));
        repo.init().expect("init repo");
        repo.set_fake_users_data().expect("fake users");
        (temp, repo)
    }

    fn write_file(repo: &Repository, path: &str, contents: &str) {
        let target = repo.root().join(path);
        std::fs::create_dir_all(target.parent().expect("parent")).expect("create dirs");
        std::fs::write(target, contents).expect("write file");
    }

    #[test]
    fn init_twice_is_rejected() {
        let (_temp, repo) = fixture();
        assert!(matches!(repo.init(), Err(Error::AlreadyInitialized { .. })));
    }

    #[test]
    fn operations_on_missing_repository_fail() {
        let temp = TempDir::new().expect("tempdir");
        let repo = Repository::new(temp.path().join("nowhere"));
        assert!(matches!(
            repo.uncommitted_files(),
            Err(Error::NotARepository { .. })
        ));
    }

    #[test]
    fn fresh_repository_has_no_head() -> Result<()> {
        let (_temp, repo) = fixture();
        assert!(repo.head_commit_id()?.is_none());
        assert!(repo.log(10)?.is_empty());
        assert!(repo.uncommitted_files()?.is_empty());
        Ok(())
    }

    #[test]
    fn commit_records_author_and_files() -> Result<()> {
        let (_temp, repo) = fixture();
        write_file(&repo, "dir/a.txt", "a\n");
        write_file(&repo, "b.txt", "b\n");

        let commit = repo.commit(&repo.uncommitted_files()?, "Initial commit")?;

        assert_eq!(commit.files, vec!["b.txt".to_owned(), "dir/a.txt".to_owned()]);
        assert_eq!(commit.author, Identity::new(FAKE_USER_NAME, FAKE_USER_EMAIL));
        assert_eq!(commit.summary(), "Initial commit");
        assert_eq!(repo.head_commit_id()?.as_deref(), Some(commit.id.as_str()));
        Ok(())
    }

    #[test]
    fn commit_only_stages_requested_paths() -> Result<()> {
        let (_temp, repo) = fixture();
        write_file(&repo, "one.txt", "1\n");
        write_file(&repo, "two.txt", "2\n");

        let commit = repo.commit(&["one.txt".to_owned()], "Only one")?;

        assert_eq!(commit.files, vec!["one.txt".to_owned()]);
        assert_eq!(repo.uncommitted_files()?, vec!["two.txt".to_owned()]);
        Ok(())
    }

    #[test]
    fn explicit_identity_overrides_config() -> Result<()> {
        let (_temp, repo) = fixture();
        let repo = repo.with_identity(Identity::new("Bot", "bot@example.com"));
        write_file(&repo, "a.txt", "a\n");

        let commit = repo.commit(&["a.txt".to_owned()], "As bot")?;
        assert_eq!(commit.author.name, "Bot");
        Ok(())
    }

    #[test]
    fn sanitize_rejects_escaping_paths() {
        let root = Path::new("/tmp/root");
        assert!(sanitize_path(root, "../etc/passwd").is_err());
        assert!(sanitize_path(root, "/etc/passwd").is_err());
        assert!(sanitize_path(root, "").is_err());
        assert_eq!(
            sanitize_path(root, "src/lib.rs").expect("valid"),
            PathBuf::from("/tmp/root/src/lib.rs")
        );
    }
}
