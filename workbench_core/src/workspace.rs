//! Workspace lifecycle: base initialization, clone, lookup, teardown.
//!
//! Layout under the configured base directory:
//!
//! ```text
//! <base>/BASE                 marker written by init_base
//! <base>/head/<repo>/         clone of the canonical source repository
//! <base>/ws/<name>/<repo>/    one independent clone per workspace
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use git2::build::RepoBuilder;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::WorkspaceInfo;
use crate::config::Config;
use crate::{display_path, Error, Result};

/// Workspace lifecycle operations.
pub trait Workspaces: Send + Sync {
    /// Initialize the base directory from the configured source repository.
    ///
    /// # Errors
    ///
    /// [`Error::BaseAlreadyInitialized`] if the base marker exists,
    /// [`Error::Clone`] if the source cannot be cloned.
    fn init_base(&self) -> Result<()>;

    /// Remove the base directory and forget every workspace.
    ///
    /// # Errors
    ///
    /// [`Error::WorkspaceBusy`] while a workspace is being cloned;
    /// filesystem failures.
    fn reset_base(&self) -> Result<()>;

    /// Clone a new workspace named `name`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidWorkspaceName`], [`Error::BaseNotInitialized`],
    /// [`Error::WorkspaceExists`], or [`Error::Clone`].
    fn create_workspace(&self, name: &str) -> Result<WorkspaceInfo>;

    /// Checkout path of an existing workspace.
    ///
    /// # Errors
    ///
    /// [`Error::WorkspaceNotFound`] if `name` is not mapped.
    fn resolve_workspace_path(&self, name: &str) -> Result<PathBuf>;

    /// Unmap a workspace and delete its checkout.
    ///
    /// # Errors
    ///
    /// [`Error::WorkspaceNotFound`] if `name` is not mapped; filesystem
    /// failures while removing the checkout.
    fn delete_workspace(&self, name: &str) -> Result<()>;

    /// Every ready workspace, sorted by name.
    ///
    /// # Errors
    ///
    /// Implementations backed by external state may fail to enumerate.
    fn list_workspaces(&self) -> Result<Vec<WorkspaceInfo>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Creating,
    Ready(PathBuf),
    Deleting,
}

#[derive(Debug, Serialize, Deserialize)]
struct BaseMarker {
    source_repo: PathBuf,
}

/// Filesystem-backed [`Workspaces`] implementation.
///
/// The name → path map is guarded by one mutex that is never held across a
/// clone or a directory removal. A `Creating` reservation keeps concurrent
/// creators of the same name out while the clone runs unlocked.
///
/// `init_base` and `reset_base` are serialized by a second mutex so only one
/// caller ever clones into or removes the head checkout.
#[derive(Debug)]
pub struct WorkspaceManager {
    config: Config,
    slots: Mutex<BTreeMap<String, Slot>>,
    base: Mutex<()>,
}

impl WorkspaceManager {
    /// Bind a manager to `config`, recovering workspaces already on disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the workspace directory exists but cannot be
    /// listed.
    pub fn new(config: Config) -> Result<Self> {
        let slots = scan_existing(&config)?;
        if !slots.is_empty() {
            info!(count = slots.len(), base = %config.base_path.display(), "recovered workspaces");
        }
        Ok(Self {
            config,
            slots: Mutex::new(slots),
            base: Mutex::new(()),
        })
    }

    /// Configuration the manager was created with.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Whether `init_base` has completed for the base directory.
    #[must_use]
    pub fn is_base_initialized(&self) -> bool {
        self.config.base_marker().is_file()
    }

    fn release(&self, name: &str) {
        self.slots.lock().remove(name);
    }
}

impl Workspaces for WorkspaceManager {
    fn init_base(&self) -> Result<()> {
        let _base = self.base.lock();
        let base = &self.config.base_path;
        if self.is_base_initialized() {
            return Err(Error::BaseAlreadyInitialized {
                path: display_path(base),
            });
        }

        fs::create_dir_all(base).map_err(|source| Error::io(base, source))?;
        let head = self.config.head_repo_path();
        if let Err(err) = clone_into(&self.config.source_repo, &head) {
            remove_quietly(&head);
            return Err(err);
        }

        let workspaces = self.config.workspaces_dir();
        fs::create_dir_all(&workspaces).map_err(|source| Error::io(&workspaces, source))?;

        let marker = toml::to_string(&BaseMarker {
            source_repo: self.config.source_repo.clone(),
        })
        .map_err(|err| Error::Config {
            message: err.to_string(),
        })?;
        let marker_path = self.config.base_marker();
        fs::write(&marker_path, marker).map_err(|source| Error::io(&marker_path, source))?;

        info!(
            base = %base.display(),
            source = %self.config.source_repo.display(),
            "initialized base"
        );
        Ok(())
    }

    fn reset_base(&self) -> Result<()> {
        let _base = self.base.lock();
        let base = &self.config.base_path;
        {
            let mut slots = self.slots.lock();
            if let Some((name, _)) = slots.iter().find(|(_, slot)| **slot == Slot::Creating) {
                return Err(Error::WorkspaceBusy { name: name.clone() });
            }
            // Creators check the marker under the slot lock, so none can
            // start once it is gone.
            let marker = self.config.base_marker();
            match fs::remove_file(&marker) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(Error::io(&marker, source)),
            }
            slots.clear();
        }
        match fs::remove_dir_all(base) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(Error::io(base, source)),
        }
        info!(base = %base.display(), "reset base");
        Ok(())
    }

    fn create_workspace(&self, name: &str) -> Result<WorkspaceInfo> {
        validate_name(name)?;
        let workspace_dir = self.config.workspaces_dir().join(name);
        {
            let mut slots = self.slots.lock();
            if !self.is_base_initialized() {
                return Err(Error::BaseNotInitialized {
                    path: display_path(&self.config.base_path),
                });
            }
            if slots.contains_key(name) || workspace_dir.exists() {
                return Err(Error::WorkspaceExists {
                    name: name.to_owned(),
                });
            }
            slots.insert(name.to_owned(), Slot::Creating);
        }

        let target = self.config.workspace_repo_path(name);
        if let Err(err) = clone_into(&self.config.head_repo_path(), &target) {
            remove_quietly(&workspace_dir);
            self.release(name);
            return Err(err);
        }

        self.slots
            .lock()
            .insert(name.to_owned(), Slot::Ready(target.clone()));
        info!(workspace = %name, path = %target.display(), "created workspace");
        Ok(WorkspaceInfo::new(name, display_path(&target)))
    }

    fn resolve_workspace_path(&self, name: &str) -> Result<PathBuf> {
        match self.slots.lock().get(name) {
            Some(Slot::Ready(path)) => Ok(path.clone()),
            _ => Err(Error::WorkspaceNotFound {
                name: name.to_owned(),
            }),
        }
    }

    fn delete_workspace(&self, name: &str) -> Result<()> {
        {
            let mut slots = self.slots.lock();
            match slots.get_mut(name) {
                Some(slot) if matches!(slot, Slot::Ready(_)) => *slot = Slot::Deleting,
                _ => {
                    return Err(Error::WorkspaceNotFound {
                        name: name.to_owned(),
                    })
                }
            }
        }

        let workspace_dir = self.config.workspaces_dir().join(name);
        let removed = match fs::remove_dir_all(&workspace_dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::io(&workspace_dir, source)),
        };
        self.release(name);
        removed?;

        info!(workspace = %name, "deleted workspace");
        Ok(())
    }

    fn list_workspaces(&self) -> Result<Vec<WorkspaceInfo>> {
        Ok(self
            .slots
            .lock()
            .iter()
            .filter_map(|(name, slot)| match slot {
                Slot::Ready(path) => Some(WorkspaceInfo::new(name.clone(), display_path(path))),
                Slot::Creating | Slot::Deleting => None,
            })
            .collect())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.chars().any(|c| matches!(c, '/' | '\\' | '\0'));
    if invalid {
        return Err(Error::InvalidWorkspaceName {
            name: name.to_owned(),
        });
    }
    Ok(())
}

fn clone_into(source: &Path, target: &Path) -> Result<()> {
    let url = source.to_str().ok_or_else(|| Error::Config {
        message: format!("path is not valid UTF-8: {}", source.display()),
    })?;
    RepoBuilder::new()
        .clone(url, target)
        .map(drop)
        .map_err(|source| Error::Clone {
            target: display_path(target),
            source,
        })
}

fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_dir_all(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove partial checkout");
        }
    }
}

fn scan_existing(config: &Config) -> Result<BTreeMap<String, Slot>> {
    let dir = config.workspaces_dir();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(source) => return Err(Error::io(&dir, source)),
    };

    let mut slots = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|source| Error::io(&dir, source))?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let path = config.workspace_repo_path(&name);
        if validate_name(&name).is_ok() && path.join(".git").exists() {
            slots.insert(name, Slot::Ready(path));
        }
    }
    Ok(slots)
}
