use std::env;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

const NODE_MODULES: &str = "node_modules";

/// Finds `node_modules` directories below a root.
///
/// The walk is lazy and starts over on every [`iter`](Self::iter) call, so the
/// result reflects the tree at the time it is consumed.
#[derive(Debug, Clone)]
pub struct NodeModulesScan {
    root: PathBuf,
}

impl NodeModulesScan {
    /// Scan rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory the walk starts from.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a fresh walk.
    ///
    /// Yields absolute paths in file-name order. A `node_modules` directory
    /// is yielded once and its contents are not visited. Unreadable subtrees
    /// are logged and skipped.
    #[must_use]
    pub fn iter(&self) -> NodeModulesIter {
        let root = absolute(&self.root);
        NodeModulesIter {
            walker: WalkDir::new(root).sort_by_file_name().into_iter(),
        }
    }
}

impl<'a> IntoIterator for &'a NodeModulesScan {
    type Item = PathBuf;
    type IntoIter = NodeModulesIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator returned by [`NodeModulesScan::iter`].
pub struct NodeModulesIter {
    walker: walkdir::IntoIter,
}

impl std::fmt::Debug for NodeModulesIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeModulesIter").finish_non_exhaustive()
    }
}

impl Iterator for NodeModulesIter {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(
                        path = ?err.path(),
                        error = %err,
                        "skipping unreadable directory"
                    );
                    continue;
                }
            };
            if entry.file_type().is_dir() && entry.file_name() == NODE_MODULES {
                self.walker.skip_current_dir();
                return Some(entry.into_path());
            }
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "cannot resolve relative scan root");
            path.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn mkdirs(root: &Path, relative: &str) {
        fs::create_dir_all(root.join(relative)).expect("create dirs");
    }

    #[test]
    fn finds_top_level_node_modules_only() {
        let temp = TempDir::new().expect("tempdir");
        mkdirs(temp.path(), "web/node_modules/left-pad/node_modules/inner");
        mkdirs(temp.path(), "app/src/node_modules");
        mkdirs(temp.path(), "docs");

        let found: Vec<PathBuf> = NodeModulesScan::new(temp.path()).iter().collect();

        assert_eq!(
            found,
            vec![
                temp.path().join("app/src/node_modules"),
                temp.path().join("web/node_modules"),
            ]
        );
    }

    #[test]
    fn files_named_node_modules_are_ignored() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(temp.path().join(NODE_MODULES), "not a directory").expect("write");

        assert_eq!(NodeModulesScan::new(temp.path()).iter().count(), 0);
    }

    #[test]
    fn every_iteration_walks_the_current_tree() {
        let temp = TempDir::new().expect("tempdir");
        let scan = NodeModulesScan::new(temp.path());
        assert_eq!(scan.iter().count(), 0);

        mkdirs(temp.path(), "pkg/node_modules");
        assert_eq!(scan.iter().count(), 1);
        assert_eq!((&scan).into_iter().count(), 1);
    }

    #[test]
    fn missing_root_yields_nothing() {
        let temp = TempDir::new().expect("tempdir");
        let scan = NodeModulesScan::new(temp.path().join("absent"));
        assert_eq!(scan.iter().count(), 0);
    }

    #[test]
    fn relative_roots_become_absolute() {
        assert!(absolute(Path::new("some/dir")).is_absolute());
    }
}
