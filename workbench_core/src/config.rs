//! Explicit configuration for the workspace manager and review service.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::api::Identity;
use crate::{Error, Result};

const ENV_BASE_PATH: &str = "WORKBENCH_BASE_PATH";
const ENV_SOURCE_REPO: &str = "WORKBENCH_SOURCE_REPO";
const ENV_REPO_NAME: &str = "WORKBENCH_REPO_NAME";
const ENV_USER_NAME: &str = "WORKBENCH_USER_NAME";
const ENV_USER_EMAIL: &str = "WORKBENCH_USER_EMAIL";
const ENV_DIFF_CACHE: &str = "WORKBENCH_DIFF_CACHE";

const FALLBACK_REPO_NAME: &str = "repo";

/// Recognized options.
///
/// `base_path` and `source_repo` are required. Everything else is optional:
/// `repo_name` defaults to the file name of `source_repo`, `identity` is
/// applied to commits made through handles from the default factory, and a
/// non-zero `diff_cache_capacity` enables diff memoization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// Base directory holding `BASE`, `head/` and `ws/`.
    pub base_path: PathBuf,
    /// Canonical source repository the base is initialized from.
    pub source_repo: PathBuf,
    /// Directory name of each checkout.
    #[serde(default)]
    pub repo_name: Option<String>,
    /// Committer identity used in production.
    #[serde(default)]
    pub identity: Option<Identity>,
    /// Number of memoized diffs; zero disables the cache.
    #[serde(default)]
    pub diff_cache_capacity: usize,
}

impl Config {
    /// Minimal configuration with defaults for every optional field.
    pub fn new(base_path: impl Into<PathBuf>, source_repo: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            source_repo: source_repo.into(),
            repo_name: None,
            identity: None,
            diff_cache_capacity: 0,
        }
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the document is malformed or misses a
    /// required key.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| Error::Config {
            message: err.to_string(),
        })
    }

    /// Load a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and [`Error::Config`]
    /// if it does not parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::io(path, source))?;
        Self::from_toml_str(&text)
    }

    /// Build a configuration from `WORKBENCH_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a required variable is unset or a value
    /// is malformed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var_os(key))
    }

    /// Same as [`Config::from_env`] with an injectable variable source.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| Error::Config {
                    message: format!("{key} is not set"),
                })
        };
        let text = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .map(|value| value.to_string_lossy().into_owned())
        };

        let mut config = Self::new(required(ENV_BASE_PATH)?, required(ENV_SOURCE_REPO)?);
        config.repo_name = text(ENV_REPO_NAME);
        config.identity = match (text(ENV_USER_NAME), text(ENV_USER_EMAIL)) {
            (Some(name), Some(email)) => Some(Identity::new(name, email)),
            (None, None) => None,
            _ => {
                return Err(Error::Config {
                    message: format!("{ENV_USER_NAME} and {ENV_USER_EMAIL} must be set together"),
                })
            }
        };
        if let Some(raw) = text(ENV_DIFF_CACHE) {
            config.diff_cache_capacity = raw.parse().map_err(|_| Error::Config {
                message: format!("{ENV_DIFF_CACHE} must be a non-negative integer, got '{raw}'"),
            })?;
        }
        Ok(config)
    }

    /// Checkout directory name.
    #[must_use]
    pub fn repo_name(&self) -> String {
        self.repo_name.clone().unwrap_or_else(|| {
            self.source_repo
                .file_name()
                .map_or_else(|| FALLBACK_REPO_NAME.to_owned(), |name| {
                    name.to_string_lossy().into_owned()
                })
        })
    }

    /// Marker file written by base initialization.
    #[must_use]
    pub fn base_marker(&self) -> PathBuf {
        self.base_path.join("BASE")
    }

    /// Base-local clone of the source repository that workspaces clone from.
    #[must_use]
    pub fn head_repo_path(&self) -> PathBuf {
        self.base_path.join("head").join(self.repo_name())
    }

    /// Directory holding every workspace.
    #[must_use]
    pub fn workspaces_dir(&self) -> PathBuf {
        self.base_path.join("ws")
    }

    /// Checkout path for a workspace: `<base>/ws/<name>/<repo>`.
    #[must_use]
    pub fn workspace_repo_path(&self, name: &str) -> PathBuf {
        self.workspaces_dir().join(name).join(self.repo_name())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), OsString::from(v)))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn layout_follows_base_and_repo_name() {
        let config = Config::new("/tmp/base", "/src/startup-os");
        assert_eq!(config.repo_name(), "startup-os");
        assert_eq!(
            config.workspace_repo_path("ws1"),
            PathBuf::from("/tmp/base/ws/ws1/startup-os")
        );
        assert_eq!(
            config.head_repo_path(),
            PathBuf::from("/tmp/base/head/startup-os")
        );
        assert_eq!(config.base_marker(), PathBuf::from("/tmp/base/BASE"));
    }

    #[test]
    fn toml_defaults_optional_fields() {
        let config = Config::from_toml_str(
            r#"
            base_path = "/tmp/base"
            source_repo = "/src/repo"
            "#,
        )
        .expect("parse config");
        assert!(config.identity.is_none());
        assert_eq!(config.diff_cache_capacity, 0);
        assert_eq!(config.repo_name(), "repo");
    }

    #[test]
    fn toml_reads_identity_and_overrides() {
        let config = Config::from_toml_str(
            r#"
            base_path = "/tmp/base"
            source_repo = "/src/repo"
            repo_name = "checkout"
            diff_cache_capacity = 64

            [identity]
            name = "Bot"
            email = "bot@example.com"
            "#,
        )
        .expect("parse config");
        assert_eq!(config.repo_name(), "checkout");
        assert_eq!(config.diff_cache_capacity, 64);
        assert_eq!(
            config.identity,
            Some(Identity::new("Bot", "bot@example.com"))
        );
    }

    #[test]
    fn toml_missing_base_is_config_error() {
        let err = Config::from_toml_str(r#"source_repo = "/src/repo""#);
        assert!(matches!(err, Err(Error::Config { .. })));
    }

    #[test]
    fn env_lookup_requires_paths() {
        let err = Config::from_lookup(lookup(&[(ENV_BASE_PATH, "/tmp/base")]));
        assert!(matches!(err, Err(Error::Config { message }) if message.contains(ENV_SOURCE_REPO)));
    }

    #[test]
    fn env_lookup_reads_all_options() {
        let config = Config::from_lookup(lookup(&[
            (ENV_BASE_PATH, "/tmp/base"),
            (ENV_SOURCE_REPO, "/src/repo"),
            (ENV_USER_NAME, "Bot"),
            (ENV_USER_EMAIL, "bot@example.com"),
            (ENV_DIFF_CACHE, "16"),
        ]))
        .expect("config from env");
        assert_eq!(config.base_path, PathBuf::from("/tmp/base"));
        assert_eq!(config.diff_cache_capacity, 16);
        assert!(config.identity.is_some());
    }

    #[test]
    fn env_lookup_rejects_half_identity() {
        let err = Config::from_lookup(lookup(&[
            (ENV_BASE_PATH, "/tmp/base"),
            (ENV_SOURCE_REPO, "/src/repo"),
            (ENV_USER_NAME, "Bot"),
        ]));
        assert!(matches!(err, Err(Error::Config { .. })));
    }

    #[test]
    fn env_lookup_rejects_bad_cache_size() {
        let err = Config::from_lookup(lookup(&[
            (ENV_BASE_PATH, "/tmp/base"),
            (ENV_SOURCE_REPO, "/src/repo"),
            (ENV_DIFF_CACHE, "lots"),
        ]));
        assert!(matches!(err, Err(Error::Config { .. })));
    }
}
