use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::formatter::{CommandFormatter, Formatter};
use crate::scan::NodeModulesScan;
use crate::{CheckError, Result};

/// A check that may rewrite the workspace to fix what it finds.
pub trait FixCheck: Send + Sync {
    /// Stable identifier used in logs and reports.
    fn name(&self) -> &'static str;

    /// Run the check. `Ok(false)` means it ran and found problems it could
    /// not fix.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError`] when the check could not run at all.
    fn perform(&self) -> Result<bool>;
}

/// Runs the source formatter over one workspace checkout.
#[derive(Debug)]
pub struct FormattingCheck<F = CommandFormatter> {
    workspace_path: PathBuf,
    formatter: F,
}

impl FormattingCheck<CommandFormatter> {
    /// Check `workspace_path` with the default [`CommandFormatter`].
    pub fn new(workspace_path: impl Into<PathBuf>) -> Self {
        Self::with_formatter(workspace_path, CommandFormatter::new())
    }
}

impl<F: Formatter> FormattingCheck<F> {
    /// Check `workspace_path` with `formatter`.
    pub fn with_formatter(workspace_path: impl Into<PathBuf>, formatter: F) -> Self {
        Self {
            workspace_path: workspace_path.into(),
            formatter,
        }
    }

    /// Checkout being formatted.
    pub fn workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    /// Formatter the check runs.
    pub const fn formatter(&self) -> &F {
        &self.formatter
    }

    /// `node_modules` trees the formatter is told to skip.
    pub fn ignored_directories(&self) -> Vec<PathBuf> {
        NodeModulesScan::new(&self.workspace_path).iter().collect()
    }
}

impl<F: Formatter> FixCheck for FormattingCheck<F> {
    fn name(&self) -> &'static str {
        "formatting"
    }

    fn perform(&self) -> Result<bool> {
        if !self.workspace_path.is_dir() {
            return Err(CheckError::MissingWorkspace {
                path: self.workspace_path.clone(),
            });
        }

        let ignored = self.ignored_directories();
        let outcome = self
            .formatter
            .run_formatter(&self.workspace_path, &ignored)?;

        if outcome.success {
            info!(check = self.name(), path = %self.workspace_path.display(), "check passed");
        } else {
            warn!(
                check = self.name(),
                path = %self.workspace_path.display(),
                exit_code = ?outcome.exit_code,
                stderr = %outcome.stderr.trim(),
                "check failed"
            );
        }
        Ok(outcome.success)
    }
}

/// Checks run for a workspace before committing.
#[must_use]
pub fn default_checks(workspace_path: &Path) -> Vec<Box<dyn FixCheck>> {
    vec![Box::new(FormattingCheck::new(workspace_path))]
}
