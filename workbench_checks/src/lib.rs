//! Checks run against a workspace before its changes are committed.
//!
//! Each check wraps an external tool. The only built-in one is
//! [`FormattingCheck`], which runs the source formatter over a workspace while
//! skipping every `node_modules` tree found by [`NodeModulesScan`].

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

mod check;
mod formatter;
mod scan;

use std::path::PathBuf;
use std::time::Duration;

pub use check::{default_checks, FixCheck, FormattingCheck};
pub use formatter::{CommandFormatter, FormatOutcome, Formatter};
pub use scan::{NodeModulesIter, NodeModulesScan};

/// Result alias for check operations.
pub type Result<T> = std::result::Result<T, CheckError>;

/// Failures running an external check tool.
///
/// A tool that runs and reports problems is not an error; see
/// [`FormatOutcome::success`].
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// The tool could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that was launched.
        program: String,
        /// Source I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The tool ran past its deadline and was killed.
    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout {
        /// Program that was launched.
        program: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// Waiting on the tool failed.
    #[error("failed waiting on {program}: {source}")]
    Wait {
        /// Program that was launched.
        program: String,
        /// Source I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Collecting the tool's output failed.
    #[error("failed to read {stream} of {program}")]
    Output {
        /// Program that was launched.
        program: String,
        /// `stdout` or `stderr`.
        stream: &'static str,
    },
    /// The workspace to check does not exist.
    #[error("workspace path {} is not a directory", .path.display())]
    MissingWorkspace {
        /// Path handed to the check.
        path: PathBuf,
    },
}
