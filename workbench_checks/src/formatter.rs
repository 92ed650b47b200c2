use std::env;
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;
use wait_timeout::ChildExt;

use crate::{CheckError, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const FORMATTER_BIN_ENV: &str = "WORKBENCH_FORMATTER_BIN";
const DEFAULT_FORMATTER: &str = "formatter";
const LANGUAGE_FLAGS: [&str; 5] = ["--java", "--python", "--proto", "--cpp", "--build"];

/// What a formatter run reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOutcome {
    /// Whether the formatter exited successfully.
    pub success: bool,
    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Formats the sources below a path.
pub trait Formatter: Send + Sync {
    /// Format `path`, leaving `ignore_dirs` untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError`] if the formatter could not be run to
    /// completion. A formatter that ran and failed yields an outcome with
    /// `success == false`.
    fn run_formatter(&self, path: &Path, ignore_dirs: &[PathBuf]) -> Result<FormatOutcome>;
}

/// Runs the formatter binary as a subprocess.
#[derive(Debug, Clone)]
pub struct CommandFormatter {
    program: OsString,
    leading_args: Vec<OsString>,
    timeout: Duration,
    path: Option<OsString>,
    home: Option<OsString>,
}

impl CommandFormatter {
    /// Formatter named by `WORKBENCH_FORMATTER_BIN`, or `formatter` on `PATH`.
    #[must_use]
    pub fn new() -> Self {
        let program =
            env::var_os(FORMATTER_BIN_ENV).unwrap_or_else(|| OsString::from(DEFAULT_FORMATTER));
        Self::with_command(program, Vec::<OsString>::new())
    }

    /// Run `program` with `leading_args` placed before the formatter flags.
    pub fn with_command<I, S>(program: impl Into<OsString>, leading_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            leading_args: leading_args.into_iter().map(Into::into).collect(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            path: env::var_os("PATH"),
            home: env::var_os("HOME"),
        }
    }

    /// Kill the formatter if it runs longer than `timeout`.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Formatter flags for one run, excluding any leading arguments.
    #[must_use]
    pub fn arguments(path: &Path, ignore_dirs: &[PathBuf]) -> Vec<OsString> {
        let ignored = ignore_dirs
            .iter()
            .map(|dir| dir.to_string_lossy())
            .collect::<Vec<_>>()
            .join(",");

        let mut args = vec![OsString::from("--path"), path.as_os_str().to_owned()];
        args.extend(LANGUAGE_FLAGS.iter().map(OsString::from));
        args.push(OsString::from("--ignore_directories"));
        args.push(OsString::from(ignored));
        args
    }

    fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    fn configure_environment(&self, command: &mut Command) {
        command.env_clear();
        if let Some(path) = &self.path {
            command.env("PATH", path);
        }
        if let Some(home) = &self.home {
            command.env("HOME", home);
        }
    }
}

impl Default for CommandFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter for CommandFormatter {
    fn run_formatter(&self, path: &Path, ignore_dirs: &[PathBuf]) -> Result<FormatOutcome> {
        let program = self.program_name();
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .args(Self::arguments(path, ignore_dirs))
            .current_dir(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        self.configure_environment(&mut command);

        debug!(%program, path = %path.display(), ignored = ignore_dirs.len(), "running formatter");
        let mut child = command.spawn().map_err(|source| CheckError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stdout_handle = child.stdout.take().map(spawn_reader);
        let stderr_handle = child.stderr.take().map(spawn_reader);

        let status = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CheckError::Timeout {
                    program,
                    timeout: self.timeout,
                });
            }
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CheckError::Wait { program, source });
            }
        };

        let stdout = join_reader(stdout_handle, &program, "stdout")?;
        let stderr = join_reader(stderr_handle, &program, "stderr")?;

        debug!(%program, status = %status, "formatter finished");
        Ok(FormatOutcome {
            success: status.success(),
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut stream: R) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer)?;
        Ok(buffer)
    })
}

fn join_reader(
    handle: Option<JoinHandle<io::Result<Vec<u8>>>>,
    program: &str,
    stream: &'static str,
) -> Result<String> {
    let Some(handle) = handle else {
        return Ok(String::new());
    };
    let failed = || CheckError::Output {
        program: program.to_owned(),
        stream,
    };
    let bytes = handle.join().map_err(|_| failed())?.map_err(|_| failed())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
