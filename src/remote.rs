// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote command facade.
//!
//! Tasks never talk to SSH directly. They go through the [`Remote`] trait,
//! which knows how to run a [`ShellCommand`] on the target host, on the
//! target host through sudo, or on the control host, along with copying files
//! between the two. The production implementation is [`SshRemote`].
//!
//! # Scoped Settings
//!
//! A [`Shell`] pairs a remote with a [`Scope`]: the acting login user, the
//! working directory, whether failures are tolerated, whether output is
//! hidden, and whether the command owns the operator's terminal. Scopes are
//! values. Narrowing one through [`Shell::cd`], [`Shell::as_user`],
//! [`Shell::warn_only`], [`Shell::quiet`], or [`Shell::interactive`] hands back
//! a new shell and leaves the original untouched, so a setting never leaks
//! past the block that asked for it.
//!
//! # Prompts
//!
//! Commands that may ask the operator for input, e.g., `passwd` or
//! `ssh-keygen` asking for a passphrase, run in an interactive scope. Their
//! output goes straight to the terminal and is not captured. Every visible
//! sudo command is interactive as well, since sudo itself may prompt for a
//! password.
//!
//! # Failure Policy
//!
//! A remote only reports errors it could not turn into an [`Outcome`], e.g.,
//! failing to spawn `ssh` or losing the connection. Whether a non-zero exit
//! status aborts the caller is decided by the shell: outside of a warn-only
//! scope the failure becomes [`RemoteError::CommandFailed`], inside of one the
//! failed outcome is handed back for the caller to inspect.

pub mod ssh;

pub use ssh::SshRemote;

use crate::shell::{escape_bre, Cmd, ShellCommand};

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Exit status, if the command was not killed by a signal.
    pub code: Option<i32>,

    /// Captured standard output without trailing newline.
    pub stdout: String,

    /// Captured standard error without trailing newline.
    pub stderr: String,
}

impl Outcome {
    /// Successful outcome with given standard output.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed outcome with given exit status.
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Command exited with zero status.
    pub fn succeeded(&self) -> bool {
        self.code == Some(0)
    }

    /// Command exited with non-zero status or was killed.
    pub fn failed(&self) -> bool {
        !self.succeeded()
    }
}

/// Settings that apply to every command issued through a [`Shell`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// Login user on the target host.
    pub user: String,

    /// Working directory, relative to login home unless absolute.
    pub cwd: Option<String>,

    /// Hand back failed outcomes instead of aborting.
    pub warn_only: bool,

    /// Hide commands and their output from the log.
    pub quiet: bool,

    /// Attach command to the operator's terminal instead of capturing output.
    pub interactive: bool,
}

impl Scope {
    /// Construct default scope for target login user.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            cwd: None,
            warn_only: false,
            quiet: false,
            interactive: false,
        }
    }

    /// Resolve `path` against current working directory.
    ///
    /// Absolute and home relative paths replace the working directory
    /// entirely.
    pub fn join(&self, path: &str) -> String {
        if path.starts_with('/') || path.starts_with('~') {
            return path.to_string();
        }

        match &self.cwd {
            Some(cwd) => format!("{}/{path}", cwd.trim_end_matches('/')),
            None => path.to_string(),
        }
    }

    /// Prefix command with a change into current working directory.
    pub fn wrap(&self, command: &ShellCommand) -> ShellCommand {
        match &self.cwd {
            Some(cwd) => Cmd::new("cd").path(cwd.as_str()).and_then(command.clone()),
            None => command.clone(),
        }
    }
}

/// Transport able to execute commands for tasks.
///
/// Implementations report non-zero exit status through [`Outcome`], never
/// through an error. In an interactive [`Scope`] the command must be able to
/// prompt the operator, and the returned outcome carries no output.
pub trait Remote {
    /// Name of the target host, without user or port.
    fn host(&self) -> &str;

    /// Run command on target host as the scope's login user.
    fn run(&self, scope: &Scope, command: &ShellCommand) -> Result<Outcome>;

    /// Run command on target host through sudo, optionally as `as_user`.
    fn sudo(&self, scope: &Scope, command: &ShellCommand, as_user: Option<&str>)
        -> Result<Outcome>;

    /// Run command on control host.
    ///
    /// The scope's working directory only applies to the target host, so
    /// local commands always run in the current directory of the process.
    fn local(&self, scope: &Scope, command: &ShellCommand) -> Result<Outcome>;

    /// Copy file from target host to control host, returning local path.
    fn get(&self, scope: &Scope, remote_path: &str, local_path: &Path) -> Result<PathBuf>;

    /// Copy file from control host into directory on target host, returning
    /// the destination path.
    fn put(&self, scope: &Scope, local_path: &Path, remote_dir: &str) -> Result<String>;
}

/// Remote paired with scoped settings.
#[derive(Debug)]
pub struct Shell<'r, R>
where
    R: Remote + ?Sized,
{
    remote: &'r R,
    scope: Scope,
}

impl<R> Clone for Shell<'_, R>
where
    R: Remote + ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            remote: self.remote,
            scope: self.scope.clone(),
        }
    }
}

impl<'r, R> Shell<'r, R>
where
    R: Remote + ?Sized,
{
    /// Construct new shell logging in as `user`.
    pub fn new(remote: &'r R, user: impl Into<String>) -> Self {
        Self {
            remote,
            scope: Scope::new(user),
        }
    }

    /// Current scoped settings.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Name of target host.
    pub fn host(&self) -> &str {
        self.remote.host()
    }

    /// Narrow scope to another login user.
    pub fn as_user(&self, user: impl Into<String>) -> Self {
        let mut shell = self.clone();
        shell.scope.user = user.into();
        shell
    }

    /// Narrow scope to a working directory, nesting relative paths.
    pub fn cd(&self, path: impl AsRef<str>) -> Self {
        let mut shell = self.clone();
        shell.scope.cwd = Some(self.scope.join(path.as_ref()));
        shell
    }

    /// Narrow scope to tolerate failures.
    pub fn warn_only(&self) -> Self {
        let mut shell = self.clone();
        shell.scope.warn_only = true;
        shell
    }

    /// Narrow scope to hide commands and output.
    pub fn quiet(&self) -> Self {
        let mut shell = self.clone();
        shell.scope.quiet = true;
        shell
    }

    /// Narrow scope to let commands prompt the operator.
    pub fn interactive(&self) -> Self {
        let mut shell = self.clone();
        shell.scope.interactive = true;
        shell
    }

    /// Run command on target host.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::CommandFailed`] if command fails outside of a
    ///   warn-only scope.
    /// - Return any transport error of the remote.
    pub fn run(&self, command: impl Into<ShellCommand>) -> Result<Outcome> {
        let command = command.into();
        self.announce("run", &command);
        let outcome = self.remote.run(&self.scope, &command)?;
        self.settle(&command, outcome)
    }

    /// Run command on target host through sudo.
    ///
    /// Outside of a quiet scope the command always runs interactively.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::CommandFailed`] if command fails outside of a
    ///   warn-only scope.
    /// - Return any transport error of the remote.
    pub fn sudo(&self, command: impl Into<ShellCommand>, as_user: Option<&str>) -> Result<Outcome> {
        if !self.scope.quiet && !self.scope.interactive {
            return self.interactive().sudo(command, as_user);
        }

        let command = command.into();
        self.announce("sudo", &command);
        let outcome = self.remote.sudo(&self.scope, &command, as_user)?;
        self.settle(&command, outcome)
    }

    /// Run command on control host.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::CommandFailed`] if command fails outside of a
    ///   warn-only scope.
    /// - Return [`RemoteError::Spawn`] if local shell cannot be spawned.
    pub fn local(&self, command: impl Into<ShellCommand>) -> Result<Outcome> {
        let command = command.into();
        self.announce("local", &command);
        let outcome = self.remote.local(&self.scope, &command)?;
        self.settle(&command, outcome)
    }

    /// Download file from target host.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::Transfer`] if copy fails.
    pub fn get(&self, remote_path: &str, local_path: impl AsRef<Path>) -> Result<PathBuf> {
        info!(
            "[{}] download: {remote_path} -> {}",
            self.host(),
            local_path.as_ref().display()
        );
        self.remote.get(&self.scope, remote_path, local_path.as_ref())
    }

    /// Upload file into directory on target host.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::Transfer`] if copy fails.
    pub fn put(&self, local_path: impl AsRef<Path>, remote_dir: &str) -> Result<String> {
        info!(
            "[{}] upload: {} -> {remote_dir}",
            self.host(),
            local_path.as_ref().display()
        );
        self.remote.put(&self.scope, local_path.as_ref(), remote_dir)
    }

    /// Check if path exists on target host.
    ///
    /// A failed probe counts as absence. Transport errors are still
    /// propagated so an unreachable host is never mistaken for a missing
    /// file.
    pub fn exists(&self, path: &str) -> Result<bool> {
        let probe = self.warn_only().quiet();
        Ok(probe.run(Cmd::new("test").arg("-e").path(path))?.succeeded())
    }

    /// Absolute path of current working directory on target host.
    pub fn pwd(&self) -> Result<String> {
        Ok(self.quiet().run(Cmd::new("pwd"))?.stdout.trim().to_string())
    }

    /// Append line to file on target host unless already present.
    ///
    /// With `partial`, any existing line that starts with `line` counts as a
    /// match. Otherwise the whole line must match. Returns whether the line
    /// was written.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::CommandFailed`] if line cannot be written.
    pub fn append(&self, path: &str, line: &str, partial: bool, use_sudo: bool) -> Result<bool> {
        let pattern = format!("^{}{}", escape_bre(line), if partial { "" } else { "$" });
        let check = Cmd::new("grep").args(["-q", "-e"]).arg(pattern).path(path);
        let probe = self.warn_only().quiet();
        let present = if use_sudo {
            probe.sudo(check, None)?
        } else {
            probe.run(check)?
        };

        if present.succeeded() {
            debug!("[{}] {path} already contains {line:?}", self.host());
            return Ok(false);
        }

        let write = Cmd::new("printf").arg("%s\\n").arg(line).append_to(path);
        if use_sudo {
            self.sudo(write, None)?;
        } else {
            self.run(write)?;
        }

        Ok(true)
    }

    fn announce(&self, verb: &str, command: &ShellCommand) {
        let cwd = self.scope.cwd.as_deref().unwrap_or("~");
        if self.scope.quiet {
            debug!("[{}] {verb} ({}:{cwd}): {command}", self.host(), self.scope.user);
        } else {
            info!("[{}] {verb} ({}:{cwd}): {command}", self.host(), self.scope.user);
        }
    }

    fn settle(&self, command: &ShellCommand, outcome: Outcome) -> Result<Outcome> {
        if outcome.succeeded() {
            if !self.scope.quiet {
                for line in outcome.stdout.lines() {
                    info!("[{}] out: {line}", self.host());
                }
            }
            return Ok(outcome);
        }

        if self.scope.warn_only {
            if !self.scope.quiet {
                warn!(
                    "[{}] tolerated {} of: {command}",
                    self.host(),
                    status_text(&outcome.code)
                );
            }
            return Ok(outcome);
        }

        Err(RemoteError::CommandFailed {
            host: self.host().to_string(),
            command: command.to_string(),
            code: outcome.code,
            stderr: outcome.stderr,
        })
    }
}

fn status_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "termination by signal".into(),
    }
}

/// All possible error types for remote command execution.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Command exited with failure outside of a warn-only scope.
    #[error("[{host}] command `{command}` failed with {}: {stderr}", status_text(.code))]
    CommandFailed {
        host: String,
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Target host could not be reached.
    #[error("[{host}] connection failed: {message}")]
    Connection { host: String, message: String },

    /// File copy between control host and target host failed.
    #[error("copy of {from} to {to} failed: {message}")]
    Transfer {
        from: String,
        to: String,
        message: String,
    },

    /// Host string could not be parsed.
    #[error("invalid host string {0:?}")]
    InvalidHost(String),

    /// Local process could not be spawned.
    #[error(transparent)]
    Spawn(#[from] std::io::Error),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = RemoteError> = std::result::Result<T, E>;
