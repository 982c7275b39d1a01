// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote access through the system OpenSSH client.
//!
//! Commands are handed to `ssh` as a single rendered command line, file
//! copies go through `scp`. Both binaries inherit standard input from the
//! current process.
//!
//! # Terminal Modes
//!
//! How a command meets the operator's terminal depends on its scope:
//!
//! - __Attached__ commands of an interactive scope get a remote pty through
//!   `ssh -t` and inherit every standard stream. Prompts from `sudo`,
//!   `passwd`, `createuser -P`, or `ssh-keygen` show up as they are written.
//!   Nothing is captured.
//! - __Echoed__ sudo commands of a quiet scope still get a pty, because sudo
//!   may need one to ask for a password. Their output is captured and copied
//!   to standard error as it arrives, so a password prompt is never swallowed.
//! - __Captured__ commands run without a pty and keep their output to
//!   themselves.
//!
//! OpenSSH reserves exit status 255 for its own failures. That status is
//! reported as [`RemoteError::Connection`] rather than as a failed command, so
//! an unreachable host never looks like a missing file or user.

use crate::{
    remote::{Outcome, Remote, RemoteError, Result, Scope},
    shell::{Cmd, ShellCommand},
};

use indicatif::{ProgressBar, ProgressStyle};
use std::{
    io::{self, ErrorKind, Read, Write},
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
    thread,
    time::Duration,
};
use tracing::{debug, instrument};

const SSH_FAILURE: i32 = 255;

/// Way a command is connected to the operator's terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Inherit standard streams, capture nothing.
    Attached,

    /// Capture output while copying it to standard error.
    Echoed,

    /// Capture output without a pty.
    Captured,
}

impl Mode {
    fn select(scope: &Scope, sudo: bool) -> Self {
        match (scope.interactive, sudo) {
            (true, _) => Self::Attached,
            (false, true) => Self::Echoed,
            (false, false) => Self::Captured,
        }
    }

    fn needs_tty(self) -> bool {
        !matches!(self, Self::Captured)
    }
}

/// Remote host reached through `ssh` and `scp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshRemote {
    host: String,
    user: Option<String>,
    port: Option<u16>,
}

impl SshRemote {
    /// Parse host string of the form `[user@]host[:port]`.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::InvalidHost`] if host or port is malformed.
    pub fn parse(host_string: &str) -> Result<Self> {
        let invalid = || RemoteError::InvalidHost(host_string.to_string());

        let (user, rest) = match host_string.rsplit_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
            Some(_) => return Err(invalid()),
            None => (None, host_string),
        };

        let (host, port) = match rest.split_once(':') {
            Some((host, port)) => (host, Some(port.parse::<u16>().map_err(|_| invalid())?)),
            None => (rest, None),
        };

        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            user,
            port,
        })
    }

    /// Login user given in host string.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// SSH port given in host string.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    fn ssh(&self, scope: &Scope, mode: Mode) -> Command {
        let mut ssh = Command::new("ssh");
        if let Some(port) = self.port {
            ssh.arg("-p").arg(port.to_string());
        }
        if mode.needs_tty() {
            ssh.arg("-t");
        }
        ssh.arg("-l").arg(&scope.user).arg(&self.host);
        ssh
    }

    fn scp_target(&self, scope: &Scope, path: &str) -> String {
        format!("{}@{}:{path}", scope.user, self.host)
    }

    fn execute(&self, mut command: Command, mode: Mode) -> Result<Outcome> {
        let outcome = match mode {
            Mode::Attached => {
                let status = command
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit())
                    .status()?;
                Outcome {
                    code: status.code(),
                    ..Outcome::default()
                }
            }
            Mode::Echoed => outcome_from(echoed(command)?),
            Mode::Captured => outcome_from(
                command
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()?
                    .wait_with_output()?,
            ),
        };

        if outcome.code == Some(SSH_FAILURE) {
            return Err(RemoteError::Connection {
                host: self.host.clone(),
                message: outcome.stderr,
            });
        }

        Ok(outcome)
    }

    #[instrument(skip(self), level = "debug")]
    fn transfer(&self, from: String, to: String) -> Result<()> {
        let style = ProgressStyle::with_template("{spinner:.green} {elapsed_precise:.green}  {msg}")?;
        let bar = ProgressBar::new_spinner();
        bar.set_style(style);
        bar.set_message(format!("{from} -> {to}"));
        bar.enable_steady_tick(Duration::from_millis(100));

        let mut scp = Command::new("scp");
        scp.arg("-q");
        if let Some(port) = self.port {
            scp.arg("-P").arg(port.to_string());
        }
        let output = scp
            .arg(&from)
            .arg(&to)
            .stdin(Stdio::inherit())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .and_then(|child| child.wait_with_output());
        bar.finish_and_clear();

        let output = output?;
        if !output.status.success() {
            return Err(RemoteError::Transfer {
                from,
                to,
                message: chomp(String::from_utf8_lossy(&output.stderr).into_owned()),
            });
        }

        Ok(())
    }
}

impl Remote for SshRemote {
    fn host(&self) -> &str {
        self.host.as_str()
    }

    fn run(&self, scope: &Scope, command: &ShellCommand) -> Result<Outcome> {
        let line = remote_line(scope, command);
        let mode = Mode::select(scope, false);
        debug!("ssh {}@{} ({mode:?}): {line}", scope.user, self.host);
        let mut ssh = self.ssh(scope, mode);
        ssh.arg(line);
        self.execute(ssh, mode)
    }

    fn sudo(
        &self,
        scope: &Scope,
        command: &ShellCommand,
        as_user: Option<&str>,
    ) -> Result<Outcome> {
        let line = sudo_line(scope, command, as_user);
        let mode = Mode::select(scope, true);
        debug!("ssh {}@{} ({mode:?}): {line}", scope.user, self.host);
        let mut ssh = self.ssh(scope, mode);
        ssh.arg(line);
        self.execute(ssh, mode)
    }

    fn local(&self, _scope: &Scope, command: &ShellCommand) -> Result<Outcome> {
        let mut sh = Command::new("sh");
        sh.arg("-c").arg(command.to_string());
        let output = sh
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?
            .wait_with_output()?;

        Ok(outcome_from(output))
    }

    fn get(&self, scope: &Scope, remote_path: &str, local_path: &Path) -> Result<PathBuf> {
        let source = self.scp_target(scope, &scope.join(remote_path));
        self.transfer(source, local_path.display().to_string())?;
        Ok(local_path.to_path_buf())
    }

    fn put(&self, scope: &Scope, local_path: &Path, remote_dir: &str) -> Result<String> {
        let file_name = local_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| RemoteError::Transfer {
                from: local_path.display().to_string(),
                to: remote_dir.to_string(),
                message: "source has no file name".into(),
            })?;

        let dir = scope.join(remote_dir);
        let destination = if dir == "." {
            file_name
        } else {
            format!("{}/{file_name}", dir.trim_end_matches('/'))
        };

        self.transfer(
            local_path.display().to_string(),
            self.scp_target(scope, &destination),
        )?;

        Ok(destination)
    }
}

/// Render command line for plain remote execution.
fn remote_line(scope: &Scope, command: &ShellCommand) -> String {
    scope.wrap(command).to_string()
}

/// Render command line for remote execution through sudo.
///
/// The whole scoped command, working directory change included, runs inside
/// one `sh -c` so that sudo covers every part of a pipeline.
fn sudo_line(scope: &Scope, command: &ShellCommand, as_user: Option<&str>) -> String {
    let mut sudo = Cmd::new("sudo");
    if let Some(user) = as_user {
        sudo = sudo.arg("-u").arg(user);
    }

    sudo.args(["-H", "sh", "-c"])
        .arg(scope.wrap(command).to_string())
        .to_string()
}

/// Run command, copying its standard output to standard error as it arrives.
fn echoed(mut command: Command) -> io::Result<Output> {
    let mut child = command
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stderr = child.stderr.take();
    let errors = thread::spawn(move || -> io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        if let Some(mut stderr) = stderr {
            stderr.read_to_end(&mut buffer)?;
        }
        Ok(buffer)
    });

    let mut captured = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        copy_through(stdout, &mut io::stderr(), &mut captured)?;
    }

    let status = child.wait()?;
    let stderr = errors
        .join()
        .map_err(|_| io::Error::new(ErrorKind::Other, "stderr reader panicked"))??;

    Ok(Output {
        status,
        stdout: captured,
        stderr,
    })
}

// INVARIANT: Flush after every chunk, prompts rarely end with a newline.
fn copy_through(
    mut from: impl Read,
    to: &mut impl Write,
    captured: &mut Vec<u8>,
) -> io::Result<()> {
    let mut chunk = [0_u8; 1024];
    loop {
        let read = match from.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(read) => read,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        };
        to.write_all(&chunk[..read])?;
        to.flush()?;
        captured.extend_from_slice(&chunk[..read]);
    }
}

fn outcome_from(output: Output) -> Outcome {
    Outcome {
        code: output.status.code(),
        stdout: chomp(String::from_utf8_lossy(&output.stdout).into_owned()),
        stderr: chomp(String::from_utf8_lossy(&output.stderr).into_owned()),
    }
}

// INVARIANT: Chomp trailing newlines.
fn chomp(message: String) -> String {
    message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message)
}
