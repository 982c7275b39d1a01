// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! System accounts and SSH keys.

use crate::{
    path::expand_local,
    remote::Remote,
    shell::{Cmd, ShellCommand},
    tasks::{Result, TaskStatus, Tasks},
};

use std::fs::read_to_string;
use tracing::{info, instrument};

/// Default private key path on either host.
pub const DEFAULT_KEY_PATH: &str = "~/.ssh/id_rsa";

/// Default public key path on either host.
pub const DEFAULT_PUBLIC_KEY_PATH: &str = "~/.ssh/id_rsa.pub";

/// Options for uploading the operator's public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUpload {
    /// Act through the power user and sudo, for accounts that cannot log in
    /// yet.
    pub use_poweruser: bool,

    /// Public key file on the control host.
    pub local_pub_key_path: String,
}

impl Default for KeyUpload {
    fn default() -> Self {
        Self {
            use_poweruser: false,
            local_pub_key_path: DEFAULT_PUBLIC_KEY_PATH.into(),
        }
    }
}

/// Options for generating a keypair on the target host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keypair {
    /// Let `ssh-keygen` prompt for a passphrase.
    pub use_passphrase: bool,

    /// Private key path, public key gets a `.pub` suffix.
    pub key_path: String,

    /// Remove an existing keypair first.
    pub overwrite: bool,
}

impl Default for Keypair {
    fn default() -> Self {
        Self {
            use_passphrase: false,
            key_path: DEFAULT_KEY_PATH.into(),
            overwrite: false,
        }
    }
}

impl<R> Tasks<'_, R>
where
    R: Remote + ?Sized,
{
    /// Create system user and group with home directory.
    ///
    /// Group and user are probed independently, and only the missing ones are
    /// created. The home directory is created along with the user and is never
    /// removed, even if setting the password fails afterwards.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Config`](crate::tasks::TaskError::Config) if no
    ///   project is configured.
    /// - Return [`TaskError::Remote`](crate::tasks::TaskError::Remote) if the
    ///   host cannot be reached.
    #[instrument(skip(self), level = "debug")]
    pub fn create_user(&self) -> Result<TaskStatus> {
        let user = self.settings.user.as_str();
        let group = self.settings.project()?.group.as_str();

        info!("switching to power user {:?}", self.settings.poweruser);
        let power = self.shell.as_user(&self.settings.poweruser).warn_only();
        let probe = power.quiet();
        let group_exists = probe.run(Cmd::new("getent").arg("group").arg(group))?.succeeded();
        let user_exists = probe.run(Cmd::new("getent").arg("passwd").arg(user))?.succeeded();

        if !group_exists {
            power.sudo(Cmd::new("/usr/sbin/groupadd").arg(group), None)?;
        }

        if !user_exists {
            power.sudo(
                Cmd::new("/usr/sbin/useradd")
                    .arg("-m")
                    .arg("-g")
                    .arg(group)
                    .arg(user),
                None,
            )?;
            power.sudo(Cmd::new("/usr/bin/passwd").arg(user), None)?;
        }

        Ok(TaskStatus::Done)
    }

    /// Append local SSH public key to remote `~/.ssh/authorized_keys`.
    ///
    /// With [`KeyUpload::use_poweruser`] every remote step goes through the
    /// power user and sudo. That covers hosts where the deployment user may
    /// only log in by key, before that key was uploaded.
    ///
    /// The key is appended at most once. Running the task again leaves
    /// `authorized_keys` as is, apart from reapplying ownership and modes.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Path`](crate::tasks::TaskError::Path) if local
    ///   key path cannot be expanded.
    /// - Return [`TaskError::Io`](crate::tasks::TaskError::Io) if local key
    ///   file cannot be read.
    /// - Return [`TaskError::Remote`](crate::tasks::TaskError::Remote) if a
    ///   remote step fails.
    #[instrument(skip(self), level = "debug")]
    pub fn upload_local_public_key(&self, opts: &KeyUpload) -> Result<TaskStatus> {
        let target_user = self.settings.user.as_str();
        let mut acting = self.shell.clone();

        if opts.use_poweruser {
            // INVARIANT: Resolve target home as power user, the target user may not log in yet.
            let probe = self.shell.as_user(&self.settings.poweruser).warn_only().quiet();
            let target_home = probe
                .run(
                    Cmd::new("getent")
                        .arg("passwd")
                        .arg(target_user)
                        .pipe(Cmd::new("awk").arg("-F:").arg("{print $6}")),
                )?
                .stdout
                .trim()
                .to_string();

            if target_home.is_empty() || !probe.exists(&target_home)? {
                return Ok(self.skip("User's home directory does not exist"));
            }

            acting = self.shell.as_user(&self.settings.poweruser).cd(&target_home);
        }

        let pubkey_path = expand_local(&opts.local_pub_key_path)?;
        if !pubkey_path.exists() {
            return Ok(self.skip(format!(
                "Local public key not found: {}",
                pubkey_path.display()
            )));
        }

        let Some(key) = public_key_line(&read_to_string(&pubkey_path)?) else {
            return Ok(self.skip(format!(
                "Local public key is empty: {}",
                pubkey_path.display()
            )));
        };

        let use_sudo = opts.use_poweruser;
        let exec = |command: ShellCommand| {
            if use_sudo {
                acting.sudo(command, None)
            } else {
                acting.run(command)
            }
        };

        exec(Cmd::new("mkdir").arg("-p").arg(".ssh").into())?;
        acting.append(".ssh/authorized_keys", &key, true, use_sudo)?;
        exec(Cmd::new("chmod").arg("600").arg(".ssh/authorized_keys").into())?;
        exec(Cmd::new("chmod").arg("700").arg(".ssh").into())?;
        exec(
            Cmd::new("chown")
                .arg("-R")
                .arg(format!("{target_user}:{target_user}"))
                .arg(".ssh")
                .into(),
        )?;

        Ok(TaskStatus::Done)
    }

    /// Generate SSH keypair on target host.
    ///
    /// An existing key file is left alone unless [`Keypair::overwrite`] is
    /// set. Overwriting removes the old files before `ssh-keygen` runs, so a
    /// failure in between leaves no keypair at all.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Remote`](crate::tasks::TaskError::Remote) if
    ///   removal or generation fails.
    #[instrument(skip(self), level = "debug")]
    pub fn generate_keypair(&self, opts: &Keypair) -> Result<TaskStatus> {
        let files = [opts.key_path.clone(), format!("{}.pub", opts.key_path)];
        for file in &files {
            if !self.shell.exists(file)? {
                continue;
            }

            if !opts.overwrite {
                return Ok(self.skip(format!("File already exists: {file}")));
            }

            self.shell.run(Cmd::new("rm").arg("-rf").path(file.as_str()))?;
        }

        let keygen = Cmd::new("ssh-keygen")
            .args(["-t", "rsa", "-b", "2048", "-f"])
            .path(opts.key_path.as_str());
        if opts.use_passphrase {
            self.shell.interactive().run(keygen)?;
        } else {
            self.shell.run(keygen.arg("-N").arg(""))?;
        }

        Ok(TaskStatus::Done)
    }

    /// Print SSH public key of target host.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Remote`](crate::tasks::TaskError::Remote) if key
    ///   cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub fn show_public_key(&self, pub_key_path: &str) -> Result<String> {
        Ok(self.shell.run(Cmd::new("cat").path(pub_key_path))?.stdout)
    }
}

/// Key type and key material of a public key file, without the comment.
fn public_key_line(contents: &str) -> Option<String> {
    let fields: Vec<&str> = contents.split_whitespace().take(2).collect();
    if fields.is_empty() {
        return None;
    }

    Some(fields.join(" "))
}
