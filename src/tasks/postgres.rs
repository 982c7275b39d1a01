// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! PostgreSQL role and database lifecycle.
//!
//! Every privileged step on the target host runs as the power user through
//! `sudo -u postgres`. Dumps always use the custom format with `--clean`, so
//! restoring one drops the objects it recreates.

use crate::{
    remote::Remote,
    shell::{Cmd, ShellCommand},
    tasks::{Result, TaskStatus, Tasks},
};

use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// Database superuser account.
pub const POSTGRES: &str = "postgres";

/// Options for downloading a database dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpDownload {
    /// Restore dump into local database.
    pub restore: bool,

    /// Remove local dump after restoring it.
    pub cleanup: bool,

    /// Drop and recreate local database before restoring.
    pub recreate: bool,
}

impl Default for DumpDownload {
    fn default() -> Self {
        Self {
            restore: false,
            cleanup: false,
            recreate: true,
        }
    }
}

impl<R> Tasks<'_, R>
where
    R: Remote + ?Sized,
{
    /// Delete database.
    ///
    /// Best effort. A failed drop, e.g., because the database does not exist,
    /// is tolerated.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Remote`](crate::tasks::TaskError::Remote) if the
    ///   host cannot be reached.
    #[instrument(skip(self), level = "debug")]
    pub fn drop_db(&self) -> Result<TaskStatus> {
        let db = self.settings.project()?.db.as_str();
        self.shell
            .as_user(&self.settings.poweruser)
            .warn_only()
            .sudo(Cmd::new("dropdb").arg(db), Some(POSTGRES))?;

        Ok(TaskStatus::Done)
    }

    /// Create database with a dedicated role as its owner.
    ///
    /// Role and database are probed independently, and only the missing ones
    /// are created. The role always comes first, because the database names
    /// it as owner.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Remote`](crate::tasks::TaskError::Remote) if role
    ///   or database creation fails.
    #[instrument(skip(self), level = "debug")]
    pub fn create_db(&self) -> Result<TaskStatus> {
        let project = self.settings.project()?;
        let power = self.shell.as_user(&self.settings.poweruser);
        let probe = power.warn_only().quiet();

        let role_exists = probe
            .sudo(
                catalog_probe(Cmd::new("psql").args(["--quiet", "-c", "\\du"]), &project.dbuser),
                Some(POSTGRES),
            )?
            .succeeded();
        let db_exists = probe
            .sudo(
                catalog_probe(
                    Cmd::new("psql").args(["--quiet", "--list", "--tuples-only"]),
                    &project.db,
                ),
                Some(POSTGRES),
            )?
            .succeeded();

        if !role_exists {
            power.sudo(
                Cmd::new("createuser")
                    .args(["-P", "-S", "-D", "-R", "-e"])
                    .arg(&project.dbuser),
                Some(POSTGRES),
            )?;
        }

        if !db_exists {
            power.sudo(
                Cmd::new("createdb")
                    .args(["--echo", "--encoding=UTF8"])
                    .arg(format!("--owner={}", project.dbuser))
                    .arg(&project.db),
                Some(POSTGRES),
            )?;
        }

        Ok(TaskStatus::Done)
    }

    /// Upload local database dump and restore it on target host.
    ///
    /// With `recreate` the target database is dropped and created again before
    /// restoring. A failure after the dump leaves the local dump file behind,
    /// and a failure after dropping leaves the target database empty.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Remote`](crate::tasks::TaskError::Remote) if any
    ///   step of the pipeline fails.
    #[instrument(skip(self), level = "debug")]
    pub fn upload_db(&self, recreate: bool) -> Result<TaskStatus> {
        let project = self.settings.project()?;
        let dump = format!("{}.backup", project.db);

        self.shell.local(
            Cmd::new("pg_dump")
                .args(["--clean", "-F", "custom", "-U"])
                .arg(&project.dbuser)
                .arg(&project.db)
                .write_to(dump.as_str()),
        )?;
        self.shell.put(Path::new(&dump), ".")?;

        if recreate {
            self.drop_db()?;
            self.create_db()?;
        }

        let home = self.shell.pwd()?;
        self.shell
            .as_user(&self.settings.poweruser)
            .cd(&home)
            .sudo(
                Cmd::new("pg_restore").arg("-d").arg(&project.db).arg(dump.as_str()),
                Some(POSTGRES),
            )?;
        self.shell.local(Cmd::new("/bin/rm").arg(dump.as_str()))?;

        Ok(TaskStatus::Done)
    }

    /// Download database dump from target host.
    ///
    /// The dump lands in `<host>-<db>.backup` in the current directory. Its
    /// path is returned, unless [`DumpDownload::cleanup`] removed it after
    /// restoring.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Remote`](crate::tasks::TaskError::Remote) if any
    ///   step of the pipeline fails.
    #[instrument(skip(self), level = "debug")]
    pub fn download_db(&self, opts: &DumpDownload) -> Result<Option<PathBuf>> {
        let project = self.settings.project()?;
        let dump = format!("{}.backup", project.db);

        self.shell.quiet().run(
            Cmd::new("pg_dump")
                .args(["--clean", "-F", "custom"])
                .arg(&project.db)
                .write_to(dump.as_str()),
        )?;
        let local_dump = PathBuf::from(format!("{}-{dump}", self.shell.host()));
        let dump_file = self.shell.get(&dump, &local_dump)?;

        if !opts.restore {
            info!("database dump saved to {}", dump_file.display());
            return Ok(Some(dump_file));
        }

        let dump_name = dump_file.to_string_lossy().into_owned();
        if opts.recreate {
            self.shell.warn_only().local(
                Cmd::new("dropdb")
                    .arg("-U")
                    .arg(&project.dbuser)
                    .arg(&project.db),
            )?;
            self.shell.local(
                Cmd::new("createdb")
                    .args(["--echo", "--encoding=UTF8", "-U", POSTGRES])
                    .arg(format!("--owner={}", project.dbuser))
                    .arg(&project.db),
            )?;
        }

        self.shell.local(
            Cmd::new("pg_restore")
                .args(["-U", POSTGRES, "-d"])
                .arg(&project.db)
                .path(dump_name.as_str()),
        )?;

        if opts.cleanup {
            self.shell.local(Cmd::new("/bin/rm").path(dump_name.as_str()))?;
            return Ok(None);
        }

        Ok(Some(dump_file))
    }
}

/// Probe system catalog listing for an exact name in its first column.
///
/// The name is matched as a fixed string against whole lines, so `my.db` never
/// matches `myxdb`.
fn catalog_probe(listing: Cmd, name: &str) -> ShellCommand {
    listing
        .pipe(Cmd::new("awk").arg("{print $1}"))
        .pipe(Cmd::new("grep").args(["-q", "-F", "-x", "-e"]).arg(name))
}
