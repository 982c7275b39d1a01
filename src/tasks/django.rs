// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Django project deployment.
//!
//! # Host Layout
//!
//! Everything lives below `~/project`, a non-bare checkout of the project
//! repository:
//!
//! - `project/<project>/settings/__init__.py` links to `<type>.py`.
//! - `project/<project>/settings/_local.py` holds host local settings, e.g.,
//!   the secret key.
//! - `project/<project>/media/{static,uploads}` receive collected static files
//!   and user uploads.
//! - `project/tmp` is shared with the web server group and holds
//!   `uwsgi.pid`.
//! - `project/cron/*.cron` are crontab fragments for the deployment user.
//!
//! # Deployment
//!
//! [`Tasks::deploy`] walks through a fixed sequence: fetch, sync, layout,
//! dependencies, static files, schema, restart. Sync uses a fast-forward only
//! pull on purpose. If the deployed branch diverged from the remote, the pull
//! fails and the run stops instead of merging anything on a live host.

use crate::{
    remote::Remote,
    shell::Cmd,
    tasks::{
        access::{KeyUpload, Keypair, DEFAULT_PUBLIC_KEY_PATH},
        postgres::DumpDownload,
        python::DEFAULT_VIRTUALENV,
        Result, TaskError, TaskStatus, Tasks,
    },
};

use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Checkout directory relative to the deployment user's home.
pub const PROJECT_DIR: &str = "project";

/// Host local settings module inside the settings package.
pub const LOCAL_SETTINGS: &str = "_local.py";

/// Tag marking crontab lines owned by the project.
pub const CRON_TAG: &str = "# DJANGOPROJ";

/// Tarball used to move the uploads directory between hosts.
pub const UPLOADS_TARBALL: &str = "uploads.tar";

/// Length of generated secret keys.
pub const SECRET_KEY_LENGTH: usize = 50;

const SECRET_KEY_CHARS: &str = "abcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*(-_=+)";

const PID_FILE: &str = "project/tmp/uwsgi.pid";

/// Options for [`Tasks::deploy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployOptions {
    /// Apply pending database migrations.
    pub syncdb: bool,

    /// Install requirements.
    pub requirements: bool,

    /// Code changed, so recompile bytecode and restart hard.
    pub code: bool,

    /// Only sync code and restart, overriding every other switch.
    pub essential: bool,

    /// Hand `tmp` over to the web server group.
    pub permissions: bool,

    /// Upgrade installed requirements.
    pub upgrade: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            syncdb: true,
            requirements: true,
            code: true,
            essential: false,
            permissions: true,
            upgrade: false,
        }
    }
}

impl DeployOptions {
    /// Options for the minimal "sync code and restart" deployment.
    pub fn essential() -> Self {
        Self {
            essential: true,
            ..Self::default()
        }
    }

    /// Options with the essential switch applied.
    pub fn effective(&self) -> Self {
        if !self.essential {
            return *self;
        }

        Self {
            syncdb: false,
            requirements: false,
            code: false,
            permissions: false,
            ..*self
        }
    }
}

impl<R> Tasks<'_, R>
where
    R: Remote + ?Sized,
{
    /// Deploy project, doing everything a release needs.
    ///
    /// Clones the repository on first deployment, checks out the configured
    /// branch, fast-forwards it, ensures the host layout, installs
    /// requirements, collects static files, migrates the database, and
    /// restarts the application. See [`DeployOptions`] for what can be left
    /// out.
    ///
    /// Remember to add the host's deployment key to the repository first, see
    /// [`Tasks::generate_keypair`] and [`Tasks::show_public_key`].
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::MissingRepo`] if a clone is needed but no
    ///   repository URL is configured.
    /// - Return [`TaskError::Remote`] if any step fails, including a pull of a
    ///   diverged branch.
    #[instrument(skip(self), level = "debug")]
    pub fn deploy(&self, opts: &DeployOptions) -> Result<TaskStatus> {
        let opts = opts.effective();
        let project = self.settings.project()?;
        let branch = self.settings.branch.as_str();

        // Fetch.
        if !self.shell.exists(PROJECT_DIR)? {
            let repo = self.settings.repo.as_deref().ok_or(TaskError::MissingRepo)?;
            self.shell
                .run(Cmd::new("git").args(["clone", "-q"]).arg(repo).arg(PROJECT_DIR))?;
            self.set_secret_key()?;
        }

        // Sync.
        let checkout = self.shell.cd(PROJECT_DIR);
        checkout.run(Cmd::new("git").args(["checkout", "-q"]).arg(branch))?;
        checkout.run(
            Cmd::new("git")
                .args(["pull", "-q", "--ff-only", "origin"])
                .arg(branch),
        )?;

        // Layout.
        let settings_dir = checkout.cd(format!("{}/settings", project.project));
        if !settings_dir.exists("__init__.py")? {
            settings_dir.run(
                Cmd::new("ln")
                    .arg("-s")
                    .arg(format!("{}.py", self.settings.deployment_type))
                    .arg("__init__.py"),
            )?;
        }
        checkout.run(
            Cmd::new("/bin/mkdir")
                .arg("-p")
                .arg(format!("{}/media/static", project.project))
                .arg(format!("{}/media/uploads", project.project)),
        )?;
        checkout.run(Cmd::new("/bin/mkdir").arg("-p").arg("tmp"))?;
        checkout.run(Cmd::new("/bin/chmod").arg("750").arg("tmp"))?;

        if opts.permissions {
            let group = self.settings.webserver_group.as_str();
            let project_dir = checkout.pwd()?;
            let group_matches = checkout
                .warn_only()
                .quiet()
                .run(
                    Cmd::new("[")
                        .raw("\"$(stat -c %G tmp)\"")
                        .arg("=")
                        .arg(group)
                        .arg("]"),
                )?
                .succeeded();

            // INVARIANT: Only escalate privileges when group actually differs.
            if !group_matches {
                self.shell
                    .as_user(&self.settings.poweruser)
                    .cd(&project_dir)
                    .sudo(Cmd::new("/bin/chgrp").arg(group).arg("tmp"), None)?;
            }
        }

        if opts.requirements {
            self.install_reqs(opts.upgrade, None)?;
        }

        self.manage(["collectstatic", "--noinput", "--verbosity=0"])?;

        if opts.syncdb {
            self.manage(["syncdb", "--migrate"])?;
        }

        if opts.code {
            self.recompile_py(true)?;
            // Hard restart so the master process rereads available packages.
            self.restart_project(false)?;
        } else {
            // Graceful restart still resets cached templates and the local
            // memory cache of static file storage.
            self.restart_project(true)?;
        }

        Ok(TaskStatus::Done)
    }

    /// Restart application server.
    ///
    /// Signals the uWSGI master process. A hard restart kills it and relies on
    /// the process supervisor to spawn a new one. A graceful restart reloads
    /// workers without dropping connections. A missing pid file is tolerated.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Remote`] if the host cannot be reached.
    #[instrument(skip(self), level = "debug")]
    pub fn restart_project(&self, graceful: bool) -> Result<TaskStatus> {
        let signal = if graceful { "-SIGHUP" } else { "-SIGINT" };
        self.shell
            .warn_only()
            .run(Cmd::new("kill").arg(signal).raw(format!("$(cat {PID_FILE})")))?;

        Ok(TaskStatus::Done)
    }

    /// Run Django management command.
    ///
    /// Each element of `args` reaches `manage.py` as exactly one argument.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Remote`] if the command fails.
    #[instrument(skip(self, args), level = "debug")]
    pub fn manage<I, S>(&self, args: I) -> Result<TaskStatus>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shell
            .cd(PROJECT_DIR)
            .run(Cmd::new("python").arg("manage.py").args(args))?;

        Ok(TaskStatus::Done)
    }

    /// Set `name = value` in the host local settings module.
    ///
    /// The module is created with mode 600 when missing. With `backup`,
    /// existing assignments of `name` are commented out instead of left in
    /// place. The value is written as is, so strings must carry their own
    /// quotes.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::InvalidSettingName`] if `name` is not a Python
    ///   identifier.
    /// - Return [`TaskError::Remote`] if the host cannot be reached.
    #[instrument(skip(self, value), level = "debug")]
    pub fn set_local_setting(&self, name: &str, value: &str, backup: bool) -> Result<TaskStatus> {
        if !is_identifier(name) {
            return Err(TaskError::InvalidSettingName(name.into()));
        }

        let project = self.settings.project()?;
        let settings_dir = self
            .shell
            .cd(format!("{PROJECT_DIR}/{}/settings", project.project))
            .warn_only();

        if !settings_dir.exists(LOCAL_SETTINGS)? {
            settings_dir.run(Cmd::new("touch").arg(LOCAL_SETTINGS))?;
            settings_dir.run(Cmd::new("chmod").arg("600").arg(LOCAL_SETTINGS))?;
        } else if backup {
            settings_dir.run(
                Cmd::new("sed")
                    .arg("-i")
                    .arg(format!("s|^\\s*{name}\\s*=\\s*|#{name} = |"))
                    .arg(LOCAL_SETTINGS),
            )?;
        }

        settings_dir.append(LOCAL_SETTINGS, &format!("{name} = {value}"), false, false)?;

        Ok(TaskStatus::Done)
    }

    /// Set random `SECRET_KEY` in the host local settings module.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Remote`] if the host cannot be reached.
    #[instrument(skip(self), level = "debug")]
    pub fn set_secret_key(&self) -> Result<TaskStatus> {
        let key = generate_secret_key(&mut rand::thread_rng());
        self.set_local_setting("SECRET_KEY", &format!("'{key}'"), true)
    }

    /// Install crontab fragments from `project/cron`.
    ///
    /// Fragments matching `*.cron` are concatenated and every line is tagged.
    /// Tagged lines already installed for the deployment user are replaced,
    /// untagged ones are kept.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Remote`] if fragments cannot be prepared.
    #[instrument(skip(self), level = "debug")]
    pub fn add_cronjobs(&self) -> Result<TaskStatus> {
        let cron = format!("{PROJECT_DIR}/cron");
        if !self.shell.exists(&cron)? {
            debug!("no {cron} directory, nothing to install");
            return Ok(TaskStatus::Skipped(format!("no {cron} directory")));
        }

        let user = self.settings.user.as_str();
        let cron_dir = self.shell.cd(&cron);
        cron_dir.run(Cmd::new("cat").raw("*.cron").write_to("crontab.new"))?;
        cron_dir.run(
            Cmd::new("sed")
                .arg("-i")
                .arg(format!("/{CRON_TAG}$/!s/$/ {CRON_TAG}/g"))
                .arg("crontab.new"),
        )?;

        let absolute = cron_dir.pwd()?;
        let power = self
            .shell
            .as_user(&self.settings.poweruser)
            .cd(&absolute)
            .warn_only();
        power.sudo(
            Cmd::new("crontab")
                .args(["-l", "-u", user])
                .pipe(Cmd::new("grep").arg("-v").arg(format!("{CRON_TAG}$")))
                .append_to("crontab.new"),
            None,
        )?;
        power.sudo(
            Cmd::new("crontab").arg("crontab.new").args(["-u", user]),
            None,
        )?;
        cron_dir.run(Cmd::new("rm").arg("crontab.new"))?;

        Ok(TaskStatus::Done)
    }

    /// Replace remote uploads directory with the local one.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Remote`] if packing, copying, or unpacking fails.
    #[instrument(skip(self), level = "debug")]
    pub fn upload_uploads(&self, cleanup: bool) -> Result<TaskStatus> {
        let project = self.settings.project()?;

        self.shell.local(
            Cmd::new("/bin/tar")
                .arg("-C")
                .arg(format!("{}/media", project.project))
                .args(["-c", "uploads"])
                .write_to(UPLOADS_TARBALL),
        )?;
        let home = self.shell.pwd()?;
        let tarball = self.shell.put(Path::new(UPLOADS_TARBALL), &home)?;
        self.shell.local(Cmd::new("/bin/rm").arg(UPLOADS_TARBALL))?;

        let media = self
            .shell
            .cd(format!("{PROJECT_DIR}/{}/media", project.project));
        media.run(Cmd::new("/bin/rm").arg("-rf").arg("uploads"))?;
        media.run(Cmd::new("/bin/tar").arg("-xf").path(tarball.as_str()))?;
        if cleanup {
            media.run(Cmd::new("/bin/rm").path(tarball.as_str()))?;
        }

        Ok(TaskStatus::Done)
    }

    /// Download remote uploads directory.
    ///
    /// The tarball lands in `<host>-uploads.tar` in the current directory.
    /// With `replace` the local uploads directory is replaced by its content,
    /// and with `cleanup` the tarball is removed afterwards. Returns the path
    /// of the tarball if it was kept.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Remote`] if packing, copying, or unpacking fails.
    /// - Return [`TaskError::Io`] if local media directory cannot be created.
    #[instrument(skip(self), level = "debug")]
    pub fn download_uploads(&self, replace: bool, cleanup: bool) -> Result<Option<PathBuf>> {
        let project = self.settings.project()?;

        self.shell.run(
            Cmd::new("/bin/tar")
                .arg("-C")
                .arg(format!("{PROJECT_DIR}/{}/media", project.project))
                .args(["-c", "uploads"])
                .write_to(UPLOADS_TARBALL),
        )?;
        let local_tarball = PathBuf::from(format!("{}-{UPLOADS_TARBALL}", self.shell.host()));
        let tarball = self.shell.get(UPLOADS_TARBALL, &local_tarball)?;
        self.shell.run(Cmd::new("/bin/rm").arg(UPLOADS_TARBALL))?;

        if !replace {
            info!("uploads saved to {}", tarball.display());
            return Ok(Some(tarball));
        }

        let media = format!("{}/media", project.project);
        mkdirp::mkdirp(&media)?;
        let tarball_name = tarball.to_string_lossy().into_owned();
        self.shell
            .local(Cmd::new("/bin/rm").arg("-rf").arg(format!("{media}/uploads")))?;
        self.shell.local(
            Cmd::new("/bin/tar")
                .arg("-C")
                .arg(media.as_str())
                .arg("-xf")
                .path(tarball_name.as_str()),
        )?;

        if cleanup {
            self.shell.local(Cmd::new("/bin/rm").path(tarball_name.as_str()))?;
            return Ok(None);
        }

        Ok(Some(tarball))
    }

    /// Provision a fresh host.
    ///
    /// Creates system user and database, uploads the operator's key through
    /// the power user, generates the host's deployment key, prints it, and
    /// sets up the virtual environment. Web and application server
    /// configuration is not generated yet.
    ///
    /// # Errors
    ///
    /// - Return first error of any sub-task.
    #[instrument(skip(self), level = "debug")]
    pub fn provision(&self) -> Result<TaskStatus> {
        // TODO: Generate nginx and uWSGI configuration for the project.
        self.create_user()?;
        self.create_db()?;
        self.upload_local_public_key(&KeyUpload {
            use_poweruser: true,
            ..KeyUpload::default()
        })?;
        self.generate_keypair(&Keypair::default())?;
        let key = self.show_public_key(DEFAULT_PUBLIC_KEY_PATH)?;
        info!("deployment key of {}: {key}", self.shell.host());
        self.setup_virtualenv(DEFAULT_VIRTUALENV)?;

        Ok(TaskStatus::Done)
    }

    /// Deploy, then replace remote database and uploads with local copies.
    ///
    /// Migrations are skipped since the database was just replaced.
    ///
    /// # Errors
    ///
    /// - Return first error of any sub-task.
    #[instrument(skip(self), level = "debug")]
    pub fn local_to_remote(&self) -> Result<TaskStatus> {
        self.upload_db(true)?;
        self.deploy(&DeployOptions {
            syncdb: false,
            ..DeployOptions::default()
        })?;
        self.upload_uploads(true)?;

        Ok(TaskStatus::Done)
    }

    /// Replace local database and uploads with remote copies.
    ///
    /// # Errors
    ///
    /// - Return first error of any sub-task.
    #[instrument(skip(self), level = "debug")]
    pub fn remote_to_local(&self) -> Result<TaskStatus> {
        self.download_db(&DumpDownload {
            restore: true,
            cleanup: true,
            ..DumpDownload::default()
        })?;
        self.download_uploads(true, true)?;

        Ok(TaskStatus::Done)
    }
}

/// Generate random Django secret key.
pub fn generate_secret_key<G>(rng: &mut G) -> String
where
    G: Rng,
{
    let chars = SECRET_KEY_CHARS.as_bytes();
    (0..SECRET_KEY_LENGTH)
        .map(|_| chars[rng.gen_range(0..chars.len())] as char)
        .collect()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        }
        _ => false,
    }
}
