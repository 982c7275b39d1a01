// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Python virtual environment.

use crate::{
    remote::Remote,
    shell::Cmd,
    tasks::{django::PROJECT_DIR, Result, TaskStatus, Tasks},
};

use tracing::instrument;

/// Default virtual environment root on target host.
pub const DEFAULT_VIRTUALENV: &str = "~/.env";

/// Pinned virtualenv release used to bootstrap the environment.
pub const VIRTUALENV_VERSION: &str = "1.10.1";

const VIRTUALENV_SOURCE: &str = "https://pypi.python.org/packages/source/v/virtualenv";

// Django directories with a potentially huge number of files that hold no
// Python modules.
const PRUNED_DIRS: [&str; 3] = ["media", "static", "templates"];

impl<R> Tasks<'_, R>
where
    R: Remote + ?Sized,
{
    /// Create virtual environment and activate it from `~/.profile`.
    ///
    /// The environment is only bootstrapped when `path` does not exist yet.
    /// The profile lines are appended every time, but never twice.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Remote`](crate::tasks::TaskError::Remote) if
    ///   download or bootstrap fails.
    #[instrument(skip(self), level = "debug")]
    pub fn setup_virtualenv(&self, path: &str) -> Result<TaskStatus> {
        if !self.shell.exists(path)? {
            let tarball = format!("virtualenv-{VIRTUALENV_VERSION}.tar.gz");
            self.shell.run(
                Cmd::new("curl")
                    .args(["--insecure", "-O"])
                    .arg(format!("{VIRTUALENV_SOURCE}/{tarball}")),
            )?;
            self.shell.run(Cmd::new("tar").arg("xvfz").arg(tarball.as_str()))?;
            self.shell
                .cd(format!("virtualenv-{VIRTUALENV_VERSION}"))
                .run(Cmd::new("python").arg("virtualenv.py").path(path))?;
        }

        self.shell
            .append(".profile", "export LANG=en_US.UTF8", true, false)?;
        self.shell
            .append(".profile", &format!(". {path}/bin/activate"), true, false)?;

        Ok(TaskStatus::Done)
    }

    /// Install required packages into virtual environment.
    ///
    /// Defaults to `requirements/<type>.txt` inside the project checkout.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Remote`](crate::tasks::TaskError::Remote) if pip
    ///   fails.
    #[instrument(skip(self), level = "debug")]
    pub fn install_reqs(&self, upgrade: bool, requirements_file: Option<&str>) -> Result<TaskStatus> {
        let requirements_file = match requirements_file {
            Some(file) => file.to_string(),
            None => format!("requirements/{}.txt", self.settings.deployment_type),
        };

        self.shell.cd(PROJECT_DIR).run(
            Cmd::new("pip")
                .args(["-q", "install"])
                .arg_if(upgrade, "--upgrade")
                .arg("-r")
                .arg(requirements_file),
        )?;

        Ok(TaskStatus::Done)
    }

    /// Recompile bytecode of the project and of packages installed from
    /// source into the virtual environment.
    ///
    /// Stale `*.pyc` files are removed before compiling. With `ignore_errors`
    /// compile failures are tolerated, which first deployments need while some
    /// modules cannot be imported yet.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Remote`](crate::tasks::TaskError::Remote) if
    ///   removal or compilation fails without `ignore_errors`.
    #[instrument(skip(self), level = "debug")]
    pub fn recompile_py(&self, ignore_errors: bool) -> Result<TaskStatus> {
        let top_dir = format!("{PROJECT_DIR}/{}", self.settings.project()?.project);

        let mut project_files = Cmd::new("find").arg(top_dir.as_str()).args(["-mindepth", "1"]);
        for dir in PRUNED_DIRS {
            project_files = project_files
                .arg("-path")
                .arg(format!("{top_dir}/{dir}"))
                .args(["-prune", "-o"]);
        }
        let project_files = project_files.args(["-type", "f"]);
        let venv_files = Cmd::new("find")
            .raw("\"$VIRTUAL_ENV/src\"")
            .args(["-name", ".git", "-a", "-type", "d", "-prune", "-o", "-type", "f"]);

        let shell = if ignore_errors {
            self.shell.quiet().warn_only()
        } else {
            self.shell.quiet()
        };

        for files in [project_files, venv_files] {
            shell.run(
                files
                    .clone()
                    .args(["-name", "*.pyc", "-print"])
                    .pipe(Cmd::new("xargs").args(["rm", "-f"])),
            )?;
            shell.run(
                files
                    .args(["-name", "*.py", "-print"])
                    .pipe(Cmd::new("python").args(["-m", "compileall", "-i", "-"])),
            )?;
        }

        Ok(TaskStatus::Done)
    }
}
