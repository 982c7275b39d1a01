// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use webdev::{
    config::{Defaults, Definition, Settings},
    remote::{Remote, Shell, SshRemote},
    tasks::{
        access::{DEFAULT_KEY_PATH, DEFAULT_PUBLIC_KEY_PATH},
        python::DEFAULT_VIRTUALENV,
        DeployOptions, DumpDownload, KeyUpload, Keypair, Tasks,
    },
};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use inquire::Confirm;
use std::{path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "webdev [options] <command> [command-options]",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Configuration file to use instead of discovering one.
    #[arg(long, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Host to run command against, may be repeated.
    #[arg(short = 'H', long = "host", value_name = "[user@]host[:port]")]
    pub hosts: Vec<String>,

    /// Login of the deployment account.
    #[arg(short, long, value_name = "user")]
    pub user: Option<String>,

    /// Project name, sets system group, database, and database owner too.
    #[arg(long, value_name = "name")]
    pub project: Option<String>,

    /// Branch to deploy.
    #[arg(long, value_name = "branch")]
    pub branch: Option<String>,

    /// Deployment type, e.g., production or staging.
    #[arg(long = "type", value_name = "type")]
    pub deployment_type: Option<String>,

    /// Repository URL to clone project from.
    #[arg(long, value_name = "url")]
    pub repo: Option<String>,

    /// Privileged login used for bootstrap operations.
    #[arg(long, value_name = "user")]
    pub poweruser: Option<String>,

    /// Group the web server runs as.
    #[arg(long, value_name = "group")]
    pub webserver_group: Option<String>,

    /// Do not ask before replacing databases.
    #[arg(short, long)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let definition = Definition::locate(self.config.as_deref())?;
        if let Command::ShowConfig = self.command {
            print!("{definition}");
            return Ok(());
        }

        let settings = self.settings(definition)?;
        if settings.hosts.is_empty() {
            bail!("no hosts to run against, use --host or set settings.hosts");
        }

        if let Some(action) = self.command.destructive_action() {
            if !self.yes && !confirm(action, &settings.hosts)? {
                info!("aborted");
                return Ok(());
            }
        }

        for host in &settings.hosts {
            let remote = SshRemote::parse(host)?;
            let mut host_settings = settings.clone();
            if let Some(user) = remote.user() {
                host_settings.user = user.to_string();
            }

            info!("[{}] executing {}", remote.host(), self.command.name());
            let shell = Shell::new(&remote, host_settings.user.clone());
            let tasks = Tasks::new(shell, &host_settings);
            self.command.run(&tasks)?;
        }

        Ok(())
    }

    fn settings(&self, definition: Definition) -> Result<Settings> {
        let mut settings = Settings::resolve(definition, Defaults::detect()?);

        if !self.hosts.is_empty() {
            settings.hosts = self.hosts.clone();
        }
        if let Some(user) = &self.user {
            settings.user = user.clone();
        }
        if let Some(project) = &self.project {
            settings.set_project(project);
        }
        if let Some(branch) = &self.branch {
            settings.branch = branch.clone();
        }
        if let Some(deployment_type) = &self.deployment_type {
            settings.deployment_type = deployment_type.clone();
        }
        if let Some(repo) = &self.repo {
            settings.repo = Some(repo.clone());
        }
        if let Some(poweruser) = &self.poweruser {
            settings.poweruser = poweruser.clone();
        }
        if let Some(group) = &self.webserver_group {
            settings.webserver_group = group.clone();
        }

        Ok(settings)
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Create system user and group with home directory.
    CreateUser,

    /// Append local SSH public key to remote authorized keys.
    UploadKey(UploadKeyOptions),

    /// Generate SSH keypair on target host.
    GenerateKeypair(KeypairOptions),

    /// Print SSH public key of target host.
    ShowKey(ShowKeyOptions),

    /// Delete project database.
    DropDb,

    /// Create project database and its owner role.
    CreateDb,

    /// Replace remote database with local dump.
    UploadDb(UploadDbOptions),

    /// Download remote database dump.
    DownloadDb(DownloadDbOptions),

    /// Create virtual environment and activate it on login.
    SetupVirtualenv(VirtualenvOptions),

    /// Install required packages into virtual environment.
    InstallReqs(InstallReqsOptions),

    /// Recompile Python bytecode.
    RecompilePy(RecompileOptions),

    /// Deploy project.
    Deploy(DeployArgs),

    /// Run Django management command.
    Manage(ManageOptions),

    /// Restart application server.
    Restart(RestartOptions),

    /// Set value in host local settings.
    SetLocalSetting(LocalSettingOptions),

    /// Set random secret key in host local settings.
    SetSecretKey,

    /// Install crontab fragments of project.
    AddCronjobs,

    /// Replace remote uploads with local ones.
    UploadUploads(UploadUploadsOptions),

    /// Download remote uploads.
    DownloadUploads(DownloadUploadsOptions),

    /// Set up fresh host for project.
    Provision,

    /// Deploy and replace remote database and uploads with local copies.
    LocalToRemote,

    /// Replace local database and uploads with remote copies.
    RemoteToLocal,

    /// Print loaded configuration file.
    ShowConfig,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::CreateUser => "create-user",
            Self::UploadKey(_) => "upload-key",
            Self::GenerateKeypair(_) => "generate-keypair",
            Self::ShowKey(_) => "show-key",
            Self::DropDb => "drop-db",
            Self::CreateDb => "create-db",
            Self::UploadDb(_) => "upload-db",
            Self::DownloadDb(_) => "download-db",
            Self::SetupVirtualenv(_) => "setup-virtualenv",
            Self::InstallReqs(_) => "install-reqs",
            Self::RecompilePy(_) => "recompile-py",
            Self::Deploy(_) => "deploy",
            Self::Manage(_) => "manage",
            Self::Restart(_) => "restart",
            Self::SetLocalSetting(_) => "set-local-setting",
            Self::SetSecretKey => "set-secret-key",
            Self::AddCronjobs => "add-cronjobs",
            Self::UploadUploads(_) => "upload-uploads",
            Self::DownloadUploads(_) => "download-uploads",
            Self::Provision => "provision",
            Self::LocalToRemote => "local-to-remote",
            Self::RemoteToLocal => "remote-to-local",
            Self::ShowConfig => "show-config",
        }
    }

    fn destructive_action(&self) -> Option<&'static str> {
        match self {
            Self::DropDb => Some("drop the remote database"),
            Self::UploadDb(_) => Some("replace the remote database"),
            Self::DownloadDb(opts) if opts.restore => Some("replace the local database"),
            Self::LocalToRemote => Some("replace the remote database and uploads"),
            Self::RemoteToLocal => Some("replace the local database and uploads"),
            _ => None,
        }
    }

    fn run(&self, tasks: &Tasks<'_, SshRemote>) -> Result<()> {
        match self {
            Self::CreateUser => {
                tasks.create_user()?;
            }
            Self::UploadKey(opts) => {
                tasks.upload_local_public_key(&KeyUpload {
                    use_poweruser: opts.use_poweruser,
                    local_pub_key_path: opts.key.clone(),
                })?;
            }
            Self::GenerateKeypair(opts) => {
                tasks.generate_keypair(&Keypair {
                    use_passphrase: opts.passphrase,
                    key_path: opts.key_path.clone(),
                    overwrite: opts.overwrite,
                })?;
            }
            Self::ShowKey(opts) => println!("{}", tasks.show_public_key(&opts.key_path)?),
            Self::DropDb => {
                tasks.drop_db()?;
            }
            Self::CreateDb => {
                tasks.create_db()?;
            }
            Self::UploadDb(opts) => {
                tasks.upload_db(!opts.no_recreate)?;
            }
            Self::DownloadDb(opts) => {
                tasks.download_db(&DumpDownload {
                    restore: opts.restore,
                    cleanup: opts.cleanup,
                    recreate: !opts.no_recreate,
                })?;
            }
            Self::SetupVirtualenv(opts) => {
                tasks.setup_virtualenv(&opts.path)?;
            }
            Self::InstallReqs(opts) => {
                tasks.install_reqs(opts.upgrade, opts.file.as_deref())?;
            }
            Self::RecompilePy(opts) => {
                tasks.recompile_py(opts.ignore_errors)?;
            }
            Self::Deploy(opts) => {
                tasks.deploy(&DeployOptions::from(opts))?;
            }
            Self::Manage(opts) => {
                tasks.manage(&opts.command)?;
            }
            Self::Restart(opts) => {
                tasks.restart_project(opts.graceful)?;
            }
            Self::SetLocalSetting(opts) => {
                tasks.set_local_setting(&opts.name, &opts.value, opts.backup)?;
            }
            Self::SetSecretKey => {
                tasks.set_secret_key()?;
            }
            Self::AddCronjobs => {
                tasks.add_cronjobs()?;
            }
            Self::UploadUploads(opts) => {
                tasks.upload_uploads(!opts.keep)?;
            }
            Self::DownloadUploads(opts) => {
                tasks.download_uploads(opts.replace, !opts.keep)?;
            }
            Self::Provision => {
                tasks.provision()?;
            }
            Self::LocalToRemote => {
                tasks.local_to_remote()?;
            }
            Self::RemoteToLocal => {
                tasks.remote_to_local()?;
            }
            Self::ShowConfig => {}
        }

        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UploadKeyOptions {
    /// Act through power user and sudo, for accounts that cannot log in yet.
    #[arg(long)]
    pub use_poweruser: bool,

    /// Public key file on this machine.
    #[arg(short, long, value_name = "path", default_value = DEFAULT_PUBLIC_KEY_PATH)]
    pub key: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct KeypairOptions {
    /// Let ssh-keygen prompt for a passphrase.
    #[arg(long)]
    pub passphrase: bool,

    /// Private key path on target host.
    #[arg(short, long, value_name = "path", default_value = DEFAULT_KEY_PATH)]
    pub key_path: String,

    /// Replace existing keypair.
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ShowKeyOptions {
    /// Public key path on target host.
    #[arg(short, long, value_name = "path", default_value = DEFAULT_PUBLIC_KEY_PATH)]
    pub key_path: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UploadDbOptions {
    /// Restore into existing database instead of recreating it.
    #[arg(long)]
    pub no_recreate: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DownloadDbOptions {
    /// Restore dump into local database.
    #[arg(short, long)]
    pub restore: bool,

    /// Remove dump after restoring it.
    #[arg(short, long, requires = "restore")]
    pub cleanup: bool,

    /// Restore into existing local database instead of recreating it.
    #[arg(long, requires = "restore")]
    pub no_recreate: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct VirtualenvOptions {
    /// Root of virtual environment on target host.
    #[arg(short, long, value_name = "path", default_value = DEFAULT_VIRTUALENV)]
    pub path: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InstallReqsOptions {
    /// Upgrade installed packages.
    #[arg(short, long)]
    pub upgrade: bool,

    /// Requirements file relative to project checkout.
    #[arg(short, long, value_name = "path")]
    pub file: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RecompileOptions {
    /// Tolerate modules that fail to compile.
    #[arg(short, long)]
    pub ignore_errors: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DeployArgs {
    /// Skip database migrations.
    #[arg(long)]
    pub no_syncdb: bool,

    /// Skip installing requirements.
    #[arg(long)]
    pub no_requirements: bool,

    /// Only static files or templates changed, restart gracefully.
    #[arg(long)]
    pub no_code: bool,

    /// Only sync code and restart gracefully.
    #[arg(short, long)]
    pub essential: bool,

    /// Leave group of tmp directory alone.
    #[arg(long)]
    pub no_permissions: bool,

    /// Upgrade installed requirements.
    #[arg(short, long)]
    pub upgrade: bool,
}

impl From<&DeployArgs> for DeployOptions {
    fn from(args: &DeployArgs) -> Self {
        Self {
            syncdb: !args.no_syncdb,
            requirements: !args.no_requirements,
            code: !args.no_code,
            essential: args.essential,
            permissions: !args.no_permissions,
            upgrade: args.upgrade,
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ManageOptions {
    /// Management command with its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RestartOptions {
    /// Reload workers without killing master process.
    #[arg(short, long)]
    pub graceful: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct LocalSettingOptions {
    /// Setting name, e.g., DEBUG.
    #[arg(value_name = "name")]
    pub name: String,

    /// Python expression to assign, e.g., 'False' or "'value'".
    #[arg(value_name = "value", allow_hyphen_values = true)]
    pub value: String,

    /// Comment out existing assignments instead of shadowing them.
    #[arg(short, long)]
    pub backup: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UploadUploadsOptions {
    /// Keep tarball on target host.
    #[arg(short, long)]
    pub keep: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DownloadUploadsOptions {
    /// Replace local uploads with downloaded ones.
    #[arg(short, long)]
    pub replace: bool,

    /// Keep tarball after replacing local uploads.
    #[arg(short, long, requires = "replace")]
    pub keep: bool,
}

fn confirm(action: &str, hosts: &[String]) -> Result<bool> {
    let answer = Confirm::new(&format!("This will {action} for {}. Continue?", hosts.join(", ")))
        .with_default(false)
        .prompt()?;

    Ok(answer)
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}
