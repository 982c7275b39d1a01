// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment configuration.
//!
//! Configuration is split in two layers. A [`Definition`] mirrors the layout
//! of the optional `webdev.toml` file where every field may be left out.
//! [`Settings`] is the resolved result: every field holds a value, either from
//! the file or from a default. Settings are built once at startup and handed
//! to every task by reference. Tasks never modify them.
//!
//! # File Layout
//!
//! ```toml
//! [settings]
//! branch = "master"
//! repo = "git@example.org:shop/shop.git"
//! type = "production"
//! poweruser = "admin"
//! webserver_group = "nginx"
//! user = "shop"
//! hosts = ["shop@example.org"]
//!
//! [project]
//! name = "shop"
//! db = "shop_live"
//! ```
//!
//! # Project Identity
//!
//! The `[project]` table sets the system group, Django project directory,
//! database, and database owner in one go. All four default to the project
//! name, and each may be overridden on its own. Without a `[project]` table
//! none of them are set, so a partially configured project cannot exist.

use crate::{
    git,
    path::{default_config_file, PathError, CONFIG_FILE_NAME},
};

use serde::{Deserialize, Serialize};
use std::{
    env::{self, VarError},
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, warn};

/// Branch deployed when none is configured.
pub const DEFAULT_BRANCH: &str = "master";

/// Deployment type used when none is configured.
pub const DEFAULT_DEPLOYMENT_TYPE: &str = "production";

/// Group of the web server when none is configured.
pub const DEFAULT_WEBSERVER_GROUP: &str = "nginx";

/// Configuration file layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Definition {
    /// General deployment settings.
    #[serde(default)]
    pub settings: SettingsDefinition,

    /// Identity of deployed project.
    pub project: Option<ProjectDefinition>,
}

impl Definition {
    /// Load definition from file.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = read_to_string(path.as_ref()).map_err(|source| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source,
        })?;

        data.parse()
    }

    /// Load first definition found among candidate files.
    ///
    /// Falls back to an empty definition if no candidate exists.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if an existing file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if an existing file is malformed.
    pub fn discover(candidates: impl IntoIterator<Item = impl AsRef<Path>>) -> Result<Self> {
        for candidate in candidates {
            if candidate.as_ref().is_file() {
                debug!("load configuration from {:?}", candidate.as_ref().display());
                return Self::load(candidate);
            }
        }

        debug!("no configuration file found, use defaults");
        Ok(Self::default())
    }

    /// Load definition from explicit file, or discover it.
    ///
    /// An explicit file must exist. Otherwise `webdev.toml` in the current
    /// directory is tried first, then the user wide configuration file.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if a file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if a file is malformed.
    /// - Return [`ConfigError::Path`] if home directory cannot be determined.
    pub fn locate(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Self::discover([PathBuf::from(CONFIG_FILE_NAME), default_config_file()?]),
        }
    }
}

impl FromStr for Definition {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut definition: Definition = toml::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on repository field.
        if let Some(repo) = definition.settings.repo.take() {
            definition.settings.repo = Some(
                shellexpand::env(repo.as_str())
                    .map_err(ConfigError::ShellExpansion)?
                    .into_owned(),
            );
        }

        Ok(definition)
    }
}

impl Display for Definition {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// General deployment settings as written in configuration file.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SettingsDefinition {
    /// Branch to check out on deployment.
    pub branch: Option<String>,

    /// Repository URL to clone the project from.
    pub repo: Option<String>,

    /// Deployment type selecting settings module and requirements file.
    #[serde(rename = "type")]
    pub deployment_type: Option<String>,

    /// Privileged login used for bootstrap operations.
    pub poweruser: Option<String>,

    /// Group the web server runs as.
    pub webserver_group: Option<String>,

    /// Unprivileged login that owns the deployment.
    pub user: Option<String>,

    /// Hosts to run tasks against.
    pub hosts: Option<Vec<String>>,
}

/// Project identity as written in configuration file.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ProjectDefinition {
    /// Project name, default for every other field.
    pub name: String,

    /// System group override.
    pub group: Option<String>,

    /// Database name override.
    pub db: Option<String>,

    /// Database owner override.
    pub dbuser: Option<String>,
}

/// Names that identify a project on the target host.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ProjectIdentity {
    /// System group of deployment user.
    pub group: String,

    /// Directory of the Django project inside the checkout.
    pub project: String,

    /// Database name.
    pub db: String,

    /// Database role owning the database.
    pub dbuser: String,
}

impl ProjectIdentity {
    /// Use one name for every field.
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            group: name.clone(),
            project: name.clone(),
            db: name.clone(),
            dbuser: name,
        }
    }
}

impl From<ProjectDefinition> for ProjectIdentity {
    fn from(definition: ProjectDefinition) -> Self {
        let mut identity = Self::from_name(definition.name);
        if let Some(group) = definition.group {
            identity.group = group;
        }
        if let Some(db) = definition.db {
            identity.db = db;
        }
        if let Some(dbuser) = definition.dbuser {
            identity.dbuser = dbuser;
        }
        identity
    }
}

/// Values detected from the control host.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Defaults {
    /// Login name of the operator.
    pub local_user: String,

    /// Fetch URL of local `origin` remote.
    pub repo: Option<String>,
}

impl Defaults {
    /// Detect defaults from environment and current directory.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NoLocalUser`] if no user name variable is set.
    pub fn detect() -> Result<Self> {
        let local_user = ["LOGNAME", "USER", "LNAME", "USERNAME"]
            .into_iter()
            .find_map(|name| env::var(name).ok().filter(|value| !value.is_empty()))
            .ok_or(ConfigError::NoLocalUser)?;

        let repo = match env::current_dir().map(git::origin_url) {
            Ok(Ok(url)) => url,
            Ok(Err(error)) => {
                warn!("cannot read local repository: {error}");
                None
            }
            Err(error) => {
                warn!("cannot determine current directory: {error}");
                None
            }
        };

        Ok(Self { local_user, repo })
    }
}

/// Resolved configuration shared by every task.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Settings {
    /// Branch to check out on deployment.
    pub branch: String,

    /// Repository URL to clone the project from.
    pub repo: Option<String>,

    /// Deployment type, e.g., production.
    pub deployment_type: String,

    /// Privileged login used for bootstrap operations.
    pub poweruser: String,

    /// Group the web server runs as.
    pub webserver_group: String,

    /// Unprivileged login that owns the deployment.
    pub user: String,

    /// Hosts to run tasks against.
    pub hosts: Vec<String>,

    /// Identity of deployed project, if any.
    pub project: Option<ProjectIdentity>,
}

impl Settings {
    /// Resolve definition against detected defaults.
    pub fn resolve(definition: Definition, defaults: Defaults) -> Self {
        let SettingsDefinition {
            branch,
            repo,
            deployment_type,
            poweruser,
            webserver_group,
            user,
            hosts,
        } = definition.settings;

        Self {
            branch: branch.unwrap_or_else(|| DEFAULT_BRANCH.into()),
            repo: repo.or(defaults.repo),
            deployment_type: deployment_type.unwrap_or_else(|| DEFAULT_DEPLOYMENT_TYPE.into()),
            poweruser: poweruser.unwrap_or_else(|| defaults.local_user.clone()),
            webserver_group: webserver_group.unwrap_or_else(|| DEFAULT_WEBSERVER_GROUP.into()),
            user: user.unwrap_or(defaults.local_user),
            hosts: hosts.unwrap_or_default(),
            project: definition.project.map(ProjectIdentity::from),
        }
    }

    /// Set every project scoped name at once.
    pub fn set_project(&mut self, name: impl Into<String>) {
        self.project = Some(ProjectIdentity::from_name(name));
    }

    /// Identity of deployed project.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::MissingProject`] if no project was configured.
    pub fn project(&self) -> Result<&ProjectIdentity> {
        self.project.as_ref().ok_or(ConfigError::MissingProject)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<VarError>),

    /// Failed to read configuration file.
    #[error("cannot read configuration file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to resolve configuration path.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Task needs project identity that was never configured.
    #[error("no project configured, add a [project] table or pass --project")]
    MissingProject,

    /// Operator login name cannot be determined.
    #[error("cannot determine local user name")]
    NoLocalUser,
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
