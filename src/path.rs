// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevant path information for files on the control host that
//! need to be read, e.g., configuration files and local SSH public keys.

use std::{env::VarError, path::PathBuf};

/// Name of configuration file looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = "webdev.toml";

/// Determine default absolute path to user wide configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/webdev/webdev.toml`. Does
/// not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`PathError::NoWayHome`] if home directory path cannot be
///   determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_file() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("webdev").join(CONFIG_FILE_NAME))
        .ok_or(PathError::NoWayHome)
}

/// Expand path on the control host.
///
/// Performs tilde and environment variable expansion, so `~/.ssh/id_rsa.pub`
/// and `$HOME/.ssh/id_rsa.pub` both resolve to the same file.
///
/// # Errors
///
/// - Return [`PathError::ShellExpansion`] if a referenced variable is unset.
pub fn expand_local(path: &str) -> Result<PathBuf> {
    Ok(PathBuf::from(shellexpand::full(path)?.into_owned()))
}

/// All possible error types for local path resolution.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// No way to determine user's home directory.
    ///
    /// # See Also
    ///
    /// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
    #[error("cannot determine absolute path to user's home directory")]
    NoWayHome,

    /// Failed to perform shell expansion on path.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<VarError>),
}

/// Friendly result alias :3
pub type Result<T, E = PathError> = std::result::Result<T, E>;
