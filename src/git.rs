// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Local repository inspection.
//!
//! The repository URL to deploy from defaults to the remote of the Git
//! repository that the operator runs the tool from.

use git2::{ErrorCode, Repository};
use std::path::Path;
use tracing::{debug, instrument};

/// Remote consulted for the default repository URL.
pub const DEFAULT_REMOTE: &str = "origin";

/// Which URL of a remote to read.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    /// URL used to fetch from the remote.
    #[default]
    Fetch,

    /// URL used to push to the remote, falling back to the fetch URL.
    Push,
}

/// Look up URL of a named remote of the repository containing `path`.
///
/// Returns `None` if `path` is not inside a Git repository, the remote does
/// not exist, or the remote has no URL.
///
/// # Errors
///
/// - Return [`git2::Error`] if the repository exists but cannot be read.
#[instrument(skip(path), level = "debug")]
pub fn remote_url(
    path: impl AsRef<Path>,
    remote_name: &str,
    kind: UrlKind,
) -> Result<Option<String>, git2::Error> {
    let repository = match Repository::discover(path.as_ref()) {
        Ok(repository) => repository,
        Err(error) if error.code() == ErrorCode::NotFound => {
            debug!("{:?} is not inside a repository", path.as_ref().display());
            return Ok(None);
        }
        Err(error) => return Err(error),
    };

    let remote = match repository.find_remote(remote_name) {
        Ok(remote) => remote,
        Err(error) if error.code() == ErrorCode::NotFound => {
            debug!("repository has no remote named {remote_name:?}");
            return Ok(None);
        }
        Err(error) => return Err(error),
    };

    let url = match kind {
        UrlKind::Fetch => remote.url(),
        UrlKind::Push => remote.pushurl().or(remote.url()),
    };

    Ok(url.map(ToString::to_string))
}

/// Fetch URL of the `origin` remote of the repository containing `path`.
///
/// # Errors
///
/// - Return [`git2::Error`] if the repository exists but cannot be read.
pub fn origin_url(path: impl AsRef<Path>) -> Result<Option<String>, git2::Error> {
    remote_url(path, DEFAULT_REMOTE, UrlKind::Fetch)
}
