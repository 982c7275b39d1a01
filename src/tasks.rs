// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provisioning and deployment tasks.
//!
//! A __task__ is a short ordered procedure of shell commands guarded by
//! existence checks on the target host. Tasks are methods on [`Tasks`], which
//! bundles a [`Shell`] for one host with the resolved [`Settings`] of the run.
//!
//! # Composition
//!
//! Composite tasks such as [`Tasks::deploy`] or [`Tasks::provision`] call
//! their sub-tasks as plain method calls. Every sub-task therefore runs exactly
//! once per top-level call, in the order written down, and sees the same
//! settings as its caller.
//!
//! # Idempotency
//!
//! Nothing about the remote host is cached. Each task probes the state it
//! depends on right before acting on it, e.g., whether a user, file, or
//! database exists. Running a task twice in a row leaves the host in the same
//! state as running it once. There is no locking, so two runs against the
//! same host at the same time are not supported.
//!
//! # Failure Tiers
//!
//! 1. __Fatal__: a failed command outside of a warn-only scope aborts the
//!    task, and with it every composite task that called it.
//! 2. __Tolerated__: probes and best-effort cleanups run warn-only and inspect
//!    the outcome themselves.
//! 3. __Soft-reported__: a few user facing checks, e.g., a missing local key
//!    file, log a warning and end the task early with
//!    [`TaskStatus::Skipped`]. Composite tasks carry on afterwards.
//!
//! There is no rollback anywhere. An interrupted run leaves the host in
//! whatever state its last finished command produced.

pub mod access;
pub mod django;
pub mod postgres;
pub mod python;

pub use access::{KeyUpload, Keypair};
pub use django::DeployOptions;
pub use postgres::DumpDownload;

use crate::{
    config::{ConfigError, Settings},
    path::PathError,
    remote::{Remote, RemoteError, Shell},
};

use tracing::warn;

/// How a task ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Every step of the task ran.
    Done,

    /// Task stopped early for the given reason.
    Skipped(String),
}

impl TaskStatus {
    /// Check if every step of the task ran.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Task runner for one host.
#[derive(Debug)]
pub struct Tasks<'a, R>
where
    R: Remote + ?Sized,
{
    pub(crate) shell: Shell<'a, R>,
    pub(crate) settings: &'a Settings,
}

impl<'a, R> Tasks<'a, R>
where
    R: Remote + ?Sized,
{
    /// Construct new task runner.
    pub fn new(shell: Shell<'a, R>, settings: &'a Settings) -> Self {
        Self { shell, settings }
    }

    /// Shell in the default scope of this runner.
    pub fn shell(&self) -> &Shell<'a, R> {
        &self.shell
    }

    /// Settings of this run.
    pub fn settings(&self) -> &Settings {
        self.settings
    }

    fn skip(&self, reason: impl Into<String>) -> TaskStatus {
        let reason = reason.into();
        warn!("[{}] {reason}", self.shell.host());
        TaskStatus::Skipped(reason)
    }
}

/// All possible error types for task execution.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Remote command or transfer failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Settings lack something the task needs.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Local path cannot be resolved.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Project must be cloned but no repository URL is known.
    #[error("no repository URL configured, set settings.repo or add an origin remote")]
    MissingRepo,

    /// Setting name is not a valid Python identifier.
    #[error("invalid setting name {0:?}")]
    InvalidSettingName(String),

    /// Local file operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = TaskError> = std::result::Result<T, E>;
