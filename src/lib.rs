// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provision and deploy Django web applications over SSH.
//!
//! Tasks create the system user and database of a project, manage SSH keys,
//! bootstrap a Python virtual environment, and deploy the project from its Git
//! repository. Every task is a short sequence of shell commands issued against
//! a target host through the [`remote::Remote`] trait, guarded by existence
//! probes so running it twice changes nothing the second time.
//!
//! Start with [`config::Settings`], pick a remote such as
//! [`remote::SshRemote`], and call tasks on [`tasks::Tasks`].

pub mod config;
pub mod git;
pub mod path;
pub mod remote;
pub mod shell;
pub mod tasks;

pub use config::{Definition, Settings};
pub use remote::{Remote, Shell, SshRemote};
pub use tasks::{TaskStatus, Tasks};
