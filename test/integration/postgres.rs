// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{settings, tasks, FakeRemote};

use anyhow::Result;
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use webdev::tasks::{DumpDownload, TaskStatus};

#[test]
fn create_db_creates_role_before_database() -> Result<()> {
    let remote = FakeRemote::new();
    let settings = settings();
    let status = tasks(&remote, &settings).create_db()?;

    assert_eq!(status, TaskStatus::Done);
    assert_eq!(
        remote.actions(),
        [
            "sudo -u postgres createuser -P -S -D -R -e shop",
            "sudo -u postgres createdb --echo --encoding=UTF8 --owner=shop shop",
        ]
    );
    assert!(remote.calls().iter().all(|call| call.user == "admin"));
    assert!(remote.has_role("shop"));
    assert!(remote.has_db("shop"));

    Ok(())
}

#[test]
fn create_db_prompts_for_role_password_on_terminal() -> Result<()> {
    let remote = FakeRemote::new();
    let settings = settings();
    tasks(&remote, &settings).create_db()?;

    assert_eq!(remote.attached(), remote.actions());
    assert!(remote
        .calls()
        .iter()
        .filter(|call| call.line.contains("psql"))
        .all(|call| call.quiet && !call.interactive));

    Ok(())
}

#[test]
fn create_db_matches_dotted_names_exactly() -> Result<()> {
    let remote = FakeRemote::new().with_role("myxdb").with_db("myxdb");
    let mut settings = settings();
    if let Some(project) = settings.project.as_mut() {
        project.db = "my.db".into();
        project.dbuser = "my.db".into();
    }
    tasks(&remote, &settings).create_db()?;

    assert!(remote.has_role("my.db"));
    assert!(remote.has_db("my.db"));
    assert_eq!(remote.count("grep -q -F -x -e my.db"), 2);

    Ok(())
}

#[test]
fn create_db_twice_is_idempotent() -> Result<()> {
    let remote = FakeRemote::new();
    let settings = settings();
    let tasks = tasks(&remote, &settings);
    tasks.create_db()?;
    tasks.create_db()?;

    assert_eq!(remote.count("createuser"), 1);
    assert_eq!(remote.count("createdb"), 1);

    Ok(())
}

#[test]
fn create_db_with_existing_role_only_creates_database() -> Result<()> {
    let remote = FakeRemote::new().with_role("shop");
    let settings = settings();
    tasks(&remote, &settings).create_db()?;

    assert_eq!(
        remote.actions(),
        ["sudo -u postgres createdb --echo --encoding=UTF8 --owner=shop shop"]
    );

    Ok(())
}

#[test]
fn create_db_honors_overridden_names() -> Result<()> {
    let remote = FakeRemote::new();
    let mut settings = settings();
    if let Some(project) = settings.project.as_mut() {
        project.db = "shop_live".into();
        project.dbuser = "shop_web".into();
    }
    tasks(&remote, &settings).create_db()?;

    assert_eq!(
        remote.actions(),
        [
            "sudo -u postgres createuser -P -S -D -R -e shop_web",
            "sudo -u postgres createdb --echo --encoding=UTF8 --owner=shop_web shop_live",
        ]
    );

    Ok(())
}

#[test]
fn drop_db_tolerates_missing_database() -> Result<()> {
    let remote = FakeRemote::new();
    let settings = settings();
    let status = tasks(&remote, &settings).drop_db()?;

    assert_eq!(status, TaskStatus::Done);
    assert_eq!(remote.actions(), ["sudo -u postgres dropdb shop"]);

    Ok(())
}

#[test]
fn upload_db_recreates_and_restores() -> Result<()> {
    let remote = FakeRemote::deployed().with_role("shop").with_db("shop");
    let settings = settings();
    tasks(&remote, &settings).upload_db(true)?;

    assert_eq!(
        remote.actions(),
        [
            "local pg_dump --clean -F custom -U shop shop > shop.backup",
            "put shop.backup -> .",
            "sudo -u postgres dropdb shop",
            "sudo -u postgres createdb --echo --encoding=UTF8 --owner=shop shop",
            "sudo -u postgres cd /home/deploy && pg_restore -d shop shop.backup",
            "local /bin/rm shop.backup",
        ]
    );

    Ok(())
}

#[test]
fn upload_db_into_existing_database() -> Result<()> {
    let remote = FakeRemote::deployed().with_role("shop").with_db("shop");
    let settings = settings();
    tasks(&remote, &settings).upload_db(false)?;

    assert_eq!(remote.count("dropdb"), 0);
    assert_eq!(remote.count("createdb"), 0);
    assert_eq!(remote.count("pg_restore -d shop shop.backup"), 1);

    Ok(())
}

#[test]
fn download_db_keeps_dump() -> Result<()> {
    let remote = FakeRemote::deployed();
    let settings = settings();
    let dump = tasks(&remote, &settings).download_db(&DumpDownload::default())?;

    assert_eq!(dump, Some(PathBuf::from("web1.example.org-shop.backup")));
    assert_eq!(remote.count("pg_dump --clean -F custom shop > shop.backup"), 1);
    assert_eq!(
        remote.actions(),
        ["get shop.backup -> web1.example.org-shop.backup"]
    );

    Ok(())
}

#[test]
fn download_db_restores_into_recreated_database() -> Result<()> {
    let remote = FakeRemote::deployed();
    let settings = settings();
    let opts = DumpDownload {
        restore: true,
        cleanup: true,
        ..DumpDownload::default()
    };
    let dump = tasks(&remote, &settings).download_db(&opts)?;

    assert_eq!(dump, None);
    assert_eq!(
        remote.actions(),
        [
            "get shop.backup -> web1.example.org-shop.backup",
            "local dropdb -U shop shop",
            "local createdb --echo --encoding=UTF8 -U postgres --owner=shop shop",
            "local pg_restore -U postgres -d shop web1.example.org-shop.backup",
            "local /bin/rm web1.example.org-shop.backup",
        ]
    );

    Ok(())
}

#[test]
fn tasks_without_project_fail() {
    let remote = FakeRemote::new();
    let mut settings = settings();
    settings.project = None;

    assert!(tasks(&remote, &settings).create_db().is_err());
    assert!(remote.lines().is_empty());
}
