// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{settings, tasks, FakeRemote, HOST};

use anyhow::Result;
use pretty_assertions::assert_eq;
use std::{fs::write, path::Path};
use webdev::tasks::{KeyUpload, Keypair, TaskStatus};

fn key_upload(path: &Path, use_poweruser: bool) -> KeyUpload {
    KeyUpload {
        use_poweruser,
        local_pub_key_path: path.to_string_lossy().into_owned(),
    }
}

#[test]
fn create_user_on_fresh_host() -> Result<()> {
    let remote = FakeRemote::new();
    let settings = settings();
    let status = tasks(&remote, &settings).create_user()?;

    assert_eq!(status, TaskStatus::Done);
    assert_eq!(
        remote.actions(),
        [
            "sudo /usr/sbin/groupadd shop",
            "sudo /usr/sbin/useradd -m -g shop deploy",
            "sudo /usr/bin/passwd deploy",
        ]
    );
    assert!(remote.calls().iter().all(|call| call.user == "admin"));
    assert!(remote.has("/home/deploy"));

    Ok(())
}

#[test]
fn create_user_hands_terminal_to_prompting_commands() -> Result<()> {
    let remote = FakeRemote::new();
    let settings = settings();
    tasks(&remote, &settings).create_user()?;

    assert_eq!(remote.attached(), remote.actions());
    assert!(remote
        .calls()
        .iter()
        .filter(|call| call.line.starts_with("getent"))
        .all(|call| !call.interactive));

    Ok(())
}

#[test]
fn create_user_twice_is_idempotent() -> Result<()> {
    let remote = FakeRemote::new();
    let settings = settings();
    let tasks = tasks(&remote, &settings);
    tasks.create_user()?;
    tasks.create_user()?;

    assert_eq!(remote.count("groupadd"), 1);
    assert_eq!(remote.count("useradd"), 1);
    assert_eq!(remote.count("passwd deploy"), 3);
    assert_eq!(remote.count("/usr/bin/passwd"), 1);

    Ok(())
}

#[test]
fn create_user_only_adds_missing_user() -> Result<()> {
    let remote = FakeRemote::new().with_group("shop");
    let settings = settings();
    tasks(&remote, &settings).create_user()?;

    assert_eq!(remote.count("groupadd"), 0);
    assert_eq!(remote.count("useradd"), 1);

    Ok(())
}

#[test]
fn upload_local_public_key_twice_keeps_one_line() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let key = dir.path().join("id_rsa.pub");
    write(&key, "ssh-rsa AAAAoperator operator@laptop\n")?;

    let remote = FakeRemote::deployed();
    let settings = settings();
    let tasks = tasks(&remote, &settings);
    let opts = key_upload(&key, false);
    assert_eq!(tasks.upload_local_public_key(&opts)?, TaskStatus::Done);
    assert_eq!(tasks.upload_local_public_key(&opts)?, TaskStatus::Done);

    assert_eq!(
        remote.file(".ssh/authorized_keys"),
        Some(vec!["ssh-rsa AAAAoperator".to_string()])
    );
    assert_eq!(remote.count("printf"), 1);
    assert_eq!(remote.count("chmod 600 .ssh/authorized_keys"), 2);
    assert_eq!(remote.count("chown -R deploy:deploy .ssh"), 2);

    Ok(())
}

#[test]
fn upload_local_public_key_through_poweruser() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let key = dir.path().join("id_rsa.pub");
    write(&key, "ssh-ed25519 AAAAoperator\n")?;

    let remote = FakeRemote::new().with_user("deploy");
    let settings = settings();
    let status = tasks(&remote, &settings).upload_local_public_key(&key_upload(&key, true))?;

    assert_eq!(status, TaskStatus::Done);
    assert_eq!(
        remote.actions(),
        [
            "sudo cd /home/deploy && mkdir -p .ssh",
            "sudo cd /home/deploy && printf '%s\\n' 'ssh-ed25519 AAAAoperator' >> .ssh/authorized_keys",
            "sudo cd /home/deploy && chmod 600 .ssh/authorized_keys",
            "sudo cd /home/deploy && chmod 700 .ssh",
            "sudo cd /home/deploy && chown -R deploy:deploy .ssh",
        ]
    );
    assert!(remote.calls().iter().all(|call| call.user == "admin"));
    assert_eq!(
        remote.file(".ssh/authorized_keys"),
        Some(vec!["ssh-ed25519 AAAAoperator".to_string()])
    );

    Ok(())
}

#[test]
fn upload_local_public_key_skips_missing_home() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let key = dir.path().join("id_rsa.pub");
    write(&key, "ssh-rsa AAAAoperator\n")?;

    let remote = FakeRemote::new();
    let settings = settings();
    let status = tasks(&remote, &settings).upload_local_public_key(&key_upload(&key, true))?;

    assert_eq!(
        status,
        TaskStatus::Skipped("User's home directory does not exist".into())
    );
    assert_eq!(remote.count("mkdir"), 0);

    Ok(())
}

#[test]
fn upload_local_public_key_skips_missing_key_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let key = dir.path().join("missing.pub");

    let remote = FakeRemote::deployed();
    let settings = settings();
    let status = tasks(&remote, &settings).upload_local_public_key(&key_upload(&key, false))?;

    assert_eq!(
        status,
        TaskStatus::Skipped(format!("Local public key not found: {}", key.display()))
    );
    assert!(remote.lines().is_empty());

    Ok(())
}

#[test]
fn upload_local_public_key_skips_empty_key_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let key = dir.path().join("empty.pub");
    write(&key, "\n")?;

    let remote = FakeRemote::deployed();
    let settings = settings();
    let status = tasks(&remote, &settings).upload_local_public_key(&key_upload(&key, false))?;

    assert_eq!(
        status,
        TaskStatus::Skipped(format!("Local public key is empty: {}", key.display()))
    );
    assert_eq!(remote.count("authorized_keys"), 0);

    Ok(())
}

#[test]
fn generate_keypair_leaves_existing_key_alone() -> Result<()> {
    let remote = FakeRemote::deployed().with_file(".ssh/id_rsa");
    let settings = settings();
    let status = tasks(&remote, &settings).generate_keypair(&Keypair::default())?;

    assert_eq!(
        status,
        TaskStatus::Skipped("File already exists: ~/.ssh/id_rsa".into())
    );
    assert_eq!(remote.count("ssh-keygen"), 0);
    assert_eq!(remote.count("rm -rf"), 0);
    assert!(remote.has(".ssh/id_rsa"));

    Ok(())
}

#[test]
fn generate_keypair_overwrites_on_request() -> Result<()> {
    let remote = FakeRemote::deployed()
        .with_file(".ssh/id_rsa")
        .with_file(".ssh/id_rsa.pub");
    let settings = settings();
    let opts = Keypair {
        overwrite: true,
        ..Keypair::default()
    };
    let status = tasks(&remote, &settings).generate_keypair(&opts)?;

    assert_eq!(status, TaskStatus::Done);
    assert_eq!(
        remote.actions(),
        [
            "rm -rf ~/.ssh/id_rsa",
            "rm -rf ~/.ssh/id_rsa.pub",
            "ssh-keygen -t rsa -b 2048 -f ~/.ssh/id_rsa -N ''",
        ]
    );
    assert!(remote.attached().is_empty());

    Ok(())
}

#[test]
fn generate_keypair_with_passphrase_prompts() -> Result<()> {
    let remote = FakeRemote::deployed();
    let settings = settings();
    let opts = Keypair {
        use_passphrase: true,
        key_path: "~/.ssh/deploy_key".into(),
        ..Keypair::default()
    };
    tasks(&remote, &settings).generate_keypair(&opts)?;

    assert_eq!(
        remote.actions(),
        ["ssh-keygen -t rsa -b 2048 -f ~/.ssh/deploy_key"]
    );
    assert_eq!(remote.attached(), remote.actions());

    Ok(())
}

#[test]
fn show_public_key_of_generated_keypair() -> Result<()> {
    let remote = FakeRemote::deployed();
    let settings = settings();
    let tasks = tasks(&remote, &settings);
    tasks.generate_keypair(&Keypair::default())?;
    let key = tasks.show_public_key("~/.ssh/id_rsa.pub")?;

    assert_eq!(key, format!("ssh-rsa AAAAgenerated deploy@{HOST}"));

    Ok(())
}
