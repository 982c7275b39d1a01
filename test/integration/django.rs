// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{settings, tasks, FakeRemote, REPO};

use anyhow::Result;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::path::{Path, PathBuf};
use webdev::{
    remote::RemoteError,
    tasks::{DeployOptions, TaskError, TaskStatus},
};

const LOCAL_SETTINGS: &str = "project/shop/settings/_local.py";

#[test]
fn essential_deploy_syncs_code_and_restarts_gracefully() -> Result<()> {
    let remote = FakeRemote::deployed();
    let settings = settings();
    tasks(&remote, &settings).deploy(&DeployOptions::essential())?;

    assert_eq!(
        remote.actions(),
        [
            "cd project && git checkout -q master",
            "cd project && git pull -q --ff-only origin master",
            "cd project && /bin/mkdir -p shop/media/static shop/media/uploads",
            "cd project && /bin/mkdir -p tmp",
            "cd project && /bin/chmod 750 tmp",
            "cd project && python manage.py collectstatic --noinput --verbosity=0",
            "kill -SIGHUP $(cat project/tmp/uwsgi.pid)",
        ]
    );

    Ok(())
}

#[test]
fn full_deploy_on_deployed_host() -> Result<()> {
    let remote = FakeRemote::deployed();
    let settings = settings();
    let status = tasks(&remote, &settings).deploy(&DeployOptions::default())?;

    assert_eq!(status, TaskStatus::Done);
    assert_eq!(remote.count("git clone"), 0);
    assert_eq!(remote.count("ln -s"), 0);
    assert_eq!(remote.count("chgrp"), 0);
    assert_eq!(remote.count("pip -q install -r requirements/production.txt"), 1);
    assert_eq!(remote.count("python manage.py syncdb --migrate"), 1);
    assert_eq!(remote.count("python -m compileall"), 2);

    let collectstatic = remote.position("collectstatic").unwrap();
    let syncdb = remote.position("syncdb").unwrap();
    let compile = remote.position("compileall").unwrap();
    let restart = remote.position("kill -SIGINT").unwrap();
    assert!(collectstatic < syncdb && syncdb < compile && compile < restart);

    Ok(())
}

#[test]
fn deploy_restart_follows_code_switch() -> Result<()> {
    let remote = FakeRemote::deployed();
    let settings = settings();
    tasks(&remote, &settings).deploy(&DeployOptions::default())?;
    assert_eq!(remote.count("kill -SIGINT"), 1);
    assert_eq!(remote.count("kill -SIGHUP"), 0);

    let remote = FakeRemote::deployed();
    let opts = DeployOptions {
        code: false,
        ..DeployOptions::default()
    };
    tasks(&remote, &settings).deploy(&opts)?;
    assert_eq!(remote.count("kill -SIGINT"), 0);
    assert_eq!(remote.count("kill -SIGHUP"), 1);
    assert_eq!(remote.count("compileall"), 0);

    Ok(())
}

#[test]
fn first_deploy_clones_and_sets_secret_key() -> Result<()> {
    let remote = FakeRemote::new().with_user("deploy");
    let settings = settings();
    tasks(&remote, &settings).deploy(&DeployOptions::default())?;

    let lines = remote.lines();
    assert_eq!(lines[1], format!("git clone -q {REPO} project"));
    assert_eq!(remote.count("cd project/shop/settings && touch _local.py"), 1);
    assert_eq!(remote.count("cd project/shop/settings && chmod 600 _local.py"), 1);
    assert_eq!(
        remote.count("cd project/shop/settings && ln -s production.py __init__.py"),
        1
    );

    let local = remote.file(LOCAL_SETTINGS).unwrap_or_default();
    assert_eq!(local.len(), 1);
    assert!(local[0].starts_with("SECRET_KEY = '"));
    assert_eq!(local[0].len(), "SECRET_KEY = ''".len() + 50);

    let clone = remote.position("git clone").unwrap();
    let checkout = remote.position("git checkout").unwrap();
    assert!(remote.position("touch _local.py").unwrap() < checkout);
    assert!(clone < checkout);

    Ok(())
}

#[test]
fn deploy_without_repository_fails() {
    let remote = FakeRemote::new();
    let mut settings = settings();
    settings.repo = None;

    let result = tasks(&remote, &settings).deploy(&DeployOptions::default());
    assert!(matches!(result, Err(TaskError::MissingRepo)));
    assert_eq!(remote.count("git"), 0);
}

#[test]
fn diverged_branch_fails_deploy() {
    let remote = FakeRemote::deployed().diverged();
    let settings = settings();

    let result = tasks(&remote, &settings).deploy(&DeployOptions::default());
    assert!(matches!(
        result,
        Err(TaskError::Remote(RemoteError::CommandFailed { code: Some(128), .. }))
    ));
    assert_eq!(remote.count("git merge"), 0);
    assert_eq!(remote.count("collectstatic"), 0);
    assert_eq!(remote.count("kill"), 0);
}

#[test]
fn deploy_fixes_tmp_group_only_on_mismatch() -> Result<()> {
    let remote = FakeRemote::deployed().with_tmp_group("deploy");
    let settings = settings();
    let tasks = tasks(&remote, &settings);

    tasks.deploy(&DeployOptions::default())?;
    let chgrp: Vec<_> = remote
        .calls()
        .into_iter()
        .filter(|call| call.line.contains("chgrp"))
        .collect();
    assert_eq!(chgrp.len(), 1);
    assert_eq!(
        chgrp[0].line,
        "sudo cd /home/deploy/project && /bin/chgrp nginx tmp"
    );
    assert_eq!(chgrp[0].user, "admin");
    assert_eq!(remote.tmp_group().as_deref(), Some("nginx"));

    tasks.deploy(&DeployOptions::default())?;
    assert_eq!(remote.count("chgrp"), 1);

    Ok(())
}

#[test]
fn deploy_without_permissions_leaves_tmp_group() -> Result<()> {
    let remote = FakeRemote::deployed().with_tmp_group("deploy");
    let settings = settings();
    let opts = DeployOptions {
        permissions: false,
        ..DeployOptions::default()
    };
    tasks(&remote, &settings).deploy(&opts)?;

    assert_eq!(remote.count("stat -c %G tmp"), 0);
    assert_eq!(remote.count("chgrp"), 0);
    assert_eq!(remote.tmp_group().as_deref(), Some("deploy"));

    Ok(())
}

#[test]
fn manage_passes_arguments_unsplit() -> Result<()> {
    let remote = FakeRemote::deployed();
    let settings = settings();
    let tasks = tasks(&remote, &settings);
    tasks.manage(["migrate", "shop", "--fake"])?;
    tasks.manage(vec![
        "shell".to_string(),
        "-c".to_string(),
        "from shop.jobs import rebuild; rebuild()".to_string(),
    ])?;

    assert_eq!(
        remote.actions(),
        [
            "cd project && python manage.py migrate shop --fake",
            "cd project && python manage.py shell -c 'from shop.jobs import rebuild; rebuild()'",
        ]
    );

    Ok(())
}

#[test]
fn restart_tolerates_missing_pid_file() -> Result<()> {
    let remote = FakeRemote::deployed().failing("kill");
    let settings = settings();
    let status = tasks(&remote, &settings).restart_project(false)?;

    assert_eq!(status, TaskStatus::Done);
    assert_eq!(
        remote.actions(),
        ["kill -SIGINT $(cat project/tmp/uwsgi.pid)"]
    );

    Ok(())
}

#[test]
fn set_local_setting_twice_writes_once() -> Result<()> {
    let remote = FakeRemote::deployed().with_lines(LOCAL_SETTINGS, &[]);
    let settings = settings();
    let tasks = tasks(&remote, &settings);
    tasks.set_local_setting("DEBUG", "False", false)?;
    tasks.set_local_setting("DEBUG", "False", false)?;

    assert_eq!(remote.file(LOCAL_SETTINGS), Some(vec!["DEBUG = False".to_string()]));
    assert_eq!(remote.count("touch"), 0);
    assert_eq!(remote.count("sed"), 0);

    Ok(())
}

#[test]
fn set_local_setting_with_backup_comments_out_old_value() -> Result<()> {
    let remote = FakeRemote::deployed().with_lines(LOCAL_SETTINGS, &["DEBUG = True"]);
    let settings = settings();
    tasks(&remote, &settings).set_local_setting("DEBUG", "False", true)?;

    assert_eq!(
        remote.actions(),
        [
            "cd project/shop/settings && sed -i 's|^\\s*DEBUG\\s*=\\s*|#DEBUG = |' _local.py",
            "cd project/shop/settings && printf '%s\\n' 'DEBUG = False' >> _local.py",
        ]
    );

    Ok(())
}

#[test]
fn set_local_setting_rejects_invalid_name() {
    let remote = FakeRemote::deployed();
    let settings = settings();

    let result = tasks(&remote, &settings).set_local_setting("DEBUG; rm -rf ~", "1", false);
    assert!(matches!(result, Err(TaskError::InvalidSettingName(_))));
    assert!(remote.lines().is_empty());
}

#[test]
fn add_cronjobs_without_cron_directory() -> Result<()> {
    let remote = FakeRemote::deployed();
    let settings = settings();
    let status = tasks(&remote, &settings).add_cronjobs()?;

    assert!(!status.is_done());
    assert_eq!(remote.count("crontab"), 0);

    Ok(())
}

#[test]
fn add_cronjobs_merges_untagged_lines() -> Result<()> {
    let remote = FakeRemote::deployed().with_file("project/cron/cleanup.cron");
    let settings = settings();
    tasks(&remote, &settings).add_cronjobs()?;

    assert_eq!(
        remote.actions(),
        [
            "cd project/cron && cat *.cron > crontab.new",
            "cd project/cron && sed -i '/# DJANGOPROJ$/!s/$/ # DJANGOPROJ/g' crontab.new",
            "sudo cd /home/deploy/project/cron && crontab -l -u deploy | grep -v '# DJANGOPROJ$' >> crontab.new",
            "sudo cd /home/deploy/project/cron && crontab crontab.new -u deploy",
            "cd project/cron && rm crontab.new",
        ]
    );
    assert!(!remote.has("project/cron/crontab.new"));

    Ok(())
}

#[test]
fn upload_uploads_replaces_remote_directory() -> Result<()> {
    let remote = FakeRemote::deployed();
    let settings = settings();
    tasks(&remote, &settings).upload_uploads(true)?;

    assert_eq!(
        remote.actions(),
        [
            "local /bin/tar -C shop/media -c uploads > uploads.tar",
            "put uploads.tar -> /home/deploy",
            "local /bin/rm uploads.tar",
            "cd project/shop/media && /bin/rm -rf uploads",
            "cd project/shop/media && /bin/tar -xf /home/deploy/uploads.tar",
            "cd project/shop/media && /bin/rm /home/deploy/uploads.tar",
        ]
    );
    assert!(!remote.has("uploads.tar"));

    Ok(())
}

#[test]
fn download_uploads_keeps_tarball() -> Result<()> {
    let remote = FakeRemote::deployed();
    let settings = settings();
    let tarball = tasks(&remote, &settings).download_uploads(false, true)?;

    assert_eq!(tarball, Some(PathBuf::from("web1.example.org-uploads.tar")));
    assert_eq!(
        remote.actions(),
        [
            "/bin/tar -C project/shop/media -c uploads > uploads.tar",
            "get uploads.tar -> web1.example.org-uploads.tar",
            "/bin/rm uploads.tar",
        ]
    );

    Ok(())
}

#[sealed_test]
fn download_uploads_replaces_local_directory() -> Result<()> {
    let remote = FakeRemote::deployed();
    let settings = settings();
    let tarball = tasks(&remote, &settings).download_uploads(true, true)?;

    assert_eq!(tarball, None);
    assert!(Path::new("shop/media").is_dir());
    assert_eq!(
        remote.actions()[3..],
        [
            "local /bin/rm -rf shop/media/uploads",
            "local /bin/tar -C shop/media -xf web1.example.org-uploads.tar",
            "local /bin/rm web1.example.org-uploads.tar",
        ]
    );

    Ok(())
}

#[sealed_test(env = [("HOME", "/nonexistent/webdev-home")])]
fn provision_fresh_host() -> Result<()> {
    let remote = FakeRemote::new();
    let settings = settings();
    let status = tasks(&remote, &settings).provision()?;

    assert_eq!(status, TaskStatus::Done);
    assert!(remote.has("/home/deploy"));
    assert!(remote.has_role("shop"));
    assert!(remote.has_db("shop"));
    assert!(remote.has(".ssh/id_rsa.pub"));
    assert!(remote.has(".env"));
    assert_eq!(remote.count("authorized_keys"), 0);

    let user = remote.position("useradd").unwrap();
    let db = remote.position("createdb").unwrap();
    let keygen = remote.position("ssh-keygen").unwrap();
    let venv = remote.position("virtualenv.py").unwrap();
    assert!(user < db && db < keygen && keygen < venv);

    Ok(())
}

#[test]
fn local_to_remote_skips_migrations() -> Result<()> {
    let remote = FakeRemote::deployed().with_role("shop").with_db("shop");
    let settings = settings();
    tasks(&remote, &settings).local_to_remote()?;

    assert_eq!(remote.count("syncdb"), 0);
    let restore = remote.position("pg_restore").unwrap();
    let pull = remote.position("git pull").unwrap();
    let uploads = remote.position("put uploads.tar").unwrap();
    assert!(restore < pull && pull < uploads);

    Ok(())
}

#[sealed_test]
fn remote_to_local_replaces_database_and_uploads() -> Result<()> {
    let remote = FakeRemote::deployed();
    let settings = settings();
    tasks(&remote, &settings).remote_to_local()?;

    let restore = remote
        .position("local pg_restore -U postgres -d shop web1.example.org-shop.backup")
        .unwrap();
    let extract = remote
        .position("local /bin/tar -C shop/media -xf web1.example.org-uploads.tar")
        .unwrap();
    assert!(restore < extract);
    assert_eq!(remote.count("local /bin/rm"), 3);

    Ok(())
}
