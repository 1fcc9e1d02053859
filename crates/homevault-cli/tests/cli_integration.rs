//! CLI subprocess integration tests.
//!
//! These tests run the `homevault` binary against a temporary settings file
//! and a shell script standing in for borg, and check exit codes, JSON output,
//! the delivered mail, and the lock markers left behind.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const FAKE_BORG: &str = r#"#!/bin/sh
echo "$*" >> "$(dirname "$0")/borg.calls"
if [ -z "$BORG_PASSPHRASE" ]; then
    echo "passphrase missing" >&2
    exit 2
fi
if [ -n "$FAIL_ON" ] && [ "$1" = "$FAIL_ON" ]; then
    echo "$1 failed on purpose" >&2
    exit 2
fi
exit 0
"#;

struct Sandbox {
    dir: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let sandbox = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        let borg = sandbox.path("borg");
        std::fs::write(&borg, FAKE_BORG).unwrap();
        std::fs::set_permissions(&borg, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(sandbox.path("backup-key"), "correct horse\n").unwrap();
        std::fs::create_dir_all(sandbox.path("repo")).unwrap();
        sandbox.write_settings(true, &["/bin/sh", "-c", "cat > \"$0\"", "MAIL"]);
        sandbox
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write_settings(&self, active: bool, mailer: &[&str]) {
        let mailer: Vec<String> = mailer
            .iter()
            .map(|arg| {
                let arg = if *arg == "MAIL" {
                    self.path("mail.eml").display().to_string()
                } else {
                    (*arg).to_owned()
                };
                format!("{arg:?}")
            })
            .collect();
        let root = self.dir.path().display();
        let settings = format!(
            r#"[alerts]
from = "postmaster@example.org"
recipient = "admin@example.org"
mailer = [{mailer}]

[paths]
run_dir = "{root}/run"
mount_root = "{root}/mnt"
log_dir = "{root}"

[engine]
program = "{root}/borg"
poll_interval_secs = 0
max_wait_attempts = 1

[backups.alpha]
url = "dir://{root}/repo"
keep_daily = 7
keep_weekly = 4
keep_monthly = 6
active = {active}
"#,
            mailer = mailer.join(", ")
        );
        std::fs::write(self.path("backup.toml"), settings).unwrap();
    }

    fn homevault(&self, config: &str, extra: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_homevault"))
            .arg("--config")
            .arg(config)
            .arg("--config-file")
            .arg(self.path("backup.toml"))
            .arg("--key-file")
            .arg(self.path("backup-key"))
            .arg("--log-file")
            .arg(self.path("homevault.log"))
            .args(extra)
            .env_remove("HOMEVAULT_LOG")
            .env_remove("FAIL_ON")
            .output()
            .unwrap()
    }

    fn borg_calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.path("borg.calls"))
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    fn marker(&self, name: &str) -> PathBuf {
        self.path("run").join(name)
    }
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "invalid JSON ({e}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

fn exists(path: &Path) -> bool {
    path.try_exists().unwrap()
}

#[test]
fn cli_version_exits_zero() {
    let output = Command::new(env!("CARGO_BIN_EXE_homevault"))
        .arg("--version")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("homevault"));
}

#[test]
fn snapshot_and_verify_runs_three_steps_and_mails_report() {
    let sb = Sandbox::new();
    let output = sb.homevault("alpha", &["--json"]);

    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let value = json(&output);
    assert_eq!(value["report"]["success"], true);
    assert_eq!(value["delivered"], true);
    let steps: Vec<&str> = value["report"]["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["kind"].as_str().unwrap())
        .collect();
    assert_eq!(steps, ["create", "prune", "check"]);

    let calls = sb.borg_calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[0].starts_with("create "));
    assert!(!calls.iter().any(|c| c.contains("correct horse")));

    let mail = std::fs::read_to_string(sb.path("mail.eml")).unwrap();
    assert!(mail.contains("Subject: Backup creation for alpha: Success"));
    assert!(mail.contains("X-Postmaster-Alert: backup"));

    assert!(!exists(&sb.marker("homevault-alpha.pid")));
    assert!(!exists(&sb.marker("homevault.pid")));
    assert!(exists(&sb.path("homevault.log")));
}

#[test]
fn failing_prune_exits_one_and_keeps_create_outcome() {
    let sb = Sandbox::new();
    let output = Command::new(env!("CARGO_BIN_EXE_homevault"))
        .args(["--config", "alpha", "--json", "--action", "snapshot"])
        .arg("--config-file")
        .arg(sb.path("backup.toml"))
        .arg("--key-file")
        .arg(sb.path("backup-key"))
        .arg("--log-file")
        .arg(sb.path("homevault.log"))
        .env("FAIL_ON", "prune")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    let value = json(&output);
    assert_eq!(value["report"]["success"], false);
    assert_eq!(value["report"]["failure"]["kind"], "engine");
    assert_eq!(value["report"]["steps"].as_array().unwrap().len(), 2);

    let mail = std::fs::read_to_string(sb.path("mail.eml")).unwrap();
    assert!(mail.contains("Subject: Backup creation for alpha: Error"));
    assert!(mail.contains("prune failed on purpose"));
    assert!(!exists(&sb.marker("homevault.pid")));
}

#[test]
fn unknown_configuration_is_a_config_error() {
    let sb = Sandbox::new();
    let output = sb.homevault("qnap1", &[]);

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("qnap1"));
    assert!(sb.borg_calls().is_empty());
    assert!(!exists(&sb.path("run")));
}

#[test]
fn missing_key_file_is_a_config_error() {
    let sb = Sandbox::new();
    std::fs::remove_file(sb.path("backup-key")).unwrap();
    let output = sb.homevault("alpha", &[]);

    assert_eq!(output.status.code(), Some(2));
    assert!(sb.borg_calls().is_empty());
}

#[test]
fn unknown_action_is_rejected() {
    let sb = Sandbox::new();
    let output = sb.homevault("alpha", &["--action", "purge"]);
    assert!(!output.status.success());
    assert!(sb.borg_calls().is_empty());
}

#[test]
fn undeliverable_report_exits_three() {
    let sb = Sandbox::new();
    sb.write_settings(true, &["/bin/false"]);
    let output = sb.homevault("alpha", &["--json"]);

    assert_eq!(output.status.code(), Some(3));
    let value = json(&output);
    assert_eq!(value["report"]["success"], true);
    assert_eq!(value["delivered"], false);
}

#[test]
fn configuration_already_running_is_skipped_silently() {
    let sb = Sandbox::new();
    std::fs::create_dir_all(sb.path("run")).unwrap();
    std::fs::write(
        sb.marker("homevault-alpha.pid"),
        std::process::id().to_string(),
    )
    .unwrap();

    let output = sb.homevault("alpha", &["--json"]);

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(json(&output)["skipped"]["reason"], "already-running");
    assert!(sb.borg_calls().is_empty());
    assert!(!exists(&sb.path("mail.eml")), "a skip sends no mail");
    assert!(exists(&sb.marker("homevault-alpha.pid")));
}

#[test]
fn inactive_configuration_is_skipped() {
    let sb = Sandbox::new();
    sb.write_settings(false, &["/bin/sh", "-c", "cat > \"$0\"", "MAIL"]);
    let output = sb.homevault("alpha", &["--json"]);

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(json(&output)["skipped"]["reason"], "inactive");
    assert!(sb.borg_calls().is_empty());
}

#[test]
fn restore_of_empty_repository_succeeds() {
    let sb = Sandbox::new();
    let target = sb.path("restore");
    std::fs::create_dir_all(&target).unwrap();
    let output = sb.homevault(
        "alpha",
        &["--json", "--action", "restore", "--location", target.to_str().unwrap()],
    );

    assert_eq!(output.status.code(), Some(0));
    let value = json(&output);
    assert_eq!(value["report"]["success"], true);
    assert!(value["report"]["steps"].as_array().unwrap().is_empty());
    assert_eq!(sb.borg_calls().len(), 1, "only the listing ran");
}
