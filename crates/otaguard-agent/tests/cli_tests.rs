//! Integration tests for the otaguard binary
//!
//! Only offline commands are exercised here; update cycles against a release
//! server are covered by the library's HTTP tests.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn write_config(dir: &TempDir, max_boot_attempts: u32) -> std::io::Result<PathBuf> {
    let config = serde_json::json!({
        "current_version": "1.0.0",
        "release": { "owner": "acme", "repo": "sensor-firmware" },
        "max_boot_attempts": max_boot_attempts,
        "status_logging": false,
        "flash": { "slot_size": 4096, "record_sector_size": 64, "write_chunk": 512 }
    });
    let path = dir.path().join("agent.json");
    fs::write(&path, config.to_string())?;
    Ok(path)
}

fn otaguard(config: &Path, flash_dir: &Path) -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("otaguard")?;
    cmd.arg("--config")
        .arg(config)
        .arg("--flash-dir")
        .arg(flash_dir)
        .env_remove("RUST_LOG");
    Ok(cmd)
}

fn json_stdout(cmd: &mut Command) -> Result<Value, Box<dyn std::error::Error>> {
    let output = cmd.arg("--json").output()?;
    assert!(output.status.success(), "command failed: {:?}", output);
    Ok(serde_json::from_slice(&output.stdout)?)
}

#[test]
fn status_before_first_boot_fails() -> TestResult {
    let dir = TempDir::new()?;
    let config = write_config(&dir, 3)?;

    otaguard(&config, &dir.path().join("flash"))?
        .arg("status")
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("otaguard boot"));
    Ok(())
}

#[test]
fn boot_creates_record_and_confirm_resets_count() -> TestResult {
    let dir = TempDir::new()?;
    let config = write_config(&dir, 3)?;
    let flash = dir.path().join("flash");

    let boot = json_stdout(otaguard(&config, &flash)?.arg("boot"))?;
    assert_eq!(boot["report"]["decision"], "Continue");
    assert_eq!(boot["report"]["record"]["boot_attempt_count"], 1);

    let status = json_stdout(otaguard(&config, &flash)?.arg("status"))?;
    assert_eq!(status["record"]["active_slot"], "A");
    assert_eq!(status["record"]["active_version"], "1.0.0");
    assert_eq!(status["slots"].as_array().map(Vec::len), Some(2));

    let confirm = json_stdout(otaguard(&config, &flash)?.arg("confirm"))?;
    assert_eq!(confirm["record"]["boot_attempt_count"], 0);
    assert_eq!(confirm["record"]["confirmed"], true);
    Ok(())
}

#[test]
fn boot_count_persists_across_invocations() -> TestResult {
    let dir = TempDir::new()?;
    let config = write_config(&dir, 3)?;
    let flash = dir.path().join("flash");

    for expected in 1..=3 {
        let boot = json_stdout(otaguard(&config, &flash)?.arg("boot"))?;
        assert_eq!(boot["report"]["record"]["boot_attempt_count"], expected);
    }
    Ok(())
}

#[test]
fn failed_check_exits_with_network_code() -> TestResult {
    let dir = TempDir::new()?;
    let config = serde_json::json!({
        "current_version": "1.0.0",
        "release": {
            "owner": "acme",
            "repo": "sensor-firmware",
            "api_base": "http://127.0.0.1:9"
        },
        "status_logging": false,
        "flash": { "slot_size": 4096, "record_sector_size": 64, "write_chunk": 512 }
    });
    let path = dir.path().join("agent.json");
    fs::write(&path, config.to_string())?;
    let flash = dir.path().join("flash");

    otaguard(&path, &flash)?.arg("boot").assert().success();
    otaguard(&path, &flash)?
        .arg("check")
        .assert()
        .failure()
        .code(5)
        .stderr(predicate::str::contains("Update cycle failed"));
    Ok(())
}

#[test]
fn invalid_config_exits_with_config_code() -> TestResult {
    let dir = TempDir::new()?;
    let path = dir.path().join("agent.yaml");
    fs::write(&path, "release:\n  owner: ''\n  repo: fw\n")?;

    otaguard(&path, &dir.path().join("flash"))?
        .arg("status")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("release.owner"));
    Ok(())
}

#[test]
fn missing_config_reports_path() -> TestResult {
    let dir = TempDir::new()?;
    let path = dir.path().join("absent.json");

    otaguard(&path, &dir.path().join("flash"))?
        .arg("boot")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("absent.json"));
    Ok(())
}

#[test]
fn help_lists_commands() -> TestResult {
    Command::cargo_bin("otaguard")?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("confirm"))
        .stdout(predicate::str::contains("status"));
    Ok(())
}
