//! End-to-end CLI tests for the mediagate binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command with an isolated config home so a developer's own config file
/// cannot leak into the test.
fn mediagate(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("mediagate").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("RUST_LOG")
        .env_remove("MEDIAGATE_CONFIG")
        .env_remove("MEDIAGATE_BIND")
        .env_remove("MEDIAGATE_MAX_CONCURRENT")
        .env_remove("MEDIAGATE_WORK_DIR")
        .env_remove("MEDIAGATE_CACHE_DIR");
    cmd
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let home = TempDir::new().unwrap();
    mediagate(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Rate-limited, cached media download gateway"))
        .stdout(predicate::str::contains("--max-concurrent"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let home = TempDir::new().unwrap();
    mediagate(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mediagate"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    let home = TempDir::new().unwrap();
    mediagate(&home)
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_check_config_prints_effective_values() {
    let home = TempDir::new().unwrap();
    let work = home.path().join("work");
    mediagate(&home)
        .args(["--check-config", "-q", "-c", "5", "--work-dir"])
        .arg(&work)
        .assert()
        .success()
        .stdout(predicate::str::contains("max_concurrent: 5"));
}

#[test]
fn test_config_file_values_are_applied() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("custom.toml");
    std::fs::write(
        &config,
        "# service settings\nrate_limit_max_requests = 25\ntool_program = \"/opt/yt-dlp\"\n",
    )
    .unwrap();

    mediagate(&home)
        .arg("--check-config")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("rate_limit_max_requests: 25"))
        .stdout(predicate::str::contains("/opt/yt-dlp"));
}

#[test]
fn test_flags_override_config_file() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("custom.toml");
    std::fs::write(&config, "max_concurrent = 4\n").unwrap();

    mediagate(&home)
        .args(["--check-config", "-c", "7", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("max_concurrent: 7"));
}

#[test]
fn test_default_config_path_is_read() {
    let home = TempDir::new().unwrap();
    let dir = home.path().join("mediagate");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.toml"), "cache_max_entries = 9\n").unwrap();

    mediagate(&home)
        .arg("--check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("cache_max_entries: 9"));
}

#[test]
fn test_unknown_config_key_fails() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("bad.toml");
    std::fs::write(&config, "retries = 3\n").unwrap();

    mediagate(&home)
        .arg("--check-config")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_inconsistent_config_fails_validation() {
    let home = TempDir::new().unwrap();
    let shared = home.path().join("shared");

    mediagate(&home)
        .arg("--check-config")
        .arg("--work-dir")
        .arg(&shared)
        .arg("--cache-dir")
        .arg(&shared)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}
