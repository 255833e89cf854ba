//! Config loading and path-resolution tests for reach-config.
// reach-config/tests/load_validation.rs
// =============================================================================
// Module: Load Validation Tests
// Description: Black-box coverage of ReachConfig::load across explicit paths,
//              the REACH_CONFIG environment variable, and malformed input.
// Purpose: Ensure config loading fails closed on every bad input shape.
// =============================================================================

use std::fs;
use std::path::PathBuf;

use reach_config::ConfigError;
use reach_config::ReachConfig;
use tempfile::TempDir;

type TestResult = Result<(), String>;

fn assert_invalid(result: Result<ReachConfig, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config".to_string()),
    }
}

const VALID_BODY: &str = r#"
    [compat]
    environment = "web"
    search_dirs = ["./packs", "./vendor/packs"]
    lockfile_path = "./packs.lock"
    policy = { max_failures = 3, failure_window_ms = 60000, auto_recover = false, recover_after_ms = 0 }

    [historical]
    data_dir = "./var/reach-historical"
"#;

#[test]
fn full_config_round_trips_every_field() -> TestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    let path = dir.path().join("reach.toml");
    fs::write(&path, VALID_BODY).map_err(|err| err.to_string())?;

    let config = ReachConfig::load(Some(&path)).map_err(|err| err.to_string())?;
    if config.compat.search_dirs.len() != 2 {
        return Err("expected two search dirs".to_string());
    }
    if config.compat.lockfile_path != Some(PathBuf::from("./packs.lock")) {
        return Err("lockfile_path did not round-trip".to_string());
    }
    if config.historical.data_dir != PathBuf::from("./var/reach-historical") {
        return Err("historical.data_dir did not round-trip".to_string());
    }
    Ok(())
}

#[test]
fn lockfile_path_blank_string_is_rejected() -> TestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    let path = dir.path().join("reach.toml");
    let body = r#"
        [compat]
        environment = "cli"
        search_dirs = ["./packs"]
        lockfile_path = "   "
        policy = { max_failures = 5, failure_window_ms = 300000, auto_recover = true, recover_after_ms = 600000 }
    "#;
    fs::write(&path, body).map_err(|err| err.to_string())?;

    assert_invalid(ReachConfig::load(Some(&path)), "must be non-empty")
}

#[test]
fn search_dir_exceeding_component_length_is_rejected() -> TestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    let path = dir.path().join("reach.toml");
    let long_component = "x".repeat(reach_config::MAX_PATH_COMPONENT_LENGTH + 1);
    let body = format!(
        r#"
        [compat]
        environment = "cli"
        search_dirs = ["./{long_component}"]
        policy = {{ max_failures = 5, failure_window_ms = 300000, auto_recover = true, recover_after_ms = 600000 }}
        "#
    );
    fs::write(&path, &body).map_err(|err| err.to_string())?;

    assert_invalid(ReachConfig::load(Some(&path)), "path component too long")
}

#[test]
fn missing_compat_table_fails_to_parse() -> TestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    let path = dir.path().join("reach.toml");
    fs::write(&path, "[historical]\ndata_dir = \"./var\"\n").map_err(|err| err.to_string())?;

    match ReachConfig::load(Some(&path)) {
        Err(ConfigError::Parse(_)) => Ok(()),
        Err(other) => Err(format!("expected Parse error, got {other}")),
        Ok(_) => Err("expected missing [compat] table to fail".to_string()),
    }
}
