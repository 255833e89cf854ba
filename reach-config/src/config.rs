// reach-config/src/config.rs
// ============================================================================
// Module: Reach Configuration
// Description: Typed TOML configuration for the Compat Layer and the
//              historical intelligence store, with strict size/path limits.
// Purpose: Fail-closed config loading: a missing or malformed config file is
//          an error, never a silently-empty default.
// Dependencies: reach-core, reach-historical, serde, toml
// ============================================================================

//! ## Overview
//! A `ReachConfig` is loaded from a single TOML file, resolved either from
//! an explicit path, the `REACH_CONFIG` environment variable, or the
//! current directory's `reach.toml`. Loading applies a file-size cap before
//! parsing and a path-length/component cap before reading, then runs
//! structural validation over the parsed value.

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use reach_core::compat::CompatConfig;
use reach_core::compat::Environment;
use reach_core::containment::ContainmentPolicy;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Environment variable consulted when no explicit config path is given.
pub const CONFIG_ENV_VAR: &str = "REACH_CONFIG";

/// Default config file name, resolved relative to the current directory.
const DEFAULT_CONFIG_NAME: &str = "reach.toml";

/// Maximum accepted size of a config file, in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;

/// Maximum accepted length of a single path component.
pub const MAX_PATH_COMPONENT_LENGTH: usize = 255;

/// Maximum accepted length of a full path string.
pub const MAX_TOTAL_PATH_LENGTH: usize = 4096;

/// Maximum number of search directories a `CompatConfig` may list.
pub const MAX_SEARCH_DIRS: usize = 64;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while loading or validating a [`ReachConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading the configuration file.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Configuration model
// ============================================================================

/// Historical intelligence store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalConfig {
    /// Directory holding the historical SQLite database file.
    pub data_dir: PathBuf,
}

impl Default for HistoricalConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("./data/reach-historical") }
    }
}

impl HistoricalConfig {
    /// Path to the SQLite database file inside [`Self::data_dir`].
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("historical.sqlite3")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("historical.data_dir", &self.data_dir.to_string_lossy())
    }
}

/// Top-level Reach configuration: Compat Layer bootstrap plus historical
/// store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReachConfig {
    /// Pack lifecycle bootstrap configuration.
    pub compat: CompatConfig,
    /// Historical intelligence store configuration.
    #[serde(default)]
    pub historical: HistoricalConfig,
}

impl Default for ReachConfig {
    fn default() -> Self {
        Self {
            compat: CompatConfig {
                environment: Environment::Cli,
                search_dirs: Vec::new(),
                lockfile_path: None,
                policy: ContainmentPolicy::default(),
            },
            historical: HistoricalConfig::default(),
        }
    }
}

impl ReachConfig {
    /// Loads a `ReachConfig` from `path`, or from the location resolved by
    /// [`resolve_path`] when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Invalid`]
    /// if the resolved path or file exceeds the size/length limits or the
    /// file is not valid UTF-8, [`ConfigError::Parse`] if the TOML is
    /// malformed, or any validation error from [`Self::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content =
            std::str::from_utf8(&bytes).map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let mut config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates structural constraints beyond what `serde`/`toml` enforce.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if any search directory or the
    /// historical data directory fails path validation, or if too many
    /// search directories are configured.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.compat.search_dirs.len() > MAX_SEARCH_DIRS {
            return Err(ConfigError::Invalid("compat.search_dirs exceeds maximum entries".to_string()));
        }
        for dir in &self.compat.search_dirs {
            validate_path_string("compat.search_dirs", &dir.to_string_lossy())?;
        }
        if let Some(lockfile_path) = &self.compat.lockfile_path {
            validate_path_string("compat.lockfile_path", &lockfile_path.to_string_lossy())?;
        }
        self.historical.validate()?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Path resolution and validation
// ============================================================================

/// Resolves the config path from an explicit argument, the `REACH_CONFIG`
/// environment variable, or the default file name, in that order.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the environment variable's value
/// exceeds [`MAX_TOTAL_PATH_LENGTH`].
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path's length and component lengths.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the path or any of its components
/// exceeds the configured length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path-valued config field against length constraints.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if `value` is empty/whitespace-only or
/// exceeds the configured length limits.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    let path = Path::new(trimmed);
    for component in path.components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("reach.toml");
        fs::write(&path, body).unwrap();
        path
    }

    const MINIMAL: &str = r#"
        [compat]
        environment = "cli"
        search_dirs = ["./packs"]
        policy = { max_failures = 5, failure_window_ms = 300000, auto_recover = true, recover_after_ms = 600000 }
    "#;

    #[test]
    fn loads_a_minimal_valid_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, MINIMAL);
        let config = ReachConfig::load(Some(&path)).unwrap();
        assert_eq!(config.compat.environment, Environment::Cli);
        assert_eq!(config.compat.search_dirs, vec![PathBuf::from("./packs")]);
        assert_eq!(config.historical.data_dir, PathBuf::from("./data/reach-historical"));
    }

    #[test]
    fn rejects_oversized_config_file() {
        let dir = TempDir::new().unwrap();
        let oversized = "# ".to_string() + &"x".repeat(MAX_CONFIG_FILE_SIZE + 1);
        let path = write_config(&dir, &oversized);
        let err = ReachConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "not = [valid");
        let err = ReachConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        let err = ReachConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn rejects_too_many_search_dirs() {
        let dir = TempDir::new().unwrap();
        let dirs: Vec<String> = (0..MAX_SEARCH_DIRS + 1).map(|i| format!("\"./p{i}\"")).collect();
        let body = format!(
            r#"
            [compat]
            environment = "cli"
            search_dirs = [{}]
            policy = {{ max_failures = 5, failure_window_ms = 300000, auto_recover = true, recover_after_ms = 600000 }}
            "#,
            dirs.join(", ")
        );
        let path = write_config(&dir, &body);
        let err = ReachConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_empty_historical_data_dir() {
        let dir = TempDir::new().unwrap();
        let body = format!("{MINIMAL}\n[historical]\ndata_dir = \"\"\n");
        let path = write_config(&dir, &body);
        let err = ReachConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn resolve_path_prefers_explicit_argument_over_env() {
        let explicit = PathBuf::from("/explicit/path.toml");
        let resolved = resolve_path(Some(&explicit)).unwrap();
        assert_eq!(resolved, explicit);
    }

    #[test]
    fn validate_path_string_rejects_whitespace_only() {
        let err = validate_path_string("field", "   ").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn historical_config_db_path_is_nested_under_data_dir() {
        let config = HistoricalConfig { data_dir: PathBuf::from("/var/reach") };
        assert_eq!(config.db_path(), PathBuf::from("/var/reach/historical.sqlite3"));
    }
}
