// reach-config/src/lib.rs
// ============================================================================
// Crate: reach-config
// Description: Typed TOML configuration for the pack lifecycle core and the
//              historical intelligence store.
// ============================================================================

//! Typed configuration loading for the Reach pack lifecycle and historical
//! intelligence subsystems.
//!
//! A single [`ReachConfig`] composes the Compat Layer's bootstrap
//! configuration with the historical store's data directory, loaded from one
//! TOML file with strict size and path limits. See [`config::ReachConfig::load`].

mod config;

pub use config::CONFIG_ENV_VAR;
pub use config::ConfigError;
pub use config::HistoricalConfig;
pub use config::MAX_CONFIG_FILE_SIZE;
pub use config::MAX_PATH_COMPONENT_LENGTH;
pub use config::MAX_SEARCH_DIRS;
pub use config::MAX_TOTAL_PATH_LENGTH;
pub use config::ReachConfig;
