// driftsync Infrastructure - Configuration
// Loads driftsync.yml into validated ServiceSpecs

pub mod error;
pub mod loader;
mod raw;

pub use error::ConfigError;
pub use loader::{locate, load, load_with_env, LoadedConfig, ProbeKind, CONFIG_ENV_VAR};
