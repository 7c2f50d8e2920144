// Configuration errors

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No configuration file found (searched: {})", display_paths(.0))]
    NotFound(Vec<PathBuf>),

    #[error("Failed to load {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    #[error("Invalid service '{service}': {reason}")]
    Invalid { service: String, reason: String },

    #[error("Unsupported config version {0} (expected 1)")]
    UnsupportedVersion(u32),

    #[error("Unknown service '{name}' (available: {})", .available.join(", "))]
    UnknownService { name: String, available: Vec<String> },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, ConfigError>;
