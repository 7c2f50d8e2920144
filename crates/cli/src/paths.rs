// Runtime file locations

use std::path::PathBuf;

const FALLBACK_STATE_DIR: &str = "~/.driftsync";

pub const LOCK_FILE: &str = "driftsync.lock";
pub const STATUS_FILE: &str = "status.json";

/// Directory for the lock and status files
///
/// `$XDG_STATE_HOME/driftsync` on Linux, the local data dir elsewhere.
pub fn state_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "driftsync")
        .map(|dirs| {
            dirs.state_dir()
                .unwrap_or_else(|| dirs.data_local_dir())
                .to_path_buf()
        })
        .unwrap_or_else(|| PathBuf::from(shellexpand::tilde(FALLBACK_STATE_DIR).into_owned()))
}

pub fn default_status_file() -> PathBuf {
    state_dir().join(STATUS_FILE)
}

pub fn lock_file() -> PathBuf {
    state_dir().join(LOCK_FILE)
}
