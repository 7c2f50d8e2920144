// Status snapshot written by `driftsync start`, read by `driftsync status`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use driftsync_core::domain::ServiceStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusFile {
    /// Pid of the writing `driftsync start`
    pub pid: u32,
    pub written_at: i64, // epoch ms
    pub services: Vec<ServiceStatus>,
}

impl StatusFile {
    pub fn new(services: Vec<ServiceStatus>, now_millis: i64) -> Self {
        Self {
            pid: std::process::id(),
            written_at: now_millis,
            services,
        }
    }
}

/// Write through a temp file + rename so readers never see a partial file
pub fn write(path: &Path, status: &StatusFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(status).context("Failed to serialize status")?;
    fs::write(&tmp, body).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

pub fn read(path: &Path) -> Result<StatusFile> {
    let body = fs::read(path).with_context(|| {
        format!(
            "No status file at {} (is `driftsync start` running?)",
            path.display()
        )
    })?;
    serde_json::from_slice(&body).with_context(|| format!("Malformed status file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::domain::ServiceState;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("status.json");

        let mut web = ServiceStatus::new("web", 1_000);
        web.state = ServiceState::Watching;
        web.last_sync_at = Some(1_500);
        let status = StatusFile::new(vec![web], 2_000);

        write(&path, &status).unwrap();
        assert_eq!(read(&path).unwrap(), status);
        assert!(!path.with_extension("json.tmp").exists());

        let raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["services"][0]["state"], "WATCHING");
    }

    #[test]
    fn test_missing_file_mentions_start() {
        let dir = tempfile::tempdir().unwrap();
        let err = read(&dir.path().join("status.json")).unwrap_err();
        assert!(err.to_string().contains("driftsync start"));
    }
}
