// On-disk shape of driftsync.yml
//
// Everything optional here is filled from defaults in the loader.

use serde::Deserialize;
use std::collections::BTreeMap;

use driftsync_core::domain::{FailureKind, SupervisionSettings};

use crate::loader::ProbeKind;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawConfig {
    pub version: u32,
    #[serde(default)]
    pub options: RawOptions,
    #[serde(default)]
    pub services: BTreeMap<String, RawService>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawOptions {
    #[serde(default)]
    pub tools: RawTools,
    pub inherit_env: Option<Vec<String>>,
    #[serde(default)]
    pub probe: ProbeKind,
    #[serde(default)]
    pub supervision: RawSupervision,
    #[serde(default)]
    pub excludes: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawTools {
    pub rsync: Option<String>,
    pub ssh: Option<String>,
    pub fswatch: Option<String>,
}

/// Per-field overrides of SupervisionSettings
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawSupervision {
    pub poll_interval_ms: Option<u64>,
    pub unreachable_threshold: Option<u32>,
    pub restart_backoff_base_ms: Option<u64>,
    pub restart_backoff_max_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub max_restarts: Option<u32>,
    pub stable_after_ms: Option<u64>,
    pub sync_timeout_ms: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub max_consecutive_sync_failures: Option<u32>,
}

impl RawSupervision {
    /// Apply the fields present here on top of `base`
    pub fn apply(&self, base: &mut SupervisionSettings) {
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field { base.$field = v; })*
            };
        }
        set!(
            poll_interval_ms,
            unreachable_threshold,
            restart_backoff_base_ms,
            restart_backoff_max_ms,
            backoff_factor,
            stable_after_ms,
            sync_timeout_ms,
            connect_timeout_secs,
            max_consecutive_sync_failures
        );
        if self.max_restarts.is_some() {
            base.max_restarts = self.max_restarts;
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawService {
    pub src: String,
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<String>,
    #[serde(default)]
    pub ssh_options: Vec<String>,
    pub dest: String,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub rsync_args: Vec<String>,
    pub delete: Option<bool>,
    #[serde(default)]
    pub watch: RawWatch,
    #[serde(default)]
    pub supervision: RawSupervision,
    #[serde(default)]
    pub failure_patterns: Vec<RawPattern>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawWatch {
    pub enabled: Option<bool>,
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawPattern {
    pub pattern: String,
    pub kind: FailureKind,
}
