// Configuration loader
// File lookup, YAML + environment layering, validation into ServiceSpecs

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use driftsync_core::application::supervisor::constants::DEFAULT_INHERITED_ENV;
use driftsync_core::domain::{
    FailurePattern, RemoteEndpoint, ServiceSpec, SupervisionSettings, ToolPaths, WatchSettings,
};

use crate::error::{ConfigError, Result};
use crate::raw::{RawConfig, RawService, RawSupervision};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "DRIFTSYNC_CONFIG";

/// Prefix of environment overrides (`DRIFTSYNC__OPTIONS__PROBE=tcp`)
const ENV_PREFIX: &str = "DRIFTSYNC";
const ENV_SEPARATOR: &str = "__";

const SUPPORTED_VERSION: u32 = 1;
const FILE_NAMES: [&str; 2] = ["driftsync.yml", "driftsync.yaml"];

/// How the watchdog probes remotes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// `ssh … true`: full transport check
    #[default]
    Ssh,
    /// TCP connect to the ssh port only
    Tcp,
}

/// A validated configuration
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// File the configuration was read from
    pub path: PathBuf,
    pub tools: ToolPaths,
    pub inherit_env: Vec<String>,
    pub probe: ProbeKind,
    /// Sorted by service name
    pub services: Vec<ServiceSpec>,
}

impl LoadedConfig {
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }

    /// Services named in `names`, or all of them when `names` is empty
    pub fn select_services(&self, names: &[String]) -> Result<Vec<ServiceSpec>> {
        if names.is_empty() {
            return Ok(self.services.clone());
        }
        let mut selected: Vec<ServiceSpec> = Vec::with_capacity(names.len());
        for name in names {
            let spec = self
                .services
                .iter()
                .find(|s| &s.name == name)
                .ok_or_else(|| ConfigError::UnknownService {
                    name: name.clone(),
                    available: self.service_names(),
                })?;
            if !selected.iter().any(|s| s.name == spec.name) {
                selected.push(spec.clone());
            }
        }
        Ok(selected)
    }

    /// Whether any service needs the file watcher
    pub fn needs_watcher(&self) -> bool {
        self.services.iter().any(|s| s.watch.enabled)
    }
}

/// Pick the config file
///
/// Order: `explicit`, `$DRIFTSYNC_CONFIG`, `./driftsync.yml`, `./driftsync.yaml`,
/// then the user config directory. An explicit or env-provided path is used as
/// is and reported as not found if missing.
pub fn locate(
    explicit: Option<&Path>,
    from_env: Option<PathBuf>,
    cwd: &Path,
    user_config_dir: Option<PathBuf>,
) -> Result<PathBuf> {
    if let Some(path) = explicit.map(Path::to_path_buf).or(from_env) {
        let path = expand_tilde(&path.to_string_lossy());
        return if path.is_file() {
            Ok(path)
        } else {
            Err(ConfigError::NotFound(vec![path]))
        };
    }

    let candidates: Vec<PathBuf> = FILE_NAMES
        .iter()
        .map(|name| cwd.join(name))
        .chain(user_config_dir.map(|dir| dir.join(FILE_NAMES[0])))
        .collect();

    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or(ConfigError::NotFound(candidates))
}

/// Locate and load the configuration using the process environment
pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let user_dir = directories::ProjectDirs::from("", "", "driftsync")
        .map(|dirs| dirs.config_dir().to_path_buf());
    let path = locate(
        explicit,
        std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from),
        &cwd,
        user_dir,
    )?;
    load_with_env(&path, None)
}

/// Load `path`, layering `env` overrides (the process environment when None)
pub fn load_with_env(path: &Path, env: Option<HashMap<String, String>>) -> Result<LoadedConfig> {
    debug!(path = %path.display(), "Loading configuration");

    let load_err = |source: config::ConfigError| ConfigError::Load {
        path: path.to_path_buf(),
        source,
    };

    let environment = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .source(env.map(|vars| vars.into_iter().collect()));

    let raw: RawConfig = config::Config::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Yaml))
        .add_source(environment)
        .build()
        .map_err(load_err)?
        .try_deserialize()
        .map_err(load_err)?;
    let service_keys = read_service_keys(path).map_err(load_err)?;

    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let loaded = build(raw, &service_keys, path, &base_dir)?;

    info!(
        path = %path.display(),
        services = loaded.services.len(),
        "Configuration loaded"
    );
    Ok(loaded)
}

/// Service names as written in the file
///
/// The `config` crate lowercases map keys, so the names are read again here.
fn read_service_keys(path: &Path) -> std::result::Result<Vec<String>, config::ConfigError> {
    #[derive(Deserialize)]
    struct ServiceKeys {
        #[serde(default)]
        services: BTreeMap<String, serde_yaml::Value>,
    }

    let foreign = |e: Box<dyn std::error::Error + Send + Sync>| config::ConfigError::Foreign(e);
    let text = std::fs::read_to_string(path).map_err(|e| foreign(Box::new(e)))?;
    let keys: ServiceKeys = serde_yaml::from_str(&text).map_err(|e| foreign(Box::new(e)))?;
    Ok(keys.services.into_keys().collect())
}

/// Map a key coming out of `config` back to its spelling in the file
fn original_name(key: &str, written: &[String]) -> Result<String> {
    let mut matches = written.iter().filter(|w| w.to_lowercase() == key.to_lowercase());
    match (matches.next(), matches.next()) {
        (Some(name), None) => Ok(name.clone()),
        (Some(a), Some(b)) => Err(ConfigError::Invalid {
            service: a.clone(),
            reason: format!("service names '{}' and '{}' differ only in case", a, b),
        }),
        // Only reachable through an environment override naming a new service
        (None, _) => Ok(key.to_string()),
    }
}

fn build(
    raw: RawConfig,
    service_keys: &[String],
    path: &Path,
    base_dir: &Path,
) -> Result<LoadedConfig> {
    if raw.version != SUPPORTED_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.version));
    }
    if raw.services.is_empty() {
        return Err(ConfigError::Invalid {
            service: "<none>".to_string(),
            reason: "at least one service must be configured".to_string(),
        });
    }

    let defaults = ToolPaths::default();
    let tools = ToolPaths {
        rsync: raw.options.tools.rsync.unwrap_or(defaults.rsync),
        ssh: raw.options.tools.ssh.unwrap_or(defaults.ssh),
        fswatch: raw.options.tools.fswatch.unwrap_or(defaults.fswatch),
    };
    let inherit_env = raw
        .options
        .inherit_env
        .unwrap_or_else(|| DEFAULT_INHERITED_ENV.iter().map(|v| v.to_string()).collect());

    let mut supervision = SupervisionSettings::default();
    raw.options.supervision.apply(&mut supervision);

    let mut services = raw
        .services
        .into_iter()
        .map(|(key, service)| {
            build_service(
                original_name(&key, service_keys)?,
                service,
                base_dir,
                &supervision,
                &raw.options.excludes,
            )
        })
        .collect::<Result<Vec<_>>>()?;
    services.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(LoadedConfig {
        path: path.to_path_buf(),
        tools,
        inherit_env,
        probe: raw.options.probe,
        services,
    })
}

fn build_service(
    name: String,
    raw: RawService,
    base_dir: &Path,
    global_supervision: &SupervisionSettings,
    global_excludes: &[String],
) -> Result<ServiceSpec> {
    let mut remote = RemoteEndpoint::new(raw.host);
    remote.user = raw.user;
    if let Some(port) = raw.port {
        remote.port = port;
    }
    remote.identity_file = raw
        .identity_file
        .map(|p| resolve_path(&p, base_dir));
    remote.ssh_options = raw.ssh_options;

    let mut spec = ServiceSpec::new(&name, resolve_path(&raw.src, base_dir), remote, raw.dest);

    spec.excludes = merge_excludes(global_excludes, &raw.excludes);
    spec.rsync_args = raw.rsync_args;
    if let Some(delete) = raw.delete {
        spec.delete = delete;
    }

    let watch_defaults = WatchSettings::default();
    spec.watch = WatchSettings {
        enabled: raw.watch.enabled.unwrap_or(watch_defaults.enabled),
        latency_ms: raw.watch.latency_ms.unwrap_or(watch_defaults.latency_ms),
    };

    spec.supervision = merged_supervision(global_supervision, &raw.supervision);
    spec.failure_patterns = raw
        .failure_patterns
        .into_iter()
        .map(|p| FailurePattern::new(p.pattern, p.kind))
        .collect();

    spec.validate().map_err(|e| ConfigError::Invalid {
        service: name.clone(),
        reason: match e {
            driftsync_core::domain::DomainError::InvalidService { reason, .. } => reason,
            other => other.to_string(),
        },
    })?;
    Ok(spec)
}

fn merged_supervision(global: &SupervisionSettings, service: &RawSupervision) -> SupervisionSettings {
    let mut settings = global.clone();
    service.apply(&mut settings);
    settings
}

/// Global excludes first, then the service's; first occurrence wins
fn merge_excludes(global: &[String], service: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(global.len() + service.len());
    for pattern in global.iter().chain(service) {
        if !merged.contains(pattern) {
            merged.push(pattern.clone());
        }
    }
    merged
}

fn expand_tilde(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// `~` expansion, then relative paths are anchored at the config directory
fn resolve_path(path: &str, base_dir: &Path) -> PathBuf {
    let expanded = expand_tilde(path);
    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}
