//! ---
//! nnl_section: "01-core-functionality"
//! nnl_subsection: "module"
//! nnl_type: "source"
//! nnl_scope: "code"
//! nnl_description: "Shared primitives and utilities for the lifecycle controller."
//! nnl_version: "v0.0.0-prealpha"
//! nnl_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::{debug, warn};

use crate::logging::LogFormat;

fn default_user() -> String {
    "hdfs".to_owned()
}

fn default_group() -> String {
    "hadoop".to_owned()
}

fn default_name_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("/hadoop/hdfs/namenode")]
}

fn default_name_dir_mode() -> u32 {
    0o755
}

fn default_conf_dir() -> PathBuf {
    PathBuf::from("/etc/hadoop/conf")
}

fn default_hadoop_sbin_dir() -> PathBuf {
    PathBuf::from("/usr/lib/hadoop/sbin")
}

fn default_pid_dir_prefix() -> PathBuf {
    PathBuf::from("/var/run/hadoop")
}

fn default_log_dir_prefix() -> PathBuf {
    PathBuf::from("/var/log/hadoop")
}

fn default_exclude_path() -> PathBuf {
    PathBuf::from("/etc/hadoop/conf/dfs.exclude")
}

fn default_current_marker() -> PathBuf {
    PathBuf::from("/var/lib/hdfs/namenode/formatted")
}

fn default_legacy_marker() -> Option<PathBuf> {
    Some(PathBuf::from("/var/run/hadoop/hdfs/namenode-formatted"))
}

fn default_kinit_path() -> PathBuf {
    PathBuf::from("/usr/bin/kinit")
}

fn default_readiness_tries() -> u32 {
    40
}

fn default_readiness_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_tmp_dir() -> String {
    "/tmp".to_owned()
}

fn default_tmp_dir_mode() -> u32 {
    0o777
}

fn default_smoke_user() -> String {
    "ambari-qa".to_owned()
}

fn default_smoke_user_dir() -> String {
    "/user/ambari-qa".to_owned()
}

fn default_smoke_user_mode() -> u32 {
    0o770
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("/var/log/nnl")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_true() -> bool {
    true
}

/// Top-level configuration file for `nnlctl`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "NNL_CONFIG";
    /// Prefix for `NNL__SECTION__KEY` style overrides.
    pub const ENV_OVERRIDE_PREFIX: &'static str = "NNL";

    /// Load configuration from disk, respecting the `NNL_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        if !path.is_file() {
            return Err(anyhow!("config file {} does not exist", path.display()));
        }
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(Self::ENV_OVERRIDE_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = settings
            .try_deserialize::<AppConfig>()
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.node.validate()
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Immutable snapshot of everything the lifecycle controller needs to know
/// about the local node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Name directories; accepts a TOML array or a comma separated string.
    #[serde(
        default = "default_name_dirs",
        deserialize_with = "deserialize_dir_list"
    )]
    pub name_dirs: Vec<PathBuf>,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_name_dir_mode")]
    pub name_dir_mode: u32,
    #[serde(default = "default_conf_dir")]
    pub conf_dir: PathBuf,
    /// Directory holding `hadoop-daemon.sh`.
    #[serde(default = "default_hadoop_sbin_dir")]
    pub hadoop_sbin_dir: PathBuf,
    #[serde(default = "default_pid_dir_prefix")]
    pub pid_dir_prefix: PathBuf,
    #[serde(default = "default_log_dir_prefix")]
    pub log_dir_prefix: PathBuf,
    #[serde(default)]
    pub exclude: ExcludeConfig,
    #[serde(default)]
    pub markers: MarkerConfig,
    #[serde(default)]
    pub ha: HaConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name_dirs: default_name_dirs(),
            user: default_user(),
            group: default_group(),
            name_dir_mode: default_name_dir_mode(),
            conf_dir: default_conf_dir(),
            hadoop_sbin_dir: default_hadoop_sbin_dir(),
            pid_dir_prefix: default_pid_dir_prefix(),
            log_dir_prefix: default_log_dir_prefix(),
            exclude: ExcludeConfig::default(),
            markers: MarkerConfig::default(),
            ha: HaConfig::default(),
            security: SecurityConfig::default(),
            readiness: ReadinessConfig::default(),
            provisioning: ProvisioningConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Principal used for `kinit`; falls back to the service user.
    pub fn principal(&self) -> &str {
        self.security.principal.as_deref().unwrap_or(&self.user)
    }

    /// Per-user PID directory, e.g. `/var/run/hadoop/hdfs`.
    pub fn pid_dir(&self) -> PathBuf {
        self.pid_dir_prefix.join(&self.user)
    }

    /// Per-user log directory, e.g. `/var/log/hadoop/hdfs`.
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir_prefix.join(&self.user)
    }

    /// Lock file guarding the format step.
    pub fn format_lock_path(&self) -> PathBuf {
        match &self.markers.lock_file {
            Some(path) => path.clone(),
            None => {
                let mut raw = self.markers.current.clone().into_os_string();
                raw.push(".lock");
                PathBuf::from(raw)
            }
        }
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.name_dirs.is_empty() {
            return Err(anyhow!("node must declare at least one name directory"));
        }
        for dir in &self.name_dirs {
            require_absolute("name directory", dir)?;
        }
        if self.user.trim().is_empty() {
            return Err(anyhow!("node user cannot be empty"));
        }
        if self.group.trim().is_empty() {
            return Err(anyhow!("node group cannot be empty"));
        }
        if self.name_dir_mode > 0o7777 {
            return Err(anyhow!(
                "name_dir_mode {:o} is not a valid permission mode",
                self.name_dir_mode
            ));
        }
        require_absolute("exclude file", &self.exclude.path)?;
        require_absolute("format marker", &self.markers.current)?;
        if let Some(legacy) = &self.markers.legacy {
            require_absolute("legacy format marker", legacy)?;
        }
        if self.ha.enabled {
            if self.ha.namenode_id.as_deref().map_or(true, str::is_empty) {
                return Err(anyhow!("ha.namenode_id is required when HA is enabled"));
            }
            if self.ha.rpc_address.as_deref().map_or(true, str::is_empty) {
                return Err(anyhow!("ha.rpc_address is required when HA is enabled"));
            }
        }
        if self.security.enabled && self.security.keytab.is_none() {
            return Err(anyhow!("security.keytab is required when security is enabled"));
        }
        if self.readiness.tries == 0 {
            return Err(anyhow!("readiness.tries must be at least 1"));
        }
        if self.provisioning.smoke_user.trim().is_empty() {
            warn!("provisioning.smoke_user is empty; smoke-test home directory will be owned by the service user");
        }
        Ok(())
    }
}

fn require_absolute(label: &str, path: &Path) -> Result<()> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(anyhow!("{} path {} must be absolute", label, path.display()))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DirList {
    Joined(String),
    List(Vec<PathBuf>),
}

fn deserialize_dir_list<'de, D>(deserializer: D) -> std::result::Result<Vec<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match DirList::deserialize(deserializer)? {
        DirList::Joined(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(PathBuf::from)
            .collect(),
        DirList::List(dirs) => dirs,
    })
}

/// Decommission exclusion file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludeConfig {
    #[serde(default = "default_exclude_path")]
    pub path: PathBuf,
    /// Hosts rendered into the exclude file, in order.
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl Default for ExcludeConfig {
    fn default() -> Self {
        Self {
            path: default_exclude_path(),
            hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerConfig {
    #[serde(default = "default_current_marker")]
    pub current: PathBuf,
    /// Marker written by earlier releases. Still honoured; removable once no
    /// node carries it.
    #[serde(default = "default_legacy_marker")]
    pub legacy: Option<PathBuf>,
    #[serde(default)]
    pub lock_file: Option<PathBuf>,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            current: default_current_marker(),
            legacy: default_legacy_marker(),
            lock_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HaConfig {
    #[serde(default)]
    pub enabled: bool,
    /// This node's id within the nameservice, e.g. `nn1`.
    #[serde(default)]
    pub namenode_id: Option<String>,
    /// This node's RPC endpoint, `host:port`.
    #[serde(default)]
    pub rpc_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_kinit_path")]
    pub kinit_path: PathBuf,
    #[serde(default)]
    pub keytab: Option<PathBuf>,
    #[serde(default)]
    pub principal: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kinit_path: default_kinit_path(),
            keytab: None,
            principal: None,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_readiness_tries")]
    pub tries: u32,
    #[serde(default = "default_readiness_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            tries: default_readiness_tries(),
            interval: default_readiness_interval(),
        }
    }
}

/// DFS directories created once the node is serving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: String,
    #[serde(default = "default_tmp_dir_mode")]
    pub tmp_dir_mode: u32,
    #[serde(default = "default_smoke_user")]
    pub smoke_user: String,
    #[serde(default = "default_smoke_user_dir")]
    pub smoke_user_dir: String,
    #[serde(default = "default_smoke_user_mode")]
    pub smoke_user_mode: u32,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            tmp_dir: default_tmp_dir(),
            tmp_dir_mode: default_tmp_dir_mode(),
            smoke_user: default_smoke_user(),
            smoke_user_dir: default_smoke_user_dir(),
            smoke_user_mode: default_smoke_user_mode(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    /// Format of the console layer; the file is always JSON.
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Filter used when neither `NNL_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Mirror events to stderr. The file layer is always on.
    #[serde(default = "default_true")]
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            level: default_log_level(),
            console: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus textfile written after each action, for the node exporter.
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}
