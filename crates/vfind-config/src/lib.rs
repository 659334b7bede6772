//! # vfind-config
//!
//! Configuration management for vfind.
//!
//! Loads configuration from:
//! 1. `~/.vfind/config.toml` (global)
//! 2. `.vfind/config.toml` (project-local, merged over global)
//! 3. Environment variables (highest priority)
//!
//! An explicit config file passed to [`Config::load_from`] replaces both
//! file layers; environment overrides still apply.

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::logging::LogLevel;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8088";
pub const DEFAULT_ROUTE: &str = "/connector";
pub const DEFAULT_ARCHIVE_MAX_SIZE: u64 = 1 << 30;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub volumes: Vec<VolumeConfig>,
    pub archive: ArchiveConfig,
    pub artifacts: ArtifactConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut table = toml::Table::new();

        // 1. Global config (~/.vfind/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                table = read_table(&global_path)?;
            }
        }

        // 2. Project config (.vfind/config.toml), merged key by key
        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            merge_tables(&mut table, read_table(&project_path)?);
        }

        let mut config: Config = toml::Value::Table(table).try_into()?;

        // 3. Environment overrides
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load a single explicit config file, then apply environment overrides
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Global config path: ~/.vfind/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".vfind/config.toml"))
    }

    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".vfind/config.toml")
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `VFIND_*` overrides from any key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup("VFIND_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(size) = lookup("VFIND_ZIP_MAX_SIZE") {
            self.archive.max_size = parse_size(&size)
                .ok_or_else(|| ConfigError::Invalid(format!("VFIND_ZIP_MAX_SIZE={}", size)))?;
        }
        if let Some(path) = lookup("VFIND_ZIP_TMP_PATH") {
            self.archive.tmp_dir = Some(PathBuf::from(path));
        }
        if let Some(spec) = lookup("VFIND_VOLUMES") {
            self.volumes = spec
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(VolumeConfig::parse)
                .collect::<Result<_, _>>()?;
        }
        Ok(())
    }

    /// Reject settings the server cannot start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .listen
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::Invalid(format!("listen address {}", self.server.listen)))?;
        if !self.server.route.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "route must start with '/': {}",
                self.server.route
            )));
        }
        if self.archive.max_size == 0 {
            return Err(ConfigError::Invalid("archive.max_size must be > 0".into()));
        }
        let mut seen = HashSet::new();
        for volume in &self.volumes {
            if !seen.insert(volume.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate volume name: {}",
                    volume.name
                )));
            }
        }
        Ok(())
    }

    /// Configured volumes, or the current directory when none are set
    pub fn effective_volumes(&self) -> Result<Vec<VolumeConfig>, ConfigError> {
        if !self.volumes.is_empty() {
            return Ok(self.volumes.clone());
        }
        let cwd = std::env::current_dir()?;
        let name = cwd
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        Ok(vec![VolumeConfig { name, path: cwd }])
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents.parse::<toml::Table>()?)
}

/// Overlay `other` onto `base`; nested tables merge, everything else replaces.
pub fn merge_tables(base: &mut toml::Table, other: toml::Table) {
    for (key, value) in other {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Parse a byte size such as `1048576`, `512K`, `10M` or `1G`.
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, unit) = match s.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => s.split_at(idx),
        None => (s, ""),
    };
    let value: u64 = digits.parse().ok()?;
    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1 << 10,
        "M" | "MB" => 1 << 20,
        "G" | "GB" => 1 << 30,
        _ => return None,
    };
    value.checked_mul(multiplier)
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind
    pub listen: String,
    /// Connector route
    pub route: String,
    /// Request body limit in bytes
    pub max_body_bytes: usize,
    /// Upload limit advertised to the client
    pub upload_max_size: String,
    /// Fallback log level when RUST_LOG is unset
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            route: DEFAULT_ROUTE.to_string(),
            max_body_bytes: 64 * 1024 * 1024,
            upload_max_size: "10M".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn log_level(&self) -> LogLevel {
        self.log_level.parse().unwrap_or(LogLevel::Info)
    }
}

/// A local directory mounted as a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub name: String,
    pub path: PathBuf,
}

impl VolumeConfig {
    /// Parse `name=path`
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let (name, path) = spec
            .trim()
            .split_once('=')
            .ok_or_else(|| ConfigError::Invalid(format!("volume spec {}", spec)))?;
        let (name, path) = (name.trim(), path.trim());
        if name.is_empty() || path.is_empty() {
            return Err(ConfigError::Invalid(format!("volume spec {}", spec)));
        }
        Ok(Self {
            name: name.to_string(),
            path: PathBuf::from(path),
        })
    }
}

/// Zip export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Largest total size of files in one export
    pub max_size: u64,
    /// Where archives are staged (system temp dir when unset)
    pub tmp_dir: Option<PathBuf>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_ARCHIVE_MAX_SIZE,
            tmp_dir: None,
        }
    }
}

impl ArchiveConfig {
    pub fn tmp_dir(&self) -> PathBuf {
        self.tmp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Pending download lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Age after which an uncollected artifact is discarded; 0 disables
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}
