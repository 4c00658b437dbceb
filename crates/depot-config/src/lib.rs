//! # depot-config
//!
//! Configuration management for Depot.
//!
//! Loads configuration from:
//! 1. `~/.depot/config.toml` (global)
//! 2. `.depot/config.toml` (project-local, overrides global key by key)
//! 3. Environment variables (highest priority)

pub mod logging;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: CacheStorageConfig,
    pub path_mapped: PathMappedStorageConfig,
    pub transport: TransportManagerConfig,
    pub not_found: NotFoundCacheConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let mut config = Self::load_from(global.as_deref(), Path::new(".depot/config.toml"))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load and layer two config files without consulting the environment.
    /// Missing files are skipped.
    pub fn load_from(global: Option<&Path>, project: &Path) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        if let Some(global_path) = global {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(global_path)?;
                merged = contents.parse::<toml::Table>()?;
            }
        }

        if project.exists() {
            debug!("Loading project config from {:?}", project);
            let contents = std::fs::read_to_string(project)?;
            merge_tables(&mut merged, contents.parse::<toml::Table>()?);
        }

        Ok(toml::Value::Table(merged).try_into()?)
    }

    /// Parse a single TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Global config path: ~/.depot/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".depot/config.toml"))
    }

    /// Apply environment variable overrides through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("DEPOT_CACHE_ROOT") {
            self.storage.cache_root = PathBuf::from(root);
        }
        if let Some(n) = lookup("DEPOT_GC_INTERVAL_MINUTES").and_then(|v| v.parse().ok()) {
            self.path_mapped.gc_interval_minutes = n;
        }
        if let Some(n) = lookup("DEPOT_GC_GRACE_PERIOD_HOURS").and_then(|v| v.parse().ok()) {
            self.path_mapped.gc_grace_period_hours = n;
        }
        if let Some(n) = lookup("DEPOT_WORKER_THREADS").and_then(|v| v.parse().ok()) {
            self.transport.worker_threads = Some(n);
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

/// Overlay `overlay` onto `base`, recursing into tables so a project file can
/// override one key of a section without restating the rest.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
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

/// File cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheStorageConfig {
    /// Root directory of cached files
    pub cache_root: PathBuf,
    /// Alias cached files with links instead of copies
    pub alias_links_enabled: bool,
    /// Lower bound applied to every positive cache timeout
    pub min_cache_timeout_seconds: u64,
    /// Bound on lock waits (None = wait forever)
    pub lock_timeout_seconds: Option<u64>,
}

impl CacheStorageConfig {
    pub fn min_cache_timeout(&self) -> Duration {
        Duration::from_secs(self.min_cache_timeout_seconds)
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_seconds.map(Duration::from_secs)
    }
}

impl Default for CacheStorageConfig {
    fn default() -> Self {
        Self {
            cache_root: dirs::home_dir()
                .map(|h| h.join(".depot/cache"))
                .unwrap_or_else(|| PathBuf::from(".depot/cache")),
            alias_links_enabled: true,
            min_cache_timeout_seconds: 60,
            lock_timeout_seconds: None,
        }
    }
}

/// Path-mapped (content-addressed) storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathMappedStorageConfig {
    pub gc_interval_minutes: u64,
    pub gc_grace_period_hours: u64,
    /// Maximum reclaim rows handled per sweep
    pub gc_batch_size: usize,
    /// File systems routed to path-mapped storage. A trailing `*` matches any suffix.
    pub enabled_filesystems: Vec<String>,
}

impl PathMappedStorageConfig {
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_minutes * 60)
    }

    pub fn gc_grace_period(&self) -> Duration {
        Duration::from_secs(self.gc_grace_period_hours * 3600)
    }

    pub fn is_subsystem_enabled(&self, file_system: &str) -> bool {
        self.enabled_filesystems.iter().any(|pattern| {
            match pattern.strip_suffix('*') {
                Some(prefix) => file_system.starts_with(prefix),
                None => pattern == file_system,
            }
        })
    }
}

impl Default for PathMappedStorageConfig {
    fn default() -> Self {
        Self {
            gc_interval_minutes: 60,
            gc_grace_period_hours: 24,
            gc_batch_size: 1000,
            enabled_filesystems: Vec::new(),
        }
    }
}

/// Transfer wait scaling and worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportManagerConfig {
    /// Transfers larger than this may wait beyond a single timeout period
    pub threshold_wait_retry_size: u64,
    /// Bytes per extra wait period (None = same as the threshold)
    pub wait_retry_scaling_increment: Option<u64>,
    pub timeout_overextension_factor: f64,
    /// Number of transfer workers (None = auto)
    pub worker_threads: Option<usize>,
}

impl TransportManagerConfig {
    pub const DEFAULT_THRESHOLD_WAIT_RETRY_SIZE: u64 = 10 * 1024 * 1024;
    pub const MIN_WORKER_THREADS: usize = 4;
    /// Transport I/O timeout of a location that sets none, or sets `0`.
    pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

    pub fn wait_retry_scaling_increment(&self) -> u64 {
        self.wait_retry_scaling_increment
            .unwrap_or(self.threshold_wait_retry_size)
            .max(1)
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(|| num_cpus::get().max(Self::MIN_WORKER_THREADS))
            .max(1)
    }

    /// Length of one wait period for a location with the given I/O timeout.
    /// A zero timeout means "unset" and falls back to [`Self::DEFAULT_TIMEOUT_SECONDS`].
    pub fn wait_period(&self, timeout_seconds: u64) -> Duration {
        let timeout_seconds = match timeout_seconds {
            0 => Self::DEFAULT_TIMEOUT_SECONDS,
            t => t,
        };
        Duration::from_secs_f64(timeout_seconds as f64 * self.timeout_overextension_factor.max(0.0))
    }

    /// Whether a caller that already waited `periods_waited` full periods on a
    /// transfer of `size` bytes should keep waiting.
    pub fn should_extend_wait(&self, size: u64, periods_waited: u64) -> bool {
        size > self.threshold_wait_retry_size
            && periods_waited < size / self.wait_retry_scaling_increment()
    }
}

impl Default for TransportManagerConfig {
    fn default() -> Self {
        Self {
            threshold_wait_retry_size: Self::DEFAULT_THRESHOLD_WAIT_RETRY_SIZE,
            wait_retry_scaling_increment: None,
            timeout_overextension_factor: 1.25,
            worker_threads: None,
        }
    }
}

/// Not-found cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotFoundCacheConfig {
    /// Entries older than this are forgotten (None = never expire)
    pub timeout_seconds: Option<u64>,
}

impl NotFoundCacheConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.path_mapped.gc_interval(), Duration::from_secs(3600));
        assert_eq!(config.path_mapped.gc_grace_period(), Duration::from_secs(86_400));
        assert_eq!(config.path_mapped.gc_batch_size, 1000);
        assert_eq!(config.transport.threshold_wait_retry_size, 10 * 1024 * 1024);
        assert!(config.transport.worker_threads() >= 4);
        assert!(config.storage.lock_timeout().is_none());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml().unwrap();
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[path_mapped]"));
        assert!(toml_str.contains("gc_grace_period_hours = 24"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.storage.cache_root, parsed.storage.cache_root);
        assert_eq!(
            config.transport.timeout_overextension_factor,
            parsed.transport.timeout_overextension_factor
        );
    }

    #[test]
    fn test_subsystem_patterns() {
        let config = PathMappedStorageConfig {
            enabled_filesystems: vec!["maven:remote:central".into(), "npm:*".into()],
            ..Default::default()
        };
        assert!(config.is_subsystem_enabled("maven:remote:central"));
        assert!(!config.is_subsystem_enabled("maven:remote:other"));
        assert!(config.is_subsystem_enabled("npm:hosted:local"));
        assert!(!PathMappedStorageConfig::default().is_subsystem_enabled("npm:x"));
    }

    #[test]
    fn test_scaling_increment_defaults_to_threshold() {
        let config = TransportManagerConfig::default();
        assert_eq!(config.wait_retry_scaling_increment(), config.threshold_wait_retry_size);
        assert_eq!(config.wait_period(60), Duration::from_secs(75));
    }

    #[test]
    fn test_zero_timeout_uses_default_period() {
        let config = TransportManagerConfig::default();
        assert_eq!(config.wait_period(0), config.wait_period(TransportManagerConfig::DEFAULT_TIMEOUT_SECONDS));
        assert!(config.wait_period(0) > Duration::ZERO);
    }

    #[test]
    fn test_should_extend_wait() {
        let config = TransportManagerConfig {
            threshold_wait_retry_size: 100,
            wait_retry_scaling_increment: Some(50),
            ..Default::default()
        };
        // Small transfers never extend
        assert!(!config.should_extend_wait(100, 0));
        // 250 bytes: up to 5 periods
        assert!(config.should_extend_wait(250, 0));
        assert!(config.should_extend_wait(250, 4));
        assert!(!config.should_extend_wait(250, 5));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| match key {
            "DEPOT_CACHE_ROOT" => Some("/srv/depot".to_string()),
            "DEPOT_GC_GRACE_PERIOD_HOURS" => Some("2".to_string()),
            "DEPOT_WORKER_THREADS" => Some("not a number".to_string()),
            _ => None,
        });
        assert_eq!(config.storage.cache_root, PathBuf::from("/srv/depot"));
        assert_eq!(config.path_mapped.gc_grace_period_hours, 2);
        assert_eq!(config.transport.worker_threads, None);
    }
}
