use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Result, TesseraError};

/// Main configuration structure for Tessera
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Storage configuration (tier list and data directory)
    #[serde(default)]
    pub storage: StorageConfig,
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Version history configuration
    #[serde(default)]
    pub versions: VersionConfig,
    /// API key and rate limit configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// Search engine configuration
    #[serde(default)]
    pub search: SearchConfig,
    /// Relationship graph configuration
    #[serde(default)]
    pub graph: GraphConfig,
    /// Backup configuration
    #[serde(default)]
    pub backup: BackupConfig,
    /// Background maintenance configuration
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

impl Config {
    /// Parse a TOML document into a validated config
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| TesseraError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TesseraError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load `explicit` if given, otherwise the first existing file among
    /// `~/.tessera/config.toml`, `<config dir>/tessera/config.toml` and
    /// `./config.toml`, falling back to defaults
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            tracing::info!("Loading config from: {}", path.display());
            return Self::load(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".tessera").join("config.toml")),
            dirs::config_dir().map(|c| c.join("tessera").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];
        for path in default_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::load(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Config with defaults everywhere except the data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.storage.data_dir = data_dir.into();
        config
    }

    /// Check structural constraints the tier manager depends on
    pub fn validate(&self) -> Result<()> {
        let tiers = &self.storage.tiers;
        if tiers.is_empty() {
            return Err(TesseraError::Config("At least one tier is required".into()));
        }

        let mut names = HashSet::new();
        for tier in tiers {
            if tier.name.is_empty()
                || !tier
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(TesseraError::Config(format!(
                    "Invalid tier name '{}': allowed are a-z, A-Z, 0-9, _, -",
                    tier.name
                )));
            }
            if RESERVED_DIRS.contains(&tier.name.as_str()) {
                return Err(TesseraError::Config(format!(
                    "Tier name '{}' collides with a reserved directory",
                    tier.name
                )));
            }
            if !names.insert(tier.name.as_str()) {
                return Err(TesseraError::Config(format!(
                    "Duplicate tier name '{}'",
                    tier.name
                )));
            }
            if tier.capacity == Some(0) {
                return Err(TesseraError::Config(format!(
                    "Tier '{}' has zero capacity",
                    tier.name
                )));
            }
            if tier.kind == TierKind::Memory && tier.capacity.is_none() {
                return Err(TesseraError::Config(format!(
                    "Memory tier '{}' needs a capacity",
                    tier.name
                )));
            }
        }

        let crystal_count = tiers.iter().filter(|t| t.kind == TierKind::Crystal).count();
        if crystal_count != 1 {
            return Err(TesseraError::Config(format!(
                "Exactly one crystal tier is required, found {crystal_count}"
            )));
        }
        if !tiers.iter().any(|t| t.kind != TierKind::Crystal) {
            return Err(TesseraError::Config(
                "At least one mutable tier is required".into(),
            ));
        }
        if self.versions.max_versions == 0 {
            return Err(TesseraError::Config(
                "versions.max_versions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Directory names under the data root that tiers may not use
pub const RESERVED_DIRS: &[&str] = &["versions", "backups", "graph", "auth"];

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory for all storage data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Copy writes into a non-persistent tier through to the next persistent tier
    #[serde(default = "default_write_through")]
    pub write_through: bool,
    /// Ordered tier list, fastest first
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierSpec>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            write_through: default_write_through(),
            tiers: default_tiers(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".tessera"))
        .unwrap_or_else(|| PathBuf::from(".tessera"))
}

fn default_write_through() -> bool {
    true
}

fn default_tiers() -> Vec<TierSpec> {
    vec![
        TierSpec {
            name: "hot".to_string(),
            kind: TierKind::Memory,
            capacity: Some(1_000),
            retention_secs: None,
            latency: None,
            promote_after: None,
            demote_after_secs: Some(3_600),
        },
        TierSpec {
            name: "warm".to_string(),
            kind: TierKind::Memory,
            capacity: Some(10_000),
            retention_secs: None,
            latency: None,
            promote_after: Some(3),
            demote_after_secs: Some(86_400),
        },
        TierSpec {
            name: "cold".to_string(),
            kind: TierKind::Disk,
            capacity: None,
            retention_secs: None,
            latency: None,
            promote_after: Some(2),
            demote_after_secs: None,
        },
        TierSpec {
            name: "crystal".to_string(),
            kind: TierKind::Crystal,
            capacity: None,
            retention_secs: None,
            latency: None,
            promote_after: None,
            demote_after_secs: None,
        },
    ]
}

/// Backend implementation selected for a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    /// In-process LRU map, lost on restart
    Memory,
    /// File-per-record directory under the data root
    Disk,
    /// Write-once signed records, file backed
    Crystal,
}

impl TierKind {
    pub fn is_persistent(self) -> bool {
        !matches!(self, TierKind::Memory)
    }

    pub fn is_immutable(self) -> bool {
        matches!(self, TierKind::Crystal)
    }
}

/// Nominal access latency of a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyClass {
    Memory,
    Disk,
    Archive,
}

/// One configured tier
#[derive(Debug, Clone, Deserialize)]
pub struct TierSpec {
    /// Unique tier name, also its directory name for persistent tiers
    pub name: String,
    /// Backend implementation
    pub kind: TierKind,
    /// Maximum entry count (None = unbounded)
    #[serde(default)]
    pub capacity: Option<usize>,
    /// Entries older than this are expired (None = forever)
    #[serde(default)]
    pub retention_secs: Option<u64>,
    /// Latency class override; derived from the kind when absent
    #[serde(default)]
    pub latency: Option<LatencyClass>,
    /// Access count that promotes an entry to the next faster tier
    #[serde(default)]
    pub promote_after: Option<u32>,
    /// Idle time after which an entry is demoted to the next slower tier
    #[serde(default)]
    pub demote_after_secs: Option<u64>,
}

impl TierSpec {
    pub fn latency_class(&self) -> LatencyClass {
        self.latency.unwrap_or(match self.kind {
            TierKind::Memory => LatencyClass::Memory,
            TierKind::Disk => LatencyClass::Disk,
            TierKind::Crystal => LatencyClass::Archive,
        })
    }

    pub fn retention(&self) -> Option<chrono::Duration> {
        self.retention_secs.map(secs_to_duration)
    }

    pub fn demote_after(&self) -> Option<chrono::Duration> {
        self.demote_after_secs.map(secs_to_duration)
    }
}

fn secs_to_duration(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1_000))
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:7878")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:7878".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Version history configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VersionConfig {
    /// Versions retained per mutable key
    #[serde(default = "default_max_versions")]
    pub max_versions: usize,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            max_versions: default_max_versions(),
        }
    }
}

fn default_max_versions() -> usize {
    10
}

/// API key and rate limit configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Require API keys on mutating endpoints
    #[serde(default = "default_auth_enabled")]
    pub enabled: bool,
    /// Also require API keys on read endpoints
    #[serde(default)]
    pub protect_reads: bool,
    /// Default lifetime of issued keys in days
    #[serde(default = "default_key_ttl_days")]
    pub key_ttl_days: u64,
    /// Requests allowed per client in a sliding 60 second window
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: usize,
    /// Authentication failures after which a client is blocked
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: default_auth_enabled(),
            protect_reads: false,
            key_ttl_days: default_key_ttl_days(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

fn default_auth_enabled() -> bool {
    true
}

fn default_key_ttl_days() -> u64 {
    90
}

fn default_rate_limit_per_minute() -> usize {
    120
}

fn default_failure_threshold() -> u32 {
    50
}

/// Search engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Minimum similarity ratio for fuzzy matches (0.0-1.0)
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    /// Result count when the request does not give one
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_fuzzy_threshold(),
            default_limit: default_search_limit(),
        }
    }
}

fn default_fuzzy_threshold() -> f64 {
    0.6
}

fn default_search_limit() -> usize {
    10
}

/// Relationship graph configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    /// Depth cap for thread traversal
    #[serde(default = "default_max_thread_depth")]
    pub max_thread_depth: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_thread_depth: default_max_thread_depth(),
        }
    }
}

fn default_max_thread_depth() -> usize {
    100
}

/// Backup configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    /// Backups older than this many days are pruned
    #[serde(default = "default_backup_retention_days")]
    pub retention_days: u64,
    /// Seconds between scheduled backups (0 disables the schedule)
    #[serde(default)]
    pub interval_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retention_days: default_backup_retention_days(),
            interval_secs: 0,
        }
    }
}

fn default_backup_retention_days() -> u64 {
    30
}

/// Background maintenance configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    /// Seconds between demotion/retention sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    60
}
