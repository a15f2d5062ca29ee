//! Tier capability interface and the closed set of tier backends

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{LatencyClass, TierKind, TierSpec};
use crate::error::{Result, TesseraError};
use crate::record::types::Record;
use crate::storage::cache::CacheTier;
use crate::storage::crystal::CrystalTier;
use crate::storage::disk::DiskTier;

/// Creation and last-access times of one entry, used by sweeps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryTimes {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

/// Operations every tier backend supports
#[async_trait]
pub trait TierStorage: Send + Sync {
    /// Store a record, returning an entry evicted to make room
    async fn store(&self, record: Record) -> Result<Option<Record>>;

    /// Read a record, refreshing its recency where the backend tracks one
    async fn retrieve(&self, key: &str) -> Result<Option<Record>>;

    /// Read a record without changing recency
    async fn peek(&self, key: &str) -> Result<Option<Record>>;

    /// Persist updated access metadata of an existing record
    async fn touch(&self, record: &Record) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    async fn clear(&self) -> Result<()>;

    fn keys(&self) -> Vec<String>;

    fn entry_times(&self) -> Vec<EntryTimes>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Backend selected by configuration at startup
pub enum TierBackend {
    Cache(CacheTier),
    Disk(DiskTier),
    Crystal(CrystalTier),
}

impl TierBackend {
    pub fn storage(&self) -> &dyn TierStorage {
        match self {
            TierBackend::Cache(t) => t,
            TierBackend::Disk(t) => t,
            TierBackend::Crystal(t) => t,
        }
    }
}

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
}

/// Per-tier statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierStats {
    pub name: String,
    pub rank: usize,
    pub kind: TierKind,
    pub latency: LatencyClass,
    pub persistent: bool,
    pub immutable: bool,
    pub capacity: Option<usize>,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
}

/// One ranked level of the hierarchy
pub struct Tier {
    rank: usize,
    spec: TierSpec,
    backend: TierBackend,
    counters: TierCounters,
}

impl Tier {
    /// Build the backend for `spec`, opening its directory under `root`
    /// when the tier is persistent
    pub async fn open(rank: usize, spec: TierSpec, root: &Path) -> Result<Self> {
        let dir = root.join(&spec.name);
        let backend = match spec.kind {
            TierKind::Memory => {
                let capacity = spec.capacity.filter(|&c| c > 0).ok_or_else(|| {
                    TesseraError::Config(format!(
                        "Memory tier '{}' needs a non-zero capacity",
                        spec.name
                    ))
                })?;
                TierBackend::Cache(CacheTier::new(capacity))
            }
            TierKind::Disk => {
                TierBackend::Disk(DiskTier::open(&spec.name, &dir, spec.capacity).await?)
            }
            TierKind::Crystal => {
                TierBackend::Crystal(CrystalTier::open(&spec.name, &dir, spec.capacity).await?)
            }
        };
        Ok(Self {
            rank,
            spec,
            backend,
            counters: TierCounters::default(),
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &TierSpec {
        &self.spec
    }

    pub fn is_persistent(&self) -> bool {
        self.spec.kind.is_persistent()
    }

    pub fn is_immutable(&self) -> bool {
        self.spec.kind.is_immutable()
    }

    pub fn storage(&self) -> &dyn TierStorage {
        self.backend.storage()
    }

    /// Drop in-memory contents and re-read persistent contents from disk
    pub async fn reload(&self) -> Result<()> {
        match &self.backend {
            TierBackend::Cache(t) => t.clear().await,
            TierBackend::Disk(t) => t.rescan().await.map(|_| ()),
            TierBackend::Crystal(t) => t.disk().rescan().await.map(|_| ()),
        }
    }

    pub(crate) fn count_hit(&self) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_store(&self) {
        self.counters.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_eviction(&self) {
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TierStats {
        TierStats {
            name: self.spec.name.clone(),
            rank: self.rank,
            kind: self.spec.kind,
            latency: self.spec.latency_class(),
            persistent: self.is_persistent(),
            immutable: self.is_immutable(),
            capacity: self.spec.capacity,
            entries: self.storage().len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stores: self.counters.stores.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}
