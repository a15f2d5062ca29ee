//! Per-key version history
//!
//! Layout: `<root>/<encoded key>/<number>.dat` holds the content and
//! `<number>.meta` the remaining fields. Numbers are allocated under a lock
//! so concurrent writers never reuse one; at most `max_versions` are kept
//! per key and the oldest are deleted first.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::error::{Result, TesseraError};
use crate::record::types::{Record, Version, VersionInfo};

/// Directory under the data root holding version history
pub const VERSIONS_DIR: &str = "versions";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionMeta {
    key: String,
    number: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    summary: String,
    created_at: DateTime<Utc>,
    size_bytes: u64,
}

impl VersionMeta {
    fn from_version(version: &Version) -> Self {
        Self {
            key: version.key.clone(),
            number: version.number,
            title: version.title.clone(),
            tags: version.tags.clone(),
            attributes: version.attributes.clone(),
            summary: version.summary.clone(),
            created_at: version.created_at,
            size_bytes: version.content.len() as u64,
        }
    }

    fn info(&self) -> VersionInfo {
        VersionInfo {
            number: self.number,
            summary: self.summary.clone(),
            created_at: self.created_at,
            size_bytes: self.size_bytes,
        }
    }
}

#[derive(Debug, Default)]
struct History {
    next: u64,
    retained: BTreeSet<u64>,
}

#[derive(Debug)]
pub struct VersionLog {
    root: PathBuf,
    max_versions: usize,
    table: Mutex<HashMap<String, History>>,
}

impl VersionLog {
    pub async fn open(root: &Path, max_versions: usize) -> Result<Self> {
        tokio::fs::create_dir_all(root).await?;
        let log = Self {
            root: root.to_path_buf(),
            max_versions: max_versions.max(1),
            table: Mutex::new(HashMap::new()),
        };
        log.reload().await?;
        Ok(log)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_versions(&self) -> usize {
        self.max_versions
    }

    fn key_dir(&self, key: &str) -> PathBuf {
        self.root.join(urlencoding::encode(key).into_owned())
    }

    fn data_path(&self, key: &str, number: u64) -> PathBuf {
        self.key_dir(key).join(format!("{number}.dat"))
    }

    fn meta_path(&self, key: &str, number: u64) -> PathBuf {
        self.key_dir(key).join(format!("{number}.meta"))
    }

    /// Re-read the version table from disk
    pub async fn reload(&self) -> Result<()> {
        let mut table: HashMap<String, History> = HashMap::new();
        let mut dirs = tokio::fs::read_dir(&self.root).await?;

        while let Some(dir) = dirs.next_entry().await? {
            if !dir.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("meta") {
                    continue;
                }
                let meta: VersionMeta = match tokio::fs::read(&path).await {
                    Ok(bytes) => match serde_json::from_slice(&bytes) {
                        Ok(meta) => meta,
                        Err(e) => {
                            tracing::warn!(path = %path.display(), "Unreadable version metadata: {e}");
                            continue;
                        }
                    },
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "Unreadable version metadata: {e}");
                        continue;
                    }
                };
                let history = table.entry(meta.key).or_default();
                history.retained.insert(meta.number);
                history.next = history.next.max(meta.number + 1);
            }
        }

        let keys = table.len();
        *self.table.lock() = table;
        tracing::debug!(keys, "Version log loaded");
        Ok(())
    }

    /// Capture `record` as a new version and trim the history to
    /// `max_versions`. Returns the version number.
    pub async fn record(&self, record: &Record, summary: &str) -> Result<u64> {
        let number = self.capture(record, summary).await?;
        self.trim(&record.key).await;
        Ok(number)
    }

    /// Write a new version without trimming. Pair with `trim` once the
    /// caller's update has landed, or with `discard` if it failed.
    pub async fn capture(&self, record: &Record, summary: &str) -> Result<u64> {
        let number = {
            let mut table = self.table.lock();
            let history = table.entry(record.key.clone()).or_default();
            history.next = history.next.max(1);
            let n = history.next;
            history.next += 1;
            n
        };

        let version = Version::capture(record, number, summary);
        let written = async {
            tokio::fs::create_dir_all(self.key_dir(&record.key)).await?;
            tokio::fs::write(self.data_path(&record.key, number), version.content.as_bytes())
                .await?;
            let meta = serde_json::to_vec_pretty(&VersionMeta::from_version(&version))?;
            tokio::fs::write(self.meta_path(&record.key, number), meta).await?;
            Ok::<_, TesseraError>(())
        }
        .await;
        if let Err(e) = written {
            self.remove_files(&record.key, number).await;
            return Err(e);
        }

        self.table
            .lock()
            .entry(record.key.clone())
            .or_default()
            .retained
            .insert(number);
        tracing::debug!(key = %record.key, version = number, summary, "Captured version");
        Ok(number)
    }

    /// Drop the oldest versions of `key` beyond `max_versions`
    pub async fn trim(&self, key: &str) {
        let pruned: Vec<u64> = {
            let mut table = self.table.lock();
            let Some(history) = table.get_mut(key) else {
                return;
            };
            let mut pruned = Vec::new();
            while history.retained.len() > self.max_versions {
                match history.retained.pop_first() {
                    Some(oldest) => pruned.push(oldest),
                    None => break,
                }
            }
            pruned
        };

        for old in pruned {
            self.remove_files(key, old).await;
        }
    }

    /// Forget a version captured for an update that did not land
    pub async fn discard(&self, key: &str, number: u64) {
        if let Some(history) = self.table.lock().get_mut(key) {
            history.retained.remove(&number);
        }
        self.remove_files(key, number).await;
        tracing::debug!(key = %key, version = number, "Discarded version");
    }

    async fn remove_files(&self, key: &str, number: u64) {
        for path in [self.meta_path(key, number), self.data_path(key, number)] {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), "Failed to remove version file: {e}");
                }
            }
        }
    }

    /// Retained versions of `key`, oldest first
    pub async fn list(&self, key: &str) -> Result<Vec<VersionInfo>> {
        let numbers: Vec<u64> = match self.table.lock().get(key) {
            Some(history) => history.retained.iter().copied().collect(),
            None => return Ok(Vec::new()),
        };

        let mut infos = Vec::with_capacity(numbers.len());
        for number in numbers {
            match self.read_meta(key, number).await {
                Ok(meta) => infos.push(meta.info()),
                // Pruned between the snapshot above and this read
                Err(TesseraError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(infos)
    }

    async fn read_meta(&self, key: &str, number: u64) -> Result<VersionMeta> {
        let bytes = tokio::fs::read(self.meta_path(key, number)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Load one retained version with its content
    pub async fn get(&self, key: &str, number: u64) -> Result<Version> {
        let not_found = || TesseraError::VersionNotFound {
            key: key.to_string(),
            version: number,
        };

        let retained = self
            .table
            .lock()
            .get(key)
            .is_some_and(|h| h.retained.contains(&number));
        if !retained {
            return Err(not_found());
        }

        let meta = match self.read_meta(key, number).await {
            Ok(meta) => meta,
            Err(TesseraError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(not_found());
            }
            Err(e) => return Err(e),
        };
        let content = match tokio::fs::read_to_string(self.data_path(key, number)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };

        Ok(Version {
            key: meta.key,
            number: meta.number,
            content,
            title: meta.title,
            tags: meta.tags,
            attributes: meta.attributes,
            summary: meta.summary,
            created_at: meta.created_at,
        })
    }

    pub fn count(&self, key: &str) -> usize {
        self.table
            .lock()
            .get(key)
            .map(|h| h.retained.len())
            .unwrap_or(0)
    }

    /// Total retained versions across all keys
    pub fn total(&self) -> usize {
        self.table.lock().values().map(|h| h.retained.len()).sum()
    }
}
