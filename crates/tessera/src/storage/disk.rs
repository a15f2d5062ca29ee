//! File-backed tier
//!
//! Each record lives in two files under `<tier-dir>/records/`: the content
//! (`<key>.dat`) and its metadata as JSON (`<key>.meta`). Keys are
//! percent-encoded into file names. Writes go to a `.tmp` sibling first and
//! are renamed into place, so a concurrent reader or backup copy sees either
//! the old or the new file, never a torn one.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{Result, TesseraError};
use crate::record::types::{Record, RecordMeta};
use crate::storage::tier::{EntryTimes, TierStorage};

pub const RECORDS_DIR: &str = "records";
pub const DATA_EXT: &str = "dat";
pub const META_EXT: &str = "meta";
const TMP_SUFFIX: &str = ".tmp";

#[derive(Debug)]
pub struct DiskTier {
    name: String,
    records_dir: PathBuf,
    capacity: Option<usize>,
    index: Mutex<HashMap<String, EntryTimes>>,
}

impl DiskTier {
    /// Open (or create) the tier directory and index the records already on disk
    pub async fn open(name: &str, dir: &Path, capacity: Option<usize>) -> Result<Self> {
        let records_dir = dir.join(RECORDS_DIR);
        tokio::fs::create_dir_all(&records_dir).await.map_err(|e| {
            TesseraError::Storage(format!(
                "Failed to create tier directory {}: {e}",
                records_dir.display()
            ))
        })?;

        let tier = Self {
            name: name.to_string(),
            records_dir,
            capacity,
            index: Mutex::new(HashMap::new()),
        };
        tier.rescan().await?;
        Ok(tier)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn records_dir(&self) -> &Path {
        &self.records_dir
    }

    /// Rebuild the in-memory index from the files on disk
    pub async fn rescan(&self) -> Result<usize> {
        let mut found = HashMap::new();
        let mut entries = tokio::fs::read_dir(&self.records_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();

            if file_name.ends_with(TMP_SUFFIX) {
                // Leftover from an interrupted write
                let _ = tokio::fs::remove_file(&path).await;
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(META_EXT) {
                continue;
            }

            match read_meta(&path).await {
                Ok(meta) => {
                    if !tokio::fs::try_exists(self.data_path(&meta.key))
                        .await
                        .unwrap_or(false)
                    {
                        tracing::warn!(
                            tier = %self.name,
                            key = %meta.key,
                            "Skipping record with metadata but no content file"
                        );
                        continue;
                    }
                    found.insert(
                        meta.key.clone(),
                        EntryTimes {
                            key: meta.key,
                            created_at: meta.created_at,
                            last_accessed: meta.last_accessed,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(tier = %self.name, path = %path.display(), "Unreadable metadata: {e}");
                }
            }
        }

        let count = found.len();
        *self.index.lock() = found;
        tracing::debug!(tier = %self.name, records = count, "Disk tier indexed");
        Ok(count)
    }

    fn file_stem(key: &str) -> String {
        urlencoding::encode(key).into_owned()
    }

    pub fn data_path(&self, key: &str) -> PathBuf {
        self.records_dir
            .join(format!("{}.{DATA_EXT}", Self::file_stem(key)))
    }

    pub fn meta_path(&self, key: &str) -> PathBuf {
        self.records_dir
            .join(format!("{}.{META_EXT}", Self::file_stem(key)))
    }

    /// Insert `times` into the index, picking the least recently accessed
    /// entry as a victim when a new key would exceed the capacity
    fn admit(&self, times: EntryTimes) -> Option<String> {
        let mut index = self.index.lock();
        let mut victim = None;
        if !index.contains_key(&times.key) {
            if let Some(cap) = self.capacity {
                if index.len() >= cap {
                    victim = index
                        .values()
                        .min_by_key(|t| t.last_accessed)
                        .map(|t| t.key.clone());
                    if let Some(ref v) = victim {
                        index.remove(v);
                    }
                }
            }
        }
        index.insert(times.key.clone(), times);
        victim
    }

    async fn write_files(&self, record: &Record) -> Result<()> {
        write_atomic(&self.data_path(&record.key), record.content.as_bytes()).await?;
        self.write_meta(record).await
    }

    async fn write_meta(&self, record: &Record) -> Result<()> {
        let meta = serde_json::to_vec_pretty(&RecordMeta::from(record))?;
        write_atomic(&self.meta_path(&record.key), &meta).await
    }

    async fn read_files(&self, key: &str) -> Result<Option<Record>> {
        let meta = match read_meta(&self.meta_path(key)).await {
            Ok(meta) => meta,
            Err(TesseraError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let content = match tokio::fs::read(self.data_path(key)).await {
            Ok(bytes) => String::from_utf8(bytes).map_err(|e| {
                TesseraError::Storage(format!("Content of '{key}' is not UTF-8: {e}"))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(meta.into_record(content)))
    }

    async fn remove_files(&self, key: &str) -> Result<()> {
        for path in [self.meta_path(key), self.data_path(key)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Store only if the key is absent. Returns false when it already
    /// exists; a full tier is an error rather than an eviction.
    pub async fn store_new(&self, record: &Record) -> Result<bool> {
        {
            let mut index = self.index.lock();
            if index.contains_key(&record.key) {
                return Ok(false);
            }
            if self.capacity.is_some_and(|cap| index.len() >= cap) {
                return Err(TesseraError::Storage(format!(
                    "Tier '{}' is at capacity",
                    self.name
                )));
            }
            index.insert(
                record.key.clone(),
                EntryTimes {
                    key: record.key.clone(),
                    created_at: record.created_at,
                    last_accessed: record.last_accessed,
                },
            );
        }
        if let Err(e) = self.write_files(record).await {
            self.index.lock().remove(&record.key);
            return Err(e);
        }
        Ok(true)
    }
}

async fn read_meta(path: &Path) -> Result<RecordMeta> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Write `bytes` to a uniquely named `.tmp` sibling and rename it over
/// `path`. Concurrent writers of the same path never share a temp file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(format!(".{}{TMP_SUFFIX}", uuid::Uuid::new_v4().simple()));
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await.map_err(|e| {
        TesseraError::Storage(format!("Failed to write {}: {e}", tmp.display()))
    })?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(TesseraError::Storage(format!(
            "Failed to move {} into place: {e}",
            path.display()
        )));
    }
    Ok(())
}

#[async_trait]
impl TierStorage for DiskTier {
    async fn store(&self, record: Record) -> Result<Option<Record>> {
        let times = EntryTimes {
            key: record.key.clone(),
            created_at: record.created_at,
            last_accessed: record.last_accessed,
        };
        let victim = self.admit(times);

        let evicted = match victim {
            Some(victim) => {
                let evicted = self.read_files(&victim).await?;
                self.remove_files(&victim).await?;
                evicted
            }
            None => None,
        };

        if let Err(e) = self.write_files(&record).await {
            self.index.lock().remove(&record.key);
            return Err(e);
        }
        Ok(evicted)
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Record>> {
        if !self.index.lock().contains_key(key) {
            return Ok(None);
        }
        self.read_files(key).await
    }

    async fn peek(&self, key: &str) -> Result<Option<Record>> {
        self.retrieve(key).await
    }

    async fn touch(&self, record: &Record) -> Result<()> {
        {
            let mut index = self.index.lock();
            match index.get_mut(&record.key) {
                Some(times) => times.last_accessed = record.last_accessed,
                None => return Ok(()),
            }
        }
        self.write_meta(record).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.index.lock().contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.index.lock().remove(key).is_some();
        if removed {
            self.remove_files(key).await?;
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        self.index.lock().clear();
        match tokio::fs::remove_dir_all(&self.records_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&self.records_dir).await?;
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.index.lock().keys().cloned().collect()
    }

    fn entry_times(&self) -> Vec<EntryTimes> {
        self.index.lock().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.index.lock().len()
    }
}
