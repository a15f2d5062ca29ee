//! Record store: versioned mutable records and write-once crystal records
//! on top of the tier manager

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::diagnostics::Diagnostics;
use crate::error::{Result, TesseraError};
use crate::record::types::{PutOptions, PutOutcome, Record, VersionInfo};
use crate::record::versions::VersionLog;
use crate::storage::TierManager;

/// Longest accepted key in bytes; keeps encoded file names well under the
/// usual 255 byte limit
pub const MAX_KEY_LEN: usize = 80;

/// Summary recorded on the version an ordinary update supersedes
pub const UPDATE_SUMMARY: &str = "update";
/// Summary recorded on the live state captured before a restore
pub const PRE_RESTORE_SUMMARY: &str = "pre-restore";
/// Summary recorded when a mutable key is made immutable
pub const CRYSTALLIZE_SUMMARY: &str = "crystallized";

pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(TesseraError::InvalidKey("key is empty".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(TesseraError::InvalidKey(format!(
            "key is {} bytes, limit is {MAX_KEY_LEN}",
            key.len()
        )));
    }
    if key == "." || key == ".." {
        return Err(TesseraError::InvalidKey(format!("'{key}' is reserved")));
    }
    if key.chars().any(char::is_control) {
        return Err(TesseraError::InvalidKey(
            "key contains control characters".into(),
        ));
    }
    Ok(())
}

/// Exclusive hold on one key's write path. The lock entry is dropped from
/// the table once nobody else is holding or waiting on it.
struct KeyGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Writes to one key (`put`, `restore`, `delete`) are serialised so each
/// one versions the value it actually replaces. Reads take no lock.
pub struct RecordStore {
    tiers: Arc<TierManager>,
    versions: Arc<VersionLog>,
    diagnostics: Arc<Diagnostics>,
    key_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RecordStore {
    pub fn new(
        tiers: Arc<TierManager>,
        versions: Arc<VersionLog>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            tiers,
            versions,
            diagnostics,
            key_locks: DashMap::new(),
        }
    }

    async fn lock_key<'a>(&'a self, key: &'a str) -> KeyGuard<'a> {
        let lock = self.key_locks.entry(key.to_string()).or_default().clone();
        KeyGuard {
            locks: &self.key_locks,
            key,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Keys with a write in flight or queued
    pub fn locked_keys(&self) -> usize {
        self.key_locks.len()
    }

    pub fn tiers(&self) -> &Arc<TierManager> {
        &self.tiers
    }

    pub fn versions(&self) -> &Arc<VersionLog> {
        &self.versions
    }

    /// Store content under `key`.
    ///
    /// - An existing immutable key is never overwritten (`ImmutableConflict`).
    /// - Updating a mutable key first captures its current state as a version.
    /// - `immutable` on an existing mutable key captures the live state as a
    ///   final version and moves the key into the crystal tier.
    ///
    /// Title, tags and attributes left empty in `options` carry over from the
    /// previous state.
    pub async fn put(&self, key: &str, content: &str, options: PutOptions) -> Result<PutOutcome> {
        let timer = self.diagnostics.start("put");
        timer.observe(self.put_inner(key, content, options).await)
    }

    async fn put_inner(&self, key: &str, content: &str, options: PutOptions) -> Result<PutOutcome> {
        validate_key(key)?;
        let _guard = self.lock_key(key).await;
        if self.tiers.is_crystal(key).await? {
            return Err(TesseraError::ImmutableConflict(key.to_string()));
        }

        let previous = self.tiers.peek(key).await?;
        let default_summary = if options.immutable {
            CRYSTALLIZE_SUMMARY
        } else {
            UPDATE_SUMMARY
        };

        let (record, superseded_version) = match previous {
            Some(prev) => {
                let summary = options.change_summary.as_deref().unwrap_or(default_summary);
                let number = self.versions.capture(&prev, summary).await?;

                let mut next = prev;
                next.content = content.to_string();
                next.updated_at = Utc::now();
                if options.title.is_some() {
                    next.title = options.title;
                }
                if !options.tags.is_empty() {
                    next.tags = options.tags;
                }
                if !options.attributes.is_empty() {
                    next.attributes = options.attributes;
                }
                (next, Some(number))
            }
            None => {
                let mut record = Record::new(key, content);
                record.title = options.title;
                record.tags = options.tags;
                record.attributes = options.attributes;
                (record, None)
            }
        };

        let mut record = record;
        record.immutable = options.immutable;
        record.signature = None;
        let record_id = record.id;
        let tier_hint = if record.immutable {
            None
        } else {
            options.tier.as_deref()
        };

        let placement = self
            .settle(key, superseded_version, self.tiers.store(record, tier_hint).await)
            .await?;

        if options.immutable {
            tracing::info!(key = %key, "Stored immutable record");
        }

        Ok(PutOutcome {
            record_id,
            key: key.to_string(),
            tier: placement.tier,
            superseded_version,
        })
    }

    /// Finish a write that captured `version`: trim history when the store
    /// landed, drop the captured version when it did not
    async fn settle<T>(&self, key: &str, version: Option<u64>, stored: Result<T>) -> Result<T> {
        if let Some(number) = version {
            match stored {
                Ok(_) => self.versions.trim(key).await,
                Err(_) => self.versions.discard(key, number).await,
            }
        }
        stored
    }

    /// Read a record. Tampered immutable content fails with
    /// `IntegrityViolation` rather than being returned.
    pub async fn get(&self, key: &str) -> Result<Record> {
        let timer = self.diagnostics.start("get");
        let result = match self.tiers.retrieve(key).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(TesseraError::NotFound(key.to_string())),
            Err(e) => {
                if let TesseraError::IntegrityViolation { .. } = e {
                    tracing::error!(key = %key, "{e}");
                }
                Err(e)
            }
        };
        timer.observe(result)
    }

    /// Read without updating access statistics
    pub async fn peek(&self, key: &str) -> Result<Option<Record>> {
        self.tiers.peek(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.tiers.contains(key).await
    }

    /// Retained versions, oldest first
    pub async fn list_versions(&self, key: &str) -> Result<Vec<VersionInfo>> {
        let timer = self.diagnostics.start("list_versions");
        let result = async {
            let versions = self.versions.list(key).await?;
            if versions.is_empty() && !self.tiers.contains(key).await? {
                return Err(TesseraError::NotFound(key.to_string()));
            }
            Ok(versions)
        }
        .await;
        timer.observe(result)
    }

    /// Replace the live content with a retained version. The current state
    /// is captured as a "pre-restore" version first. An unknown version
    /// fails with `VersionNotFound` and changes nothing.
    pub async fn restore(&self, key: &str, version: u64) -> Result<bool> {
        let timer = self.diagnostics.start("restore");
        timer.observe(self.restore_inner(key, version).await)
    }

    async fn restore_inner(&self, key: &str, version: u64) -> Result<bool> {
        validate_key(key)?;
        let _guard = self.lock_key(key).await;
        if self.tiers.is_crystal(key).await? {
            return Err(TesseraError::ImmutableConflict(key.to_string()));
        }

        let target = self.versions.get(key, version).await?;
        let current = self.tiers.peek(key).await?;
        let tier_hint = self.tiers.tier_of(key);

        let (mut record, snapshot) = match current {
            Some(current) => {
                let number = self.versions.capture(&current, PRE_RESTORE_SUMMARY).await?;
                (current, Some(number))
            }
            None => (Record::new(key, String::new()), None),
        };
        record.content = target.content;
        record.title = target.title;
        record.tags = target.tags;
        record.attributes = target.attributes;
        record.updated_at = Utc::now();

        let stored = self.tiers.store(record, tier_hint.as_deref()).await;
        self.settle(key, snapshot, stored).await?;
        tracing::info!(key = %key, version, "Restored record");
        Ok(true)
    }

    /// Delete a mutable record. Its version history is kept.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let timer = self.diagnostics.start("delete");
        let result = async {
            let _guard = self.lock_key(key).await;
            self.tiers.delete(key).await
        }
        .await;
        timer.observe(result)
    }

    /// Every live record, read without touching access statistics. Records
    /// that fail verification are skipped.
    pub async fn scan(&self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for key in self.tiers.keys() {
            match self.tiers.peek(&key).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e @ TesseraError::IntegrityViolation { .. }) => {
                    tracing::warn!(key = %key, "Skipping record: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    /// Re-read tiers and version history from disk
    pub async fn reload(&self) -> Result<()> {
        self.tiers.reload().await?;
        self.versions.reload().await
    }
}
