//! Tier manager
//!
//! Routes stores and reads across the ordered tier list (rank 0 is the
//! fastest) and migrates entries between tiers:
//!
//! - Reads bump access statistics and copy an entry one tier faster once
//!   its access count reaches the tier's promotion threshold.
//! - A read that misses the tracked tier falls back to scanning every tier
//!   in rank order and re-points the index to wherever the key was found.
//! - Periodic sweeps expire entries past a tier's retention and demote
//!   entries idle past its demotion threshold, oldest idle first.
//!
//! Promotion keeps the slower copy when the slower tier is persistent and
//! drops it otherwise. The index always names the fastest tier holding the
//! current value.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::StorageConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{Result, TesseraError};
use crate::record::types::Record;
use crate::storage::tier::{Tier, TierStats};

/// Where a store landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub key: String,
    pub tier: String,
    pub rank: usize,
    /// Persistent tier that received a write-through copy
    pub write_through: Option<String>,
    /// Keys evicted to make room
    pub evicted: Vec<String>,
}

/// Outcome of one maintenance sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub expired: usize,
    pub demoted: usize,
    pub failures: usize,
    /// The store closed while the sweep was running
    pub interrupted: bool,
}

/// Statistics across all tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerStats {
    pub tiers: Vec<TierStats>,
    pub indexed_keys: usize,
    pub write_through: bool,
    pub closed: bool,
}

pub struct TierManager {
    tiers: Vec<Tier>,
    index: DashMap<String, usize>,
    write_through: bool,
    diagnostics: Arc<Diagnostics>,
    closed: AtomicBool,
}

impl TierManager {
    /// Open every configured tier under `config.data_dir` and index the
    /// records already held by persistent tiers
    pub async fn open(config: &StorageConfig, diagnostics: Arc<Diagnostics>) -> Result<Self> {
        let mut tiers = Vec::with_capacity(config.tiers.len());
        for (rank, spec) in config.tiers.iter().enumerate() {
            tiers.push(Tier::open(rank, spec.clone(), &config.data_dir).await?);
        }

        if !tiers.iter().any(|t| t.is_immutable()) {
            return Err(TesseraError::Config(
                "no crystal tier configured".to_string(),
            ));
        }

        let persistent: Vec<&str> = tiers
            .iter()
            .filter(|t| t.is_persistent() && !t.is_immutable())
            .map(|t| t.name())
            .collect();
        if persistent.is_empty() {
            diagnostics.set_capability(
                "persistent_backend",
                false,
                "mutable records live in memory only and are lost on restart",
            );
        } else {
            diagnostics.set_capability(
                "persistent_backend",
                true,
                format!("mutable records persisted by: {}", persistent.join(", ")),
            );
        }
        diagnostics.set_capability(
            "write_through",
            config.write_through,
            if config.write_through {
                "memory tier stores are copied to the next persistent tier"
            } else {
                "memory tier stores are not copied"
            },
        );

        let manager = Self {
            tiers,
            index: DashMap::new(),
            write_through: config.write_through,
            diagnostics,
            closed: AtomicBool::new(false),
        };
        manager.rebuild_index();

        tracing::info!(
            tiers = manager.tiers.len(),
            keys = manager.index.len(),
            "Tier manager ready"
        );
        Ok(manager)
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn tier(&self, name: &str) -> Option<&Tier> {
        self.tiers.iter().find(|t| t.name() == name)
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Name of the tier the index currently resolves `key` to
    pub fn tier_of(&self, key: &str) -> Option<String> {
        let rank = self.index.get(key).map(|r| *r)?;
        Some(self.tiers[rank].name().to_string())
    }

    /// All indexed keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.index.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("Tier manager closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TesseraError::Storage("store is closed".to_string()));
        }
        Ok(())
    }

    fn crystal_rank(&self) -> Option<usize> {
        self.tiers.iter().position(|t| t.is_immutable())
    }

    fn fastest_mutable(&self) -> Option<usize> {
        self.tiers.iter().position(|t| !t.is_immutable())
    }

    /// Next mutable tier faster than `rank`
    fn faster_mutable(&self, rank: usize) -> Option<usize> {
        (0..rank).rev().find(|&r| !self.tiers[r].is_immutable())
    }

    /// Next mutable tier slower than `rank`
    fn slower_mutable(&self, rank: usize) -> Option<usize> {
        (rank + 1..self.tiers.len()).find(|&r| !self.tiers[r].is_immutable())
    }

    fn write_through_target(&self, rank: usize) -> Option<usize> {
        if !self.write_through || self.tiers[rank].is_persistent() {
            return None;
        }
        (rank + 1..self.tiers.len())
            .find(|&r| self.tiers[r].is_persistent() && !self.tiers[r].is_immutable())
    }

    fn rebuild_index(&self) {
        self.index.clear();
        for tier in &self.tiers {
            for key in tier.storage().keys() {
                self.index.entry(key).or_insert(tier.rank());
            }
        }
    }

    /// Clear in-memory tiers, re-read persistent tiers and rebuild the index
    pub async fn reload(&self) -> Result<()> {
        for tier in &self.tiers {
            tier.reload().await?;
        }
        self.rebuild_index();
        tracing::info!(keys = self.index.len(), "Tier manager reloaded");
        Ok(())
    }

    /// Store a record.
    ///
    /// Immutable records always go to the crystal tier. Mutable records go
    /// to `tier_hint` when given, otherwise to the fastest mutable tier.
    /// Copies of the key in other mutable tiers are removed.
    pub async fn store(&self, mut record: Record, tier_hint: Option<&str>) -> Result<Placement> {
        self.ensure_open()?;

        let crystal = self.crystal_rank();
        let target = if record.immutable {
            crystal.ok_or_else(|| TesseraError::Config("no crystal tier configured".into()))?
        } else {
            if let Some(rank) = crystal {
                if self.tiers[rank].storage().exists(&record.key).await? {
                    return Err(TesseraError::ImmutableConflict(record.key));
                }
            }
            match tier_hint {
                Some(name) => {
                    let tier = self
                        .tier(name)
                        .ok_or_else(|| TesseraError::NotFound(format!("tier '{name}'")))?;
                    if tier.is_immutable() {
                        return Err(TesseraError::Storage(format!(
                            "tier '{name}' only accepts immutable records"
                        )));
                    }
                    tier.rank()
                }
                None => self.fastest_mutable().ok_or_else(|| {
                    TesseraError::Config("no mutable tier configured".into())
                })?,
            }
        };

        let key = record.key.clone();
        let tier = &self.tiers[target];
        record.tier = tier.name().to_string();

        let mut evicted = Vec::new();
        let mut write_through = None;

        let wt_rank = if record.immutable {
            None
        } else {
            self.write_through_target(target)
        };
        let wt_copy = wt_rank.map(|rank| {
            let mut copy = record.clone();
            copy.tier = self.tiers[rank].name().to_string();
            copy
        });

        if let Some(victim) = tier.storage().store(record).await? {
            evicted.push(victim.key.clone());
            self.after_eviction(target, victim).await;
        }
        tier.count_store();

        if let (Some(rank), Some(copy)) = (wt_rank, wt_copy) {
            let slow = &self.tiers[rank];
            if let Some(victim) = slow.storage().store(copy).await? {
                evicted.push(victim.key.clone());
                self.after_eviction(rank, victim).await;
            }
            slow.count_store();
            write_through = Some(slow.name().to_string());
        }

        for other in &self.tiers {
            if other.rank() == target || Some(other.rank()) == wt_rank || other.is_immutable() {
                continue;
            }
            if other.storage().delete(&key).await? {
                tracing::debug!(key = %key, tier = %other.name(), "Dropped stale copy");
            }
        }

        self.index.insert(key.clone(), target);
        tracing::debug!(key = %key, tier = %self.tiers[target].name(), "Stored record");

        Ok(Placement {
            key,
            tier: self.tiers[target].name().to_string(),
            rank: target,
            write_through,
            evicted,
        })
    }

    /// Read a record, updating access statistics and promoting it when it
    /// crosses its tier's promotion threshold. Absent keys return `None`.
    pub async fn retrieve(&self, key: &str) -> Result<Option<Record>> {
        self.ensure_open()?;

        let tracked = self.index.get(key).map(|r| *r);
        if let Some(rank) = tracked {
            let tier = &self.tiers[rank];
            if let Some(record) = tier.storage().retrieve(key).await? {
                tier.count_hit();
                self.diagnostics.cache_hit();
                return self.after_hit(record, rank).await.map(Some);
            }
            tier.count_miss();
        }
        self.diagnostics.cache_miss();

        // Linear fallback over every other tier in rank order
        for tier in &self.tiers {
            if Some(tier.rank()) == tracked {
                continue;
            }
            if let Some(record) = tier.storage().retrieve(key).await? {
                tier.count_hit();
                self.diagnostics.fallback_hit();
                self.index.insert(key.to_string(), tier.rank());
                tracing::debug!(
                    key = %key,
                    tier = %tier.name(),
                    tracked = ?tracked.map(|r| self.tiers[r].name()),
                    "Fallback hit"
                );
                return self.after_hit(record, tier.rank()).await.map(Some);
            }
        }

        if tracked.is_some() {
            self.index.remove(key);
        }
        Ok(None)
    }

    async fn after_hit(&self, mut record: Record, rank: usize) -> Result<Record> {
        let tier = &self.tiers[rank];
        record.mark_accessed(Utc::now());
        record.tier = tier.name().to_string();
        tier.storage().touch(&record).await?;

        if record.immutable {
            return Ok(record);
        }
        let threshold = match tier.spec().promote_after {
            Some(t) => u64::from(t),
            None => return Ok(record),
        };
        if record.access_count < threshold {
            return Ok(record);
        }
        let Some(faster) = self.faster_mutable(rank) else {
            return Ok(record);
        };

        match self.promote(&record, rank, faster).await {
            Ok(()) => record.tier = self.tiers[faster].name().to_string(),
            Err(e) => {
                tracing::warn!(key = %record.key, "Promotion failed: {e}");
            }
        }
        Ok(record)
    }

    async fn promote(&self, record: &Record, from: usize, to: usize) -> Result<()> {
        let fast = &self.tiers[to];
        let mut copy = record.clone();
        copy.tier = fast.name().to_string();

        if let Some(victim) = fast.storage().store(copy).await? {
            self.after_eviction(to, victim).await;
        }
        fast.count_store();
        self.index.insert(record.key.clone(), to);

        let slow = &self.tiers[from];
        if !slow.is_persistent() {
            slow.storage().delete(&record.key).await?;
        }

        self.diagnostics.promotion();
        tracing::debug!(
            key = %record.key,
            from = %slow.name(),
            to = %fast.name(),
            accesses = record.access_count,
            "Promoted record"
        );
        Ok(())
    }

    /// Bookkeeping for an entry pushed out of `rank` by a capacity limit.
    /// The index is left pointing at `rank` so later reads go through
    /// fallback; if no other tier holds the key the entry is gone.
    async fn after_eviction(&self, rank: usize, victim: Record) {
        self.tiers[rank].count_eviction();
        self.diagnostics.eviction();

        let mut held_elsewhere = false;
        for tier in &self.tiers {
            if tier.rank() == rank {
                continue;
            }
            if tier.storage().exists(&victim.key).await.unwrap_or(false) {
                held_elsewhere = true;
                break;
            }
        }

        if held_elsewhere {
            tracing::debug!(key = %victim.key, tier = %self.tiers[rank].name(), "Evicted record");
        } else {
            self.index.remove_if(&victim.key, |_, r| *r == rank);
            tracing::warn!(
                key = %victim.key,
                tier = %self.tiers[rank].name(),
                "Evicted record with no copy in another tier"
            );
        }
    }

    /// Read without touching access statistics, recency or the index
    pub async fn peek(&self, key: &str) -> Result<Option<Record>> {
        let tracked = self.index.get(key).map(|r| *r);
        if let Some(rank) = tracked {
            if let Some(record) = self.tiers[rank].storage().peek(key).await? {
                return Ok(Some(record));
            }
        }
        for tier in &self.tiers {
            if Some(tier.rank()) == tracked {
                continue;
            }
            if let Some(record) = tier.storage().peek(key).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    pub async fn contains(&self, key: &str) -> Result<bool> {
        if self.index.contains_key(key) {
            return Ok(true);
        }
        for tier in &self.tiers {
            if tier.storage().exists(key).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether the key is held by the crystal tier
    pub async fn is_crystal(&self, key: &str) -> Result<bool> {
        match self.crystal_rank() {
            Some(rank) => self.tiers[rank].storage().exists(key).await,
            None => Ok(false),
        }
    }

    /// Remove a mutable record from every tier. Immutable records cannot be
    /// deleted.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        if self.is_crystal(key).await? {
            return Err(TesseraError::ImmutableConflict(key.to_string()));
        }

        let mut removed = false;
        for tier in self.tiers.iter().filter(|t| !t.is_immutable()) {
            removed |= tier.storage().delete(key).await?;
        }
        removed |= self.index.remove(key).is_some();
        if removed {
            tracing::debug!(key = %key, "Deleted record");
        }
        Ok(removed)
    }

    /// Point the index at the fastest tier holding `key`, or drop it
    async fn repoint(&self, key: &str) -> Result<()> {
        for tier in &self.tiers {
            if tier.storage().exists(key).await? {
                self.index.insert(key.to_string(), tier.rank());
                return Ok(());
            }
        }
        self.index.remove(key);
        Ok(())
    }

    /// One maintenance pass over every mutable tier: retention expiry
    /// first, then idle demotion. Per-entry failures are logged and
    /// counted; the pass stops early once the store is closed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        if self.is_closed() {
            report.interrupted = true;
            return report;
        }

        for tier in &self.tiers {
            if tier.is_immutable() {
                continue;
            }

            if let Some(retention) = tier.spec().retention() {
                let expired: Vec<String> = tier
                    .storage()
                    .entry_times()
                    .into_iter()
                    .filter(|t| now - t.created_at > retention)
                    .map(|t| t.key)
                    .collect();
                for key in expired {
                    if self.is_closed() {
                        report.interrupted = true;
                        return report;
                    }
                    match self.expire(tier, &key).await {
                        Ok(()) => report.expired += 1,
                        Err(e) => {
                            report.failures += 1;
                            tracing::warn!(key = %key, tier = %tier.name(), "Expiry failed: {e}");
                        }
                    }
                }
            }

            if let Some(idle_limit) = tier.spec().demote_after() {
                let Some(slower) = self.slower_mutable(tier.rank()) else {
                    continue;
                };
                let mut idle: Vec<_> = tier
                    .storage()
                    .entry_times()
                    .into_iter()
                    .filter(|t| now - t.last_accessed > idle_limit)
                    .collect();
                idle.sort_by_key(|t| t.last_accessed);

                for entry in idle {
                    if self.is_closed() {
                        report.interrupted = true;
                        return report;
                    }
                    match self.demote(&entry.key, tier.rank(), slower).await {
                        Ok(true) => report.demoted += 1,
                        Ok(false) => {}
                        Err(e) => {
                            report.failures += 1;
                            tracing::warn!(
                                key = %entry.key,
                                tier = %tier.name(),
                                "Demotion failed: {e}"
                            );
                        }
                    }
                }
            }
        }

        if report.expired + report.demoted + report.failures > 0 {
            tracing::info!(
                expired = report.expired,
                demoted = report.demoted,
                failures = report.failures,
                "Sweep finished"
            );
        }
        report
    }

    async fn expire(&self, tier: &Tier, key: &str) -> Result<()> {
        if tier.storage().delete(key).await? {
            self.diagnostics.expiration();
            tracing::debug!(key = %key, tier = %tier.name(), "Retention expired");
        }
        self.repoint(key).await
    }

    /// Move an idle entry from `from` into `to`. Returns false when the
    /// entry vanished before it could be moved.
    async fn demote(&self, key: &str, from: usize, to: usize) -> Result<bool> {
        let source = &self.tiers[from];
        let target = &self.tiers[to];

        let Some(record) = source.storage().peek(key).await? else {
            return Ok(false);
        };

        if target.storage().exists(key).await? {
            // Carry the access metadata over to the existing slower copy
            target.storage().touch(&record).await?;
        } else {
            let mut copy = record;
            copy.tier = target.name().to_string();
            if let Some(victim) = target.storage().store(copy).await? {
                self.after_eviction(to, victim).await;
            }
            target.count_store();
        }

        source.storage().delete(key).await?;
        self.repoint(key).await?;
        self.diagnostics.demotion();
        tracing::debug!(key = %key, from = %source.name(), to = %target.name(), "Demoted record");
        Ok(true)
    }

    pub fn statistics(&self) -> ManagerStats {
        ManagerStats {
            tiers: self.tiers.iter().map(Tier::stats).collect(),
            indexed_keys: self.index.len(),
            write_through: self.write_through,
            closed: self.is_closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TierKind, TierSpec};
    use chrono::Duration;
    use std::path::Path;

    fn spec(name: &str, kind: TierKind) -> TierSpec {
        TierSpec {
            name: name.to_string(),
            kind,
            capacity: None,
            retention_secs: None,
            latency: None,
            promote_after: None,
            demote_after_secs: None,
        }
    }

    fn storage_config(dir: &Path, tiers: Vec<TierSpec>, write_through: bool) -> StorageConfig {
        StorageConfig {
            data_dir: dir.to_path_buf(),
            write_through,
            tiers,
        }
    }

    async fn manager(dir: &Path, tiers: Vec<TierSpec>, write_through: bool) -> TierManager {
        TierManager::open(
            &storage_config(dir, tiers, write_through),
            Arc::new(Diagnostics::new()),
        )
        .await
        .unwrap()
    }

    fn hot_cold_crystal(hot_capacity: usize) -> Vec<TierSpec> {
        let mut hot = spec("hot", TierKind::Memory);
        hot.capacity = Some(hot_capacity);
        let mut cold = spec("cold", TierKind::Disk);
        cold.promote_after = Some(2);
        vec![hot, cold, spec("crystal", TierKind::Crystal)]
    }

    #[tokio::test]
    async fn test_store_defaults_to_fastest_mutable_tier() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mgr = manager(temp_dir.path(), hot_cold_crystal(10), true).await;

        let placement = mgr.store(Record::new("k", "v"), None).await.unwrap();
        assert_eq!(placement.tier, "hot");
        assert_eq!(placement.write_through.as_deref(), Some("cold"));
        assert_eq!(mgr.tier_of("k").as_deref(), Some("hot"));
        assert!(mgr.tier("cold").unwrap().storage().exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_immutable_record_goes_to_crystal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mgr = manager(temp_dir.path(), hot_cold_crystal(10), true).await;

        let mut record = Record::new("doc", "hello");
        record.immutable = true;
        let placement = mgr.store(record, Some("hot")).await.unwrap();
        assert_eq!(placement.tier, "crystal");

        let err = mgr.store(Record::new("doc", "bye"), None).await.unwrap_err();
        assert!(matches!(err, TesseraError::ImmutableConflict(_)));
        assert!(matches!(
            mgr.delete("doc").await,
            Err(TesseraError::ImmutableConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_tier_hint_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mgr = manager(temp_dir.path(), hot_cold_crystal(10), true).await;
        let err = mgr.store(Record::new("k", "v"), Some("nope")).await.unwrap_err();
        assert!(matches!(err, TesseraError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mgr = manager(temp_dir.path(), hot_cold_crystal(10), true).await;
        assert!(mgr.retrieve("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eviction_falls_back_to_persistent_copy() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mgr = manager(temp_dir.path(), hot_cold_crystal(2), true).await;

        mgr.store(Record::new("a", "1"), None).await.unwrap();
        mgr.store(Record::new("b", "2"), None).await.unwrap();
        let placement = mgr.store(Record::new("c", "3"), None).await.unwrap();
        assert_eq!(placement.evicted, vec!["a".to_string()]);

        let hot = mgr.tier("hot").unwrap();
        assert!(!hot.storage().exists("a").await.unwrap());

        let got = mgr.retrieve("a").await.unwrap().unwrap();
        assert_eq!(got.content, "1");
        assert_eq!(got.tier, "cold");
        assert_eq!(mgr.diagnostics().snapshot().fallback_hits, 1);
        assert_eq!(mgr.tier_of("a").as_deref(), Some("cold"));
    }

    #[tokio::test]
    async fn test_eviction_without_copy_loses_entry() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mgr = manager(temp_dir.path(), hot_cold_crystal(1), false).await;

        mgr.store(Record::new("a", "1"), None).await.unwrap();
        mgr.store(Record::new("b", "2"), None).await.unwrap();
        assert!(mgr.retrieve("a").await.unwrap().is_none());
        assert_eq!(mgr.len(), 1);
    }

    #[tokio::test]
    async fn test_promotion_copies_forward_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mgr = manager(temp_dir.path(), hot_cold_crystal(10), true).await;
        mgr.store(Record::new("k", "v"), Some("cold")).await.unwrap();

        let first = mgr.retrieve("k").await.unwrap().unwrap();
        assert_eq!(first.tier, "cold");
        let second = mgr.retrieve("k").await.unwrap().unwrap();
        assert_eq!(second.tier, "hot");

        for _ in 0..5 {
            assert_eq!(mgr.retrieve("k").await.unwrap().unwrap().tier, "hot");
        }
        assert_eq!(mgr.diagnostics().snapshot().promotions, 1);
        // The persistent copy is retained
        assert!(mgr.tier("cold").unwrap().storage().exists("k").await.unwrap());
        assert_eq!(mgr.tier_of("k").as_deref(), Some("hot"));
    }

    #[tokio::test]
    async fn test_sweep_demotes_idle_entries() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut tiers = hot_cold_crystal(10);
        tiers[0].demote_after_secs = Some(60);
        let mgr = manager(temp_dir.path(), tiers, false).await;
        mgr.store(Record::new("idle", "1"), None).await.unwrap();

        let report = mgr.sweep(Utc::now() + Duration::seconds(120)).await;
        assert_eq!(report.demoted, 1);
        assert_eq!(mgr.tier_of("idle").as_deref(), Some("cold"));
        assert!(!mgr.tier("hot").unwrap().storage().exists("idle").await.unwrap());
        assert_eq!(mgr.retrieve("idle").await.unwrap().unwrap().content, "1");
    }

    #[tokio::test]
    async fn test_sweep_expires_past_retention() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut tiers = hot_cold_crystal(10);
        tiers[1].retention_secs = Some(60);
        let mgr = manager(temp_dir.path(), tiers, true).await;
        mgr.store(Record::new("old", "1"), Some("cold")).await.unwrap();

        let report = mgr.sweep(Utc::now() + Duration::seconds(120)).await;
        assert_eq!(report.expired, 1);
        assert!(mgr.retrieve("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_stops_when_closed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut tiers = hot_cold_crystal(10);
        tiers[0].demote_after_secs = Some(1);
        let mgr = manager(temp_dir.path(), tiers, false).await;
        mgr.store(Record::new("a", "1"), None).await.unwrap();
        mgr.close();

        let report = mgr.sweep(Utc::now() + Duration::seconds(10)).await;
        assert!(report.interrupted);
        assert_eq!(report.demoted, 0);
        assert!(mgr.retrieve("a").await.is_err());
    }

    #[tokio::test]
    async fn test_index_rebuilt_from_persistent_tiers() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let mgr = manager(temp_dir.path(), hot_cold_crystal(10), true).await;
            mgr.store(Record::new("k", "v"), None).await.unwrap();
        }
        let mgr = manager(temp_dir.path(), hot_cold_crystal(10), true).await;
        assert_eq!(mgr.tier_of("k").as_deref(), Some("cold"));
        assert_eq!(mgr.keys(), vec!["k".to_string()]);
    }
}
