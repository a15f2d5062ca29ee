//! Backup and restore of persisted state
//!
//! A backup is a directory under `<root>/backups/<name>/` holding a copy of
//! every persistent tier, the version history and the relationship graph,
//! plus a `manifest.json`. It is assembled in a hidden `.tmp-<name>`
//! directory and renamed into place once complete, so a listed backup is
//! always whole. Copies read files that tiers replace by atomic rename,
//! which lets the store keep serving while a backup runs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::config::TierKind;
use crate::diagnostics::Diagnostics;
use crate::error::{Result, TesseraError};
use crate::graph::{GRAPH_DIR, RelationshipGraph};
use crate::record::{RecordStore, VERSIONS_DIR};

pub const BACKUPS_DIR: &str = "backups";
pub const MANIFEST_FILE: &str = "manifest.json";
/// Type tag of the snapshot taken before every restore
pub const PRE_RESTORE_TYPE: &str = "pre_restore";
/// Type tag used by the backup schedule
pub const SCHEDULED_TYPE: &str = "scheduled";
const TMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSnapshot {
    pub tier: String,
    pub kind: TierKind,
    /// Entries held by the tier when the backup started
    pub record_count: usize,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub name: String,
    pub backup_type: String,
    pub created_at: DateTime<Utc>,
    pub tiers: Vec<TierSnapshot>,
    /// Non-tier directories included (version history, graph)
    #[serde(default)]
    pub extras: Vec<String>,
    pub total_size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub removed: Vec<String>,
    pub kept: usize,
    pub failures: usize,
}

pub struct BackupManager {
    data_dir: PathBuf,
    backups_dir: PathBuf,
    records: Arc<RecordStore>,
    graph: Arc<RelationshipGraph>,
    diagnostics: Arc<Diagnostics>,
    /// Keeps create/restore/prune from interleaving with each other
    lock: tokio::sync::Mutex<()>,
}

impl BackupManager {
    pub async fn open(
        data_dir: &Path,
        records: Arc<RecordStore>,
        graph: Arc<RelationshipGraph>,
        diagnostics: Arc<Diagnostics>,
    ) -> Result<Self> {
        let backups_dir = data_dir.join(BACKUPS_DIR);
        tokio::fs::create_dir_all(&backups_dir).await?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            backups_dir,
            records,
            graph,
            diagnostics,
            lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    /// Snapshot every persistent tier plus version history and graph
    pub async fn create(&self, backup_type: &str) -> Result<BackupManifest> {
        let timer = self.diagnostics.start("backup_create");
        let _guard = self.lock.lock().await;
        timer.observe(self.create_unlocked(backup_type).await)
    }

    async fn create_unlocked(&self, backup_type: &str) -> Result<BackupManifest> {
        if backup_type.is_empty()
            || !backup_type
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(TesseraError::InvalidKey(format!(
                "backup type '{backup_type}' must be non-empty ASCII letters, digits, '_' or '-'"
            )));
        }

        let created_at = Utc::now();
        let mut name = format!("{backup_type}_{}", created_at.format("%Y%m%d_%H%M%S_%6f"));
        let mut suffix = 1;
        while tokio::fs::try_exists(self.backups_dir.join(&name)).await? {
            name = format!(
                "{backup_type}_{}-{suffix}",
                created_at.format("%Y%m%d_%H%M%S_%6f")
            );
            suffix += 1;
        }

        // Counts are taken before copying starts
        let tiers: Vec<(String, TierKind, usize)> = self
            .records
            .tiers()
            .tiers()
            .iter()
            .filter(|t| t.is_persistent())
            .map(|t| (t.name().to_string(), t.spec().kind, t.storage().len()))
            .collect();

        let staging = self.backups_dir.join(format!("{TMP_PREFIX}{name}"));
        let final_dir = self.backups_dir.join(&name);
        let data_dir = self.data_dir.clone();
        let job_staging = staging.clone();
        let job_name = name.clone();
        let job_type = backup_type.to_string();

        let copied = tokio::task::spawn_blocking(move || -> std::io::Result<BackupManifest> {
            std::fs::create_dir_all(&job_staging)?;
            let mut snapshots = Vec::with_capacity(tiers.len());
            let mut total = 0u64;

            for (tier, kind, record_count) in tiers {
                let size_bytes = copy_tree(&data_dir.join(&tier), &job_staging.join(&tier))?;
                total += size_bytes;
                snapshots.push(TierSnapshot {
                    tier,
                    kind,
                    record_count,
                    size_bytes,
                });
            }

            let mut extras = Vec::new();
            for extra in [VERSIONS_DIR, GRAPH_DIR] {
                total += copy_tree(&data_dir.join(extra), &job_staging.join(extra))?;
                extras.push(extra.to_string());
            }

            let manifest = BackupManifest {
                name: job_name,
                backup_type: job_type,
                created_at,
                tiers: snapshots,
                extras,
                total_size_bytes: total,
            };
            let bytes = serde_json::to_vec_pretty(&manifest).map_err(std::io::Error::other)?;
            std::fs::write(job_staging.join(MANIFEST_FILE), bytes)?;
            Ok(manifest)
        })
        .await
        .map_err(|e| TesseraError::Storage(format!("Backup task failed: {e}")))?;

        let manifest = match copied {
            Ok(manifest) => manifest,
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(e.into());
            }
        };

        if let Err(e) = tokio::fs::rename(&staging, &final_dir).await {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e.into());
        }

        tracing::info!(
            backup = %manifest.name,
            size_bytes = manifest.total_size_bytes,
            "Backup created"
        );
        Ok(manifest)
    }

    /// Every complete backup, newest first
    pub async fn list(&self) -> Result<Vec<BackupManifest>> {
        let mut manifests = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.backups_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.file_type().await?.is_dir() {
                continue;
            }
            match read_manifest(&entry.path()).await {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => tracing::warn!(backup = %name, "Skipping backup: {e}"),
            }
        }

        manifests.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(manifests)
    }

    /// Replace live persisted state with the named backup.
    ///
    /// The backup is checked before anything changes; a missing backup is
    /// `BackupNotFound`, a missing manifest or tier copy is `BackupCorrupt`.
    /// A "pre_restore" backup of the current state is always taken first.
    pub async fn restore(&self, name: &str) -> Result<bool> {
        let timer = self.diagnostics.start("backup_restore");
        let _guard = self.lock.lock().await;
        timer.observe(self.restore_unlocked(name).await)
    }

    async fn restore_unlocked(&self, name: &str) -> Result<bool> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(TesseraError::BackupNotFound(name.to_string()));
        }
        let dir = self.backups_dir.join(name);
        if !tokio::fs::try_exists(&dir).await? {
            return Err(TesseraError::BackupNotFound(name.to_string()));
        }

        let manifest = read_manifest(&dir)
            .await
            .map_err(|e| TesseraError::BackupCorrupt(format!("{name}: {e}")))?;

        let tiers = self.records.tiers();
        for snapshot in &manifest.tiers {
            match tiers.tier(&snapshot.tier) {
                Some(tier) if tier.is_persistent() => {}
                _ => {
                    return Err(TesseraError::BackupCorrupt(format!(
                        "{name}: tier '{}' is not a configured persistent tier",
                        snapshot.tier
                    )));
                }
            }
            if !tokio::fs::try_exists(dir.join(&snapshot.tier)).await? {
                return Err(TesseraError::BackupCorrupt(format!(
                    "{name}: missing data for tier '{}'",
                    snapshot.tier
                )));
            }
        }
        for extra in &manifest.extras {
            if !tokio::fs::try_exists(dir.join(extra)).await? {
                return Err(TesseraError::BackupCorrupt(format!(
                    "{name}: missing '{extra}'"
                )));
            }
        }

        let pre_restore = self.create_unlocked(PRE_RESTORE_TYPE).await?;

        let mut parts: Vec<String> = manifest.tiers.iter().map(|t| t.tier.clone()).collect();
        parts.extend(manifest.extras.iter().cloned());
        let data_dir = self.data_dir.clone();
        let source = dir.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            for part in parts {
                replace_dir(&source.join(&part), &data_dir, &part)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| TesseraError::Storage(format!("Restore task failed: {e}")))??;

        self.records.reload().await?;
        self.graph.reload().await?;

        tracing::info!(
            backup = %name,
            pre_restore = %pre_restore.name,
            "Backup restored"
        );
        Ok(true)
    }

    /// Delete backups older than `retention_days`. The newest backup is
    /// always kept; a backup that cannot be removed is logged and skipped.
    pub async fn prune(&self, retention_days: u64) -> Result<PruneReport> {
        let _guard = self.lock.lock().await;
        let backups = self.list().await?;
        let cutoff = i64::try_from(retention_days)
            .ok()
            .and_then(Duration::try_days)
            .and_then(|d| Utc::now().checked_sub_signed(d));

        let mut report = PruneReport::default();
        for (i, manifest) in backups.iter().enumerate() {
            let expired = cutoff.is_some_and(|cutoff| manifest.created_at < cutoff);
            if i == 0 || !expired {
                report.kept += 1;
                continue;
            }
            match tokio::fs::remove_dir_all(self.backups_dir.join(&manifest.name)).await {
                Ok(()) => {
                    tracing::debug!(backup = %manifest.name, "Pruned backup");
                    report.removed.push(manifest.name.clone());
                }
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!(backup = %manifest.name, "Failed to prune backup: {e}");
                }
            }
        }

        if !report.removed.is_empty() {
            tracing::info!(
                removed = report.removed.len(),
                kept = report.kept,
                "Pruned backups"
            );
        }
        Ok(report)
    }
}

async fn read_manifest(dir: &Path) -> Result<BackupManifest> {
    let bytes = tokio::fs::read(dir.join(MANIFEST_FILE)).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Recursively copy `src` into `dst`, skipping in-flight `.tmp` files.
/// Returns the number of bytes copied; a missing `src` copies nothing.
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<u64> {
    std::fs::create_dir_all(dst)?;
    if !src.exists() {
        return Ok(0);
    }

    let mut total = 0u64;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if entry.file_name().to_string_lossy().ends_with(".tmp") {
                continue;
            }
            match std::fs::copy(entry.path(), &target) {
                Ok(bytes) => total += bytes,
                // Deleted after the walk saw it
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
    }
    Ok(total)
}

/// Swap `<data_dir>/<part>` for a fresh copy of `source`
fn replace_dir(source: &Path, data_dir: &Path, part: &str) -> std::io::Result<()> {
    let live = data_dir.join(part);
    let staging = data_dir.join(format!(".restore-{part}"));
    let old = data_dir.join(format!(".old-{part}"));

    for leftover in [&staging, &old] {
        if leftover.exists() {
            std::fs::remove_dir_all(leftover)?;
        }
    }

    copy_tree(source, &staging)?;
    if live.exists() {
        std::fs::rename(&live, &old)?;
    }
    std::fs::rename(&staging, &live)?;
    if old.exists() {
        std::fs::remove_dir_all(&old)?;
    }
    Ok(())
}
