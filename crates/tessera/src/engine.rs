//! Engine facade wiring every component over one data directory

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::access::Gatekeeper;
use crate::backup::BackupManager;
use crate::config::Config;
use crate::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::error::Result;
use crate::graph::RelationshipGraph;
use crate::maintenance::MaintenanceTask;
use crate::record::{RecordStore, VERSIONS_DIR, VersionLog};
use crate::search::SearchEngine;
use crate::storage::{ManagerStats, TierManager};

/// Everything `/stats` reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub storage: ManagerStats,
    pub versions: usize,
    pub edges: usize,
    pub diagnostics: DiagnosticsSnapshot,
}

pub struct Engine {
    config: Config,
    diagnostics: Arc<Diagnostics>,
    tiers: Arc<TierManager>,
    records: Arc<RecordStore>,
    graph: Arc<RelationshipGraph>,
    search: Arc<SearchEngine>,
    backups: Arc<BackupManager>,
    gatekeeper: Arc<Gatekeeper>,
    shutdown: watch::Sender<bool>,
}

impl Engine {
    /// Open all components under `config.storage.data_dir`. The key index
    /// is rebuilt from whatever the persistent tiers already hold.
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let data_dir = config.storage.data_dir.clone();
        tokio::fs::create_dir_all(&data_dir).await?;

        let diagnostics = Arc::new(Diagnostics::new());
        let tiers = Arc::new(TierManager::open(&config.storage, diagnostics.clone()).await?);
        let versions = Arc::new(
            VersionLog::open(&data_dir.join(VERSIONS_DIR), config.versions.max_versions).await?,
        );
        let records = Arc::new(RecordStore::new(
            tiers.clone(),
            versions,
            diagnostics.clone(),
        ));
        let graph = Arc::new(
            RelationshipGraph::open(
                &data_dir,
                records.clone(),
                config.graph.max_thread_depth,
                diagnostics.clone(),
            )
            .await?,
        );
        let search = Arc::new(SearchEngine::new(
            records.clone(),
            config.search.clone(),
            diagnostics.clone(),
        ));
        let backups = Arc::new(
            BackupManager::open(
                &data_dir,
                records.clone(),
                graph.clone(),
                diagnostics.clone(),
            )
            .await?,
        );
        let gatekeeper = Arc::new(
            Gatekeeper::open(&data_dir, config.auth.clone(), diagnostics.clone()).await?,
        );
        let (shutdown, _) = watch::channel(false);

        tracing::info!(
            data_dir = %data_dir.display(),
            records = tiers.len(),
            "Engine opened"
        );

        Ok(Self {
            config: config.clone(),
            diagnostics,
            tiers,
            records,
            graph,
            search,
            backups,
            gatekeeper,
            shutdown,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    pub fn tiers(&self) -> &Arc<TierManager> {
        &self.tiers
    }

    pub fn records(&self) -> &Arc<RecordStore> {
        &self.records
    }

    pub fn graph(&self) -> &Arc<RelationshipGraph> {
        &self.graph
    }

    pub fn search(&self) -> &Arc<SearchEngine> {
        &self.search
    }

    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.backups
    }

    pub fn gatekeeper(&self) -> &Arc<Gatekeeper> {
        &self.gatekeeper
    }

    /// Delete a mutable record and every relationship touching it
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let deleted = self.records.delete(key).await?;
        if deleted {
            self.graph.remove_key(key).await?;
        }
        Ok(deleted)
    }

    /// Spawn the sweep and backup schedule; it stops on `close`
    pub fn start_maintenance(&self) -> JoinHandle<()> {
        MaintenanceTask::new(
            self.tiers.clone(),
            self.backups.clone(),
            self.gatekeeper.clone(),
            &self.config.maintenance,
            &self.config.backup,
            &self.diagnostics,
        )
        .start(self.shutdown.subscribe())
    }

    pub fn statistics(&self) -> EngineStats {
        EngineStats {
            storage: self.tiers.statistics(),
            versions: self.records.versions().total(),
            edges: self.graph.len(),
            diagnostics: self.diagnostics.snapshot(),
        }
    }

    /// Mark the store closed and signal background tasks to stop
    pub fn close(&self) {
        self.tiers.close();
        self.shutdown.send_replace(true);
        tracing::info!("Engine closed");
    }

    pub fn is_closed(&self) -> bool {
        self.tiers.is_closed()
    }
}
