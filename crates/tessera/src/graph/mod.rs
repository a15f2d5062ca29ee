//! Relationship graph
//!
//! Directed, typed parent -> child edges between record keys, kept in
//! creation order and persisted to `<root>/graph/edges.json`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::diagnostics::Diagnostics;
use crate::error::{Result, TesseraError};
use crate::record::RecordStore;
use crate::storage::disk::write_atomic;

pub const GRAPH_DIR: &str = "graph";
pub const EDGES_FILE: &str = "edges.json";
/// Edge type followed by thread traversal
pub const THREAD_EDGE: &str = "thread";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub parent: String,
    pub child: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationships {
    pub key: String,
    pub parents: Vec<Edge>,
    pub children: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadEntry {
    pub key: String,
    pub depth: usize,
}

pub struct RelationshipGraph {
    path: PathBuf,
    edges: RwLock<Vec<Edge>>,
    /// Serializes file writes so they land in mutation order
    persist: tokio::sync::Mutex<()>,
    records: Arc<RecordStore>,
    max_depth: usize,
    diagnostics: Arc<Diagnostics>,
}

impl RelationshipGraph {
    pub async fn open(
        root: &Path,
        records: Arc<RecordStore>,
        max_depth: usize,
        diagnostics: Arc<Diagnostics>,
    ) -> Result<Self> {
        let dir = root.join(GRAPH_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        let graph = Self {
            path: dir.join(EDGES_FILE),
            edges: RwLock::new(Vec::new()),
            persist: tokio::sync::Mutex::new(()),
            records,
            max_depth,
            diagnostics,
        };
        graph.reload().await?;
        Ok(graph)
    }

    /// Re-read edges from disk
    pub async fn reload(&self) -> Result<()> {
        let edges: Vec<Edge> = match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(edges = edges.len(), "Relationship graph loaded");
        *self.edges.write() = edges;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.edges.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.read().is_empty()
    }

    /// Add a `parent -> child` edge of type `kind`. Returns false when the
    /// same edge already exists.
    pub async fn link(
        &self,
        parent: &str,
        child: &str,
        kind: &str,
        attributes: BTreeMap<String, String>,
    ) -> Result<bool> {
        let timer = self.diagnostics.start("link");
        timer.observe(self.link_inner(parent, child, kind, attributes).await)
    }

    async fn link_inner(
        &self,
        parent: &str,
        child: &str,
        kind: &str,
        attributes: BTreeMap<String, String>,
    ) -> Result<bool> {
        if parent.is_empty() || child.is_empty() || kind.is_empty() {
            return Err(TesseraError::InvalidRelationship(
                "parent, child and type must be non-empty".into(),
            ));
        }
        if parent == child {
            return Err(TesseraError::InvalidRelationship(format!(
                "'{parent}' cannot be linked to itself"
            )));
        }
        for key in [parent, child] {
            if !self.records.exists(key).await? {
                return Err(TesseraError::NotFound(key.to_string()));
            }
        }

        // Memory changes only after the file write lands
        let _persist = self.persist.lock().await;
        let snapshot = {
            let edges = self.edges.read();
            if edges
                .iter()
                .any(|e| e.parent == parent && e.child == child && e.kind == kind)
            {
                return Ok(false);
            }
            let mut snapshot = edges.clone();
            snapshot.push(Edge {
                parent: parent.to_string(),
                child: child.to_string(),
                kind: kind.to_string(),
                attributes,
                created_at: Utc::now(),
            });
            snapshot
        };
        self.save(&snapshot).await?;
        *self.edges.write() = snapshot;

        tracing::debug!(parent = %parent, child = %child, kind = %kind, "Linked records");
        Ok(true)
    }

    async fn save(&self, edges: &[Edge]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(edges)?;
        write_atomic(&self.path, &bytes).await
    }

    pub fn relationships(&self, key: &str) -> Relationships {
        let edges = self.edges.read();
        Relationships {
            key: key.to_string(),
            parents: edges.iter().filter(|e| e.child == key).cloned().collect(),
            children: edges.iter().filter(|e| e.parent == key).cloned().collect(),
        }
    }

    /// Depth-first walk along "thread" edges starting at `key`, visiting
    /// siblings in edge-creation order. Each key appears once; nothing
    /// deeper than the configured depth cap is returned.
    pub async fn thread(&self, key: &str) -> Result<Vec<ThreadEntry>> {
        let timer = self.diagnostics.start("thread");
        let result = async {
            let walk = self.walk_thread(key);
            if walk.len() == 1 && !self.records.exists(key).await? {
                return Err(TesseraError::NotFound(key.to_string()));
            }
            Ok(walk)
        }
        .await;
        timer.observe(result)
    }

    fn walk_thread(&self, key: &str) -> Vec<ThreadEntry> {
        let edges = self.edges.read();
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in edges.iter().filter(|e| e.kind == THREAD_EDGE) {
            children
                .entry(edge.parent.as_str())
                .or_default()
                .push(edge.child.as_str());
        }

        let mut out = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<(&str, usize)> = vec![(key, 0)];

        while let Some((current, depth)) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            out.push(ThreadEntry {
                key: current.to_string(),
                depth,
            });
            if depth >= self.max_depth {
                continue;
            }
            if let Some(next) = children.get(current) {
                // Reversed so the earliest edge is popped first
                for &child in next.iter().rev() {
                    if !visited.contains(child) {
                        stack.push((child, depth + 1));
                    }
                }
            }
        }
        out
    }

    /// Drop every edge touching `key`. Returns the number removed.
    pub async fn remove_key(&self, key: &str) -> Result<usize> {
        let _persist = self.persist.lock().await;
        let (removed, snapshot) = {
            let edges = self.edges.read();
            let kept: Vec<Edge> = edges
                .iter()
                .filter(|e| e.parent != key && e.child != key)
                .cloned()
                .collect();
            (edges.len() - kept.len(), kept)
        };
        if removed > 0 {
            self.save(&snapshot).await?;
            *self.edges.write() = snapshot;
            tracing::debug!(key = %key, removed, "Removed relationships");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::record::{PutOptions, VersionLog};
    use crate::storage::TierManager;

    async fn setup(dir: &Path, max_depth: usize) -> (Arc<RecordStore>, RelationshipGraph) {
        let config = Config::with_data_dir(dir);
        let diagnostics = Arc::new(Diagnostics::new());
        let tiers = Arc::new(
            TierManager::open(&config.storage, diagnostics.clone())
                .await
                .unwrap(),
        );
        let versions = Arc::new(VersionLog::open(&dir.join("versions"), 10).await.unwrap());
        let records = Arc::new(RecordStore::new(tiers, versions, diagnostics.clone()));
        let graph = RelationshipGraph::open(dir, records.clone(), max_depth, diagnostics)
            .await
            .unwrap();
        (records, graph)
    }

    async fn put_all(records: &RecordStore, keys: &[&str]) {
        for key in keys {
            records.put(key, "body", PutOptions::default()).await.unwrap();
        }
    }

    fn keys(entries: &[ThreadEntry]) -> Vec<(&str, usize)> {
        entries.iter().map(|e| (e.key.as_str(), e.depth)).collect()
    }

    #[tokio::test]
    async fn test_self_loop_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (records, graph) = setup(temp_dir.path(), 100).await;
        put_all(&records, &["a"]).await;

        let err = graph.link("a", "a", THREAD_EDGE, BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, TesseraError::InvalidRelationship(_)));
        assert!(graph.is_empty());
    }

    #[tokio::test]
    async fn test_missing_endpoint_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (records, graph) = setup(temp_dir.path(), 100).await;
        put_all(&records, &["a"]).await;

        let err = graph.link("a", "ghost", "cites", BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, TesseraError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_edge_is_noop() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (records, graph) = setup(temp_dir.path(), 100).await;
        put_all(&records, &["a", "b"]).await;

        assert!(graph.link("a", "b", "cites", BTreeMap::new()).await.unwrap());
        assert!(!graph.link("a", "b", "cites", BTreeMap::new()).await.unwrap());
        assert!(graph.link("a", "b", THREAD_EDGE, BTreeMap::new()).await.unwrap());
        assert_eq!(graph.len(), 2);

        let rel = graph.relationships("b");
        assert_eq!(rel.parents.len(), 2);
        assert!(rel.children.is_empty());
    }

    #[tokio::test]
    async fn test_thread_follows_creation_order_depth_first() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (records, graph) = setup(temp_dir.path(), 100).await;
        put_all(&records, &["root", "a", "b", "a1", "x"]).await;

        graph.link("root", "a", THREAD_EDGE, BTreeMap::new()).await.unwrap();
        graph.link("root", "b", THREAD_EDGE, BTreeMap::new()).await.unwrap();
        graph.link("a", "a1", THREAD_EDGE, BTreeMap::new()).await.unwrap();
        // Not a thread edge
        graph.link("root", "x", "cites", BTreeMap::new()).await.unwrap();

        let thread = graph.thread("root").await.unwrap();
        assert_eq!(
            keys(&thread),
            vec![("root", 0), ("a", 1), ("a1", 2), ("b", 1)]
        );
    }

    #[tokio::test]
    async fn test_thread_terminates_on_cycle() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (records, graph) = setup(temp_dir.path(), 100).await;
        put_all(&records, &["a", "b", "c"]).await;

        graph.link("a", "b", THREAD_EDGE, BTreeMap::new()).await.unwrap();
        graph.link("b", "c", THREAD_EDGE, BTreeMap::new()).await.unwrap();
        graph.link("c", "a", THREAD_EDGE, BTreeMap::new()).await.unwrap();

        let thread = graph.thread("a").await.unwrap();
        assert_eq!(keys(&thread), vec![("a", 0), ("b", 1), ("c", 2)]);
    }

    #[tokio::test]
    async fn test_thread_depth_cap() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (records, graph) = setup(temp_dir.path(), 2).await;
        put_all(&records, &["n0", "n1", "n2", "n3"]).await;
        for (p, c) in [("n0", "n1"), ("n1", "n2"), ("n2", "n3")] {
            graph.link(p, c, THREAD_EDGE, BTreeMap::new()).await.unwrap();
        }

        let thread = graph.thread("n0").await.unwrap();
        assert_eq!(keys(&thread), vec![("n0", 0), ("n1", 1), ("n2", 2)]);
    }

    #[tokio::test]
    async fn test_thread_of_unknown_key() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (_records, graph) = setup(temp_dir.path(), 100).await;
        assert!(matches!(
            graph.thread("nobody").await,
            Err(TesseraError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_edges_persist_and_remove_key() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let (records, graph) = setup(temp_dir.path(), 100).await;
            put_all(&records, &["a", "b", "c"]).await;
            graph.link("a", "b", THREAD_EDGE, BTreeMap::new()).await.unwrap();
            graph.link("b", "c", THREAD_EDGE, BTreeMap::new()).await.unwrap();
        }

        let (_records, graph) = setup(temp_dir.path(), 100).await;
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.remove_key("b").await.unwrap(), 2);
        graph.reload().await.unwrap();
        assert!(graph.is_empty());
    }

    #[tokio::test]
    async fn test_failed_save_leaves_no_edge() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (records, graph) = setup(temp_dir.path(), 100).await;
        put_all(&records, &["a", "b"]).await;

        // A non-empty directory where the edge file belongs makes the
        // rename fail
        let blocker = temp_dir.path().join(GRAPH_DIR).join(EDGES_FILE);
        std::fs::create_dir_all(blocker.join("occupied")).unwrap();

        assert!(graph.link("a", "b", THREAD_EDGE, BTreeMap::new()).await.is_err());
        assert!(graph.is_empty());
        assert!(graph.relationships("a").children.is_empty());

        std::fs::remove_dir_all(&blocker).unwrap();
        assert!(graph.link("a", "b", THREAD_EDGE, BTreeMap::new()).await.unwrap());
        assert_eq!(graph.len(), 1);
    }
}
