use axum::{
    Json,
    extract::{Path, State},
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::auth::{Presented, admit};
use super::error::ApiError;
use super::server::AppState;
use crate::access::{ApiKey, KeyInfo, Permission};
use crate::backup::{BackupManifest, PruneReport};
use crate::engine::EngineStats;
use crate::error::TesseraError;
use crate::graph::{Relationships, THREAD_EDGE};
use crate::record::{PutOptions, PutOutcome, Record};
use crate::search::SearchRequest;

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Body of `PUT /records/{key}`
#[derive(Debug, Deserialize)]
pub struct PutRecordRequest {
    pub content: String,
    #[serde(flatten)]
    pub options: PutOptions,
}

/// Body of `POST /records/{key}/link`
#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub child: String,
    #[serde(rename = "type", default = "default_link_type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

fn default_link_type() -> String {
    THREAD_EDGE.to_string()
}

#[derive(Debug, Deserialize)]
pub struct CreateBackupRequest {
    #[serde(rename = "type", default = "default_backup_type")]
    pub backup_type: String,
}

fn default_backup_type() -> String {
    "manual".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct PruneRequest {
    /// Falls back to `backup.retention_days`
    #[serde(default)]
    pub retention_days: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct IssueKeyRequest {
    pub owner: String,
    /// Falls back to `auth.key_ttl_days`
    #[serde(default)]
    pub ttl_days: Option<i64>,
    #[serde(default)]
    pub permissions: Option<BTreeSet<Permission>>,
}

#[derive(Debug, Serialize)]
pub struct VersionsResponse {
    pub key: String,
    pub versions: Vec<crate::record::VersionInfo>,
}

#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub key: String,
    pub thread: Vec<crate::graph::ThreadEntry>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub count: usize,
    pub results: Vec<crate::search::SearchHit>,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let status = if state.engine.is_closed() {
        "closing"
    } else {
        "ok"
    };
    Json(json!({ "status": status }))
}

pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
    presented: Presented,
) -> ApiResult<EngineStats> {
    admit(state.engine.gatekeeper(), &presented, Permission::Read)?;
    Ok(Json(state.engine.statistics()))
}

// ============================================================================
// Records
// ============================================================================

pub async fn put_record_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    presented: Presented,
    Json(request): Json<PutRecordRequest>,
) -> ApiResult<PutOutcome> {
    let caller = admit(state.engine.gatekeeper(), &presented, Permission::Write)?;
    let outcome = state
        .engine
        .records()
        .put(&key, &request.content, request.options)
        .await?;
    tracing::debug!(key = %key, client = %caller, tier = %outcome.tier, "Stored record");
    Ok(Json(outcome))
}

pub async fn get_record_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    presented: Presented,
) -> ApiResult<Record> {
    admit(state.engine.gatekeeper(), &presented, Permission::Read)?;
    Ok(Json(state.engine.records().get(&key).await?))
}

pub async fn delete_record_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    presented: Presented,
) -> ApiResult<Value> {
    admit(state.engine.gatekeeper(), &presented, Permission::Write)?;
    if !state.engine.delete(&key).await? {
        return Err(TesseraError::NotFound(key).into());
    }
    Ok(Json(json!({ "key": key, "deleted": true })))
}

pub async fn versions_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    presented: Presented,
) -> ApiResult<VersionsResponse> {
    admit(state.engine.gatekeeper(), &presented, Permission::Read)?;
    let versions = state.engine.records().list_versions(&key).await?;
    Ok(Json(VersionsResponse { key, versions }))
}

pub async fn restore_version_handler(
    State(state): State<Arc<AppState>>,
    Path((key, version)): Path<(String, u64)>,
    presented: Presented,
) -> ApiResult<Value> {
    admit(state.engine.gatekeeper(), &presented, Permission::Write)?;
    let restored = state.engine.records().restore(&key, version).await?;
    Ok(Json(json!({ "key": key, "version": version, "restored": restored })))
}

// ============================================================================
// Relationships
// ============================================================================

pub async fn link_handler(
    State(state): State<Arc<AppState>>,
    Path(parent): Path<String>,
    presented: Presented,
    Json(request): Json<LinkRequest>,
) -> ApiResult<Value> {
    admit(state.engine.gatekeeper(), &presented, Permission::Write)?;
    let linked = state
        .engine
        .graph()
        .link(&parent, &request.child, &request.kind, request.attributes)
        .await?;
    Ok(Json(json!({
        "parent": parent,
        "child": request.child,
        "type": request.kind,
        "linked": linked,
    })))
}

pub async fn relationships_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    presented: Presented,
) -> ApiResult<Relationships> {
    admit(state.engine.gatekeeper(), &presented, Permission::Read)?;
    let relationships = state.engine.graph().relationships(&key);
    if relationships.parents.is_empty()
        && relationships.children.is_empty()
        && !state.engine.records().exists(&key).await?
    {
        return Err(TesseraError::NotFound(key).into());
    }
    Ok(Json(relationships))
}

pub async fn thread_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    presented: Presented,
) -> ApiResult<ThreadResponse> {
    admit(state.engine.gatekeeper(), &presented, Permission::Read)?;
    let thread = state.engine.graph().thread(&key).await?;
    Ok(Json(ThreadResponse { key, thread }))
}

// ============================================================================
// Search
// ============================================================================

pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    presented: Presented,
    Json(request): Json<SearchRequest>,
) -> ApiResult<SearchResponse> {
    admit(state.engine.gatekeeper(), &presented, Permission::Read)?;
    let results = state.engine.search().search(&request).await?;
    Ok(Json(SearchResponse {
        count: results.len(),
        results,
    }))
}

// ============================================================================
// Backups
// ============================================================================

pub async fn create_backup_handler(
    State(state): State<Arc<AppState>>,
    presented: Presented,
    Json(request): Json<CreateBackupRequest>,
) -> ApiResult<BackupManifest> {
    admit(state.engine.gatekeeper(), &presented, Permission::Write)?;
    Ok(Json(
        state.engine.backups().create(&request.backup_type).await?,
    ))
}

pub async fn list_backups_handler(
    State(state): State<Arc<AppState>>,
    presented: Presented,
) -> ApiResult<Vec<BackupManifest>> {
    admit(state.engine.gatekeeper(), &presented, Permission::Read)?;
    Ok(Json(state.engine.backups().list().await?))
}

pub async fn restore_backup_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    presented: Presented,
) -> ApiResult<Value> {
    let caller = admit(state.engine.gatekeeper(), &presented, Permission::Admin)?;
    let restored = state.engine.backups().restore(&name).await?;
    tracing::info!(backup = %name, client = %caller, "Restore requested over HTTP");
    Ok(Json(json!({ "name": name, "restored": restored })))
}

pub async fn prune_backups_handler(
    State(state): State<Arc<AppState>>,
    presented: Presented,
    Json(request): Json<PruneRequest>,
) -> ApiResult<PruneReport> {
    admit(state.engine.gatekeeper(), &presented, Permission::Admin)?;
    let days = request
        .retention_days
        .unwrap_or(state.engine.config().backup.retention_days);
    Ok(Json(state.engine.backups().prune(days).await?))
}

// ============================================================================
// API keys
// ============================================================================

pub async fn issue_key_handler(
    State(state): State<Arc<AppState>>,
    presented: Presented,
    Json(request): Json<IssueKeyRequest>,
) -> ApiResult<ApiKey> {
    admit(state.engine.gatekeeper(), &presented, Permission::Admin)?;
    let ttl = match request.ttl_days {
        Some(days) => Some(
            Duration::try_days(days)
                .ok_or_else(|| ApiError::bad_request("ttl_days is out of range"))?,
        ),
        None => None,
    };
    let key = state
        .engine
        .gatekeeper()
        .issue_key(&request.owner, ttl, request.permissions)
        .await?;
    Ok(Json(key))
}

pub async fn list_keys_handler(
    State(state): State<Arc<AppState>>,
    presented: Presented,
) -> ApiResult<Vec<KeyInfo>> {
    admit(state.engine.gatekeeper(), &presented, Permission::Admin)?;
    Ok(Json(state.engine.gatekeeper().list_keys()))
}

pub async fn revoke_key_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    presented: Presented,
) -> ApiResult<Value> {
    admit(state.engine.gatekeeper(), &presented, Permission::Admin)?;
    if !state.engine.gatekeeper().revoke_key(&key).await? {
        return Err(TesseraError::NotFound("API key".to_string()).into());
    }
    Ok(Json(json!({ "revoked": true })))
}
