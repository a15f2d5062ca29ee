//! Access gatekeeper
//!
//! Issues and validates API keys, enforces a per-client sliding-window
//! request budget and blocks origins that fail authentication too often.
//! Keys persist to `<root>/auth/keys.json`; rate windows and failure
//! counts live in memory only.
//!
//! Identities come from things a caller cannot pick freely: failures and
//! blocks are keyed by the network origin, the rate budget by the owner of
//! a valid key (or the origin when there is none).

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{Result, TesseraError};
use crate::storage::disk::write_atomic;

pub const AUTH_DIR: &str = "auth";
pub const KEYS_FILE: &str = "keys.json";
pub const KEY_PREFIX: &str = "tsk_";
/// Origin used when the transport cannot name the peer
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// Length of the sliding rate-limit window
pub fn rate_window() -> Duration {
    Duration::seconds(60)
}

/// Failure counts below the block threshold are forgotten after this long
/// without a new failure
pub fn failure_idle() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Admin,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Admin => "admin",
        })
    }
}

impl std::str::FromStr for Permission {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "admin" => Ok(Permission::Admin),
            other => Err(TesseraError::Config(format!("unknown permission '{other}'"))),
        }
    }
}

/// Permissions granted when the caller does not name any
pub fn default_permissions() -> BTreeSet<Permission> {
    [Permission::Read, Permission::Write].into_iter().collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub permissions: BTreeSet<Permission>,
}

impl ApiKey {
    /// Valid strictly before expiry
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Admin implies every other permission
    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission) || self.permissions.contains(&Permission::Admin)
    }
}

/// Key listing entry with the secret shortened
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key_prefix: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub permissions: BTreeSet<Permission>,
    pub expired: bool,
}

/// What a caller presented, as seen by the transport layer
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    /// Network origin (peer IP) reported by the transport
    pub origin: Option<&'a str>,
    pub api_key: Option<&'a str>,
    pub permission: Permission,
    /// Whether this operation needs a key at all
    pub require_key: bool,
}

#[derive(Debug, Clone, Copy)]
struct FailureCount {
    count: u32,
    last: DateTime<Utc>,
}

/// Entries dropped by one `cleanup_stale` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StaleCleanup {
    pub windows: usize,
    pub failures: usize,
}

pub struct Gatekeeper {
    path: PathBuf,
    config: AuthConfig,
    keys: RwLock<HashMap<String, ApiKey>>,
    windows: DashMap<String, VecDeque<DateTime<Utc>>>,
    failures: DashMap<String, FailureCount>,
    persist: tokio::sync::Mutex<()>,
    diagnostics: Arc<Diagnostics>,
}

impl Gatekeeper {
    pub async fn open(root: &Path, config: AuthConfig, diagnostics: Arc<Diagnostics>) -> Result<Self> {
        let dir = root.join(AUTH_DIR);
        tokio::fs::create_dir_all(&dir).await?;

        diagnostics.set_capability(
            "auth",
            config.enabled,
            if config.enabled {
                format!(
                    "API keys required, {} requests per minute per client",
                    config.rate_limit_per_minute
                )
            } else {
                "API keys not checked".to_string()
            },
        );

        let gatekeeper = Self {
            path: dir.join(KEYS_FILE),
            config,
            keys: RwLock::new(HashMap::new()),
            windows: DashMap::new(),
            failures: DashMap::new(),
            persist: tokio::sync::Mutex::new(()),
            diagnostics,
        };
        gatekeeper.reload().await?;
        Ok(gatekeeper)
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Re-read issued keys from disk
    pub async fn reload(&self) -> Result<()> {
        let keys: Vec<ApiKey> = match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let has_admin = keys.iter().any(|k| k.allows(Permission::Admin));
        if self.config.enabled && !has_admin {
            tracing::warn!("No admin API key issued; use `tessera-cli keys issue --admin` to create one");
        }

        *self.keys.write() = keys.into_iter().map(|k| (k.key.clone(), k)).collect();
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let _persist = self.persist.lock().await;
        let bytes = {
            let keys = self.keys.read();
            let mut list: Vec<&ApiKey> = keys.values().collect();
            list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
            serde_json::to_vec_pretty(&list)?
        };
        write_atomic(&self.path, &bytes).await
    }

    /// Issue a new key for `owner`. `ttl` defaults to the configured key
    /// lifetime, `permissions` to read + write.
    pub async fn issue_key(
        &self,
        owner: &str,
        ttl: Option<Duration>,
        permissions: Option<BTreeSet<Permission>>,
    ) -> Result<ApiKey> {
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(TesseraError::InvalidKey("owner must not be empty".into()));
        }
        let ttl = match ttl {
            Some(ttl) => ttl,
            None => i64::try_from(self.config.key_ttl_days)
                .ok()
                .and_then(Duration::try_days)
                .ok_or_else(|| TesseraError::Config("auth.key_ttl_days is too large".into()))?,
        };
        if ttl <= Duration::zero() {
            return Err(TesseraError::InvalidKey("ttl must be positive".into()));
        }

        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| TesseraError::InvalidKey("ttl is too large".into()))?;
        let api_key = ApiKey {
            key: format!("{KEY_PREFIX}{}", Uuid::new_v4().simple()),
            owner: owner.to_string(),
            created_at: now,
            expires_at,
            permissions: permissions
                .filter(|p| !p.is_empty())
                .unwrap_or_else(default_permissions),
        };

        self.keys.write().insert(api_key.key.clone(), api_key.clone());
        self.save().await?;

        tracing::info!(
            owner = %api_key.owner,
            expires_at = %api_key.expires_at,
            "Issued API key"
        );
        Ok(api_key)
    }

    pub fn validate(&self, key: &str) -> bool {
        self.validate_at(key, Utc::now())
    }

    pub fn validate_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.keys
            .read()
            .get(key)
            .is_some_and(|k| k.is_valid_at(now))
    }

    /// Resolve a presented key to its record, checking expiry and permission
    pub fn authorize(&self, key: Option<&str>, permission: Permission) -> Result<ApiKey> {
        self.authorize_at(key, permission, Utc::now())
    }

    pub fn authorize_at(
        &self,
        key: Option<&str>,
        permission: Permission,
        now: DateTime<Utc>,
    ) -> Result<ApiKey> {
        let key = key.ok_or_else(|| TesseraError::Unauthorized("missing API key".into()))?;
        let api_key = self
            .keys
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| TesseraError::Unauthorized("unknown API key".into()))?;
        if !api_key.is_valid_at(now) {
            return Err(TesseraError::Unauthorized("API key expired".into()));
        }
        if !api_key.allows(permission) {
            return Err(TesseraError::Unauthorized(format!(
                "API key lacks '{permission}' permission"
            )));
        }
        Ok(api_key)
    }

    pub async fn revoke_key(&self, key: &str) -> Result<bool> {
        let removed = self.keys.write().remove(key);
        match removed {
            Some(api_key) => {
                self.save().await?;
                tracing::info!(owner = %api_key.owner, "Revoked API key");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn list_keys(&self) -> Vec<KeyInfo> {
        let now = Utc::now();
        let mut infos: Vec<KeyInfo> = self
            .keys
            .read()
            .values()
            .map(|k| KeyInfo {
                key_prefix: format!("{}...", k.key.chars().take(12).collect::<String>()),
                owner: k.owner.clone(),
                created_at: k.created_at,
                expires_at: k.expires_at,
                permissions: k.permissions.clone(),
                expired: !k.is_valid_at(now),
            })
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Admit one call from `client_id` if fewer than `limit` calls were
    /// admitted in the last 60 seconds. A rejected call is not recorded.
    pub fn check_rate(&self, client_id: &str, limit: usize) -> bool {
        self.check_rate_at(client_id, limit, Utc::now())
    }

    pub fn check_rate_at(&self, client_id: &str, limit: usize, now: DateTime<Utc>) -> bool {
        let window = rate_window();
        let mut stamps = self.windows.entry(client_id.to_string()).or_default();
        while stamps.front().is_some_and(|&t| now - t > window) {
            stamps.pop_front();
        }
        if stamps.len() >= limit {
            return false;
        }
        stamps.push_back(now);
        true
    }

    /// Count an authentication failure; returns the new total
    pub fn record_failure(&self, client_id: &str) -> u32 {
        self.record_failure_at(client_id, Utc::now())
    }

    pub fn record_failure_at(&self, client_id: &str, now: DateTime<Utc>) -> u32 {
        let mut entry = self
            .failures
            .entry(client_id.to_string())
            .or_insert(FailureCount { count: 0, last: now });
        entry.count = entry.count.saturating_add(1);
        entry.last = now;
        if entry.count == self.config.failure_threshold.saturating_add(1) {
            tracing::warn!(client = %client_id, failures = entry.count, "Client blocked");
        }
        entry.count
    }

    pub fn failures(&self, client_id: &str) -> u32 {
        self.failures.get(client_id).map(|f| f.count).unwrap_or(0)
    }

    /// True once recorded failures exceed the threshold
    pub fn is_blocked(&self, client_id: &str) -> bool {
        self.failures(client_id) > self.config.failure_threshold
    }

    /// Clients with a rate window or failure count in memory
    pub fn tracked_clients(&self) -> (usize, usize) {
        (self.windows.len(), self.failures.len())
    }

    /// Drop rate windows with nothing inside the last 60 seconds and
    /// failure counts below the threshold idle for `max_idle`. Blocked
    /// clients are kept.
    pub fn cleanup_stale(&self, now: DateTime<Utc>, max_idle: Duration) -> StaleCleanup {
        let window = rate_window();
        let (windows_before, failures_before) = self.tracked_clients();

        self.windows
            .retain(|_, stamps| stamps.back().is_some_and(|&t| now - t <= window));
        let threshold = self.config.failure_threshold;
        self.failures
            .retain(|_, f| f.count > threshold || now - f.last < max_idle);

        let (windows_after, failures_after) = self.tracked_clients();
        let cleanup = StaleCleanup {
            windows: windows_before.saturating_sub(windows_after),
            failures: failures_before.saturating_sub(failures_after),
        };
        if cleanup != StaleCleanup::default() {
            tracing::debug!(
                windows = cleanup.windows,
                failures = cleanup.failures,
                "Dropped stale client state"
            );
        }
        cleanup
    }

    /// Gate one request: a blocked origin first, then the key (when
    /// required and auth is enabled), then the rate limit. Returns the
    /// rate-limit identity and the resolved key.
    pub fn admit(&self, request: AccessRequest<'_>) -> Result<(String, Option<ApiKey>)> {
        let now = Utc::now();
        let origin = request.origin.unwrap_or(ANONYMOUS_CLIENT);

        if self.is_blocked(origin) {
            self.diagnostics.record("rejected_blocked", std::time::Duration::ZERO, false);
            return Err(TesseraError::Blocked(format!(
                "client '{origin}' exceeded the authentication failure limit"
            )));
        }

        let api_key = if self.config.enabled && request.require_key {
            match self.authorize_at(request.api_key, request.permission, now) {
                Ok(key) => Some(key),
                Err(e) => {
                    self.record_failure_at(origin, now);
                    tracing::debug!(client = %origin, "Rejected request: {e}");
                    return Err(e);
                }
            }
        } else {
            request.api_key.and_then(|k| {
                let keys = self.keys.read();
                keys.get(k).filter(|k| k.is_valid_at(now)).cloned()
            })
        };

        let client_id = api_key
            .as_ref()
            .map(|k| k.owner.clone())
            .unwrap_or_else(|| origin.to_string());

        if !self.check_rate_at(&client_id, self.config.rate_limit_per_minute, now) {
            self.diagnostics.record("rejected_rate", std::time::Duration::ZERO, false);
            return Err(TesseraError::RateLimited(format!(
                "client '{client_id}' exceeded {} requests per minute",
                self.config.rate_limit_per_minute
            )));
        }

        Ok((client_id, api_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn gatekeeper(dir: &Path, config: AuthConfig) -> Gatekeeper {
        Gatekeeper::open(dir, config, Arc::new(Diagnostics::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_issued_key_shape_and_validity() {
        let temp_dir = tempfile::tempdir().unwrap();
        let gk = gatekeeper(temp_dir.path(), AuthConfig::default()).await;

        let key = gk.issue_key("alice", Some(Duration::hours(1)), None).await.unwrap();
        assert!(key.key.starts_with(KEY_PREFIX));
        assert_eq!(key.key.len(), KEY_PREFIX.len() + 32);
        assert_eq!(key.permissions, default_permissions());
        assert!(gk.validate(&key.key));
        assert!(!gk.validate("tsk_nope"));
    }

    #[tokio::test]
    async fn test_key_valid_strictly_before_expiry() {
        let temp_dir = tempfile::tempdir().unwrap();
        let gk = gatekeeper(temp_dir.path(), AuthConfig::default()).await;
        let key = gk.issue_key("bob", Some(Duration::minutes(5)), None).await.unwrap();

        assert!(gk.validate_at(&key.key, key.expires_at - Duration::milliseconds(1)));
        assert!(!gk.validate_at(&key.key, key.expires_at));
        assert!(matches!(
            gk.authorize_at(Some(&key.key), Permission::Read, key.expires_at),
            Err(TesseraError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_permissions() {
        let temp_dir = tempfile::tempdir().unwrap();
        let gk = gatekeeper(temp_dir.path(), AuthConfig::default()).await;
        let reader = gk
            .issue_key("r", None, Some([Permission::Read].into_iter().collect()))
            .await
            .unwrap();
        let admin = gk
            .issue_key("a", None, Some([Permission::Admin].into_iter().collect()))
            .await
            .unwrap();

        assert!(gk.authorize(Some(&reader.key), Permission::Read).is_ok());
        assert!(gk.authorize(Some(&reader.key), Permission::Write).is_err());
        assert!(gk.authorize(Some(&admin.key), Permission::Write).is_ok());
        assert!(gk.authorize(None, Permission::Read).is_err());
    }

    #[tokio::test]
    async fn test_rejects_bad_issue_arguments() {
        let temp_dir = tempfile::tempdir().unwrap();
        let gk = gatekeeper(temp_dir.path(), AuthConfig::default()).await;
        assert!(gk.issue_key("  ", None, None).await.is_err());
        assert!(gk.issue_key("x", Some(Duration::zero()), None).await.is_err());
    }

    #[tokio::test]
    async fn test_keys_persist_and_revoke() {
        let temp_dir = tempfile::tempdir().unwrap();
        let key = {
            let gk = gatekeeper(temp_dir.path(), AuthConfig::default()).await;
            gk.issue_key("carol", None, None).await.unwrap()
        };

        let gk = gatekeeper(temp_dir.path(), AuthConfig::default()).await;
        assert!(gk.validate(&key.key));
        assert_eq!(gk.list_keys().len(), 1);
        assert!(gk.list_keys()[0].key_prefix.ends_with("..."));

        assert!(gk.revoke_key(&key.key).await.unwrap());
        assert!(!gk.revoke_key(&key.key).await.unwrap());
        assert!(!gk.validate(&key.key));
    }

    #[tokio::test]
    async fn test_sliding_window() {
        let temp_dir = tempfile::tempdir().unwrap();
        let gk = gatekeeper(temp_dir.path(), AuthConfig::default()).await;
        let start = Utc::now();

        for i in 0..3 {
            assert!(gk.check_rate_at("c", 3, start + Duration::seconds(i)));
        }
        assert!(!gk.check_rate_at("c", 3, start + Duration::seconds(10)));
        // Other clients have their own window
        assert!(gk.check_rate_at("d", 3, start + Duration::seconds(10)));
        // The rejected call was not recorded, so the window frees at +60s
        assert!(gk.check_rate_at("c", 3, start + Duration::seconds(61)));
    }

    #[tokio::test]
    async fn test_blocking_after_threshold() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = AuthConfig {
            failure_threshold: 3,
            ..AuthConfig::default()
        };
        let gk = gatekeeper(temp_dir.path(), config).await;

        for _ in 0..3 {
            gk.record_failure("mallory");
        }
        assert!(!gk.is_blocked("mallory"));
        gk.record_failure("mallory");
        assert!(gk.is_blocked("mallory"));
        assert!(!gk.is_blocked("someone-else"));
    }

    #[tokio::test]
    async fn test_admit_order() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = AuthConfig {
            failure_threshold: 1,
            rate_limit_per_minute: 2,
            ..AuthConfig::default()
        };
        let gk = gatekeeper(temp_dir.path(), config).await;
        let key = gk.issue_key("dave", None, None).await.unwrap();

        let request = |api_key| AccessRequest {
            origin: None,
            api_key,
            permission: Permission::Write,
            require_key: true,
        };

        let (client, _) = gk.admit(request(Some(key.key.as_str()))).unwrap();
        assert_eq!(client, "dave");
        gk.admit(request(Some(key.key.as_str()))).unwrap();
        assert!(matches!(
            gk.admit(request(Some(key.key.as_str()))),
            Err(TesseraError::RateLimited(_))
        ));

        // Two bad attempts from anonymous exceed a threshold of one
        assert!(matches!(gk.admit(request(None)), Err(TesseraError::Unauthorized(_))));
        assert!(matches!(gk.admit(request(None)), Err(TesseraError::Unauthorized(_))));
        assert!(matches!(gk.admit(request(None)), Err(TesseraError::Blocked(_))));
    }

    #[tokio::test]
    async fn test_disabled_auth_skips_key_check() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = AuthConfig {
            enabled: false,
            ..AuthConfig::default()
        };
        let gk = gatekeeper(temp_dir.path(), config).await;
        let (client, key) = gk
            .admit(AccessRequest {
                origin: Some("10.0.0.9"),
                api_key: None,
                permission: Permission::Admin,
                require_key: true,
            })
            .unwrap();
        assert_eq!(client, "10.0.0.9");
        assert!(key.is_none());
    }

    #[tokio::test]
    async fn test_window_keeps_stamp_exactly_sixty_seconds_old() {
        let temp_dir = tempfile::tempdir().unwrap();
        let gk = gatekeeper(temp_dir.path(), AuthConfig::default()).await;
        let start = Utc::now();

        assert!(gk.check_rate_at("c", 1, start));
        assert!(!gk.check_rate_at("c", 1, start + Duration::seconds(60)));
        assert!(gk.check_rate_at("c", 1, start + Duration::seconds(60) + Duration::milliseconds(1)));
    }

    #[tokio::test]
    async fn test_cleanup_stale_drops_idle_clients() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = AuthConfig {
            failure_threshold: 2,
            ..AuthConfig::default()
        };
        let gk = gatekeeper(temp_dir.path(), config).await;
        let start = Utc::now();

        gk.check_rate_at("old", 10, start);
        gk.check_rate_at("fresh", 10, start + Duration::seconds(50));
        gk.record_failure_at("slip", start);
        for _ in 0..3 {
            gk.record_failure_at("mallory", start);
        }

        let later = start + Duration::seconds(90);
        let cleanup = gk.cleanup_stale(later, Duration::seconds(60));
        assert_eq!(cleanup, StaleCleanup { windows: 1, failures: 1 });
        assert_eq!(gk.tracked_clients(), (1, 1));
        assert_eq!(gk.failures("slip"), 0);
        assert!(gk.is_blocked("mallory"));

        // A budget that was cleaned up starts from empty
        assert!(gk.check_rate_at("old", 1, later));
    }
}
