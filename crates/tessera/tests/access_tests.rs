//! Integration tests for the access gatekeeper

use chrono::{Duration, Utc};
use std::collections::BTreeSet;
use tempfile::tempdir;

use tessera_server::TesseraError;
use tessera_server::access::{AccessRequest, Permission};
use tessera_server::testing::{auth_config, open_engine};

const ORIGIN: &str = "192.0.2.10";

fn write_request(api_key: Option<&str>) -> AccessRequest<'_> {
    AccessRequest {
        origin: Some(ORIGIN),
        api_key,
        permission: Permission::Write,
        require_key: true,
    }
}

mod rate_limit_tests {
    use super::*;

    #[tokio::test]
    async fn test_sliding_window() {
        let dir = tempdir().unwrap();
        let engine = open_engine(&auth_config(dir.path(), 5)).await.unwrap();
        let gk = engine.gatekeeper();
        let start = Utc::now();

        for _ in 0..5 {
            assert!(gk.check_rate_at("client-a", 5, start));
        }
        assert!(!gk.check_rate_at("client-a", 5, start));
        assert!(gk.check_rate_at("client-b", 5, start));

        assert!(!gk.check_rate_at("client-a", 5, start + Duration::seconds(59)));
        assert!(gk.check_rate_at("client-a", 5, start + Duration::seconds(61)));
    }

    #[tokio::test]
    async fn test_rejected_calls_do_not_extend_the_window() {
        let dir = tempdir().unwrap();
        let engine = open_engine(&auth_config(dir.path(), 1)).await.unwrap();
        let gk = engine.gatekeeper();
        let start = Utc::now();

        assert!(gk.check_rate_at("c", 1, start));
        for s in 1..30 {
            assert!(!gk.check_rate_at("c", 1, start + Duration::seconds(s)));
        }
        // A stamp exactly 60 seconds old still counts
        assert!(!gk.check_rate_at("c", 1, start + Duration::seconds(60)));
        assert!(gk.check_rate_at("c", 1, start + Duration::seconds(61)));
    }
}

mod key_tests {
    use super::*;

    #[tokio::test]
    async fn test_keys_survive_restart() {
        let dir = tempdir().unwrap();
        let config = auth_config(dir.path(), 10);

        let issued = {
            let engine = open_engine(&config).await.unwrap();
            engine
                .gatekeeper()
                .issue_key("ops", None, Some(BTreeSet::from([Permission::Admin])))
                .await
                .unwrap()
        };

        let engine = open_engine(&config).await.unwrap();
        let gk = engine.gatekeeper();
        assert!(gk.validate(&issued.key));
        let key = gk.authorize(Some(&issued.key), Permission::Write).unwrap();
        assert_eq!(key.owner, "ops");
    }

    #[tokio::test]
    async fn test_default_ttl_comes_from_config() {
        let dir = tempdir().unwrap();
        let mut config = auth_config(dir.path(), 10);
        config.auth.key_ttl_days = 2;
        let engine = open_engine(&config).await.unwrap();

        let key = engine.gatekeeper().issue_key("short", None, None).await.unwrap();
        assert_eq!(key.expires_at - key.created_at, Duration::days(2));
        assert!(!engine.gatekeeper().validate_at(&key.key, key.created_at + Duration::days(2)));
    }

    #[tokio::test]
    async fn test_revoked_key_is_refused() {
        let dir = tempdir().unwrap();
        let engine = open_engine(&auth_config(dir.path(), 10)).await.unwrap();
        let gk = engine.gatekeeper();

        let key = gk.issue_key("temp", None, None).await.unwrap();
        assert!(gk.admit(write_request(Some(&key.key))).is_ok());
        assert!(gk.revoke_key(&key.key).await.unwrap());

        assert!(matches!(
            gk.admit(write_request(Some(&key.key))),
            Err(TesseraError::Unauthorized(_))
        ));
        assert!(!gk.revoke_key(&key.key).await.unwrap());
    }

    #[tokio::test]
    async fn test_blank_owner_is_rejected() {
        let dir = tempdir().unwrap();
        let engine = open_engine(&auth_config(dir.path(), 10)).await.unwrap();
        assert!(engine.gatekeeper().issue_key("  ", None, None).await.is_err());
        assert!(engine.gatekeeper().list_keys().is_empty());
    }
}

mod blocking_tests {
    use super::*;

    #[tokio::test]
    async fn test_block_after_threshold() {
        let dir = tempdir().unwrap();
        let engine = open_engine(&auth_config(dir.path(), 100)).await.unwrap();
        let gk = engine.gatekeeper();
        let key = gk.issue_key("tester", None, None).await.unwrap();

        for _ in 0..3 {
            assert!(matches!(
                gk.admit(write_request(None)),
                Err(TesseraError::Unauthorized(_))
            ));
        }
        assert!(!gk.is_blocked(ORIGIN));

        assert!(gk.admit(write_request(Some("tsk_bad"))).is_err());
        assert!(gk.is_blocked(ORIGIN));
        assert_eq!(gk.failures(ORIGIN), 4);
        assert_eq!(gk.failures("tester"), 0);

        // A valid key from the blocked origin no longer helps
        assert!(matches!(
            gk.admit(write_request(Some(&key.key))),
            Err(TesseraError::Blocked(_))
        ));
    }

    #[tokio::test]
    async fn test_open_reads_skip_key_check() {
        let dir = tempdir().unwrap();
        let engine = open_engine(&auth_config(dir.path(), 100)).await.unwrap();
        let gk = engine.gatekeeper();

        let (client, key) = gk
            .admit(AccessRequest {
                origin: None,
                api_key: None,
                permission: Permission::Read,
                require_key: false,
            })
            .unwrap();
        assert_eq!(client, "anonymous");
        assert!(key.is_none());
        assert_eq!(gk.failures("anonymous"), 0);
    }

    #[tokio::test]
    async fn test_valid_key_is_rate_limited_by_owner_not_origin() {
        let dir = tempdir().unwrap();
        let engine = open_engine(&auth_config(dir.path(), 2)).await.unwrap();
        let gk = engine.gatekeeper();
        let key = gk.issue_key("shared", None, None).await.unwrap();

        for origin in ["198.51.100.1", "198.51.100.2"] {
            let (client, _) = gk
                .admit(AccessRequest {
                    origin: Some(origin),
                    api_key: Some(&key.key),
                    permission: Permission::Write,
                    require_key: true,
                })
                .unwrap();
            assert_eq!(client, "shared");
        }

        // Moving to a third address does not reset the owner's budget
        assert!(matches!(
            gk.admit(AccessRequest {
                origin: Some("198.51.100.3"),
                api_key: Some(&key.key),
                permission: Permission::Write,
                require_key: true,
            }),
            Err(TesseraError::RateLimited(_))
        ));
    }
}
