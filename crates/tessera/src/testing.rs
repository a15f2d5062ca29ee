//! Test utilities for tessera - small tier layouts and engine fixtures
//!
//! Integration tests open engines over a temporary directory with a
//! deliberately tiny tier set so eviction and promotion are easy to
//! trigger:
//!
//! | tier    | kind    | capacity | promote after | demote after |
//! |---------|---------|----------|---------------|--------------|
//! | hot     | memory  | 2        | -             | 60 s         |
//! | cold    | disk    | -        | 2             | -            |
//! | crystal | crystal | -        | -             | -            |

use std::path::{Path, PathBuf};

use crate::config::{Config, TierKind, TierSpec};
use crate::engine::Engine;
use crate::error::Result;

pub const HOT_CAPACITY: usize = 2;

fn tier(name: &str, kind: TierKind) -> TierSpec {
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

/// Three-tier config (hot/cold/crystal) rooted at `dir`, auth disabled
pub fn small_config(dir: &Path) -> Config {
    let mut config = Config::with_data_dir(dir);

    let mut hot = tier("hot", TierKind::Memory);
    hot.capacity = Some(HOT_CAPACITY);
    hot.demote_after_secs = Some(60);

    let mut cold = tier("cold", TierKind::Disk);
    cold.promote_after = Some(2);

    config.storage.tiers = vec![hot, cold, tier("crystal", TierKind::Crystal)];
    config.auth.enabled = false;
    config.maintenance.sweep_interval_secs = 0;
    config
}

/// `small_config` with API keys required and a small rate budget
pub fn auth_config(dir: &Path, rate_limit_per_minute: usize) -> Config {
    let mut config = small_config(dir);
    config.auth.enabled = true;
    config.auth.rate_limit_per_minute = rate_limit_per_minute;
    config.auth.failure_threshold = 3;
    config
}

pub async fn open_engine(config: &Config) -> Result<Engine> {
    Engine::open(config).await
}

/// Content file of `key` in the persistent tier `tier`
pub fn record_data_path(config: &Config, tier: &str, key: &str) -> PathBuf {
    config
        .storage
        .data_dir
        .join(tier)
        .join("records")
        .join(format!("{}.dat", urlencoding::encode(key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_config_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.tiers.len(), 3);
        assert!(!config.auth.enabled);
    }

    #[test]
    fn test_record_data_path_encodes_key() {
        let config = Config::with_data_dir("/data");
        assert_eq!(
            record_data_path(&config, "cold", "a/b"),
            PathBuf::from("/data/cold/records/a%2Fb.dat")
        );
    }
}
