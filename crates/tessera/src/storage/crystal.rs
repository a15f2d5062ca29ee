//! Crystal tier: write-once storage for immutable records
//!
//! Records are signed when written and the signature is checked on every
//! read. A second write to the same key, a delete, or a read whose content
//! no longer matches its signature is refused.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{Result, TesseraError};
use crate::record::types::Record;
use crate::storage::disk::DiskTier;
use crate::storage::tier::{EntryTimes, TierStorage};

/// SHA-256 over the key, a NUL separator and the content, as lowercase hex
pub fn sign(key: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Check a record against its stored signature
pub fn verify(record: &Record) -> Result<()> {
    let actual = sign(&record.key, &record.content);
    match record.signature.as_deref() {
        Some(expected) if expected == actual => Ok(()),
        expected => Err(TesseraError::IntegrityViolation {
            key: record.key.clone(),
            expected: expected.unwrap_or("<missing>").to_string(),
            actual,
        }),
    }
}

#[derive(Debug)]
pub struct CrystalTier {
    inner: DiskTier,
}

impl CrystalTier {
    pub async fn open(name: &str, dir: &Path, capacity: Option<usize>) -> Result<Self> {
        Ok(Self {
            inner: DiskTier::open(name, dir, capacity).await?,
        })
    }

    pub fn disk(&self) -> &DiskTier {
        &self.inner
    }

    fn verified(record: Option<Record>) -> Result<Option<Record>> {
        match record {
            Some(record) => {
                verify(&record)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TierStorage for CrystalTier {
    async fn store(&self, mut record: Record) -> Result<Option<Record>> {
        record.immutable = true;
        record.signature = Some(sign(&record.key, &record.content));

        if !self.inner.store_new(&record).await? {
            return Err(TesseraError::ImmutableConflict(record.key));
        }
        tracing::debug!(key = %record.key, tier = %self.inner.name(), "Crystallized record");
        Ok(None)
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Record>> {
        Self::verified(self.inner.retrieve(key).await?)
    }

    async fn peek(&self, key: &str) -> Result<Option<Record>> {
        Self::verified(self.inner.peek(key).await?)
    }

    /// Access metadata is not covered by the signature, so it may change
    async fn touch(&self, record: &Record) -> Result<()> {
        self.inner.touch(record).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        if self.inner.exists(key).await? {
            return Err(TesseraError::ImmutableConflict(key.to_string()));
        }
        Ok(false)
    }

    async fn clear(&self) -> Result<()> {
        if self.inner.is_empty() {
            return Ok(());
        }
        Err(TesseraError::ImmutableConflict(format!(
            "tier '{}' holds immutable records",
            self.inner.name()
        )))
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    fn entry_times(&self) -> Vec<EntryTimes> {
        self.inner.entry_times()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_tier(dir: &Path) -> CrystalTier {
        CrystalTier::open("crystal", &dir.join("crystal"), None)
            .await
            .unwrap()
    }

    #[test]
    fn test_signature_is_stable_and_key_bound() {
        let a = sign("doc-1", "constitution");
        assert_eq!(a, sign("doc-1", "constitution"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, sign("doc-2", "constitution"));
        // The separator keeps key/content boundaries distinct
        assert_ne!(sign("ab", "c"), sign("a", "bc"));
    }

    #[tokio::test]
    async fn test_store_signs_and_verifies() {
        let temp_dir = tempfile::tempdir().unwrap();
        let tier = open_tier(temp_dir.path()).await;

        tier.store(Record::new("doc-1", "constitution")).await.unwrap();
        let got = tier.retrieve("doc-1").await.unwrap().unwrap();
        assert!(got.immutable);
        assert_eq!(got.signature, Some(sign("doc-1", "constitution")));
    }

    #[tokio::test]
    async fn test_second_write_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let tier = open_tier(temp_dir.path()).await;
        tier.store(Record::new("doc-1", "v1")).await.unwrap();

        let err = tier.store(Record::new("doc-1", "v2")).await.unwrap_err();
        assert!(matches!(err, TesseraError::ImmutableConflict(_)));
        assert_eq!(tier.peek("doc-1").await.unwrap().unwrap().content, "v1");
    }

    #[tokio::test]
    async fn test_delete_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let tier = open_tier(temp_dir.path()).await;
        tier.store(Record::new("doc-1", "v1")).await.unwrap();

        assert!(matches!(
            tier.delete("doc-1").await,
            Err(TesseraError::ImmutableConflict(_))
        ));
        assert!(!tier.delete("missing").await.unwrap());
        assert!(tier.exists("doc-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_tampered_content_fails_verification() {
        let temp_dir = tempfile::tempdir().unwrap();
        let tier = open_tier(temp_dir.path()).await;
        tier.store(Record::new("doc-1", "original")).await.unwrap();

        std::fs::write(tier.disk().data_path("doc-1"), "forged").unwrap();

        let err = tier.retrieve("doc-1").await.unwrap_err();
        match err {
            TesseraError::IntegrityViolation { key, expected, actual } => {
                assert_eq!(key, "doc-1");
                assert_eq!(expected, sign("doc-1", "original"));
                assert_eq!(actual, sign("doc-1", "forged"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_tier_refuses_instead_of_evicting() {
        let temp_dir = tempfile::tempdir().unwrap();
        let tier = CrystalTier::open("crystal", &temp_dir.path().join("c"), Some(1))
            .await
            .unwrap();
        tier.store(Record::new("a", "1")).await.unwrap();

        let err = tier.store(Record::new("b", "2")).await.unwrap_err();
        assert!(matches!(err, TesseraError::Storage(_)));
        assert!(tier.exists("a").await.unwrap());
        assert!(!tier.exists("b").await.unwrap());
    }
}
