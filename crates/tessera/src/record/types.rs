//! Record types for the Tessera store
//!
//! Defines the live record, its on-disk metadata form, version snapshots
//! and the options/outcome pair used by `put`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// A single record stored in Tessera.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Stable identifier, kept across updates of the same key
    pub id: Uuid,
    /// Owning key, unique per logical entity
    pub key: String,
    /// The record content
    pub content: String,
    /// Optional human-readable title (searched alongside content)
    #[serde(default)]
    pub title: Option<String>,
    /// Tag set
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Free-form string attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Write-once record living in the crystal tier
    #[serde(default)]
    pub immutable: bool,
    /// Name of the tier currently holding the authoritative copy
    pub tier: String,
    /// When the key was first stored
    pub created_at: DateTime<Utc>,
    /// When the content last changed
    pub updated_at: DateTime<Utc>,
    /// When this record was last read
    pub last_accessed: DateTime<Utc>,
    /// How many times this record has been read
    pub access_count: u64,
    /// Content signature (immutable records only)
    #[serde(default)]
    pub signature: Option<String>,
}

impl Record {
    /// Create a new mutable record with default metadata
    pub fn new(key: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            content: content.into(),
            title: None,
            tags: BTreeSet::new(),
            attributes: BTreeMap::new(),
            immutable: false,
            tier: String::new(),
            created_at: now,
            updated_at: now,
            last_accessed: now,
            access_count: 0,
            signature: None,
        }
    }

    /// Mark this record as accessed, updating access count and timestamp
    pub fn mark_accessed(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed = now;
    }

    /// Title, content and tags joined for text search
    pub fn search_text(&self) -> String {
        let mut text = String::new();
        if let Some(ref title) = self.title {
            text.push_str(title);
            text.push(' ');
        }
        text.push_str(&self.content);
        for tag in &self.tags {
            text.push(' ');
            text.push_str(tag);
        }
        text
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_accessed
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Everything about a record except its content; stored next to the
/// content file by persistent tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMeta {
    pub id: Uuid,
    pub key: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub immutable: bool,
    pub tier: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    #[serde(default)]
    pub signature: Option<String>,
}

impl RecordMeta {
    pub fn into_record(self, content: String) -> Record {
        Record {
            id: self.id,
            key: self.key,
            content,
            title: self.title,
            tags: self.tags,
            attributes: self.attributes,
            immutable: self.immutable,
            tier: self.tier,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_accessed: self.last_accessed,
            access_count: self.access_count,
            signature: self.signature,
        }
    }
}

impl From<&Record> for RecordMeta {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id,
            key: record.key.clone(),
            title: record.title.clone(),
            tags: record.tags.clone(),
            attributes: record.attributes.clone(),
            immutable: record.immutable,
            tier: record.tier.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            last_accessed: record.last_accessed,
            access_count: record.access_count,
            signature: record.signature.clone(),
        }
    }
}

/// Snapshot of a mutable record at a point in time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Version {
    pub key: String,
    /// Monotonically increasing per key, starting at 1
    pub number: u64,
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Human-readable description of the change that superseded this state
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

impl Version {
    pub fn capture(record: &Record, number: u64, summary: impl Into<String>) -> Self {
        Self {
            key: record.key.clone(),
            number,
            content: record.content.clone(),
            title: record.title.clone(),
            tags: record.tags.clone(),
            attributes: record.attributes.clone(),
            summary: summary.into(),
            created_at: Utc::now(),
        }
    }

    pub fn info(&self) -> VersionInfo {
        VersionInfo {
            number: self.number,
            summary: self.summary.clone(),
            created_at: self.created_at,
            size_bytes: self.content.len() as u64,
        }
    }
}

/// Version listing entry (no content)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionInfo {
    pub number: u64,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Options accepted by `RecordStore::put`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PutOptions {
    /// Store as a write-once record
    #[serde(default)]
    pub immutable: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Summary recorded on the version created by this update
    #[serde(default)]
    pub change_summary: Option<String>,
    /// Preferred tier for a mutable record
    #[serde(default)]
    pub tier: Option<String>,
}

impl PutOptions {
    pub fn immutable() -> Self {
        Self {
            immutable: true,
            ..Default::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.change_summary = Some(summary.into());
        self
    }

    pub fn in_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }
}

/// Result of a successful `put`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PutOutcome {
    pub record_id: Uuid,
    pub key: String,
    pub tier: String,
    /// Version number that captured the previous state, if any
    pub superseded_version: Option<u64>,
}
