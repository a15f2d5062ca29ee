//! Facet filters for record search
//!
//! Every condition is optional; the ones that are set are combined with
//! AND logic and applied in every search mode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::record::types::Record;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// Records must carry every one of these tags
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Only records created at or after this time
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Only records created at or before this time
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    /// Attribute name -> required value
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Restrict to immutable (`true`) or mutable (`false`) records
    #[serde(default)]
    pub immutable: Option<bool>,
}

impl RecordFilter {
    /// Create a new empty filter (no filtering applied)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Filter by creation time lower bound
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Filter by creation time upper bound
    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn immutable_only(mut self, immutable: bool) -> Self {
        self.immutable = Some(immutable);
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        if !self.tags.is_subset(&record.tags) {
            return false;
        }
        if self.since.is_some_and(|since| record.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| record.created_at > until) {
            return false;
        }
        if self.immutable.is_some_and(|flag| record.immutable != flag) {
            return false;
        }
        self.attributes
            .iter()
            .all(|(name, value)| record.attributes.get(name) == Some(value))
    }

    /// Check if this filter is empty (no conditions set)
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
            && self.since.is_none()
            && self.until.is_none()
            && self.attributes.is_empty()
            && self.immutable.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn tagged(key: &str, tags: &[&str]) -> Record {
        let mut record = Record::new(key, "content");
        record.tags = tags.iter().map(|t| t.to_string()).collect();
        record
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = RecordFilter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&Record::new("k", "c")));
    }

    #[test]
    fn test_tags_are_conjunctive() {
        let filter = RecordFilter::new().with_tag("rust").with_tag("async");
        assert!(filter.matches(&tagged("a", &["rust", "async", "tokio"])));
        assert!(!filter.matches(&tagged("b", &["rust"])));
    }

    #[test]
    fn test_date_range() {
        let created = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut record = Record::new("k", "c");
        record.created_at = created;

        assert!(RecordFilter::new().since(created).matches(&record));
        assert!(RecordFilter::new().until(created).matches(&record));
        assert!(!RecordFilter::new()
            .since(created + Duration::seconds(1))
            .matches(&record));
        assert!(!RecordFilter::new()
            .until(created - Duration::days(1))
            .matches(&record));
    }

    #[test]
    fn test_attribute_equality() {
        let mut record = Record::new("k", "c");
        record.attributes.insert("lang".into(), "en".into());

        assert!(RecordFilter::new().with_attribute("lang", "en").matches(&record));
        assert!(!RecordFilter::new().with_attribute("lang", "de").matches(&record));
        assert!(!RecordFilter::new().with_attribute("author", "x").matches(&record));
    }

    #[test]
    fn test_immutable_flag() {
        let mut record = Record::new("k", "c");
        record.immutable = true;
        assert!(RecordFilter::new().immutable_only(true).matches(&record));
        assert!(!RecordFilter::new().immutable_only(false).matches(&record));
    }

    #[test]
    fn test_deserializes_with_missing_fields() {
        let filter: RecordFilter = serde_json::from_str(r#"{"tags": ["a"]}"#).unwrap();
        assert_eq!(filter, RecordFilter::new().with_tag("a"));
    }
}
