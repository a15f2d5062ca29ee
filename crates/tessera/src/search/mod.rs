//! Read-only search over live records
//!
//! Four modes share the same facet filters and result limit:
//! 1. Substring: case-insensitive containment in title, content or tags,
//!    scored by occurrence count
//! 2. Fuzzy: similarity ratio between the query and the record text,
//!    kept above a threshold and ranked by score
//! 3. Regex: case-insensitive pattern over title and content, scored by
//!    match count
//! 4. Faceted: filters only, ordered by creation time
//!
//! No mode fails on zero matches; it returns an empty list.

pub mod filter;
pub mod similarity;

pub use filter::RecordFilter;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::config::SearchConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{Result, TesseraError};
use crate::record::{Record, RecordStore};

/// Compiled regex size cap
const REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Substring,
    Fuzzy,
    Regex,
    Faceted,
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SearchMode::Substring => "substring",
            SearchMode::Fuzzy => "fuzzy",
            SearchMode::Regex => "regex",
            SearchMode::Faceted => "faceted",
        };
        f.write_str(name)
    }
}

/// A search request as accepted by `POST /search`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub mode: SearchMode,
    #[serde(default)]
    pub filters: RecordFilter,
    /// Maximum results; the configured default when absent
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, mode: SearchMode) -> Self {
        Self {
            query: query.into(),
            mode,
            ..Default::default()
        }
    }

    pub fn with_filters(mut self, filters: RecordFilter) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One ranked result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub key: String,
    pub score: f64,
    pub record: Record,
}

enum Matcher {
    Substring(String),
    Fuzzy { query: String, threshold: f64 },
    Regex(regex::Regex),
    Faceted,
}

impl Matcher {
    fn build(request: &SearchRequest, config: &SearchConfig) -> Result<Self> {
        if request.mode != SearchMode::Faceted && request.query.is_empty() {
            return Err(TesseraError::InvalidQuery(format!(
                "{} search needs a non-empty query",
                request.mode
            )));
        }
        Ok(match request.mode {
            SearchMode::Substring => Matcher::Substring(request.query.to_lowercase()),
            SearchMode::Fuzzy => Matcher::Fuzzy {
                query: request.query.to_lowercase(),
                threshold: config.fuzzy_threshold,
            },
            SearchMode::Regex => {
                let re = RegexBuilder::new(&request.query)
                    .case_insensitive(true)
                    .size_limit(REGEX_SIZE_LIMIT)
                    .build()
                    .map_err(|e| TesseraError::InvalidQuery(e.to_string()))?;
                Matcher::Regex(re)
            }
            SearchMode::Faceted => Matcher::Faceted,
        })
    }

    /// Score a record, or `None` when it does not match
    fn score(&self, record: &Record) -> Option<f64> {
        match self {
            Matcher::Substring(needle) => {
                let count = record.search_text().to_lowercase().matches(needle.as_str()).count();
                (count > 0).then_some(count as f64)
            }
            Matcher::Fuzzy { query, threshold } => {
                let score = similarity::ratio(query, &record.search_text().to_lowercase());
                (score >= *threshold).then_some(score)
            }
            Matcher::Regex(re) => {
                let mut text = String::new();
                if let Some(ref title) = record.title {
                    text.push_str(title);
                    text.push('\n');
                }
                text.push_str(&record.content);
                let count = re.find_iter(&text).count();
                (count > 0).then_some(count as f64)
            }
            Matcher::Faceted => Some(0.0),
        }
    }
}

pub struct SearchEngine {
    records: Arc<RecordStore>,
    config: SearchConfig,
    diagnostics: Arc<Diagnostics>,
}

impl SearchEngine {
    pub fn new(records: Arc<RecordStore>, config: SearchConfig, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            records,
            config,
            diagnostics,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let timer = self.diagnostics.start("search");
        timer.observe(self.run(request).await)
    }

    async fn run(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let matcher = Matcher::build(request, &self.config)?;
        let limit = request.limit.unwrap_or(self.config.default_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .records
            .scan()
            .await?
            .into_iter()
            .filter(|record| request.filters.matches(record))
            .filter_map(|record| {
                matcher.score(&record).map(|score| SearchHit {
                    key: record.key.clone(),
                    score,
                    record,
                })
            })
            .collect();

        if request.mode == SearchMode::Faceted {
            hits.sort_by(|a, b| {
                a.record
                    .created_at
                    .cmp(&b.record.created_at)
                    .then_with(|| a.key.cmp(&b.key))
            });
        } else {
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.key.cmp(&b.key))
            });
        }
        hits.truncate(limit);

        tracing::debug!(
            mode = %request.mode,
            query = %request.query,
            results = hits.len(),
            "Search complete"
        );
        Ok(hits)
    }
}
