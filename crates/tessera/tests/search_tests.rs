//! Integration tests for search over live records

use tempfile::tempdir;

use tessera_server::Engine;
use tessera_server::TesseraError;
use tessera_server::record::PutOptions;
use tessera_server::search::{RecordFilter, SearchMode, SearchRequest};
use tessera_server::testing::{open_engine, small_config};

async fn seeded(dir: &std::path::Path) -> Engine {
    let engine = open_engine(&small_config(dir)).await.unwrap();
    let records = engine.records();
    records
        .put(
            "colour",
            "colour",
            PutOptions::default().with_tags(["style"]),
        )
        .await
        .unwrap();
    records
        .put(
            "guide",
            "Error handling: errors, more errors and error codes",
            PutOptions::default()
                .with_title("Errors")
                .with_attribute("lang", "rust"),
        )
        .await
        .unwrap();
    records
        .put(
            "intro",
            "An error appears once here",
            PutOptions::default().with_attribute("lang", "go"),
        )
        .await
        .unwrap();
    records
        .put("charter", "Project charter", PutOptions::immutable())
        .await
        .unwrap();
    engine
}

fn keys(hits: &[tessera_server::search::SearchHit]) -> Vec<&str> {
    hits.iter().map(|h| h.key.as_str()).collect()
}

mod mode_tests {
    use super::*;

    #[tokio::test]
    async fn test_substring_ranks_by_occurrences() {
        let dir = tempdir().unwrap();
        let engine = seeded(dir.path()).await;

        let hits = engine
            .search()
            .search(&SearchRequest::new("ERROR", SearchMode::Substring))
            .await
            .unwrap();
        assert_eq!(keys(&hits), vec!["guide", "intro"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_fuzzy_tolerates_spelling() {
        let dir = tempdir().unwrap();
        let engine = seeded(dir.path()).await;

        let hits = engine
            .search()
            .search(&SearchRequest::new("color style", SearchMode::Fuzzy))
            .await
            .unwrap();
        assert_eq!(keys(&hits), vec!["colour"]);
        assert!(hits[0].score >= 0.6);
    }

    #[tokio::test]
    async fn test_regex_counts_matches() {
        let dir = tempdir().unwrap();
        let engine = seeded(dir.path()).await;

        let hits = engine
            .search()
            .search(&SearchRequest::new(r"errors?\b", SearchMode::Regex))
            .await
            .unwrap();
        assert_eq!(keys(&hits), vec!["guide", "intro"]);

        let err = engine
            .search()
            .search(&SearchRequest::new("[", SearchMode::Regex))
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_no_matches_is_empty_not_error() {
        let dir = tempdir().unwrap();
        let engine = seeded(dir.path()).await;

        for mode in [SearchMode::Substring, SearchMode::Fuzzy, SearchMode::Regex] {
            let hits = engine
                .search()
                .search(&SearchRequest::new("zzzzqqqq", mode))
                .await
                .unwrap();
            assert!(hits.is_empty(), "{mode} returned {hits:?}");
        }
    }
}

mod filter_tests {
    use super::*;

    #[tokio::test]
    async fn test_faceted_filters_only() {
        let dir = tempdir().unwrap();
        let engine = seeded(dir.path()).await;

        let request = SearchRequest::new("", SearchMode::Faceted)
            .with_filters(RecordFilter::new().with_attribute("lang", "rust"));
        let hits = engine.search().search(&request).await.unwrap();
        assert_eq!(keys(&hits), vec!["guide"]);

        let request = SearchRequest::new("", SearchMode::Faceted)
            .with_filters(RecordFilter::new().immutable_only(true));
        let hits = engine.search().search(&request).await.unwrap();
        assert_eq!(keys(&hits), vec!["charter"]);
    }

    #[tokio::test]
    async fn test_faceted_orders_by_creation() {
        let dir = tempdir().unwrap();
        let engine = seeded(dir.path()).await;

        let hits = engine
            .search()
            .search(&SearchRequest::new("", SearchMode::Faceted))
            .await
            .unwrap();
        assert_eq!(keys(&hits), vec!["colour", "guide", "intro", "charter"]);
    }

    #[tokio::test]
    async fn test_limit_truncates() {
        let dir = tempdir().unwrap();
        let engine = seeded(dir.path()).await;

        let hits = engine
            .search()
            .search(&SearchRequest::new("", SearchMode::Faceted).with_limit(2))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        let hits = engine
            .search()
            .search(&SearchRequest::new("", SearchMode::Faceted).with_limit(0))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_records_are_not_found() {
        let dir = tempdir().unwrap();
        let engine = seeded(dir.path()).await;
        engine.delete("intro").await.unwrap();

        let hits = engine
            .search()
            .search(&SearchRequest::new("error", SearchMode::Substring))
            .await
            .unwrap();
        assert_eq!(keys(&hits), vec!["guide"]);
    }
}
