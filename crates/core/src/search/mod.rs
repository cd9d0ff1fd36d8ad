//! Web-search augmentation for career-guidance turns.
//!
//! [`policy`] decides whether a message needs fresh information and rewrites it
//! into a targeted query; [`TieredSearch`] runs that query against the official
//! custom-search provider first and falls back to the general search API.

pub mod google_cse;
pub mod policy;
pub mod serpapi;

pub use google_cse::GoogleCustomSearch;
pub use policy::{build_query, should_search};
pub use serpapi::SerpApi;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use std::sync::Arc;

/// Minimum number of primary-provider results needed to skip the fallback.
pub const PRIMARY_MIN_RESULTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub link: String,
    /// Originating provider or sub-feature, e.g. "Google Answer Box".
    pub source: String,
}

/// Which tier produced a [`SearchOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSource {
    CustomSearch,
    SerpApi,
    Unavailable,
}

impl SearchSource {
    pub fn label(self) -> &'static str {
        match self {
            SearchSource::CustomSearch => "Google Custom Search",
            SearchSource::SerpApi => "SerpApi",
            SearchSource::Unavailable => "Search unavailable",
        }
    }
}

impl Serialize for SearchSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub source: SearchSource,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {0}")]
    Status(u16),
}

/// A single external search backend.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError>;

    /// Short provider name used in logs.
    fn name(&self) -> &'static str;
}

/// Primary/secondary provider chain. Never returns an error: a failing
/// provider counts as a provider with zero results.
pub struct TieredSearch {
    primary: Arc<dyn SearchProvider>,
    secondary: Arc<dyn SearchProvider>,
}

impl TieredSearch {
    pub fn new(primary: Arc<dyn SearchProvider>, secondary: Arc<dyn SearchProvider>) -> Self {
        Self { primary, secondary }
    }

    pub async fn search(&self, query: &str, limit: usize) -> SearchOutcome {
        tracing::info!(query = %query, limit, "Running tiered web search");

        let primary = Self::query_provider(self.primary.as_ref(), query, limit).await;
        if primary.len() >= PRIMARY_MIN_RESULTS {
            tracing::info!(results = primary.len(), provider = self.primary.name(), "Primary search succeeded");
            return SearchOutcome {
                results: primary,
                source: SearchSource::CustomSearch,
            };
        }

        tracing::debug!(
            results = primary.len(),
            "Primary search insufficient, falling back to {}",
            self.secondary.name()
        );
        let secondary = Self::query_provider(self.secondary.as_ref(), query, limit).await;
        if !secondary.is_empty() {
            tracing::info!(results = secondary.len(), provider = self.secondary.name(), "Fallback search succeeded");
            return SearchOutcome {
                results: secondary,
                source: SearchSource::SerpApi,
            };
        }

        tracing::warn!(query = %query, "All search providers returned nothing");
        SearchOutcome {
            results: Vec::new(),
            source: SearchSource::Unavailable,
        }
    }

    async fn query_provider(
        provider: &dyn SearchProvider,
        query: &str,
        limit: usize,
    ) -> Vec<SearchResult> {
        match provider.search(query, limit).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(provider = provider.name(), error = %e, "Search provider failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(title: &str) -> SearchResult {
        SearchResult {
            title: title.to_string(),
            snippet: format!("{title} snippet"),
            link: String::new(),
            source: "test".to_string(),
        }
    }

    fn provider_returning(results: Vec<SearchResult>, calls: usize) -> MockSearchProvider {
        let mut mock = MockSearchProvider::new();
        mock.expect_search()
            .times(calls)
            .returning(move |_, _| Ok(results.clone()));
        mock.expect_name().return_const("mock");
        mock
    }

    #[tokio::test]
    async fn test_primary_with_two_results_skips_secondary() {
        // --- Arrange ---
        let primary = provider_returning(vec![result("a"), result("b")], 1);
        let secondary = provider_returning(vec![result("never")], 0);
        let search = TieredSearch::new(Arc::new(primary), Arc::new(secondary));

        // --- Act ---
        let outcome = search.search("jee dates", 6).await;

        // --- Assert ---
        assert_eq!(outcome.source, SearchSource::CustomSearch);
        assert_eq!(outcome.results.len(), 2);
    }

    #[tokio::test]
    async fn test_single_primary_result_falls_back() {
        let primary = provider_returning(vec![result("only")], 1);
        let secondary = provider_returning(vec![result("s1"), result("s2"), result("s3")], 1);
        let search = TieredSearch::new(Arc::new(primary), Arc::new(secondary));

        let outcome = search.search("neet", 6).await;

        assert_eq!(outcome.source, SearchSource::SerpApi);
        assert_eq!(outcome.results[0].title, "s1");
        assert_eq!(outcome.results.len(), 3);
    }

    #[tokio::test]
    async fn test_provider_errors_degrade_to_unavailable() {
        let mut primary = MockSearchProvider::new();
        primary
            .expect_search()
            .times(1)
            .returning(|_, _| Err(SearchError::NotConfigured("Google Custom Search")));
        primary.expect_name().return_const("primary");
        let mut secondary = MockSearchProvider::new();
        secondary
            .expect_search()
            .times(1)
            .returning(|_, _| Err(SearchError::Status(503)));
        secondary.expect_name().return_const("secondary");
        let search = TieredSearch::new(Arc::new(primary), Arc::new(secondary));

        let outcome = search.search("cutoff", 6).await;

        assert_eq!(outcome.source, SearchSource::Unavailable);
        assert!(outcome.results.is_empty());
    }

    #[test]
    fn test_source_labels() {
        assert_eq!(SearchSource::CustomSearch.label(), "Google Custom Search");
        assert_eq!(SearchSource::SerpApi.label(), "SerpApi");
        assert_eq!(
            serde_json::to_value(SearchSource::Unavailable).unwrap(),
            serde_json::json!("Search unavailable")
        );
    }
}
