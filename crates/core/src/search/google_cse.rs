use super::{SearchError, SearchProvider, SearchResult};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

const ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
const TIMEOUT: Duration = Duration::from_secs(10);
/// Restricts results to official education and exam portals.
const OFFICIAL_SITES: &str = "site:nta.ac.in OR site:josaa.nic.in OR site:mhrd.gov.in OR site:ugc.ac.in";
const MIN_SNIPPET_CHARS: usize = 50;
const MAX_RESULTS: usize = 10;
const SOURCE: &str = "Official Education Sites";

#[derive(Debug, Default, Deserialize)]
pub struct CustomSearchResponse {
    #[serde(default)]
    pub items: Vec<CustomSearchItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CustomSearchItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub link: String,
}

/// Google Custom Search JSON API restricted to official domains.
pub struct GoogleCustomSearch {
    client: reqwest::Client,
    credentials: Option<(SecretString, String)>,
}

impl GoogleCustomSearch {
    /// `credentials` is the API key and the search engine id; without them every
    /// search fails with [`SearchError::NotConfigured`].
    pub fn new(client: reqwest::Client, credentials: Option<(SecretString, String)>) -> Self {
        Self {
            client,
            credentials,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }
}

/// Keeps items with a title and a snippet long enough to carry real content.
pub fn parse_results(response: CustomSearchResponse) -> Vec<SearchResult> {
    response
        .items
        .into_iter()
        .filter(|item| {
            !item.title.is_empty()
                && !item.snippet.is_empty()
                && item.snippet.chars().count() > MIN_SNIPPET_CHARS
        })
        .map(|item| SearchResult {
            title: item.title,
            snippet: item.snippet,
            link: item.link,
            source: SOURCE.to_string(),
        })
        .collect()
}

#[async_trait]
impl SearchProvider for GoogleCustomSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        let (api_key, engine_id) = self
            .credentials
            .as_ref()
            .ok_or(SearchError::NotConfigured("Google Custom Search"))?;

        let restricted = format!("{query} {OFFICIAL_SITES}");
        let num = limit.min(MAX_RESULTS).to_string();
        let response = self
            .client
            .get(ENDPOINT)
            .timeout(TIMEOUT)
            .query(&[
                ("key", api_key.expose_secret()),
                ("cx", engine_id.as_str()),
                ("q", restricted.as_str()),
                ("num", num.as_str()),
                ("gl", "in"),
                ("hl", "en"),
                ("safe", "medium"),
                ("dateRestrict", "y1"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }

        let body: CustomSearchResponse = response.json().await?;
        let results = parse_results(body);
        tracing::debug!(results = results.len(), "Google Custom Search parsed");
        Ok(results)
    }

    fn name(&self) -> &'static str {
        "google_cse"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_results_filters_short_snippets() {
        let payload = serde_json::json!({
            "items": [
                {
                    "title": "JEE Main 2025 Information Bulletin",
                    "snippet": "The National Testing Agency will conduct JEE Main 2025 in two sessions in January and April.",
                    "link": "https://jeemain.nta.ac.in"
                },
                { "title": "Too short", "snippet": "Short snippet.", "link": "https://nta.ac.in" },
                { "title": "", "snippet": "An item without a title is dropped even when its snippet is long enough.", "link": "" }
            ]
        });
        let response: CustomSearchResponse = serde_json::from_value(payload).unwrap();

        let results = parse_results(response);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "JEE Main 2025 Information Bulletin");
        assert_eq!(results[0].source, "Official Education Sites");
        assert_eq!(results[0].link, "https://jeemain.nta.ac.in");
    }

    #[test]
    fn test_parse_results_without_items() {
        let response: CustomSearchResponse = serde_json::from_str("{}").unwrap();
        assert!(parse_results(response).is_empty());
    }

    #[tokio::test]
    async fn test_missing_credentials_is_not_configured() {
        let provider = GoogleCustomSearch::new(reqwest::Client::new(), None);
        assert!(!provider.is_configured());

        let err = provider.search("jee", 5).await.unwrap_err();
        assert!(matches!(err, SearchError::NotConfigured(_)));
    }
}
