use super::{SearchError, SearchProvider, SearchResult};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

const ENDPOINT: &str = "https://serpapi.com/search";
const TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Default, Deserialize)]
pub struct SerpApiResponse {
    pub answer_box: Option<AnswerBox>,
    pub knowledge_graph: Option<KnowledgeGraph>,
    #[serde(default)]
    pub organic_results: Vec<OrganicResult>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnswerBox {
    pub title: Option<String>,
    pub answer: Option<String>,
    pub snippet: Option<String>,
    pub result: Option<String>,
    pub link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct KnowledgeGraph {
    pub title: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrganicResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub link: String,
}

/// General Google results through SerpApi.
pub struct SerpApi {
    client: reqwest::Client,
    api_key: Option<SecretString>,
}

impl SerpApi {
    pub fn new(client: reqwest::Client, api_key: Option<SecretString>) -> Self {
        Self { client, api_key }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Flattens a SerpApi payload: answer box first, then the knowledge graph,
/// then organic results, truncated to `limit`.
pub fn parse_results(response: SerpApiResponse, limit: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();

    if let Some(answer) = response.answer_box {
        let text = non_empty(answer.answer)
            .or_else(|| non_empty(answer.snippet))
            .or_else(|| non_empty(answer.result));
        if let Some(snippet) = text {
            results.push(SearchResult {
                title: format!(
                    "Direct Answer: {}",
                    answer.title.as_deref().unwrap_or("Quick Answer")
                ),
                snippet,
                link: answer.link.unwrap_or_default(),
                source: "Google Answer Box".to_string(),
            });
        }
    }

    if let Some(graph) = response.knowledge_graph {
        if let Some(description) = non_empty(graph.description) {
            results.push(SearchResult {
                title: format!(
                    "Knowledge: {}",
                    graph.title.as_deref().unwrap_or("Information")
                ),
                snippet: description,
                link: graph.website.unwrap_or_default(),
                source: "Google Knowledge Graph".to_string(),
            });
        }
    }

    results.extend(
        response
            .organic_results
            .into_iter()
            .filter(|item| !item.title.is_empty() && !item.snippet.is_empty())
            .map(|item| SearchResult {
                title: item.title,
                snippet: item.snippet,
                link: item.link,
                source: "Google Search".to_string(),
            }),
    );

    results.truncate(limit);
    results
}

#[async_trait]
impl SearchProvider for SerpApi {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(SearchError::NotConfigured("SerpApi"))?;

        let num = limit.to_string();
        let response = self
            .client
            .get(ENDPOINT)
            .timeout(TIMEOUT)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("api_key", api_key.expose_secret()),
                ("num", num.as_str()),
                ("gl", "in"),
                ("hl", "en"),
                ("safe", "active"),
            ])
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(status = %status, "SerpApi responded");
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }

        let body: SerpApiResponse = response.json().await?;
        Ok(parse_results(body, limit))
    }

    fn name(&self) -> &'static str {
        "serpapi"
    }
}
