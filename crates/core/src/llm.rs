use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// A function the model may call instead of answering in free text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: &'static str,
    pub description: &'static str,
}

/// A structured call emitted by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// What the generation backend produced for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub text: Option<String>,
    /// Function call found in the first content part of the first candidate.
    pub function_call: Option<FunctionCall>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            function_call: None,
        }
    }

    pub fn call(name: impl Into<String>) -> Self {
        Self {
            text: None,
            function_call: Some(FunctionCall {
                name: name.into(),
                args: serde_json::Value::Null,
            }),
        }
    }
}

// The `Generator` trait is the seam between turn orchestration and the
// language model. The orchestrator and the crisis classifier only depend on
// this trait, so tests can drive them with `MockGenerator` and deployments can
// point them at any backend.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Generator: Send + Sync {
    /// Sends `prompt` as a single user turn. When `tools` is non-empty the
    /// model may answer with a function call instead of text.
    async fn generate(&self, prompt: &str, tools: &[FunctionDeclaration]) -> Result<Generation>;
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
}

#[derive(Debug, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub text: Option<String>,
    pub function_call: Option<FunctionCall>,
}

impl From<GenerateContentResponse> for Generation {
    fn from(response: GenerateContentResponse) -> Self {
        let parts = response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts)
            .unwrap_or_default();

        let function_call = parts.first().and_then(|part| part.function_call.clone());
        let text: String = parts.into_iter().filter_map(|part| part.text).collect();

        Self {
            text: (!text.is_empty()).then_some(text),
            function_call,
        }
    }
}

/// Gemini `generateContent` over REST.
pub struct GeminiGenerator {
    client: Client,
    api_key: SecretString,
    model: String,
}

impl GeminiGenerator {
    pub fn new(client: Client, api_key: SecretString, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }

    fn request_body(prompt: &str, tools: &[FunctionDeclaration]) -> serde_json::Value {
        let mut body = json!({
            "contents": [
                { "role": "user", "parts": [ { "text": prompt } ] }
            ]
        });

        // Parameterless declarations carry no `parameters` key: an empty
        // OBJECT schema is rejected by the API.
        if !tools.is_empty() {
            body["tools"] = json!([{ "functionDeclarations": tools }]);
        }

        body
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, prompt: &str, tools: &[FunctionDeclaration]) -> Result<Generation> {
        let url = format!("{GEMINI_BASE_URL}/models/{}:generateContent", self.model);
        let body = Self::request_body(prompt, tools);

        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.expose_secret())])
            .json(&body)
            .send()
            .await
            .context("Failed to reach the generation backend")?
            .error_for_status()
            .context("Generation backend returned an error status")?
            .json::<GenerateContentResponse>()
            .await
            .context("Failed to parse generation response")?;

        Ok(Generation::from(resp))
    }
}
