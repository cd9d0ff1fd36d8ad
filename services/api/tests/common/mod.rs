//! Common test utilities.

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use mitra_api::server::{self, AppState, ServiceInfo};
use mitra_core::crisis::{CrisisLog, RuleClassifier};
use mitra_core::live::{LiveConnector, LiveDownlink, LiveUplink};
use mitra_core::llm::{FunctionDeclaration, Generation, Generator};
use mitra_core::prompt::SystemPrompts;
use mitra_core::search::{SearchError, SearchProvider, SearchResult, TieredSearch};
use mitra_core::speech::{SpeechSynthesizer, VoiceParams};
use mitra_core::{Backends, SessionStore, TurnOrchestrator, TurnSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub const CANNED_REPLY: &str = "Take a slow breath. I'm here to listen.";

/// Echoes a fixed reply, or the first search snippet when the prompt has one.
struct CannedGenerator;

#[async_trait]
impl Generator for CannedGenerator {
    async fn generate(&self, prompt: &str, _tools: &[FunctionDeclaration]) -> anyhow::Result<Generation> {
        let reply = prompt
            .lines()
            .find_map(|line| line.strip_prefix("Content: "))
            .map(|snippet| format!("I searched the web. {snippet}"))
            .unwrap_or_else(|| CANNED_REPLY.to_string());
        Ok(Generation::text(reply))
    }
}

struct FakeSpeech;

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(&self, _text: &str, _voice: &VoiceParams) -> anyhow::Result<Vec<u8>> {
        Ok(b"mp3".to_vec())
    }
}

struct FixedProvider(Vec<SearchResult>);

#[async_trait]
impl SearchProvider for FixedProvider {
    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        Ok(self.0.iter().take(limit).cloned().collect())
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

struct UnavailableLive;

#[async_trait]
impl LiveConnector for UnavailableLive {
    async fn connect(
        &self,
        _setup: serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<(Box<dyn LiveUplink>, Box<dyn LiveDownlink>)> {
        anyhow::bail!("live backend disabled in tests")
    }
}

fn official_results() -> Vec<SearchResult> {
    vec![
        SearchResult {
            title: "JEE Main 2025 Information Bulletin".to_string(),
            snippet: "JEE Main 2025 Session 1 will be held from 22 to 31 January 2025.".to_string(),
            link: "https://jeemain.nta.ac.in".to_string(),
            source: "Official Education Sites".to_string(),
        },
        SearchResult {
            title: "JEE Main 2025 Session 2".to_string(),
            snippet: "Session 2 is scheduled for the first week of April 2025.".to_string(),
            link: "https://jeemain.nta.ac.in".to_string(),
            source: "Official Education Sites".to_string(),
        },
        SearchResult {
            title: "NTA notices".to_string(),
            snippet: "Public notices issued by the National Testing Agency.".to_string(),
            link: "https://nta.ac.in".to_string(),
            source: "Official Education Sites".to_string(),
        },
    ]
}

pub struct TestApp {
    pub router: Router,
    pub crisis_log: PathBuf,
    _dir: TempDir,
}

/// Create a test app with in-process fakes for every backend.
pub fn test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let crisis_log = dir.path().join("logs").join("crisis_log.jsonl");

    let backends = Backends {
        generator: Arc::new(CannedGenerator),
        classifier: Arc::new(RuleClassifier),
        synthesizer: Arc::new(FakeSpeech),
        search: Arc::new(TieredSearch::new(
            Arc::new(FixedProvider(official_results())),
            Arc::new(FixedProvider(Vec::new())),
        )),
    };
    let orchestrator = TurnOrchestrator::new(
        Arc::new(SessionStore::new()),
        SystemPrompts::default(),
        backends,
        CrisisLog::new(crisis_log.clone()),
        TurnSettings::default(),
    );

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        live: Arc::new(UnavailableLive),
        info: Arc::new(ServiceInfo {
            model: "test-model".to_string(),
            serpapi_configured: false,
            google_cse_configured: true,
        }),
    };

    TestApp {
        router: server::build_app(state),
        crisis_log,
        _dir: dir,
    }
}

/// A form-encoded `POST /chat`.
pub fn chat_request(form: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
