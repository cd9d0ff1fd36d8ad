use anyhow::{Context, Result};
use clap::Parser;
use mitra_api::config::Config;
use mitra_api::gemini_adapter::GeminiLiveConnector;
use mitra_api::prompt_loader;
use mitra_api::server::{self, AppState, ServiceInfo};
use mitra_core::crisis::{CrisisLog, build_classifier};
use mitra_core::llm::{GeminiGenerator, Generator};
use mitra_core::search::{GoogleCustomSearch, SerpApi, TieredSearch};
use mitra_core::speech::GoogleTts;
use mitra_core::{Backends, SessionStore, TurnOrchestrator, TurnSettings};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Mitra conversational support service")]
struct Cli {
    /// Address to listen on; overrides BIND_ADDRESS
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Directory of `*.md` system prompt overrides; overrides PROMPTS_DIR
    #[arg(long)]
    prompts_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let cli = Cli::parse();
    let mut config = Config::from_env().context("Failed to load application configuration")?;
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if let Some(prompts_dir) = cli.prompts_dir {
        config.prompts_dir = prompts_dir;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();
    tracing::info!("Configuration loaded successfully. Starting Mitra service...");

    // --- 3. Load Prompts ---
    let prompts = prompt_loader::system_prompts(&config.prompts_dir).context("Failed to load system prompts")?;
    tracing::info!("Loaded {} system prompts.", prompts.len());

    // --- 4. Initialize Backend Clients ---
    let http = reqwest::Client::new();
    let generator: Arc<dyn Generator> = Arc::new(GeminiGenerator::new(
        http.clone(),
        config.gemini_api_key.clone(),
        config.model_name.clone(),
    ));
    let custom_search = GoogleCustomSearch::new(http.clone(), config.google_cse_credentials());
    let serpapi = SerpApi::new(http.clone(), config.serpapi_key.clone());
    let info = ServiceInfo {
        model: config.model_name.clone(),
        serpapi_configured: serpapi.is_configured(),
        google_cse_configured: custom_search.is_configured(),
    };
    tracing::info!(
        classifier = ?config.classifier,
        google_cse = info.google_cse_configured,
        serpapi = info.serpapi_configured,
        "Backends configured"
    );

    let backends = Backends {
        classifier: build_classifier(config.classifier, generator.clone()),
        generator,
        synthesizer: Arc::new(GoogleTts::new(http.clone(), config.tts_api_key.clone())),
        search: Arc::new(TieredSearch::new(Arc::new(custom_search), Arc::new(serpapi))),
    };

    // --- 5. Session State ---
    let store = Arc::new(SessionStore::new());
    if let Some(ttl) = config.session_idle_ttl {
        tracing::info!(ttl_secs = ttl.as_secs(), "Idle session eviction enabled");
        store.clone().spawn_eviction(ttl / 2, ttl);
    }

    let orchestrator = TurnOrchestrator::new(
        store,
        prompts,
        backends,
        CrisisLog::new(config.crisis_log.clone()),
        TurnSettings {
            history_window: config.history_window,
            turn_timeout: config.turn_timeout,
            ..TurnSettings::default()
        },
    );

    // --- 6. Serve ---
    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        live: Arc::new(GeminiLiveConnector::new(
            config.gemini_api_key.clone(),
            config.live_model.clone(),
        )),
        info: Arc::new(info),
    };
    let app = server::build_app(state);

    tracing::info!("Starting server, listening on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    axum::serve(listener, app).await?;

    Ok(())
}
