//! Per-turn controller.
//!
//! A turn runs strictly in order: session lookup, post-live check-in, search
//! augmentation (career mode) or crisis classification (everything else),
//! prompt assembly, generation, history update and reply packaging. The
//! session lock is held for the whole turn.

use crate::crisis::{
    CALM_TRANSITION_REPLY, CRISIS_RESPONSE, Classification, Classifier, CrisisLog, GENERATION_APOLOGY,
    POST_LIVE_CHECKIN,
};
use crate::llm::Generator;
use crate::prompt::{
    CAREER_PROMPT_KEY, DEFAULT_HISTORY_WINDOW, MENTAL_HEALTH_PROMPT_KEY, SystemPrompts, build_prompt,
    build_prompt_with_search_results, render_search_context, trim_history,
};
use crate::search::{SearchSource, TieredSearch, build_query, should_search};
use crate::session::{Mode, Session, SessionStore, Turn};
use crate::speech::{SpeechSynthesizer, VoiceParams};
use base64::{Engine, engine::general_purpose::STANDARD};
use futures::FutureExt;
use serde::{Deserialize, Deserializer, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

const ERROR_MESSAGE: &str = "I encountered an error processing your request. Please try again.";
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_SEARCH_LIMIT: usize = 6;

fn default_session_id() -> String {
    "default".to_string()
}

fn default_system_key() -> String {
    MENTAL_HEALTH_PROMPT_KEY.to_string()
}

/// Accepts booleans as well as the usual form spellings (`1`, `on`, `yes`, ...).
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    struct LenientBool;

    impl serde::de::Visitor<'_> for LenientBool {
        type Value = bool;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a boolean or one of true/false/1/0/on/off/yes/no")
        }

        fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<bool, E> {
            match v {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(E::invalid_value(serde::de::Unexpected::Unsigned(v), &self)),
            }
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<bool, E> {
            match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "on" | "yes" => Ok(true),
                "false" | "0" | "off" | "no" | "" => Ok(false),
                _ => Err(E::invalid_value(serde::de::Unexpected::Str(v), &self)),
            }
        }
    }

    deserializer.deserialize_any(LenientBool)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
    #[serde(default = "default_system_key")]
    pub system_key: String,
    #[serde(default)]
    pub context: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub career_suggest: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub post_live_session: bool,
}

impl TurnRequest {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: session_id.into(),
            system_key: default_system_key(),
            context: String::new(),
            career_suggest: false,
            post_live_session: false,
        }
    }

    pub fn career(mut self) -> Self {
        self.career_suggest = true;
        self
    }

    pub fn post_live(mut self) -> Self {
        self.post_live_session = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextReply {
    pub mode: Mode,
    pub reply: String,
    pub career_suggest_active: bool,
    pub search_performed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_source: Option<SearchSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceReply {
    pub mode: Mode,
    /// Base64-encoded MP3. Absent when synthesis failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    pub text_reply: String,
    pub career_suggest_active: bool,
    pub search_performed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_source: Option<SearchSource>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub crisis_detected: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub post_live_checkin: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub audio_unavailable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TurnResponse {
    Text(TextReply),
    Voice(VoiceReply),
}

impl TurnResponse {
    pub fn mode(&self) -> Mode {
        match self {
            TurnResponse::Text(reply) => reply.mode,
            TurnResponse::Voice(reply) => reply.mode,
        }
    }

    /// The reply text, whichever field carries it.
    pub fn text(&self) -> &str {
        match self {
            TurnResponse::Text(reply) => &reply.reply,
            TurnResponse::Voice(reply) => &reply.text_reply,
        }
    }
}

/// Body of the 500 response for a turn that panicked or timed out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReply {
    pub error: String,
    pub mode: Mode,
    pub career_suggest_active: bool,
    pub search_performed: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("turn did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("turn aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub history_window: usize,
    pub turn_timeout: Duration,
    pub search_limit: usize,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            history_window: DEFAULT_HISTORY_WINDOW,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

#[derive(Clone)]
pub struct Backends {
    pub generator: Arc<dyn Generator>,
    pub classifier: Arc<dyn Classifier>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub search: Arc<TieredSearch>,
}

pub struct TurnOrchestrator {
    store: Arc<SessionStore>,
    prompts: SystemPrompts,
    backends: Backends,
    crisis_log: CrisisLog,
    settings: TurnSettings,
    voice: VoiceParams,
}

/// Result of the search step of a career turn.
struct Augmentation {
    context: String,
    source: SearchSource,
}

impl TurnOrchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        prompts: SystemPrompts,
        backends: Backends,
        crisis_log: CrisisLog,
        settings: TurnSettings,
    ) -> Self {
        Self {
            store,
            prompts,
            backends,
            crisis_log,
            settings,
            voice: VoiceParams::default(),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn search(&self) -> &TieredSearch {
        &self.backends.search
    }

    /// Runs one turn. Never leaves the session locked: the guard is dropped on
    /// every path, including a panic or timeout inside the turn.
    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnResponse, ErrorReply> {
        let career = request.career_suggest;
        let session_id = request.session_id.clone();

        let handle = self.store.get_or_create(&session_id);
        let mut session = handle.lock().await;
        session.career_suggest_active = career;

        tracing::info!(
            session_id = %session_id,
            career,
            post_live = request.post_live_session,
            mode = ?session.mode,
            "Processing turn"
        );

        let turn = tokio::time::timeout(self.settings.turn_timeout, self.run_turn(&mut session, request));
        let error = match AssertUnwindSafe(turn).catch_unwind().await {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(_elapsed)) => TurnError::TimedOut(self.settings.turn_timeout),
            Err(payload) => TurnError::Aborted(panic_message(payload)),
        };

        tracing::error!(session_id = %session_id, error = %error, "Turn failed");
        Err(ErrorReply {
            error: ERROR_MESSAGE.to_string(),
            mode: Mode::Text,
            career_suggest_active: career,
            search_performed: false,
        })
    }

    async fn run_turn(&self, session: &mut Session, request: TurnRequest) -> TurnResponse {
        let career = request.career_suggest;

        if request.post_live_session {
            return self.post_live_checkin(session, career).await;
        }

        let needs_search = should_search(&request.message, career);
        let mut system_key = request.system_key.as_str();
        let mut augmentation = None;

        if career {
            system_key = CAREER_PROMPT_KEY;
            if needs_search {
                augmentation = Some(self.augment(&request.message).await);
            }
        } else {
            match self.backends.classifier.classify(&request.message).await {
                Classification::Crisis if session.mode == Mode::Text => {
                    return self.crisis(session, &request.message, career).await;
                }
                Classification::Calm if session.mode == Mode::VoiceAssistant => {
                    return Self::calm(session, career);
                }
                classification => {
                    tracing::debug!(?classification, mode = ?session.mode, "No mode transition");
                }
            }
        }

        let system_prompt = self.prompts.get_or_default(system_key);
        let history = trim_history(&session.history, self.settings.history_window);
        let prompt = match &augmentation {
            Some(aug) => build_prompt_with_search_results(system_prompt, &aug.context, history, &request.message),
            None => build_prompt(system_prompt, &request.context, history, &request.message),
        };
        tracing::debug!(chars = prompt.len(), history = history.len(), "Prompt assembled");

        let reply = self.generate_reply(&prompt).await;
        session.push_exchange(&request.message, &reply);

        let search_source = augmentation.map(|aug| aug.source);
        match session.mode {
            Mode::VoiceAssistant => {
                let audio = self.speak(&reply).await;
                TurnResponse::Voice(VoiceReply {
                    mode: Mode::VoiceAssistant,
                    audio_unavailable: audio.is_none(),
                    audio,
                    text_reply: reply,
                    career_suggest_active: career,
                    search_performed: needs_search,
                    search_source,
                    crisis_detected: false,
                    post_live_checkin: false,
                })
            }
            Mode::Text => TurnResponse::Text(TextReply {
                mode: Mode::Text,
                reply,
                career_suggest_active: career,
                search_performed: needs_search,
                search_source,
            }),
        }
    }

    async fn augment(&self, message: &str) -> Augmentation {
        let query = build_query(message);
        let outcome = self.backends.search.search(&query, self.settings.search_limit).await;
        tracing::info!(
            query = %query,
            results = outcome.results.len(),
            source = outcome.source.label(),
            "Search step finished"
        );
        Augmentation {
            context: render_search_context(&query, &outcome),
            source: outcome.source,
        }
    }

    async fn post_live_checkin(&self, session: &mut Session, career: bool) -> TurnResponse {
        session.mode = Mode::VoiceAssistant;
        let audio = self.speak(POST_LIVE_CHECKIN).await;
        session.history.push(Turn::assistant(POST_LIVE_CHECKIN));

        TurnResponse::Voice(VoiceReply {
            mode: Mode::VoiceAssistant,
            audio_unavailable: audio.is_none(),
            audio,
            text_reply: POST_LIVE_CHECKIN.to_string(),
            career_suggest_active: career,
            search_performed: false,
            search_source: None,
            crisis_detected: false,
            post_live_checkin: true,
        })
    }

    async fn crisis(&self, session: &mut Session, message: &str, career: bool) -> TurnResponse {
        tracing::warn!(session_id = %session.id, "Crisis detected, switching to voice assistant");
        self.crisis_log.record(&session.id, message).await;
        session.mode = Mode::VoiceAssistant;

        let audio = self.speak(CRISIS_RESPONSE).await;
        session.push_exchange(message, CRISIS_RESPONSE);

        TurnResponse::Voice(VoiceReply {
            mode: Mode::VoiceAssistant,
            audio_unavailable: audio.is_none(),
            audio,
            text_reply: CRISIS_RESPONSE.to_string(),
            career_suggest_active: career,
            search_performed: false,
            search_source: None,
            crisis_detected: true,
            post_live_checkin: false,
        })
    }

    fn calm(session: &mut Session, career: bool) -> TurnResponse {
        tracing::info!(session_id = %session.id, "User has calmed down, returning to text mode");
        session.mode = Mode::Text;
        session.history.push(Turn::assistant(CALM_TRANSITION_REPLY));

        TurnResponse::Text(TextReply {
            mode: Mode::Text,
            reply: CALM_TRANSITION_REPLY.to_string(),
            career_suggest_active: career,
            search_performed: false,
            search_source: None,
        })
    }

    async fn generate_reply(&self, prompt: &str) -> String {
        match self.backends.generator.generate(prompt, &[]).await {
            Ok(generation) => match generation.text.filter(|text| !text.trim().is_empty()) {
                Some(text) => {
                    tracing::info!(chars = text.len(), "Response generated");
                    text
                }
                None => {
                    tracing::warn!("Generation returned no text");
                    GENERATION_APOLOGY.to_string()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Generation failed");
                GENERATION_APOLOGY.to_string()
            }
        }
    }

    /// Synthesizes `text` to base64 audio. `None` when synthesis fails.
    async fn speak(&self, text: &str) -> Option<String> {
        match self.backends.synthesizer.synthesize(text, &self.voice).await {
            Ok(audio) => Some(STANDARD.encode(audio)),
            Err(e) => {
                tracing::warn!(error = %e, "Speech synthesis failed, replying with text only");
                None
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
