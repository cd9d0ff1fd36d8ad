//! Crisis detection and the fixed texts of the safety path.
//!
//! A [`Classifier`] turns a user message into a [`Classification`]. It never
//! fails: backend errors and malformed responses classify as
//! [`Classification::None`] so the turn falls through to normal generation.

use crate::llm::{FunctionDeclaration, Generator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

pub const CRISIS_RESPONSE: &str = "I'm really Sorry That you are feeling that way. But I'm here with you right now. Would you like to talk with me through voice? Sometimes it helps to have a conversation when things feel overwhelming.";
pub const CALM_TRANSITION_REPLY: &str =
    "I'm glad to hear you're feeling better. We can continue our conversation through text.";
pub const POST_LIVE_CHECKIN: &str = "Are you feeling fine now? How was our live session together?";
pub const GENERATION_APOLOGY: &str =
    "I apologize, but I'm having trouble generating a response right now. Please try again.";

pub const CRISIS_FUNCTION: &str = "handle_crisis_situation";
pub const CALM_FUNCTION: &str = "handle_calm_situation";

pub const CRISIS_DECLARATIONS: [FunctionDeclaration; 2] = [
    FunctionDeclaration {
        name: CRISIS_FUNCTION,
        description: "Detects explicit expressions of self-harm, suicidal ideation, or other immediate, severe mental health distress.",
    },
    FunctionDeclaration {
        name: CALM_FUNCTION,
        description: "Detects when a user is expressing that they are feeling better or have calmed down.",
    },
];

const CRISIS_PHRASES: &[&str] = &[
    "kill myself",
    "end my life",
    "suicide",
    "suicidal",
    "want to die",
    "self harm",
    "self-harm",
    "hurt myself",
    "no reason to live",
    "better off dead",
];

const CALM_PHRASES: &[&str] = &[
    "feeling better",
    "feel better",
    "calmed down",
    "feeling calm",
    "i'm okay now",
    "i am okay now",
    "feeling fine",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    None,
    Crisis,
    Calm,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, message: &str) -> Classification;
}

/// Asks the generation backend to pick one of the two crisis functions.
pub struct ModelClassifier {
    generator: Arc<dyn Generator>,
}

impl ModelClassifier {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Classifier for ModelClassifier {
    async fn classify(&self, message: &str) -> Classification {
        let generation = match self.generator.generate(message, &CRISIS_DECLARATIONS).await {
            Ok(generation) => generation,
            Err(e) => {
                tracing::warn!(error = %e, "Crisis classification failed, continuing normally");
                return Classification::None;
            }
        };

        match generation.function_call.as_ref().map(|call| call.name.as_str()) {
            Some(CRISIS_FUNCTION) => Classification::Crisis,
            Some(CALM_FUNCTION) => Classification::Calm,
            Some(other) => {
                tracing::warn!(function = other, "Classifier returned an unknown function");
                Classification::None
            }
            None => Classification::None,
        }
    }
}

/// Phrase tables; crisis phrases are checked before calm ones.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleClassifier;

impl RuleClassifier {
    pub fn classify_message(message: &str) -> Classification {
        let lowered = message.to_lowercase();
        if CRISIS_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
            Classification::Crisis
        } else if CALM_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
            Classification::Calm
        } else {
            Classification::None
        }
    }
}

#[async_trait]
impl Classifier for RuleClassifier {
    async fn classify(&self, message: &str) -> Classification {
        Self::classify_message(message)
    }
}

/// A rule-table crisis match wins outright; everything else goes to the model.
pub struct HybridClassifier {
    model: ModelClassifier,
}

impl HybridClassifier {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            model: ModelClassifier::new(generator),
        }
    }
}

#[async_trait]
impl Classifier for HybridClassifier {
    async fn classify(&self, message: &str) -> Classification {
        if RuleClassifier::classify_message(message) == Classification::Crisis {
            tracing::debug!("Crisis phrase matched, skipping model classification");
            return Classification::Crisis;
        }
        self.model.classify(message).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassifierKind {
    #[default]
    Model,
    Rules,
    Hybrid,
}

impl FromStr for ClassifierKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "model" => Ok(Self::Model),
            "rules" => Ok(Self::Rules),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown classifier '{other}'")),
        }
    }
}

pub fn build_classifier(kind: ClassifierKind, generator: Arc<dyn Generator>) -> Arc<dyn Classifier> {
    match kind {
        ClassifierKind::Model => Arc::new(ModelClassifier::new(generator)),
        ClassifierKind::Rules => Arc::new(RuleClassifier),
        ClassifierKind::Hybrid => Arc::new(HybridClassifier::new(generator)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisLogEntry {
    pub session_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only JSONL record of crisis turns. Writes are best-effort.
#[derive(Debug, Clone)]
pub struct CrisisLog {
    path: PathBuf,
}

impl CrisisLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, session_id: &str, message: &str) {
        let entry = CrisisLogEntry {
            session_id: session_id.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.append(&entry).await {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write crisis log");
        }
    }

    async fn append(&self, entry: &CrisisLogEntry) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Generation, MockGenerator};
    use tempfile::tempdir;

    fn generator_calling(function: Option<&'static str>) -> MockGenerator {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .withf(|_, tools| tools.len() == 2)
            .times(1)
            .returning(move |_, _| {
                Ok(match function {
                    Some(name) => Generation::call(name),
                    None => Generation::text("just chatting"),
                })
            });
        generator
    }

    #[tokio::test]
    async fn test_model_classifier_maps_function_calls() {
        let crisis = ModelClassifier::new(Arc::new(generator_calling(Some(CRISIS_FUNCTION))));
        let calm = ModelClassifier::new(Arc::new(generator_calling(Some(CALM_FUNCTION))));
        let none = ModelClassifier::new(Arc::new(generator_calling(None)));

        assert_eq!(crisis.classify("I want to end my life").await, Classification::Crisis);
        assert_eq!(calm.classify("I feel better").await, Classification::Calm);
        assert_eq!(none.classify("hello").await, Classification::None);
    }

    #[tokio::test]
    async fn test_model_classifier_fails_open() {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .returning(|_, _| Err(anyhow::anyhow!("backend down")));
        let classifier = ModelClassifier::new(Arc::new(generator));

        assert_eq!(classifier.classify("anything").await, Classification::None);
    }

    #[test]
    fn test_rule_classifier_checks_crisis_first() {
        assert_eq!(
            RuleClassifier::classify_message("I was feeling better but now I want to END MY LIFE"),
            Classification::Crisis
        );
        assert_eq!(
            RuleClassifier::classify_message("I've calmed down, thanks"),
            Classification::Calm
        );
        assert_eq!(RuleClassifier::classify_message("hi"), Classification::None);
    }

    #[tokio::test]
    async fn test_hybrid_skips_model_on_rule_crisis() {
        let mut generator = MockGenerator::new();
        generator.expect_generate().times(0);
        let classifier = HybridClassifier::new(Arc::new(generator));

        assert_eq!(classifier.classify("thinking about suicide").await, Classification::Crisis);
    }

    #[tokio::test]
    async fn test_hybrid_defers_to_model_otherwise() {
        let classifier = HybridClassifier::new(Arc::new(generator_calling(Some(CALM_FUNCTION))));
        assert_eq!(classifier.classify("much better now").await, Classification::Calm);
    }

    #[test]
    fn test_classifier_kind_parsing() {
        assert_eq!("Hybrid".parse::<ClassifierKind>(), Ok(ClassifierKind::Hybrid));
        assert_eq!(" rules ".parse::<ClassifierKind>(), Ok(ClassifierKind::Rules));
        assert!("regex".parse::<ClassifierKind>().is_err());
    }

    #[tokio::test]
    async fn test_crisis_log_appends_jsonl_and_creates_dirs() {
        // --- Arrange ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("nested").join("crisis.jsonl");
        let log = CrisisLog::new(&path);

        // --- Act ---
        log.record("s1", "I want to end my life").await;
        log.record("s2", "second").await;

        // --- Assert ---
        let contents = std::fs::read_to_string(&path).unwrap();
        let entries: Vec<CrisisLogEntry> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].session_id, "s1");
        assert_eq!(entries[0].message, "I want to end my life");
        assert_eq!(entries[1].session_id, "s2");
    }

    #[tokio::test]
    async fn test_crisis_log_failure_is_swallowed() {
        let dir = tempdir().unwrap();
        // A directory cannot be opened for appending.
        let log = CrisisLog::new(dir.path());

        log.record("s1", "message").await;

        assert!(dir.path().is_dir());
    }
}
