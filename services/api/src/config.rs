use mitra_core::crisis::ClassifierKind;
use mitra_core::prompt::DEFAULT_HISTORY_WINDOW;
use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub gemini_api_key: SecretString,
    pub model_name: String,
    pub live_model: String,
    pub tts_api_key: SecretString,
    pub serpapi_key: Option<SecretString>,
    pub google_cse_api_key: Option<SecretString>,
    pub google_cse_id: Option<String>,
    pub crisis_log: PathBuf,
    pub prompts_dir: PathBuf,
    pub classifier: ClassifierKind,
    pub history_window: usize,
    pub turn_timeout: Duration,
    pub session_idle_ttl: Option<Duration>,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables, reading a `.env` file
    /// first when one is present.
    ///
    /// *   `GEMINI_API_KEY`: Required. Used for generation and live sessions.
    /// *   `BIND_ADDRESS`: (Optional) Defaults to "0.0.0.0:8000".
    /// *   `MODEL_NAME` / `LIVE_MODEL`: (Optional) Generation and live models.
    /// *   `TTS_API_KEY`: (Optional) Falls back to `GEMINI_API_KEY`.
    /// *   `SERPAPI_KEY`, `GOOGLE_CSE_API_KEY`, `GOOGLE_CSE_ID`: (Optional) Search providers.
    /// *   `CRISIS_LOG`, `PROMPTS_DIR`, `CLASSIFIER`, `HISTORY_WINDOW`,
    ///     `TURN_TIMEOUT_SECS`, `SESSION_IDLE_TTL_SECS`: (Optional) Turn behaviour.
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source. Empty values
    /// count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let gemini_api_key = var("GEMINI_API_KEY")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;
        let tts_api_key = var("TTS_API_KEY")
            .map(SecretString::from)
            .unwrap_or_else(|| gemini_api_key.clone());

        let bind_address: SocketAddr = parse_or("BIND_ADDRESS", var("BIND_ADDRESS"), "0.0.0.0:8000".parse().ok())?;
        let history_window: usize = parse_or("HISTORY_WINDOW", var("HISTORY_WINDOW"), Some(DEFAULT_HISTORY_WINDOW))?;
        let turn_timeout = match var("TURN_TIMEOUT_SECS") {
            Some(value) => parse_secs("TURN_TIMEOUT_SECS", &value)?,
            None => Duration::from_secs(60),
        };
        let session_idle_ttl = var("SESSION_IDLE_TTL_SECS")
            .map(|value| parse_secs("SESSION_IDLE_TTL_SECS", &value))
            .transpose()?;

        let classifier = match var("CLASSIFIER") {
            Some(value) => value
                .parse::<ClassifierKind>()
                .map_err(|e| ConfigError::InvalidValue("CLASSIFIER".to_string(), e))?,
            None => ClassifierKind::default(),
        };

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            gemini_api_key,
            model_name: var("MODEL_NAME").unwrap_or_else(|| "gemini-2.0-flash-001".to_string()),
            live_model: var("LIVE_MODEL").unwrap_or_else(|| "gemini-2.0-flash-exp".to_string()),
            tts_api_key,
            serpapi_key: var("SERPAPI_KEY").map(SecretString::from),
            google_cse_api_key: var("GOOGLE_CSE_API_KEY").map(SecretString::from),
            google_cse_id: var("GOOGLE_CSE_ID"),
            crisis_log: var("CRISIS_LOG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("crisis_log.jsonl")),
            prompts_dir: var("PROMPTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("prompts")),
            classifier,
            history_window,
            turn_timeout,
            session_idle_ttl,
            log_level,
        })
    }

    /// Custom-search credentials, present only when both the key and the
    /// engine id are set.
    pub fn google_cse_credentials(&self) -> Option<(SecretString, String)> {
        match (&self.google_cse_api_key, &self.google_cse_id) {
            (Some(key), Some(id)) => Some((key.clone(), id.clone())),
            _ => None,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

/// A whole number of seconds. Zero is rejected: a zero timeout fails every
/// turn and a zero idle TTL evicts sessions between turns.
fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    match parse::<u64>(key, value)? {
        0 => Err(ConfigError::InvalidValue(key.to_string(), "must be at least 1 second".to_string())),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: Option<T>) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(value) => parse(key, &value),
        None => default.ok_or_else(|| ConfigError::MissingVar(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_with_only_the_api_key() {
        let config = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "g-key")])).unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(config.model_name, "gemini-2.0-flash-001");
        assert_eq!(config.live_model, "gemini-2.0-flash-exp");
        assert_eq!(config.tts_api_key.expose_secret(), "g-key");
        assert_eq!(config.crisis_log, PathBuf::from("crisis_log.jsonl"));
        assert_eq!(config.prompts_dir, PathBuf::from("prompts"));
        assert_eq!(config.classifier, ClassifierKind::Model);
        assert_eq!(config.history_window, 6);
        assert_eq!(config.turn_timeout, Duration::from_secs(60));
        assert_eq!(config.session_idle_ttl, None);
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.serpapi_key.is_none());
        assert!(config.google_cse_credentials().is_none());
    }

    #[test]
    fn test_missing_api_key() {
        let err = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(var) if var == "GEMINI_API_KEY"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "g-key"),
            ("TTS_API_KEY", "t-key"),
            ("BIND_ADDRESS", "127.0.0.1:9000"),
            ("CLASSIFIER", "hybrid"),
            ("HISTORY_WINDOW", "10"),
            ("TURN_TIMEOUT_SECS", "5"),
            ("SESSION_IDLE_TTL_SECS", "3600"),
            ("GOOGLE_CSE_API_KEY", "cse-key"),
            ("GOOGLE_CSE_ID", "engine"),
            ("RUST_LOG", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.tts_api_key.expose_secret(), "t-key");
        assert_eq!(config.bind_address.port(), 9000);
        assert_eq!(config.classifier, ClassifierKind::Hybrid);
        assert_eq!(config.history_window, 10);
        assert_eq!(config.turn_timeout, Duration::from_secs(5));
        assert_eq!(config.session_idle_ttl, Some(Duration::from_secs(3600)));
        assert_eq!(config.log_level, Level::DEBUG);
        let (key, id) = config.google_cse_credentials().unwrap();
        assert_eq!(key.expose_secret(), "cse-key");
        assert_eq!(id, "engine");
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            ("BIND_ADDRESS", "not-an-address"),
            ("HISTORY_WINDOW", "six"),
            ("CLASSIFIER", "regex"),
            ("RUST_LOG", "LOUD"),
            ("TURN_TIMEOUT_SECS", "0"),
            ("TURN_TIMEOUT_SECS", "-5"),
            ("SESSION_IDLE_TTL_SECS", "0"),
        ] {
            let err = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "g"), (key, value)])).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue(ref var, _) if var == key), "{key}");
        }
    }
}
