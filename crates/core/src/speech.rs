use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

const TTS_ENDPOINT: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";

/// Voice selection and encoding for synthesized replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceParams {
    pub language_code: String,
    pub name: String,
    pub ssml_gender: String,
    #[serde(skip)]
    pub audio_encoding: String,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            language_code: "en-US".to_string(),
            name: "en-US-Wavenet-F".to_string(),
            ssml_gender: "FEMALE".to_string(),
            audio_encoding: "MP3".to_string(),
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns encoded audio bytes for `text`.
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

/// Google Cloud Text-to-Speech over REST.
pub struct GoogleTts {
    client: Client,
    api_key: SecretString,
}

impl GoogleTts {
    pub fn new(client: Client, api_key: SecretString) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTts {
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>> {
        let body = serde_json::json!({
            "input": { "text": text },
            "voice": voice,
            "audioConfig": { "audioEncoding": voice.audio_encoding },
        });

        let resp = self
            .client
            .post(TTS_ENDPOINT)
            .query(&[("key", self.api_key.expose_secret())])
            .json(&body)
            .send()
            .await
            .context("Failed to reach the speech backend")?
            .error_for_status()
            .context("Speech backend returned an error status")?
            .json::<SynthesizeResponse>()
            .await
            .context("Failed to parse speech response")?;

        let audio = STANDARD
            .decode(resp.audio_content)
            .context("Speech backend returned invalid base64 audio")?;
        tracing::debug!(bytes = audio.len(), "Synthesized speech");
        Ok(audio)
    }
}
