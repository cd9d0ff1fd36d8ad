use anyhow::{Context, Result};
use async_trait::async_trait;
use gemini_realtime::types::ServerMessage;
use gemini_realtime::{LiveReceiver, LiveSender};
use mitra_core::live::{LiveConnector, LiveDownlink, LiveUplink, MediaChunk, OutboundFrame};
use secrecy::SecretString;

/// Opens Gemini Live sessions for the `/live-session` socket.
pub struct GeminiLiveConnector {
    api_key: SecretString,
    model: String,
}

impl GeminiLiveConnector {
    pub fn new(api_key: SecretString, model: String) -> Self {
        Self { api_key, model }
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(
        &self,
        setup: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(Box<dyn LiveUplink>, Box<dyn LiveDownlink>)> {
        let (sender, receiver) = gemini_realtime::connect(&self.api_key, &self.model, setup)
            .await
            .context("Failed to open Gemini Live session")?;
        Ok((Box::new(GeminiUplink { sender }), Box::new(GeminiDownlink { receiver })))
    }
}

struct GeminiUplink {
    sender: LiveSender,
}

#[async_trait]
impl LiveUplink for GeminiUplink {
    async fn send_media(&mut self, chunk: MediaChunk) -> Result<()> {
        self.sender.send_media(chunk.mime_type, chunk.data).await
    }

    async fn close(&mut self) -> Result<()> {
        self.sender.close().await
    }
}

struct GeminiDownlink {
    receiver: LiveReceiver,
}

#[async_trait]
impl LiveDownlink for GeminiDownlink {
    async fn next_frames(&mut self) -> Result<Option<Vec<OutboundFrame>>> {
        Ok(self.receiver.next_message().await?.map(frames_from_message))
    }
}

/// Translates one Gemini Live message into client frames. Text parts become
/// text frames and inline audio is forwarded as base64; everything else is
/// dropped.
pub fn frames_from_message(message: ServerMessage) -> Vec<OutboundFrame> {
    let Some(content) = message.server_content else {
        return Vec::new();
    };

    if let Some(transcription) = &content.input_transcription {
        tracing::debug!(text = %transcription.text, "Live input transcription");
    }
    if content.turn_complete == Some(true) {
        tracing::debug!("Live turn complete, waiting for next user input");
    }

    content
        .model_turn
        .map(|turn| turn.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| match (part.text, part.inline_data) {
            (Some(text), _) => Some(OutboundFrame::Text(text)),
            (None, Some(blob)) => Some(OutboundFrame::Audio(blob.data)),
            (None, None) => None,
        })
        .collect()
}
