use crate::types::{Blob, RealtimeInput, RealtimeInputMessage, ServerMessage, Setup, SetupMessage};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message};

pub const LIVE_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

type WsWriter = futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsReader = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Write half of a live session.
pub struct LiveSender {
    write: WsWriter,
}

/// Read half of a live session.
pub struct LiveReceiver {
    read: WsReader,
}

/// Opens a live session, sends the setup message and waits for the server to
/// acknowledge it.
pub async fn connect(
    api_key: &SecretString,
    model: &str,
    config: serde_json::Map<String, serde_json::Value>,
) -> Result<(LiveSender, LiveReceiver)> {
    let url = format!("{LIVE_ENDPOINT}?key={}", api_key.expose_secret());
    let (ws_stream, _) = connect_async(url)
        .await
        .context("Failed to connect to Gemini Live WebSocket")?;
    tracing::info!(model, "Connected to Gemini Live");

    let (write, read) = ws_stream.split();
    let mut sender = LiveSender { write };
    let mut receiver = LiveReceiver { read };

    let setup = SetupMessage {
        setup: Setup {
            model: qualified_model(model),
            config,
        },
    };
    sender.send_json(&setup).await.context("Failed to send setup message")?;

    loop {
        match receiver.next_message().await? {
            Some(message) if message.setup_complete.is_some() => break,
            Some(_) => tracing::debug!("Ignoring message received before setup completed"),
            None => anyhow::bail!("Gemini Live closed the connection during setup"),
        }
    }
    tracing::debug!("Gemini Live setup complete");

    Ok((sender, receiver))
}

fn qualified_model(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

impl LiveSender {
    async fn send_json<T: serde::Serialize>(&mut self, message: &T) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.write
            .send(Message::Text(json))
            .await
            .context("Failed to write to Gemini Live WebSocket")
    }

    /// Forwards one base64 media chunk.
    pub async fn send_media(&mut self, mime_type: String, data: String) -> Result<()> {
        let message = RealtimeInputMessage {
            realtime_input: RealtimeInput {
                media_chunks: vec![Blob { mime_type, data }],
            },
        };
        self.send_json(&message).await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.write.close().await.context("Failed to close Gemini Live WebSocket")
    }
}

impl LiveReceiver {
    /// Reads the next server message. The service sends JSON in both text and
    /// binary frames. Returns `None` once the connection is closed.
    pub async fn next_message(&mut self) -> Result<Option<ServerMessage>> {
        while let Some(msg) = self.read.next().await {
            let payload = match msg {
                Ok(Message::Text(text)) => text.into_bytes(),
                Ok(Message::Binary(bytes)) => bytes,
                Ok(Message::Close(reason)) => {
                    tracing::info!(?reason, "Gemini Live connection closed");
                    return Ok(None);
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!("Error reading from Gemini Live WebSocket: {}", e);
                    return Err(e.into());
                }
            };

            match serde_json::from_slice::<ServerMessage>(&payload) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => tracing::warn!("Failed to deserialize Gemini Live message: {}", e),
            }
        }
        Ok(None)
    }
}
