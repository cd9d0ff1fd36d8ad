//! Live voice relay between a client socket and a realtime backend.
//!
//! The client first sends a setup frame, then `realtime_input` frames carrying
//! media chunks. Backend output is forwarded to the client as `{"text": ..}`
//! or `{"audio": ..}` frames. Both directions run as separate tasks and the
//! session ends as soon as either of them finishes.

use anyhow::Result;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::pin;

/// One piece of client media, forwarded to the backend as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

/// A frame sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundFrame {
    Text(String),
    /// Base64-encoded audio.
    Audio(String),
}

#[derive(Debug, Deserialize)]
struct ClientFrame {
    realtime_input: Option<RealtimeInput>,
}

#[derive(Debug, Deserialize)]
struct RealtimeInput {
    #[serde(default)]
    media_chunks: Vec<RawChunk>,
    action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChunk {
    mime_type: Option<String>,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetupFrame {
    #[serde(default)]
    setup: serde_json::Map<String, serde_json::Value>,
}

/// Extracts the backend session config from the client's first frame. Anything
/// unparseable yields an empty config.
pub fn parse_setup(frame: &str) -> serde_json::Map<String, serde_json::Value> {
    match serde_json::from_str::<SetupFrame>(frame) {
        Ok(frame) => frame.setup,
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable setup frame, using an empty config");
            serde_json::Map::new()
        }
    }
}

/// Media chunks carried by a client frame. Commit frames, unparseable frames
/// and chunks without a mime type or payload produce nothing.
pub fn media_chunks(frame: &str) -> Vec<MediaChunk> {
    let Ok(frame) = serde_json::from_str::<ClientFrame>(frame) else {
        return Vec::new();
    };
    let Some(input) = frame.realtime_input else {
        return Vec::new();
    };
    if input.action.as_deref() == Some("commit") {
        return Vec::new();
    }

    input
        .media_chunks
        .into_iter()
        .filter_map(|chunk| match (chunk.mime_type, chunk.data) {
            (Some(mime_type), Some(data)) if !mime_type.is_empty() && !data.is_empty() => {
                Some(MediaChunk { mime_type, data })
            }
            _ => None,
        })
        .collect()
}

/// Client-to-backend half of a live session.
#[async_trait]
pub trait LiveUplink: Send {
    async fn send_media(&mut self, chunk: MediaChunk) -> Result<()>;

    /// Called once the client stream has ended.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Backend-to-client half of a live session.
#[async_trait]
pub trait LiveDownlink: Send {
    /// Frames produced by the next backend message, or `None` once the backend
    /// has closed the session.
    async fn next_frames(&mut self) -> Result<Option<Vec<OutboundFrame>>>;
}

/// Opens backend sessions.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(
        &self,
        setup: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(Box<dyn LiveUplink>, Box<dyn LiveDownlink>)>;
}

#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("client disconnected before sending a setup frame")]
    NoSetup,
    #[error("failed to open live backend session: {0:#}")]
    Connect(anyhow::Error),
}

/// Runs a full live session: reads the setup frame, connects to the backend and
/// relays until either side finishes.
pub async fn serve<I, O>(inbound: I, outbound: O, connector: &dyn LiveConnector) -> Result<(), LiveError>
where
    I: Stream<Item = String> + Send + Unpin + 'static,
    O: Sink<String> + Send + Unpin + 'static,
{
    let mut inbound = inbound;
    let first = inbound.next().await.ok_or(LiveError::NoSetup)?;

    let (uplink, downlink) = connector
        .connect(parse_setup(&first))
        .await
        .map_err(LiveError::Connect)?;
    tracing::info!("Live backend session connected");

    relay(inbound, outbound, uplink, downlink).await;
    Ok(())
}

/// Spawns both relay directions and aborts the survivor once one ends.
pub async fn relay<I, O>(inbound: I, outbound: O, uplink: Box<dyn LiveUplink>, downlink: Box<dyn LiveDownlink>)
where
    I: Stream<Item = String> + Send + 'static,
    O: Sink<String> + Send + 'static,
{
    let mut send_task = tokio::spawn(forward_client(inbound, uplink));
    let mut recv_task = tokio::spawn(forward_backend(downlink, outbound));

    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!("Client stream finished, stopping backend relay");
            recv_task.abort();
        }
        _ = &mut recv_task => {
            tracing::debug!("Backend stream finished, stopping client relay");
            send_task.abort();
        }
    }
}

async fn forward_client<I>(inbound: I, mut uplink: Box<dyn LiveUplink>)
where
    I: Stream<Item = String> + Send,
{
    let mut inbound = pin!(inbound);
    while let Some(frame) = inbound.next().await {
        for chunk in media_chunks(&frame) {
            if let Err(e) = uplink.send_media(chunk).await {
                tracing::warn!(error = %e, "Failed to forward media chunk");
            }
        }
    }
    if let Err(e) = uplink.close().await {
        tracing::debug!(error = %e, "Failed to close live backend session");
    }
}

async fn forward_backend<O>(mut downlink: Box<dyn LiveDownlink>, outbound: O)
where
    O: Sink<String> + Send,
{
    let mut outbound = pin!(outbound);
    loop {
        let frames = match downlink.next_frames().await {
            Ok(Some(frames)) => frames,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Live backend receive failed");
                break;
            }
        };

        for frame in frames {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode outbound frame");
                    continue;
                }
            };
            if outbound.send(text).await.is_err() {
                tracing::debug!("Client went away while sending");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
    use std::sync::Mutex;
    use std::time::Duration;

    struct ChannelUplink(UnboundedSender<MediaChunk>);

    #[async_trait]
    impl LiveUplink for ChannelUplink {
        async fn send_media(&mut self, chunk: MediaChunk) -> Result<()> {
            self.0.unbounded_send(chunk)?;
            Ok(())
        }
    }

    struct ChannelDownlink(UnboundedReceiver<Vec<OutboundFrame>>);

    #[async_trait]
    impl LiveDownlink for ChannelDownlink {
        async fn next_frames(&mut self) -> Result<Option<Vec<OutboundFrame>>> {
            Ok(self.0.next().await)
        }
    }

    type Halves = (Box<dyn LiveUplink>, Box<dyn LiveDownlink>);

    struct FakeConnector {
        halves: Mutex<Option<Halves>>,
        setup: Mutex<Option<serde_json::Map<String, serde_json::Value>>>,
    }

    #[async_trait]
    impl LiveConnector for FakeConnector {
        async fn connect(&self, setup: serde_json::Map<String, serde_json::Value>) -> Result<Halves> {
            *self.setup.lock().unwrap() = Some(setup);
            self.halves
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| anyhow::anyhow!("already connected"))
        }
    }

    struct Fixture {
        connector: FakeConnector,
        uplink_rx: UnboundedReceiver<MediaChunk>,
        backend_tx: UnboundedSender<Vec<OutboundFrame>>,
    }

    fn fixture() -> Fixture {
        let (uplink_tx, uplink_rx) = unbounded();
        let (backend_tx, backend_rx) = unbounded();
        let halves: Halves = (
            Box::new(ChannelUplink(uplink_tx)),
            Box::new(ChannelDownlink(backend_rx)),
        );
        Fixture {
            connector: FakeConnector {
                halves: Mutex::new(Some(halves)),
                setup: Mutex::new(None),
            },
            uplink_rx,
            backend_tx,
        }
    }

    #[test]
    fn test_media_chunks_skips_commit_and_incomplete_chunks() {
        let frame = r#"{"realtime_input": {"media_chunks": [
            {"mime_type": "audio/pcm", "data": "AAAA"},
            {"mime_type": "audio/pcm"},
            {"data": "BBBB"},
            {"mime_type": "", "data": "CCCC"}
        ]}}"#;

        assert_eq!(
            media_chunks(frame),
            vec![MediaChunk {
                mime_type: "audio/pcm".to_string(),
                data: "AAAA".to_string()
            }]
        );
        assert!(
            media_chunks(r#"{"realtime_input": {"action": "commit", "media_chunks": [{"mime_type": "a", "data": "b"}]}}"#)
                .is_empty()
        );
        assert!(media_chunks("not json").is_empty());
        assert!(media_chunks(r#"{"something_else": 1}"#).is_empty());
    }

    #[test]
    fn test_parse_setup() {
        let setup = parse_setup(r#"{"setup": {"generation_config": {"response_modalities": ["AUDIO"]}}}"#);
        assert!(setup.contains_key("generation_config"));
        assert!(parse_setup("garbage").is_empty());
        assert!(parse_setup("{}").is_empty());
    }

    #[test]
    fn test_outbound_frame_encoding() {
        assert_eq!(
            serde_json::to_string(&OutboundFrame::Text("hi".to_string())).unwrap(),
            r#"{"text":"hi"}"#
        );
        assert_eq!(
            serde_json::to_string(&OutboundFrame::Audio("AAAA".to_string())).unwrap(),
            r#"{"audio":"AAAA"}"#
        );
    }

    #[tokio::test]
    async fn test_serve_relays_both_directions() {
        // --- Arrange ---
        let Fixture {
            connector,
            mut uplink_rx,
            backend_tx,
        } = fixture();
        let (client_tx, client_rx) = unbounded::<String>();
        let (to_client_tx, mut to_client_rx) = unbounded::<String>();

        client_tx
            .unbounded_send(r#"{"setup": {"model_hint": "x"}}"#.to_string())
            .unwrap();
        client_tx
            .unbounded_send(r#"{"realtime_input": {"media_chunks": [{"mime_type": "audio/pcm", "data": "AAAA"}]}}"#.to_string())
            .unwrap();
        client_tx
            .unbounded_send(r#"{"realtime_input": {"action": "commit"}}"#.to_string())
            .unwrap();
        backend_tx
            .unbounded_send(vec![
                OutboundFrame::Text("hello".to_string()),
                OutboundFrame::Audio("UklGRg==".to_string()),
            ])
            .unwrap();

        // --- Act ---
        let session = tokio::spawn(async move {
            serve(client_rx, to_client_tx, &connector).await.unwrap();
            connector
        });

        // --- Assert ---
        let chunk = uplink_rx.next().await.unwrap();
        assert_eq!(chunk.data, "AAAA");
        assert_eq!(to_client_rx.next().await.unwrap(), r#"{"text":"hello"}"#);
        assert_eq!(to_client_rx.next().await.unwrap(), r#"{"audio":"UklGRg=="}"#);

        // Closing the client side ends the whole session.
        drop(client_tx);
        let connector = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
        assert!(connector.setup.lock().unwrap().as_ref().unwrap().contains_key("model_hint"));
        // The commit frame produced nothing and the uplink was dropped with its task.
        assert!(uplink_rx.next().await.is_none());
        drop(backend_tx);
    }

    #[tokio::test]
    async fn test_backend_close_tears_down_client_relay() {
        let Fixture {
            connector,
            uplink_rx: _uplink_rx,
            backend_tx,
        } = fixture();
        let (client_tx, client_rx) = unbounded::<String>();
        let (to_client_tx, _to_client_rx) = unbounded::<String>();
        client_tx.unbounded_send("{}".to_string()).unwrap();

        let session = tokio::spawn(async move { serve(client_rx, to_client_tx, &connector).await });
        drop(backend_tx);

        let result = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        drop(client_tx);
    }

    #[tokio::test]
    async fn test_connect_failure_ends_session() {
        let connector = FakeConnector {
            halves: Mutex::new(None),
            setup: Mutex::new(None),
        };
        let (client_tx, client_rx) = unbounded::<String>();
        let (to_client_tx, _to_client_rx) = unbounded::<String>();
        client_tx.unbounded_send("{}".to_string()).unwrap();

        let result = serve(client_rx, to_client_tx, &connector).await;

        assert!(matches!(result, Err(LiveError::Connect(_))));
        assert!(connector.setup.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_client_leaving_before_setup() {
        let connector = FakeConnector {
            halves: Mutex::new(None),
            setup: Mutex::new(None),
        };
        let (client_tx, client_rx) = unbounded::<String>();
        let (to_client_tx, _to_client_rx) = unbounded::<String>();
        drop(client_tx);

        let result = serve(client_rx, to_client_tx, &connector).await;

        assert!(matches!(result, Err(LiveError::NoSetup)));
        assert!(connector.setup.lock().unwrap().is_none());
    }
}
