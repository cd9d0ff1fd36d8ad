use crate::server::AppState;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt, future};
use mitra_core::live::{LiveConnector, LiveError};
use std::sync::Arc;

/// Upgrades `/live-session` and hands the socket to the live relay.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    tracing::info!("Live session upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state.live))
}

async fn handle_socket(socket: WebSocket, connector: Arc<dyn LiveConnector>) {
    tracing::info!("Live session WebSocket connected");
    let (sender, receiver) = socket.split();

    // Text frames only; the stream ends on close or on the first socket error.
    let inbound = receiver
        .take_while(|msg| future::ready(!matches!(msg, Err(_) | Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(text.as_str().to_owned()),
                _ => None,
            })
        });
    let outbound = sender.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text.into()))));

    match mitra_core::live::serve(inbound, outbound, connector.as_ref()).await {
        Ok(()) => tracing::info!("Live session WebSocket closed"),
        Err(LiveError::NoSetup) => tracing::info!("Client left before sending a setup frame"),
        Err(e) => tracing::warn!(error = %e, "Live session ended early"),
    }
}
