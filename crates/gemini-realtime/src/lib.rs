//! Minimal client for the Gemini Live bidirectional streaming API.

mod client;
pub mod types;

pub use client::{LIVE_ENDPOINT, LiveReceiver, LiveSender, connect};
