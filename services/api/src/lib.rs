pub mod config;
pub mod gemini_adapter;
pub mod live;
pub mod prompt_loader;
pub mod server;
