pub mod crisis;
pub mod live;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod search;
pub mod session;
pub mod speech;

pub use orchestrator::{
    Backends, ErrorReply, TurnError, TurnOrchestrator, TurnRequest, TurnResponse, TurnSettings,
};
pub use session::{Mode, Role, Session, SessionStore, Turn};
