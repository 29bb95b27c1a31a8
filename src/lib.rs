pub mod config;
pub mod kernel;
pub mod outputs;
pub mod services;

// Re-export the pieces a transport layer needs to drive a conversation
pub use config::CopilotConfig;
pub use kernel::event::{ConversationId, Reply, ReplyKind, Utterance};
pub use kernel::reactor::{Copilot, TurnReport};
pub use kernel::time::ReferenceClock;
