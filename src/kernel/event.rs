use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One raw unit of user input. Created per incoming message and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    text: String,
    conversation_id: ConversationId,
    sender_id: String,
    timestamp: DateTime<Utc>,
}

impl Utterance {
    pub fn new(
        conversation_id: impl Into<ConversationId>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            text: text.into(),
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            timestamp,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyKind {
    /// Result of a dispatched action.
    Answer,
    /// Follow-up question for a missing slot.
    Clarification,
    /// Nothing actionable was understood.
    Unhandled,
    /// A collaborator failed; the text apologises and suggests a retry.
    Apology,
    /// Cancellation or restart acknowledgement.
    Acknowledgement,
}

/// What goes back to the chat transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub conversation_id: ConversationId,
    pub kind: ReplyKind,
    pub text: String,
}

impl Reply {
    pub fn new(conversation_id: ConversationId, kind: ReplyKind, text: impl Into<String>) -> Self {
        Self {
            conversation_id,
            kind,
            text: text.into(),
        }
    }
}
