use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::task::{TaskId, TaskStatus};
use crate::ledger::CostBreakdown;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

impl TurnId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One prior message relayed to the reasoning collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into() }
    }
}

/// Append-only record of a processed turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: TurnId,
    pub task_id: TaskId,
    pub utterance: String,
    pub response: String,
    pub status: TaskStatus,
    pub cost: CostBreakdown,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(
        task_id: TaskId,
        utterance: impl Into<String>,
        response: impl Into<String>,
        status: TaskStatus,
        cost: CostBreakdown,
    ) -> Self {
        Self {
            id: TurnId::generate(),
            task_id,
            utterance: utterance.into(),
            response: response.into(),
            status,
            cost,
            created_at: Utc::now(),
        }
    }

    /// The turn as the user/assistant message pair it contributes to history.
    pub fn as_messages(&self) -> [ConversationMessage; 2] {
        [
            ConversationMessage::user(self.utterance.clone()),
            ConversationMessage::assistant(self.response.clone()),
        ]
    }
}
