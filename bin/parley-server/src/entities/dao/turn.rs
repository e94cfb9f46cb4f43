use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

/// Author of a conversation turn.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single row in the `chat_turns` table.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    /// Monotonic, store-assigned.
    pub id: i64,
    pub session_id: String,
    /// `"user"`, `"assistant"`, or `"system"` as stored.
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A turn that has not been written yet.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub session_id: String,
    pub role: Role,
    pub content: String,
}

impl NewTurn {
    pub fn user(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), role: Role::User, content: content.into() }
    }

    pub fn assistant(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), role: Role::Assistant, content: content.into() }
    }
}
