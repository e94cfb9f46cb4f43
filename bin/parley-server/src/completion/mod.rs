//! Chat-completion provider abstraction.
//!
//! Handlers talk to [`CompletionClient`] only; vendor wire types stay inside
//! the implementing module (see [`azure`]).

pub mod azure;

use std::str::FromStr;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::entities::{ConversationTurn, Role};

pub use azure::AzureOpenAiClient;

/// Incremental text fragments, in arrival order.
///
/// A read failure is yielded as the final item after every chunk received
/// before it.
pub type ChunkStream = BoxStream<'static, Result<String, CompletionError>>;

/// One role-tagged message sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    /// Build a turn from an untyped role tag.
    pub fn parse(role: &str, content: impl Into<String>) -> Result<Self, CompletionError> {
        let role = Role::from_str(role)
            .map_err(|_| CompletionError::UnsupportedRole(role.to_owned()))?;
        Ok(Self { role, content: content.into() })
    }
}

impl TryFrom<&ConversationTurn> for ChatTurn {
    type Error = CompletionError;

    fn try_from(turn: &ConversationTurn) -> Result<Self, Self::Error> {
        Self::parse(&turn.role, turn.content.clone())
    }
}

/// Everything that can go wrong while talking to the completion provider.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// A role tag outside `user` / `assistant` / `system`.
    #[error("unsupported role: {0}")]
    UnsupportedRole(String),

    /// Client construction was attempted without required settings.
    #[error("completion client misconfigured: {0}")]
    Config(String),

    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("service returned {status}: {body}")]
    Service { status: u16, body: String },

    /// The provider answered without any usable choice.
    #[error("no response generated")]
    EmptyResponse,

    /// A body or stream event could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The event stream broke after it was opened.
    #[error("stream error: {0}")]
    Stream(String),
}

/// Stateless adapter to an external text-generation service.
#[async_trait]
pub trait CompletionClient: Send + Sync + 'static {
    /// Block until the full completion text is available.
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String, CompletionError>;

    /// Open a streaming completion.
    ///
    /// Errors returned here happened before the first chunk; later failures
    /// arrive as an `Err` item on the stream.
    async fn complete_streaming(&self, turns: &[ChatTurn]) -> Result<ChunkStream, CompletionError>;
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;

    fn stored(role: &str, content: &str) -> ConversationTurn {
        ConversationTurn {
            id: 1,
            session_id: "s".into(),
            role: role.into(),
            content: content.into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn known_roles_convert() {
        let turn = ChatTurn::try_from(&stored("system", "be brief")).unwrap();
        assert_eq!(turn.role, Role::System);
        assert_eq!(turn.content, "be brief");
    }

    #[test]
    fn unknown_role_is_a_hard_failure() {
        let err = ChatTurn::try_from(&stored("tool", "x")).unwrap_err();
        assert!(matches!(err, CompletionError::UnsupportedRole(ref r) if r == "tool"));
        assert_eq!(err.to_string(), "unsupported role: tool");
    }
}
