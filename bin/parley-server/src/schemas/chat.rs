//! Chat API request / response types.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use crate::entities::ConversationTurn;

/// Longest accepted caller-supplied session id.
pub const MAX_SESSION_ID_LEN: u64 = 128;

/// Request body for `POST /chat` and `POST /chat/stream`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ChatRequest {
    /// Existing session to continue; a new one is minted when absent or empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = MAX_SESSION_ID_LEN, message = "session_id is too long"))]
    pub session_id: Option<String>,
    /// The user's message.
    #[serde(default)]
    #[validate(custom(function = "not_blank", message = "message must not be empty"))]
    pub message: String,
}

impl ChatRequest {
    /// The caller's session id when it is non-empty.
    pub fn supplied_session_id(&self) -> Option<&str> {
        self.session_id.as_deref().filter(|s| !s.is_empty())
    }
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("required"));
    }
    Ok(())
}

/// Response body for `POST /chat`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatResponse {
    pub session_id: String,
    /// The assistant's reply.
    pub message: String,
}

/// One stored turn as returned by `GET /chat/history/{session_id}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TurnResponse {
    pub id: i64,
    pub created_at: String,
    pub updated_at: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
}

/// Query string for `GET /test`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TestQuery {
    /// Message sent as a single user turn.
    #[serde(default)]
    pub msg: String,
}

impl ConversationTurn {
    pub fn to_response(&self) -> TurnResponse {
        TurnResponse {
            id: self.id,
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
            session_id: self.session_id.clone(),
            role: self.role.clone(),
            content: self.content.clone(),
        }
    }
}
