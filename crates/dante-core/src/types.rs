use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Specialist persona that handles a chat session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Real-estate registry law specialist.
    #[default]
    Registral,
    /// Notarial acts specialist.
    Notarial,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Registral => "registral",
            AgentType::Notarial => "notarial",
        }
    }

    /// Parse the stored tag; unknown tags fall back to the registry specialist.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "notarial" => AgentType::Notarial,
            _ => AgentType::Registral,
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "registral" | "registro" => Ok(AgentType::Registral),
            "notarial" | "notaria" => Ok(AgentType::Notarial),
            other => Err(format!("unknown agent type '{}'", other)),
        }
    }
}

// =============================================================================
// Domain entities
// =============================================================================

/// An account known to the auth service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub email_confirmed: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-user profile row. Created lazily on first sign-in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Uuid,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One (user utterance, agent reply) pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub msg_input: String,
    pub msg_output: String,
}

// =============================================================================
// Auth wire types
// =============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignUpResponse {
    pub user_id: Uuid,
    pub confirmation_required: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenRequest {
    pub email: String,
    pub password: String,
}

/// Issued access token plus the identity it belongs to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub user_id: Uuid,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoverRequest {
    pub email: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdatePasswordRequest {
    pub password: String,
}

// =============================================================================
// Server function wire types
// =============================================================================

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub agent_type: Option<AgentType>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub chat_session_id: String,
}

/// Response of the `load-user-data` function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoadUserDataResponse {
    pub user_id: Uuid,
    pub chat_sessions: Vec<RemoteSession>,
}

/// A session as stored server-side, with its exchanges in insertion order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteSession {
    pub chat_session_id: String,
    pub chat_session_title: String,
    #[serde(default)]
    pub agent_type: AgentType,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: Vec<Exchange>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaveExchangeRequest {
    pub chat_session_id: String,
    pub chat_session_title: String,
    pub msg_input: String,
    pub msg_output: String,
    pub user_id: Uuid,
    #[serde(default)]
    pub agent_type: AgentType,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SaveExchangeResponse {
    pub chat_session_id: String,
    pub message_id: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenameSessionRequest {
    pub chat_session_id: String,
    pub new_title: String,
    pub user_id: Uuid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteSessionRequest {
    pub chat_session_id: String,
    pub user_id: Uuid,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AvatarResponse {
    pub avatar_url: String,
}

/// JSON error body returned by every failing endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "conflict").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_type_serde_tags() {
        assert_eq!(
            serde_json::to_string(&AgentType::Registral).unwrap(),
            "\"registral\""
        );
        let parsed: AgentType = serde_json::from_str("\"notarial\"").unwrap();
        assert_eq!(parsed, AgentType::Notarial);
    }

    #[test]
    fn test_agent_type_from_tag_defaults() {
        assert_eq!(AgentType::from_tag("notarial"), AgentType::Notarial);
        assert_eq!(AgentType::from_tag("something-else"), AgentType::Registral);
    }

    #[test]
    fn test_agent_type_from_str() {
        assert_eq!("Notarial".parse::<AgentType>().unwrap(), AgentType::Notarial);
        assert_eq!("registro".parse::<AgentType>().unwrap(), AgentType::Registral);
        assert!("fiscal".parse::<AgentType>().is_err());
    }

    #[test]
    fn test_load_user_data_wire_shape() {
        let json = r#"{
            "user_id": "550e8400-e29b-41d4-a716-446655440000",
            "chat_sessions": [{
                "chat_session_id": "abc",
                "chat_session_title": "Hipoteca",
                "agent_type": "notarial",
                "messages": [{"msg_input": "hola", "msg_output": "buenas"}]
            }]
        }"#;
        let data: LoadUserDataResponse = serde_json::from_str(json).unwrap();
        assert_eq!(data.chat_sessions.len(), 1);
        let session = &data.chat_sessions[0];
        assert_eq!(session.agent_type, AgentType::Notarial);
        assert!(session.updated_at.is_none());
        assert_eq!(session.messages[0].msg_output, "buenas");
    }

    #[test]
    fn test_remote_session_defaults_missing_fields() {
        let json = r#"{"chat_session_id": "x", "chat_session_title": "t"}"#;
        let session: RemoteSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.agent_type, AgentType::Registral);
        assert!(session.messages.is_empty());
    }
}
