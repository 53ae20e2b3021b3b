use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::state::Session;

/// Payload used to open a session or rename the current participant.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UsernameRequest {
    /// Display name shown to other members.
    #[validate(length(min = 1, max = 32), custom(function = "crate::dto::validation::validate_display_name"))]
    pub username: String,
}

/// Identity issued to a client. The token must be sent back in the `x-session-token` header.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub token: String,
    pub participant_id: Uuid,
    pub username: String,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            token: session.token,
            participant_id: session.participant_id,
            username: session.display_name,
        }
    }
}

/// Identity as seen by the participant, without the token.
#[derive(Debug, Serialize, ToSchema)]
pub struct ParticipantResponse {
    pub participant_id: Uuid,
    pub username: String,
}

impl From<Session> for ParticipantResponse {
    fn from(session: Session) -> Self {
        Self {
            participant_id: session.participant_id,
            username: session.display_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_length_is_bounded() {
        let ok = UsernameRequest {
            username: "Ada".into(),
        };
        assert!(ok.validate().is_ok());

        let empty = UsernameRequest {
            username: String::new(),
        };
        assert!(empty.validate().is_err());

        let long = UsernameRequest {
            username: "x".repeat(33),
        };
        assert!(long.validate().is_err());
    }

    #[test]
    fn blank_username_is_rejected() {
        let blank = UsernameRequest {
            username: "   ".into(),
        };
        assert!(blank.validate().is_err());
    }
}
