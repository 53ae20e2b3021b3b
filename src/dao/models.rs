use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::state::state_machine::RoomPhase;

/// Short human-shareable room identifier (e.g. `ABCD`).
pub type RoomCode = String;
/// Stable participant identifier issued by the session provider.
pub type ParticipantId = Uuid;

/// Persisted room record. Phase and deadlines are only written through the state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEntity {
    /// Unique room code.
    pub code: RoomCode,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last time the room record was written.
    pub updated_at: SystemTime,
    /// Question category chosen by the host.
    pub category: String,
    /// Question shown to regular members for the current round.
    pub regular_question: String,
    /// Alternate question shown to the odd-ones for the current round.
    pub sneaky_question: String,
    /// End of the answering window; `None` until a round starts.
    pub answers_deadline: Option<SystemTime>,
    /// End of the voting window; `None` until answering closes.
    pub voting_deadline: Option<SystemTime>,
    /// Current phase of the room.
    pub phase: RoomPhase,
}

impl RoomEntity {
    /// Build a fresh lobby room for the given category.
    pub fn new(code: RoomCode, category: String, now: SystemTime) -> Self {
        Self {
            code,
            created_at: now,
            updated_at: now,
            category,
            regular_question: String::new(),
            sneaky_question: String::new(),
            answers_deadline: None,
            voting_deadline: None,
            phase: RoomPhase::Lobby,
        }
    }
}

/// Membership of a participant inside a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberEntity {
    pub room_code: RoomCode,
    pub participant_id: ParticipantId,
    /// Display name captured from the session when the member joined.
    pub display_name: String,
    pub is_host: bool,
    /// Whether the member received the alternate question this round.
    pub is_odd_one: bool,
    /// Participant this member voted for, if any.
    pub vote: Option<ParticipantId>,
    pub joined_at: SystemTime,
}

impl MemberEntity {
    pub fn new(
        room_code: RoomCode,
        participant_id: ParticipantId,
        display_name: String,
        is_host: bool,
        now: SystemTime,
    ) -> Self {
        Self {
            room_code,
            participant_id,
            display_name,
            is_host,
            is_odd_one: false,
            vote: None,
            joined_at: now,
        }
    }
}

/// Answer submitted by a member for the current round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerEntity {
    pub room_code: RoomCode,
    pub participant_id: ParticipantId,
    pub content: String,
    pub submitted_at: SystemTime,
}
