use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{TimestampSeconds, serde_as};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{ParticipantId, RoomCode},
    state::state_machine::RoomPhase,
};

/// Wire envelope for every message sent to a room connection.
///
/// Serializes as `{ "kind", "room_id", "participant_id"?, "payload"? }`.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub room_id: RoomCode,
    /// Participant the message is about (the subject), when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<ParticipantId>,
    #[serde(flatten)]
    pub body: OutboundMessage,
}

impl Envelope {
    pub fn new(room_id: impl Into<RoomCode>, body: OutboundMessage) -> Self {
        Self {
            room_id: room_id.into(),
            participant_id: None,
            body,
        }
    }

    pub fn about(mut self, participant_id: ParticipantId) -> Self {
        self.participant_id = Some(participant_id);
        self
    }
}

/// Messages pushed from the server to room members.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum OutboundMessage {
    /// Display name of a member who just connected.
    Join(String),
    /// Identifier of a member who left the room.
    Leave(ParticipantId),
    RoomDeleted,
    Presence {
        participant_id: ParticipantId,
        online: bool,
    },
    /// Full room snapshot sent to a freshly connected member.
    Init(Box<InitPayload>),
    Question {
        question: String,
        #[serde_as(as = "TimestampSeconds<i64>")]
        answers_deadline: SystemTime,
    },
    Answers {
        /// Answer per member in join order; empty for members who did not answer.
        answers: IndexMap<ParticipantId, String>,
        true_question: String,
        #[serde_as(as = "TimestampSeconds<i64>")]
        voting_deadline: SystemTime,
    },
    VoteResult(VoteResultPayload),
    /// New display name of a member who renamed themselves.
    UpdateUser(String),
    Error {
        kind: ErrorKind,
        message: String,
    },
}

/// Category of an error reported to the acting client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Internal,
}

/// Member entry of the `init` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberSnapshot {
    pub id: ParticipantId,
    pub name: String,
    pub is_host: bool,
    pub online: bool,
}

/// Everything a client needs to render the room without replaying history.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
pub struct InitPayload {
    pub phase: RoomPhase,
    pub category: String,
    pub members: Vec<MemberSnapshot>,
    #[serde_as(as = "Option<TimestampSeconds<i64>>")]
    pub answers_deadline: Option<SystemTime>,
    #[serde_as(as = "Option<TimestampSeconds<i64>>")]
    pub voting_deadline: Option<SystemTime>,
    /// Question for this member (alternate one for odd-ones); empty before the round starts.
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_question: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answers: Option<IndexMap<ParticipantId, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_result: Option<VoteResultPayload>,
}

/// Outcome of the voting phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VoteResultPayload {
    /// Voter to chosen target. Members who did not vote are absent.
    pub votes: IndexMap<ParticipantId, ParticipantId>,
    /// Number of votes received per target.
    pub tally: IndexMap<ParticipantId, u32>,
    /// Members who had the alternate question.
    pub odd_ones: Vec<ParticipantId>,
}

/// Messages accepted from room members.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum InboundMessage {
    /// Host starts the round; requested duration in seconds.
    Start(u64),
    Answer(String),
    /// Target participant of the vote.
    Vote(Uuid),
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
