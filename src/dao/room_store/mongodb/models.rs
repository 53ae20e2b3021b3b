use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::{
    dao::models::{AnswerEntity, MemberEntity, ParticipantId, RoomEntity},
    state::state_machine::RoomPhase,
};

pub const ROOM_COLLECTION_NAME: &str = "rooms";
pub const MEMBER_COLLECTION_NAME: &str = "members";
pub const ANSWER_COLLECTION_NAME: &str = "answers";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoomDocument {
    #[serde(rename = "_id")]
    code: String,
    created_at: DateTime,
    updated_at: DateTime,
    category: String,
    regular_question: String,
    sneaky_question: String,
    answers_deadline: Option<DateTime>,
    voting_deadline: Option<DateTime>,
    phase: RoomPhase,
}

impl MongoRoomDocument {
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl From<RoomEntity> for MongoRoomDocument {
    fn from(value: RoomEntity) -> Self {
        Self {
            code: value.code,
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
            category: value.category,
            regular_question: value.regular_question,
            sneaky_question: value.sneaky_question,
            answers_deadline: value.answers_deadline.map(DateTime::from_system_time),
            voting_deadline: value.voting_deadline.map(DateTime::from_system_time),
            phase: value.phase,
        }
    }
}

impl From<MongoRoomDocument> for RoomEntity {
    fn from(value: MongoRoomDocument) -> Self {
        Self {
            code: value.code,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
            category: value.category,
            regular_question: value.regular_question,
            sneaky_question: value.sneaky_question,
            answers_deadline: value.answers_deadline.map(DateTime::to_system_time),
            voting_deadline: value.voting_deadline.map(DateTime::to_system_time),
            phase: value.phase,
        }
    }
}

/// Membership document. Participant ids are stored in their hyphenated string form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoMemberDocument {
    room_id: String,
    participant_id: String,
    display_name: String,
    is_host: bool,
    is_odd_one: bool,
    vote: Option<String>,
    joined_at: DateTime,
}

impl From<MemberEntity> for MongoMemberDocument {
    fn from(value: MemberEntity) -> Self {
        Self {
            room_id: value.room_code,
            participant_id: value.participant_id.to_string(),
            display_name: value.display_name,
            is_host: value.is_host,
            is_odd_one: value.is_odd_one,
            vote: value.vote.map(|id| id.to_string()),
            joined_at: DateTime::from_system_time(value.joined_at),
        }
    }
}

impl TryFrom<MongoMemberDocument> for MemberEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoMemberDocument) -> MongoResult<Self> {
        Ok(Self {
            participant_id: parse_id(MEMBER_COLLECTION_NAME, &value.participant_id)?,
            vote: value
                .vote
                .as_deref()
                .map(|raw| parse_id(MEMBER_COLLECTION_NAME, raw))
                .transpose()?,
            room_code: value.room_id,
            display_name: value.display_name,
            is_host: value.is_host,
            is_odd_one: value.is_odd_one,
            joined_at: value.joined_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAnswerDocument {
    room_id: String,
    participant_id: String,
    content: String,
    submitted_at: DateTime,
}

impl From<AnswerEntity> for MongoAnswerDocument {
    fn from(value: AnswerEntity) -> Self {
        Self {
            room_id: value.room_code,
            participant_id: value.participant_id.to_string(),
            content: value.content,
            submitted_at: DateTime::from_system_time(value.submitted_at),
        }
    }
}

impl TryFrom<MongoAnswerDocument> for AnswerEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoAnswerDocument) -> MongoResult<Self> {
        Ok(Self {
            participant_id: parse_id(ANSWER_COLLECTION_NAME, &value.participant_id)?,
            room_code: value.room_id,
            content: value.content,
            submitted_at: value.submitted_at.to_system_time(),
        })
    }
}

fn parse_id(collection: &'static str, raw: &str) -> MongoResult<ParticipantId> {
    Uuid::parse_str(raw).map_err(|source| MongoDaoError::CorruptId {
        collection,
        value: raw.to_owned(),
        source,
    })
}
