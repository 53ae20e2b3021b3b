use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{MemberEntity, RoomEntity},
    dto::format_system_time,
    state::state_machine::RoomPhase,
};

/// Payload used to open a new room.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateRoomRequest {
    /// Category the questions are drawn from (see `GET /api/categories`).
    #[validate(length(min = 1))]
    pub category: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateRoomResponse {
    pub code: String,
}

/// Member entry of a room summary.
#[derive(Debug, Serialize, ToSchema)]
pub struct MemberSummary {
    pub id: Uuid,
    pub name: String,
    pub is_host: bool,
    pub online: bool,
}

impl MemberSummary {
    pub fn new(member: &MemberEntity, online: bool) -> Self {
        Self {
            id: member.participant_id,
            name: member.display_name.clone(),
            is_host: member.is_host,
            online,
        }
    }
}

/// Room state visible to its members over REST. Timestamps are RFC 3339.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomSummary {
    pub code: String,
    pub category: String,
    pub phase: RoomPhase,
    pub created_at: String,
    pub updated_at: String,
    pub answers_deadline: Option<String>,
    pub voting_deadline: Option<String>,
    pub members: Vec<MemberSummary>,
}

impl RoomSummary {
    pub fn new(room: &RoomEntity, members: Vec<MemberSummary>) -> Self {
        Self {
            code: room.code.clone(),
            category: room.category.clone(),
            phase: room.phase,
            created_at: format_system_time(room.created_at),
            updated_at: format_system_time(room.updated_at),
            answers_deadline: room.answers_deadline.map(format_system_time),
            voting_deadline: room.voting_deadline.map(format_system_time),
            members,
        }
    }
}

/// Outcome of leaving a room.
#[derive(Debug, Serialize, ToSchema)]
pub struct LeaveRoomResponse {
    /// `true` when leaving deleted the whole room.
    pub room_deleted: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CategoriesResponse {
    pub categories: Vec<String>,
}
