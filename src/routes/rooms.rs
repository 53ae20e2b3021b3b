use std::time::SystemTime;

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::room::{
        CategoriesResponse, CreateRoomRequest, CreateRoomResponse, LeaveRoomResponse, RoomSummary,
    },
    error::AppError,
    services::room_service::{self, LeaveOutcome, normalize_code},
    state::{Session, SharedState},
};

/// Routes reachable without a session.
pub fn public_router() -> Router<SharedState> {
    Router::new().route("/api/categories", get(list_categories))
}

/// Room lifecycle routes; all require a session.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/{code}", get(get_room))
        .route("/api/rooms/{code}/join", post(join_room))
        .route("/api/rooms/{code}/leave", post(leave_room))
}

/// Open a room with the caller as host.
#[utoipa::path(
    post,
    path = "/api/rooms",
    tag = "rooms",
    security(("session_token" = [])),
    request_body = CreateRoomRequest,
    responses(
        (status = 200, description = "Room created", body = CreateRoomResponse),
        (status = 400, description = "Unknown category"),
        (status = 409, description = "Caller already belongs to a room")
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    Extension(session): Extension<Session>,
    Valid(Json(payload)): Valid<Json<CreateRoomRequest>>,
) -> Result<Json<CreateRoomResponse>, AppError> {
    let code =
        room_service::create_room(&state, &session, &payload.category, SystemTime::now()).await?;
    Ok(Json(CreateRoomResponse { code }))
}

#[utoipa::path(
    post,
    path = "/api/rooms/{code}/join",
    tag = "rooms",
    security(("session_token" = [])),
    params(("code" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Joined the room", body = RoomSummary),
        (status = 404, description = "Room not found"),
        (status = 409, description = "Already a member, member of another room, or room finished")
    )
)]
pub async fn join_room(
    State(state): State<SharedState>,
    Extension(session): Extension<Session>,
    Path(code): Path<String>,
) -> Result<Json<RoomSummary>, AppError> {
    let code = normalize_code(&code)?;
    room_service::join_room(&state, &session, &code, SystemTime::now()).await?;
    Ok(Json(room_service::room_summary(&state, &session, &code).await?))
}

/// Leave a room. The host leaving an unfinished room deletes it.
#[utoipa::path(
    post,
    path = "/api/rooms/{code}/leave",
    tag = "rooms",
    security(("session_token" = [])),
    params(("code" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Left the room", body = LeaveRoomResponse),
        (status = 404, description = "Room or membership not found")
    )
)]
pub async fn leave_room(
    State(state): State<SharedState>,
    Extension(session): Extension<Session>,
    Path(code): Path<String>,
) -> Result<Json<LeaveRoomResponse>, AppError> {
    let code = normalize_code(&code)?;
    let outcome = room_service::leave_room(&state, &session, &code).await?;
    Ok(Json(LeaveRoomResponse {
        room_deleted: outcome == LeaveOutcome::RoomDeleted,
    }))
}

#[utoipa::path(
    get,
    path = "/api/rooms/{code}",
    tag = "rooms",
    security(("session_token" = [])),
    params(("code" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Room state", body = RoomSummary),
        (status = 401, description = "Caller is not a member"),
        (status = 404, description = "Room not found")
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Extension(session): Extension<Session>,
    Path(code): Path<String>,
) -> Result<Json<RoomSummary>, AppError> {
    let code = normalize_code(&code)?;
    Ok(Json(room_service::room_summary(&state, &session, &code).await?))
}

/// Categories a room can be opened with.
#[utoipa::path(
    get,
    path = "/api/categories",
    tag = "rooms",
    responses((status = 200, description = "Available categories", body = CategoriesResponse))
)]
pub async fn list_categories(State(state): State<SharedState>) -> Json<CategoriesResponse> {
    Json(CategoriesResponse {
        categories: room_service::categories(&state),
    })
}
