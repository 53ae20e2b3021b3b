use axum::{
    Extension, Json, Router,
    extract::State,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::session::{ParticipantResponse, SessionResponse, UsernameRequest},
    error::AppError,
    services::session_service,
    state::{Session, SharedState},
};

/// Routes reachable without a session.
pub fn public_router() -> Router<SharedState> {
    Router::new().route("/api/sessions", post(create_session))
}

/// Routes acting on the caller's own session.
pub fn router() -> Router<SharedState> {
    Router::new().route("/api/sessions/me", get(current_session).put(rename_session))
}

/// Open a session and receive the token identifying the participant.
#[utoipa::path(
    post,
    path = "/api/sessions",
    tag = "sessions",
    request_body = UsernameRequest,
    responses(
        (status = 200, description = "Session created", body = SessionResponse),
        (status = 400, description = "Invalid username")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<UsernameRequest>>,
) -> Json<SessionResponse> {
    let session = session_service::create_session(&state, payload.username.trim().to_owned());
    Json(session.into())
}

#[utoipa::path(
    get,
    path = "/api/sessions/me",
    tag = "sessions",
    security(("session_token" = [])),
    responses(
        (status = 200, description = "Current participant", body = ParticipantResponse),
        (status = 401, description = "Missing or unknown session token")
    )
)]
pub async fn current_session(Extension(session): Extension<Session>) -> Json<ParticipantResponse> {
    Json(session.into())
}

/// Change the display name; every room of the participant is notified.
#[utoipa::path(
    put,
    path = "/api/sessions/me",
    tag = "sessions",
    security(("session_token" = [])),
    request_body = UsernameRequest,
    responses(
        (status = 200, description = "Participant renamed", body = ParticipantResponse),
        (status = 400, description = "Invalid username"),
        (status = 401, description = "Missing or unknown session token")
    )
)]
pub async fn rename_session(
    State(state): State<SharedState>,
    Extension(session): Extension<Session>,
    Valid(Json(payload)): Valid<Json<UsernameRequest>>,
) -> Result<Json<ParticipantResponse>, AppError> {
    let renamed =
        session_service::rename(&state, &session, payload.username.trim().to_owned()).await?;
    Ok(Json(renamed.into()))
}
