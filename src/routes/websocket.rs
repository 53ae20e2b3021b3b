use axum::{
    Extension, Router,
    extract::{Path, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};

use crate::{
    error::AppError,
    services::{
        room_service::{self, normalize_code},
        websocket_service,
    },
    state::{Session, SharedState},
};

#[utoipa::path(
    get,
    path = "/api/rooms/{code}/ws",
    tag = "realtime",
    security(("session_token" = [])),
    params(
        ("code" = String, Path, description = "Room code"),
        ("token" = Option<String>, Query, description = "Session token, when the header cannot be set")
    ),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 401, description = "Caller is not a member"),
        (status = 404, description = "Room not found")
    )
)]
/// Upgrade the HTTP connection into the real-time channel of a room.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Extension(session): Extension<Session>,
    Path(code): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let code = normalize_code(&code)?;
    room_service::require_member(&state, &session, &code).await?;

    let shared_state = state.clone();
    Ok(ws.on_upgrade(move |socket| {
        websocket_service::handle_socket(shared_state, socket, code, session)
    }))
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/api/rooms/{code}/ws", get(ws_handler))
}
