use axum::{Router, middleware};

use crate::state::SharedState;

pub mod auth;
pub mod docs;
pub mod health;
pub mod rooms;
pub mod sessions;
pub mod websocket;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let public_router = health::router()
        .merge(sessions::public_router())
        .merge(rooms::public_router());

    let session_router = sessions::router()
        .merge(rooms::router())
        .merge(websocket::router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    public_router
        .merge(session_router)
        .merge(docs::router())
        .with_state(state)
}
