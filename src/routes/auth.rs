use axum::{
    body::Body,
    extract::{Query, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

use crate::{error::AppError, services::session_service, state::SharedState};

/// Header carrying the session token on authenticated routes.
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

/// Resolve the caller's session and expose it to handlers as an `Extension<Session>`.
///
/// Browsers cannot set headers on WebSocket upgrades, so `?token=` is accepted as a fallback.
pub async fn require_session(
    State(state): State<SharedState>,
    Query(query): Query<TokenQuery>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(SESSION_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or(query.token)
        .ok_or_else(|| {
            AppError::Unauthorized(format!("missing session token header `{SESSION_TOKEN_HEADER}`"))
        })?;

    let session = session_service::authenticate(&state, &token)?;
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}
