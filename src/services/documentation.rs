use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Odd One Out Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sessions::create_session,
        crate::routes::sessions::current_session,
        crate::routes::sessions::rename_session,
        crate::routes::rooms::create_room,
        crate::routes::rooms::join_room,
        crate::routes::rooms::leave_room,
        crate::routes::rooms::get_room,
        crate::routes::rooms::list_categories,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::session::UsernameRequest,
            crate::dto::session::SessionResponse,
            crate::dto::session::ParticipantResponse,
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::CreateRoomResponse,
            crate::dto::room::LeaveRoomResponse,
            crate::dto::room::RoomSummary,
            crate::dto::room::MemberSummary,
            crate::dto::room::CategoriesResponse,
            crate::dto::ws::ErrorKind,
            crate::state::state_machine::RoomPhase,
        )
    ),
    modifiers(&SessionTokenAddon),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Participant identity"),
        (name = "rooms", description = "Room lifecycle"),
        (name = "realtime", description = "WebSocket channel of a room"),
    )
)]
pub struct ApiDoc;

/// Declares the `x-session-token` header used by authenticated routes.
struct SessionTokenAddon;

impl Modify for SessionTokenAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session_token",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-session-token"))),
            );
        }
    }
}
