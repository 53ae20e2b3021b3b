use serde::Serialize;
use utoipa::ToSchema;

/// `degraded` means the room store did not answer its ping; live connections keep working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

/// Body of `GET /healthcheck`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    /// Rooms with at least one member connected over WebSocket.
    pub live_rooms: usize,
}

impl HealthResponse {
    pub fn new(store_reachable: bool, live_rooms: usize) -> Self {
        let status = if store_reachable {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };
        Self { status, live_rooms }
    }
}
