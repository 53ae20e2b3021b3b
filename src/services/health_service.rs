use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Ping the room store and count the rooms with live connections.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let store_reachable = match state.store().health_check().await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            false
        }
    };
    HealthResponse::new(store_reachable, state.hub().live_rooms().await)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, content::QuestionCatalog, dao::room_store::InMemoryRoomStore,
        dto::health::HealthStatus, state::AppState,
    };

    #[tokio::test]
    async fn in_memory_store_is_always_healthy() {
        let state = AppState::new(
            AppConfig::default(),
            QuestionCatalog::default(),
            Arc::new(InMemoryRoomStore::new()),
        );
        let health = health_status(&state).await;
        assert_eq!(health.status, HealthStatus::Ok);
        assert_eq!(health.live_rooms, 0);
    }
}
