/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Outbound real-time notifications of a room.
pub mod room_events;
/// Room creation, membership and departure.
pub mod room_service;
/// Round lifecycle driven by client actions and deadlines.
pub mod round_service;
/// Periodic deadline driver.
pub mod scheduler;
/// Participant sessions.
pub mod session_service;
/// WebSocket connection and message handling service.
pub mod websocket_service;
