/// Database model definitions.
pub mod models;
/// Room, membership and answer storage.
pub mod room_store;
/// Storage abstraction layer for database operations.
pub mod storage;
