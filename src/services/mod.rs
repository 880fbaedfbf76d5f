/// Connection registry, single-instance limiter, and socket lifecycle.
pub mod connection_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Broadcast helpers for room events.
pub mod room_events;
/// Multiplayer coordinator: room operations and state recomputation.
pub mod room_service;
