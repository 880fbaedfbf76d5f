use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok").
    pub status: String,
    /// Number of rooms currently tracked on this node.
    pub tracked_rooms: usize,
}

impl HealthResponse {
    pub fn ok(tracked_rooms: usize) -> Self {
        Self {
            status: "ok".to_string(),
            tracked_rooms,
        }
    }
}
