use crate::{dto::health::HealthResponse, state::SharedState};

/// Report liveness together with the number of rooms tracked on this node.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    HealthResponse::ok(state.rooms().tracked_count())
}
