use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;

use crate::{services::connection_service, state::SharedState, state::hub::HubKind};

/// Transport-provided identity for a hub connection. Token validation itself
/// happens upstream; the server only compares the opaque value for instance
/// equality.
#[derive(Debug, Deserialize)]
pub struct HubConnectQuery {
    pub user_id: i64,
    pub token: String,
}

#[utoipa::path(
    get,
    path = "/hub/multiplayer",
    responses((status = 101, description = "Switching protocols to WebSocket"))
)]
/// Upgrade the HTTP connection into a multiplayer hub session.
pub async fn multiplayer_handler(
    State(state): State<SharedState>,
    Query(query): Query<HubConnectQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection_service::handle_socket(
            state,
            socket,
            query.user_id,
            query.token,
            HubKind::Multiplayer,
        )
    })
}

#[utoipa::path(
    get,
    path = "/hub/spectator",
    responses((status = 101, description = "Switching protocols to WebSocket"))
)]
/// Upgrade the HTTP connection into a spectator hub session.
pub async fn spectator_handler(
    State(state): State<SharedState>,
    Query(query): Query<HubConnectQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection_service::handle_socket(
            state,
            socket,
            query.user_id,
            query.token,
            HubKind::Spectator,
        )
    })
}

/// Configure the hub WebSocket endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/hub/multiplayer", get(multiplayer_handler))
        .route("/hub/spectator", get(spectator_handler))
}
