use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the Tempo room server.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::websocket::multiplayer_handler,
        crate::routes::websocket::spectator_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::ws::ClientRequest,
            crate::dto::ws::MatchRequest,
            crate::dto::ws::MatchServerEvent,
            crate::dto::ws::ServerEvent,
            crate::dto::room::RoomSnapshot,
            crate::dto::room::RoomUserSnapshot,
            crate::dto::room::PlaylistItemSnapshot,
            crate::dto::room::PlaylistItemInput,
            crate::dto::room::CountdownSnapshot,
            crate::state::room::RoomSettings,
            crate::state::room::UserState,
            crate::state::room::RoomState,
            crate::state::room::MatchType,
            crate::state::room::QueueMode,
            crate::state::room::Mod,
            crate::state::room::BeatmapAvailability,
            crate::state::room::MatchUserState,
            crate::state::match_type::MatchRoomState,
            crate::state::match_type::MatchTeam,
            crate::state::countdown::CountdownKind,
            crate::state::hub::HubKind,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "hubs", description = "WebSocket hub endpoints for game clients"),
    )
)]
pub struct ApiDoc;
