use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

/// Where the interactive documentation UI is mounted.
const DOCS_PATH: &str = "/docs";
/// Where the raw OpenAPI document is served.
const OPENAPI_PATH: &str = "/api-doc/openapi.json";

/// Serve the Swagger UI for the room server: the health route, the hub
/// upgrade endpoints, and the wire schemas clients exchange over them.
///
/// The hub protocol itself runs over WebSocket frames, so the document is
/// mostly useful for its schema catalogue (requests, server events, room
/// snapshots) rather than try-it-out calls.
pub fn router(state: SharedState) -> Router<SharedState> {
    let ui: Router<SharedState> = SwaggerUi::new(DOCS_PATH)
        .url(OPENAPI_PATH, ApiDoc::openapi())
        .into();

    ui.with_state(state)
}
