use axum::Router;

use crate::state::SharedState;

/// Class routes.
pub mod classes;
/// Swagger UI and OpenAPI document.
pub mod docs;
/// Entry routes.
pub mod entries;
/// Health route.
pub mod health;
/// SSE stream.
pub mod sse;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sse::router())
        .merge(entries::router())
        .merge(classes::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
