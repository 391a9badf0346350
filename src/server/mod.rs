pub mod errors;
pub mod jobs;
pub mod routes;
pub mod state;

use axum::Router;
use state::AppState;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    routes::build_routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
