pub mod generation;
pub mod health;
pub mod output;

use axum::Router;

use crate::config::ServerConfig;
use crate::state::AppState;

/// The full route tree, without middleware.
///
/// ```text
/// GET  /health
/// POST /text-to-image | /image-to-image | /inpaint-image   -> 303
/// GET  /{job_type}/{id}                                     -> job record
/// GET  /{job_type}/{id}/{index}.png  (fallback)             -> output file
/// ```
pub fn app_routes(config: &ServerConfig) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(generation::router(config.max_upload_bytes))
        .fallback(output::serve_output)
}
