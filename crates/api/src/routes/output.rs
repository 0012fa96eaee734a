//! Static serving of generated images from the output directory.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::state::AppState;

/// Fallback handler: serve `<output_dir>/<path>`.
///
/// Paths with a dot-prefixed segment are refused so the store (`.database`)
/// and raw uploads (`.uploads`) are never exposed.
pub async fn serve_output(State(state): State<AppState>, request: Request) -> Response {
    if is_hidden(request.uri().path()) {
        return StatusCode::NOT_FOUND.into_response();
    }
    match ServeDir::new(&state.config.output_dir).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

fn is_hidden(path: &str) -> bool {
    path.split('/').any(|segment| {
        segment.starts_with('.') || segment.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("%2e"))
    })
}
