use axum::extract::{DefaultBodyLimit, Path, State};
use axum::routing::{get, post};
use axum::Router;

use sdapi_core::job::JobType;

use crate::handlers::generation;
use crate::state::AppState;

/// Submission and status routes for every job type.
///
/// ```text
/// POST /text-to-image          -> text_to_image
/// POST /image-to-image         -> image_to_image
/// POST /inpaint-image          -> inpaint_image
/// GET  /{job_type}/{id}        -> get_job
/// ```
pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    let mut router = Router::new()
        .route("/text-to-image", post(generation::text_to_image))
        .route("/image-to-image", post(generation::image_to_image))
        .route("/inpaint-image", post(generation::inpaint_image))
        .layer(DefaultBodyLimit::max(max_upload_bytes));

    for job_type in JobType::ALL {
        router = router.route(
            &format!("/{}/{{id}}", job_type.slug()),
            get(move |State(state): State<AppState>, Path(id): Path<String>| {
                generation::get_job(state, job_type, id)
            }),
        );
    }
    router
}
