//! Handlers for job submission and status.
//!
//! Every submission resolves its parameters, derives the job id from them,
//! hands the job to the scheduler, and answers `303 See Other` pointing at
//! the job's status URL, whether or not the job was new.

use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::Redirect;
use axum::{Form, Json};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use sdapi_core::error::CoreError;
use sdapi_core::generation::{GenerationParams, ImageToImageRequest, InpaintImageRequest, TextToImageRequest};
use sdapi_core::job::{job_key, JobType};
use sdapi_core::runner;
use sdapi_db::models::job_record::JobRecord;

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::uploads;

/// Multipart fields that are always strings, even when they look numeric.
const STRING_FIELDS: &[&str] = &["prompt"];

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /text-to-image
///
/// Accepts `application/json`, `multipart/form-data`, or
/// `application/x-www-form-urlencoded`.
pub async fn text_to_image(State(state): State<AppState>, request: Request) -> AppResult<Redirect> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let body: TextToImageRequest = if content_type.starts_with("application/json") {
        Json::<TextToImageRequest>::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?
            .0
    } else if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        let form = read_multipart(&state, multipart).await?;
        if form.image.is_some() || form.mask.is_some() {
            return Err(AppError::BadRequest("text-to-image takes no uploads".into()));
        }
        form.fields()?
    } else {
        Form::<TextToImageRequest>::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?
            .0
    };

    let params = state.environment.resolve_text_to_image(body)?;
    submit(&state, params).await
}

/// POST /image-to-image (multipart: `image` plus tuning fields)
pub async fn image_to_image(State(state): State<AppState>, multipart: Multipart) -> AppResult<Redirect> {
    let form = read_multipart(&state, multipart).await?;
    let body: ImageToImageRequest = form.fields()?;
    let image = form.image.ok_or_else(|| missing("image"))?;

    let params = state.environment.resolve_image_to_image(body, &image)?;
    submit(&state, params).await
}

/// POST /inpaint-image (multipart: `image`, `mask`, plus tuning fields)
pub async fn inpaint_image(State(state): State<AppState>, multipart: Multipart) -> AppResult<Redirect> {
    let form = read_multipart(&state, multipart).await?;
    let body: InpaintImageRequest = form.fields()?;
    let image = form.image.ok_or_else(|| missing("image"))?;
    let mask = form.mask.ok_or_else(|| missing("mask"))?;

    let params = state.environment.resolve_inpaint_image(body, &image, &mask)?;
    submit(&state, params).await
}

async fn submit(state: &AppState, params: GenerationParams) -> AppResult<Redirect> {
    let job_type = params.job_type();
    let id = params.fingerprint()?;
    let command = state.environment.command(&params, &id)?;

    let outcome = state
        .scheduler
        .submit(job_type, id.clone(), move || runner::run(command))
        .await?;
    tracing::info!(%job_type, job_id = %id, ?outcome, "Generation requested");

    Ok(Redirect::to(&format!("/{}", job_key(job_type, &id))))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /{job_type}/{id}
///
/// Mounted once per job type; see [`crate::routes::generation`].
pub async fn get_job(state: AppState, job_type: JobType, id: String) -> AppResult<Json<JobRecord>> {
    let record = state
        .scheduler
        .status(job_type, &id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            job_type: job_type.slug(),
            id,
        }))?;
    Ok(Json(record))
}

// ---------------------------------------------------------------------------
// Multipart helpers
// ---------------------------------------------------------------------------

/// Uploaded images plus the remaining text fields of a multipart form.
#[derive(Debug, Default)]
struct UploadForm {
    image: Option<std::path::PathBuf>,
    mask: Option<std::path::PathBuf>,
    text: Vec<(String, String)>,
}

impl UploadForm {
    /// Deserialize the text fields into a request type.
    fn fields<T: DeserializeOwned>(&self) -> AppResult<T> {
        serde_json::from_value(text_fields_to_json(&self.text))
            .map_err(|e| AppError::BadRequest(format!("Invalid form fields: {e}")))
    }
}

async fn read_multipart(state: &AppState, mut multipart: Multipart) -> AppResult<UploadForm> {
    let uploads_dir = state.config.uploads_dir();
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => form.image = Some(uploads::store_field(&uploads_dir, field).await?),
            "mask" => form.mask = Some(uploads::store_field(&uploads_dir, field).await?),
            "" => {}
            _ => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                form.text.push((name, value));
            }
        }
    }
    Ok(form)
}

/// Turn text form fields into a JSON object. Numeric and boolean literals
/// become JSON numbers and booleans, except for fields in [`STRING_FIELDS`].
fn text_fields_to_json(fields: &[(String, String)]) -> Value {
    let map: Map<String, Value> = fields
        .iter()
        .map(|(name, value)| {
            let json = if STRING_FIELDS.contains(&name.as_str()) {
                Value::String(value.clone())
            } else {
                serde_json::from_str::<Value>(value)
                    .ok()
                    .filter(|v| v.is_number() || v.is_boolean())
                    .unwrap_or_else(|| Value::String(value.clone()))
            };
            (name.clone(), json)
        })
        .collect();
    Value::Object(map)
}

fn missing(field: &str) -> AppError {
    AppError::BadRequest(format!("Missing '{field}' upload"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
