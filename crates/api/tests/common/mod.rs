#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use sdapi_api::config::ServerConfig;
use sdapi_api::routes;
use sdapi_api::state::AppState;
use sdapi_db::DbPool;
use sdapi_events::EventBus;
use sdapi_worker::JobScheduler;

/// Stand-in generation script run with `sh`. Reports one image, writes it,
/// and exits cleanly.
pub const FAKE_SCRIPT: &str = r#"
while [ $# -gt 0 ]; do
  if [ "$1" = "--output" ]; then out="$2"; fi
  shift
done
echo 'Sampling:   0%|          | 0/1 [00:00<?, ?it/s]' >&2
echo 'PLMS Sampler:  50%|#####     | 4/8 [00:01<00:01]' >&2
touch "$out/1.png"
echo 'PLMS Sampler: 100%|##########| 8/8 [00:02<00:00]' >&2
echo 'Sampling: 100%|##########| 1/1 [00:02<00:00]' >&2
"#;

/// Build a test `ServerConfig` rooted in `dir`.
///
/// Every job type runs [`FAKE_SCRIPT`] under `sh`.
pub fn test_config(dir: &Path) -> ServerConfig {
    let scripts_dir = dir.join("scripts");
    let repository_dir = dir.join("repository");
    std::fs::create_dir_all(&scripts_dir).unwrap();
    std::fs::create_dir_all(&repository_dir).unwrap();
    for name in ["text-to-image.py", "image-to-image.py", "inpaint-image.py"] {
        std::fs::write(scripts_dir.join(name), FAKE_SCRIPT).unwrap();
    }

    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        concurrency: 1,
        delete_incomplete: false,
        output_dir: dir.join("output"),
        repository_dir,
        scripts_dir,
        text_to_image_model: dir.join("models/text-to-image.ckpt"),
        inpaint_image_model: dir.join("models/inpaint-image.ckpt"),
        python: "sh".to_string(),
        cors_origins: vec!["*".to_string()],
        request_timeout_secs: 30,
        max_upload_bytes: 1024 * 1024,
    }
}

/// A running application plus handles the tests inspect.
pub struct TestApp {
    pub router: Router,
    pub scheduler: Arc<JobScheduler>,
    pub pool: DbPool,
    pub config: ServerConfig,
    _dir: TempDir,
}

/// Build the full application router with all middleware layers over a
/// fresh job store in a temporary directory.
///
/// This mirrors the router construction in `main.rs` so integration tests
/// exercise the same middleware stack that production uses.
pub async fn build_test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::create_dir_all(&config.output_dir).unwrap();

    let pool = sdapi_db::create_pool(&config.store_dir()).await.unwrap();
    sdapi_db::run_migrations(&pool).await.unwrap();

    let scheduler = Arc::new(JobScheduler::new(
        pool.clone(),
        Arc::new(EventBus::default()),
        config.concurrency,
    ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let request_id_header = HeaderName::from_static("x-request-id");

    let router = routes::app_routes(&config)
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(AppState::new(pool.clone(), config.clone(), Arc::clone(&scheduler)));

    TestApp {
        router,
        scheduler,
        pool,
        config,
        _dir: dir,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, json: serde_json::Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_form(app: Router, uri: &str, form: &str) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// One part of a multipart body: `(name, content type, bytes)`. Text fields
/// pass `None` for the content type.
pub type Part<'a> = (&'a str, Option<&'a str>, &'a [u8]);

const BOUNDARY: &str = "sdapi-test-boundary";

pub async fn post_multipart(app: Router, uri: &str, parts: &[Part<'_>]) -> Response {
    let mut body = Vec::new();
    for (name, content_type, bytes) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match content_type {
            Some(ct) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{name}\"\r\nContent-Type: {ct}\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// The `Location` header of a redirect.
pub fn location(response: &Response) -> String {
    response
        .headers()
        .get("location")
        .expect("redirect has a Location header")
        .to_str()
        .unwrap()
        .to_string()
}
