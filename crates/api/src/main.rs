use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sdapi_api::config::ServerConfig;
use sdapi_api::routes;
use sdapi_api::state::AppState;
use sdapi_db::repositories::JobRecordRepo;
use sdapi_events::EventBus;
use sdapi_worker::JobScheduler;

/// Upper bound on waiting for workers after the server stops.
const SCHEDULER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "sdapi_api=debug,sdapi_worker=debug,sdapi_core=info,tower_http=debug".into()
    });
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = config.port,
        concurrency = config.concurrency,
        output_dir = %config.output_dir.display(),
        "Loaded server configuration",
    );

    std::fs::create_dir_all(&config.output_dir).expect("Failed to create output directory");

    // --- Job store ---
    let pool = sdapi_db::create_pool(&config.store_dir())
        .await
        .expect("Failed to open job store");

    sdapi_db::run_migrations(&pool)
        .await
        .expect("Failed to run job store migrations");
    tracing::info!("Job store migrations applied");

    sdapi_db::health_check(&pool)
        .await
        .expect("Job store health check failed");

    // --- Recovery ---
    if config.delete_incomplete {
        let deleted = JobRecordRepo::delete_all_incomplete(&pool)
            .await
            .expect("Failed to delete incomplete jobs");
        tracing::info!(deleted, "Deleted incomplete jobs");
    }
    match JobRecordRepo::count_by_status(&pool).await {
        Ok(counts) => {
            for (status, count) in counts {
                tracing::info!(%status, count, "Existing jobs");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to count existing jobs"),
    }

    // --- Scheduler ---
    let event_bus = Arc::new(EventBus::default());
    let scheduler = Arc::new(JobScheduler::new(
        pool.clone(),
        Arc::clone(&event_bus),
        config.concurrency,
    ));

    // --- CORS ---
    let cors = build_cors_layer(&config);

    // --- Request ID header name ---
    let request_id_header = HeaderName::from_static("x-request-id");

    let request_timeout = Duration::from_secs(config.request_timeout_secs);
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    let routes = routes::app_routes(&config);
    let state = AppState::new(pool, config, Arc::clone(&scheduler));

    // --- Router ---
    let app = routes
        // -- Middleware stack (applied bottom-up) --
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state);

    // --- Start server ---
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, stopping workers");
    if tokio::time::timeout(SCHEDULER_SHUTDOWN_TIMEOUT, scheduler.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("Workers did not stop in time");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Build the CORS middleware layer from server configuration.
///
/// Panics at startup if any configured origin is invalid.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    if config.cors_allows_any() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();
    layer.allow_origin(origins)
}
