use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, header},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};

use super::{
    services::{
        create_download_task, delete_download_task, download_get, download_post,
        download_task_file, fetch_formats, get_download_task, health,
    },
    state::AppState,
};
use crate::config::{Config, ServerConfig, TaskConfig};
use crate::orchestrator::Orchestrator;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Full application router: health check plus the video endpoints nested
/// under the configured API prefix.
pub fn router(state: AppState) -> Router {
    let prefix = state.config.server.api_prefix.trim_end_matches('/').to_string();
    let cors = cors_layer(&state.config.server);

    let videos = Router::new()
        .route("/videos/formats", post(fetch_formats))
        .route("/videos/download", post(download_post).get(download_get))
        .route("/videos/download/tasks", post(create_download_task))
        .route(
            "/videos/download/tasks/{task_id}",
            get(get_download_task).delete(delete_download_task),
        )
        .route("/videos/download/tasks/{task_id}/file", get(download_task_file));

    let app = if prefix.is_empty() {
        Router::new().merge(videos)
    } else {
        Router::new().nest(&prefix, videos)
    };

    app.route("/health", get(health))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let layer = if server.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = server
            .cors_origins
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    layer
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION, HeaderName::from_static("x-format-id")])
}

/// Periodically drop tasks nobody collected.
fn spawn_sweeper(orchestrator: std::sync::Arc<Orchestrator>, tasks: &TaskConfig) -> tokio::task::JoinHandle<()> {
    let every = Duration::from_secs(tasks.sweep_interval_secs);
    let max_age = Duration::from_secs(tasks.stale_after_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = orchestrator.sweep_stale(max_age);
            debug!(removed, "Task sweep finished");
        }
    })
}

pub async fn run(config: Config, address: Option<SocketAddr>) -> Result<(), AnyError> {
    let address = address.unwrap_or(config.server.bind_addr);
    let tasks = config.tasks.clone();

    info!(engine = %config.engine.binary, prefix = %config.server.api_prefix, "Initializing orchestrator");
    let state = AppState::new(config);
    let sweeper = spawn_sweeper(state.orchestrator.clone(), &tasks);

    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "mediagate API listening");

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.abort();
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
