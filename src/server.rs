use anyhow::{Context, Result};
use axum::{middleware, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    capture::{api_logger_middleware, ApiLogger},
    config::Config,
    handlers::{self, logs_api::LogApiState},
    store::{spawn_cleanup_task, LogDb, RetentionJob},
};

/// Start the API logger server
///
/// This function:
/// 1. Opens the log database and runs migrations
/// 2. Compiles the capture pipeline (fails fast on bad config)
/// 3. Schedules the retention sweep if a window is configured
/// 4. Serves until SIGINT/SIGTERM, then drains the log queue
pub async fn start_server(config: Config) -> Result<()> {
    let db = Arc::new(LogDb::open(&config.database).await?);
    info!(path = %config.database.path, "API log database ready");

    let logger = Arc::new(
        ApiLogger::from_config(&config.logger, db.clone())
            .context("Invalid [logger] configuration")?,
    );

    if let Some(days) = config.logger.retention_window() {
        let job = Arc::new(RetentionJob::new(db.clone(), days));
        spawn_cleanup_task(job, config.logger.cleanup_hour);
        info!(
            retention_days = days,
            cleanup_hour = config.logger.cleanup_hour,
            "Retention sweep scheduled"
        );
    } else {
        info!("Retention sweep disabled");
    }

    let state = LogApiState {
        db,
        slow_threshold_ms: config.logger.slow_request_threshold_ms,
    };
    let app = create_router(logger.clone(), state);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting API logger on {}", addr);
    info!(
        enabled = config.logger.enabled,
        queued = config.logger.use_queue,
        "Capture pipeline configured"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Draining pending log records...");
    logger.sink().flush().await;
    let dropped = logger.sink().dropped();
    if dropped > 0 {
        warn!(dropped = dropped, "Log records were dropped due to queue overflow");
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Create the Axum router with all routes and middleware
///
/// Only the `/api` routes pass through the capture middleware; the
/// management API and health check are not recorded. The captured routes are
/// merged rather than nested so the middleware sees the full request path.
pub fn create_router(logger: Arc<ApiLogger>, state: LogApiState) -> Router {
    let captured = handlers::demo::routes().layer(middleware::from_fn_with_state(
        logger,
        api_logger_middleware,
    ));

    Router::new()
        .route("/health", get(health_check))
        .merge(captured)
        .merge(handlers::logs_api::routes(state))
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received, initiating graceful shutdown"),
        _ = terminate => info!("SIGTERM received, initiating graceful shutdown"),
    }
}
