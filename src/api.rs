use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get},
};
use subtle::ConstantTimeEq;
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    admin::QueueAdminService,
    clients::health::HealthChecker,
    dead_letter::DeadLetterInbox,
    error::AdminError,
    models::{
        health::HealthStatus,
        message::DeadLetterRecord,
        response::{ApiResponse, QueueDepth},
    },
    monitor::QueueMonitor,
};

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

pub struct AppState {
    pub health_checker: HealthChecker,
    pub admin: QueueAdminService,
    pub monitor: QueueMonitor,
    pub inbox: Arc<DeadLetterInbox>,
    pub admin_token: Option<String>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route("/queues/purge/{queue_name}", delete(purge_queue))
        .route("/queues/purge-all", delete(purge_all_queues))
        .route("/queues/depths", get(queue_depths))
        .route("/queues/dead-letters", get(dead_letters))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/admin", admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    state: Arc<AppState>,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopped| *stopped).await;
        })
        .await?;

    info!("HTTP server stopped");

    Ok(())
}

async fn require_admin_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.admin_token {
        let provided = request
            .headers()
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());

        if !token_matches(expected, provided) {
            warn!(path = %request.uri().path(), "Rejected admin request without valid token");

            return (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::<()>::error(
                    "unauthorized".to_string(),
                    "A valid admin token is required".to_string(),
                )),
            )
                .into_response();
        }
    }

    next.run(request).await
}

/// Compared in constant time.
fn token_matches(expected: &str, provided: Option<&str>) -> bool {
    match provided {
        Some(provided) => expected.as_bytes().ct_eq(provided.as_bytes()).unwrap_u8() == 1,
        None => false,
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn purge_queue(
    State(state): State<Arc<AppState>>,
    Path(queue_name): Path<String>,
) -> Response {
    match state.admin.purge(&queue_name).await {
        Ok(result) => {
            let message = format!("Purged {} messages from {}", result.purged, result.queue);
            (StatusCode::OK, Json(ApiResponse::success(result, message))).into_response()
        }
        Err(e) => admin_error_response(e),
    }
}

async fn purge_all_queues(State(state): State<Arc<AppState>>) -> Response {
    match state.admin.purge_all().await {
        Ok(results) => {
            let total: u32 = results.iter().map(|result| result.purged).sum();
            let message = format!("Purged {} messages across {} queues", total, results.len());
            (StatusCode::OK, Json(ApiResponse::success(results, message))).into_response()
        }
        Err(e) => admin_error_response(e),
    }
}

async fn queue_depths(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<QueueDepth>>> {
    let depths = state.monitor.sample().await;

    Json(ApiResponse::success(depths, "Queue depths sampled".to_string()))
}

async fn dead_letters(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<DeadLetterRecord>>> {
    let records = state.inbox.records();
    let message = format!("{} dead-letter records", records.len());

    Json(ApiResponse::success(records, message))
}

fn admin_error_response(error: AdminError) -> Response {
    let status = match &error {
        AdminError::UnknownQueue(_) => StatusCode::NOT_FOUND,
        AdminError::Broker(_) => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status,
        Json(ApiResponse::<()>::error(
            error.to_string(),
            "Queue purge failed".to_string(),
        )),
    )
        .into_response()
}
