use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::entities::container;
use crate::server::orchestrator::{ContainerDetails, LaunchedContainer};
use crate::web::models::LaunchQuery;
use crate::web::{AppError, AppState};

/// Upper bound for an uploaded compose bundle.
pub const MAX_BUNDLE_BYTES: usize = 64 * 1024 * 1024;

async fn launch_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<LaunchQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<LaunchedContainer>), AppError> {
    let launched = app_state.orchestrator.launch(query.user_id, &body).await?;
    Ok((StatusCode::ACCEPTED, Json(launched)))
}

async fn list_handler(State(app_state): State<Arc<AppState>>) -> Result<Json<Vec<container::Model>>, AppError> {
    Ok(Json(app_state.orchestrator.list().await?))
}

async fn inspect_handler(
    State(app_state): State<Arc<AppState>>,
    Path(container_id): Path<Uuid>,
) -> Result<Json<ContainerDetails>, AppError> {
    Ok(Json(app_state.orchestrator.inspect(container_id).await?))
}

async fn restart_handler(
    State(app_state): State<Arc<AppState>>,
    Path(container_id): Path<Uuid>,
) -> Result<Json<container::Model>, AppError> {
    Ok(Json(app_state.orchestrator.restart(container_id).await?))
}

async fn stop_handler(
    State(app_state): State<Arc<AppState>>,
    Path(container_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    app_state.orchestrator.stop(container_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn create_containers_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_handler))
        .route("/launch", post(launch_handler).layer(DefaultBodyLimit::max(MAX_BUNDLE_BYTES)))
        .route("/{container_id}", get(inspect_handler).delete(stop_handler))
        .route("/{container_id}/restart", post(restart_handler))
}
