use axum::{
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::agent_protocol::{AgentHealth, HeartbeatAck, HeartbeatRequest, SERVER_KEY_HEADER};
use crate::db::entities::{container, host};
use crate::db::services::container_service;
use crate::db::services::host_service::{self, HostStatusSnapshot};
use crate::services::auth_service;
use crate::web::models::{validate_heartbeat, AuthenticatedAdmin, CreateHostRequest, RegisteredHostResponse, UpdateHostRequest};
use crate::web::{AppError, AppState};

async fn list_hosts_handler(State(app_state): State<Arc<AppState>>) -> Result<Json<Vec<host::Model>>, AppError> {
    Ok(Json(host_service::list_hosts(&app_state.db).await?))
}

async fn create_host_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthenticatedAdmin>,
    Json(payload): Json<CreateHostRequest>,
) -> Result<(StatusCode, Json<RegisteredHostResponse>), AppError> {
    let spec = payload.validate()?;
    let (host, server_key) = host_service::register_host(&app_state.db, spec, &app_state.config.jwt_secret).await?;
    info!(host_id = %host.id, admin = %admin.email, "Host registered through the API.");
    Ok((StatusCode::CREATED, Json(RegisteredHostResponse { host, server_key })))
}

async fn update_host_handler(
    State(app_state): State<Arc<AppState>>,
    Path(host_id): Path<Uuid>,
    Json(payload): Json<UpdateHostRequest>,
) -> Result<Json<host::Model>, AppError> {
    let update = payload.validate()?;
    Ok(Json(host_service::update_host(&app_state.db, host_id, update).await?))
}

async fn delete_host_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthenticatedAdmin>,
    Path(host_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    app_state.orchestrator.deregister_host(host_id).await?;
    info!(host_id = %host_id, admin = %admin.email, admin_id = %admin.id, "Host deregistered through the API.");
    Ok(StatusCode::NO_CONTENT)
}

async fn host_status_handler(
    State(app_state): State<Arc<AppState>>,
    Path(host_id): Path<Uuid>,
) -> Result<Json<HostStatusSnapshot>, AppError> {
    Ok(Json(host_service::get_host_status(&app_state.db, host_id).await?))
}

async fn host_containers_handler(
    State(app_state): State<Arc<AppState>>,
    Path(host_id): Path<Uuid>,
) -> Result<Json<Vec<container::Model>>, AppError> {
    host_service::get_host(&app_state.db, host_id).await?;
    Ok(Json(container_service::list_containers_on_host(&app_state.db, host_id).await?))
}

async fn agent_health_handler(
    State(app_state): State<Arc<AppState>>,
    Path(host_id): Path<Uuid>,
) -> Result<Json<AgentHealth>, AppError> {
    Ok(Json(app_state.orchestrator.probe_host(host_id).await?))
}

/// Authenticated by the host's own server key rather than an admin key.
async fn heartbeat_handler(
    State(app_state): State<Arc<AppState>>,
    Path(host_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatAck>, AppError> {
    let key = headers
        .get(SERVER_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing server key".to_string()))?;
    auth_service::authenticate_server(&app_state.db, host_id, key, &app_state.config.jwt_secret).await?;
    validate_heartbeat(&payload)?;

    host_service::record_heartbeat(&app_state.db, host_id, payload, Utc::now()).await?;
    Ok(Json(HeartbeatAck { ack: true }))
}

pub fn create_hosts_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_hosts_handler).post(create_host_handler))
        .route("/{host_id}", patch(update_host_handler).delete(delete_host_handler))
        .route("/{host_id}/status", get(host_status_handler))
        .route("/{host_id}/containers", get(host_containers_handler))
        .route("/{host_id}/agent", get(agent_health_handler))
}

pub fn create_heartbeat_router() -> Router<Arc<AppState>> {
    Router::new().route("/hosts/{host_id}/heartbeat", post(heartbeat_handler))
}
