use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, post},
    Json, Router,
};
use std::sync::Arc;

use crate::vpn::allocator::IdentityBundle;
use crate::vpn::{retire_identity, rotate_identity};
use crate::web::models::CreateVpnRequest;
use crate::web::{AppError, AppState};

pub const OVPN_CONTENT_TYPE: &str = "application/x-openvpn-profile";

async fn profile_response(bundle: &IdentityBundle) -> Result<Response, AppError> {
    let profile = tokio::fs::read(&bundle.config_path)
        .await
        .map_err(|e| AppError::InternalServerError(format!("cannot read profile of {}: {e}", bundle.client_name)))?;
    let disposition = format!("attachment; filename=\"{}.ovpn\"", bundle.client_name);
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, OVPN_CONTENT_TYPE.to_string()), (header::CONTENT_DISPOSITION, disposition)],
        profile,
    )
        .into_response())
}

async fn create_profile_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateVpnRequest>,
) -> Result<Response, AppError> {
    let bundle = app_state.identities.ensure_identity(&payload.client_name).await?;
    profile_response(&bundle).await
}

async fn rotate_profile_handler(
    State(app_state): State<Arc<AppState>>,
    Path(client_name): Path<String>,
) -> Result<Response, AppError> {
    let bundle = rotate_identity(&app_state.identities, app_state.rules.as_ref(), &client_name).await?;
    profile_response(&bundle).await
}

async fn delete_profile_handler(
    State(app_state): State<Arc<AppState>>,
    Path(client_name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let revoked = retire_identity(&app_state.identities, app_state.rules.as_ref(), &client_name).await?;
    if revoked == 0 {
        return Err(AppError::NotFound(format!("no active VPN profile for '{client_name}'")));
    }
    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

pub fn create_vpn_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/vpn", post(create_profile_handler))
        .route("/vpn/{client_name}/rotate", post(rotate_profile_handler))
        .route("/vpn/{client_name}", delete(delete_profile_handler))
}
