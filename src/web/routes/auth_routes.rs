use axum::{extract::State, routing::post, Json, Router};
use std::sync::Arc;

use crate::services::auth_service;
use crate::web::models::{LoginRequest, LoginResponse};
use crate::web::{AppError, AppState};

async fn login_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let admin_key =
        auth_service::login_admin(&app_state.db, &payload.email, &payload.password, &app_state.config.jwt_secret)
            .await?;
    Ok(Json(LoginResponse { admin_key }))
}

pub fn create_auth_router() -> Router<Arc<AppState>> {
    Router::new().route("/login", post(login_handler))
}
