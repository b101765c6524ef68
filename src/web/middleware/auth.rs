use axum::{
    body::Body as AxumBody,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::services::auth_service;
use crate::web::models::AuthenticatedAdmin;
use crate::web::{AppState, error::AppError};

pub const ADMIN_KEY_HEADER: &str = "X-Admin-Key";

/// Admin routes accept the key either as `X-Admin-Key` or as a bearer token.
pub async fn auth(
    State(state): State<Arc<AppState>>,
    mut req: Request<AxumBody>,
    next: Next,
) -> Result<Response, AppError> {
    let key = req
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| {
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(|s| s.to_string())
        })
        .ok_or_else(|| AppError::Unauthorized("missing admin key".to_string()))?;

    let admin = auth_service::authenticate_admin(&state.db, &key, &state.config.jwt_secret).await?;
    req.extensions_mut().insert(AuthenticatedAdmin { id: admin.id, email: admin.email });
    Ok(next.run(req).await)
}
