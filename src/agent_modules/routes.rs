use axum::{
    body::Body as AxumBody,
    extract::{DefaultBodyLimit, Path, State},
    http::{Request, StatusCode},
    middleware::{self as axum_middleware, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::agent_modules::executor::{ContainerExecutor, ExecutorError};
use crate::agent_modules::metrics::HostMetrics;
use crate::agent_protocol::{
    ActionResponse, AgentErrorBody, AgentHealth, LaunchRequest, LiveContainer, SERVER_KEY_HEADER,
};

/// Base64 inflates the bundle; leave room above the control plane's upload limit.
const MAX_LAUNCH_BODY_BYTES: usize = 96 * 1024 * 1024;

#[derive(Clone)]
pub struct AgentState {
    pub server_key: Arc<str>,
    pub executor: Arc<ContainerExecutor>,
    pub metrics: Arc<Mutex<HostMetrics>>,
}

impl IntoResponse for ExecutorError {
    fn into_response(self) -> Response {
        let status = match &self {
            ExecutorError::NotFound(_) => StatusCode::NOT_FOUND,
            ExecutorError::InvalidBundle(_) => StatusCode::BAD_REQUEST,
            ExecutorError::Runtime(_) | ExecutorError::Io(_) => {
                error!(error = %self, "Agent operation failed.");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(AgentErrorBody { error: self.to_string() })).into_response()
    }
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(AgentErrorBody { error: message.to_string() })).into_response()
}

/// Every agent route requires the host's key in `X-Server-Key`.
pub async fn require_server_key(
    State(state): State<AgentState>,
    req: Request<AxumBody>,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get(SERVER_KEY_HEADER)
        .map(|value| value.as_bytes().to_vec());
    match presented {
        Some(key) if bool::from(key.ct_eq(state.server_key.as_bytes())) => next.run(req).await,
        Some(_) => {
            warn!(path = %req.uri().path(), "Rejected call with a wrong server key.");
            unauthorized("invalid server key")
        }
        None => unauthorized("missing server key"),
    }
}

async fn list_handler(State(state): State<AgentState>) -> Result<Json<Vec<LiveContainer>>, ExecutorError> {
    Ok(Json(state.executor.list().await?))
}

async fn launch_handler(
    State(state): State<AgentState>,
    Json(request): Json<LaunchRequest>,
) -> Result<(StatusCode, Json<ActionResponse>), ExecutorError> {
    let resp = state.executor.launch(request).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

async fn restart_handler(
    State(state): State<AgentState>,
    Path(name): Path<String>,
) -> Result<Json<ActionResponse>, ExecutorError> {
    Ok(Json(state.executor.restart(&name).await?))
}

async fn delete_handler(
    State(state): State<AgentState>,
    Path(name): Path<String>,
) -> Result<Json<ActionResponse>, ExecutorError> {
    Ok(Json(state.executor.delete(&name).await?))
}

async fn health_handler(State(state): State<AgentState>) -> Result<Json<AgentHealth>, ExecutorError> {
    let sample = state.metrics.lock().await.sample();
    let running_containers = state.executor.running_count().await?;
    Ok(Json(AgentHealth {
        uptime_seconds: sample.uptime_seconds,
        running_containers,
        mem_percent: sample.mem_percent,
        cpu_percent: sample.cpu_percent,
    }))
}

pub fn create_agent_router(state: AgentState) -> Router {
    let agent = Router::new()
        .route(
            "/containers",
            get(list_handler).post(launch_handler).layer(DefaultBodyLimit::max(MAX_LAUNCH_BODY_BYTES)),
        )
        .route("/containers/{name}/restart", post(restart_handler))
        .route("/containers/{name}", delete(delete_handler))
        .route("/health", get(health_handler))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), require_server_key));

    Router::new()
        .nest("/agent", agent)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
