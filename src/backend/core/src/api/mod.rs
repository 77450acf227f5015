//! HTTP and WebSocket surface.
//!
//! Thin axum adapters over the service facade. Every REST response uses
//! the `{code, message, data}` envelope with `code=0` on success.

mod handlers;
mod ws;

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};

use crate::app::TaskHub;
use crate::error::{ErrorCode, TaskHubError};

/// Application state shared across handlers.
pub type AppState = Arc<TaskHub>;

/// Build the full router: public endpoints (login, worker membership, WS,
/// health) plus the token-protected API.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let public = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/login", post(handlers::login))
        .route("/api/workers/register", post(handlers::workers_register))
        .route("/api/workers/heartbeat", post(handlers::workers_heartbeat))
        .route("/api/worker/execute", post(handlers::worker_execute))
        .route("/ws", get(ws::ws_handler));

    let protected = Router::new()
        .route("/api/tasks", post(handlers::create_task).get(handlers::list_tasks))
        .route("/api/tasks/logs", get(handlers::task_logs))
        .route("/api/tasks/:id", get(handlers::task_detail))
        .route("/api/tasks/:id/cancel", post(handlers::cancel_task))
        .route("/api/dag/run", post(handlers::run_dag))
        .route("/api/dag/run_async", post(handlers::run_dag_async))
        .route("/api/dag/runs", get(handlers::query_dag_runs))
        .route("/api/dag/task_runs", get(handlers::query_task_runs))
        .route("/api/dag/events", get(handlers::query_task_events))
        .route("/template", post(handlers::register_template))
        .route("/template/:id", get(handlers::get_template).delete(handlers::delete_template))
        .route("/templates", get(handlers::list_templates))
        .route("/template/render", post(handlers::render_template))
        .route("/template/run", post(handlers::run_template))
        .route("/api/workers", get(handlers::workers_list))
        .route("/api/cron/jobs", post(handlers::create_cron_job).get(handlers::list_cron_jobs))
        .route("/api/cron/jobs/:id", delete(handlers::delete_cron_job))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    public
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bearer-token gate for the protected API.
async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, TaskHubError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| request.headers().get("token").and_then(|v| v.to_str().ok()));

    let Some(token) = token else {
        return Err(TaskHubError::new(ErrorCode::Unauthorized, "missing token"));
    };
    if state.auth.validate(token).is_none() {
        return Err(TaskHubError::new(ErrorCode::Unauthorized, "invalid or expired token"));
    }
    Ok(next.run(request).await)
}
