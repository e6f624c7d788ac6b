use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use server_api::{
    action_stats, bulk_approve, bulk_reject, create_action, create_meeting, delete_action,
    due_soon_actions, list_actions, list_meetings, overdue_actions, pending_actions,
    send_to_system, sync_workflow, transition_action, update_action, ApiContext,
};
use shared::{
    domain::{Action, ActionId, Meeting, MeetingId, Transition},
    error::{ApiError, ErrorCode},
    protocol::{
        ActionStats, BulkActionRequest, CompletionRequest, CreateActionRequest,
        CreateMeetingRequest, SendToSystemRequest, SendToSystemResponse, SyncResponse,
        TransitionNoteRequest, TransitionResponse, UpdateActionRequest,
    },
};
use storage::Storage;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;
mod integrations;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

type HttpResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let (workflow, dispatcher) = integrations::from_settings(&settings)?;
    let api = ApiContext {
        storage,
        workflow,
        dispatcher,
    };

    let app = build_router(Arc::new(AppState { api }));

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/meetings", get(http_list_meetings).post(http_create_meeting))
        .route(
            "/meetings/:meeting_id/actions",
            get(http_list_actions).post(http_create_action),
        )
        .route("/meetings/:meeting_id/actions/stats", get(http_action_stats))
        .route("/meetings/:meeting_id/actions/pending", get(http_pending_actions))
        .route("/meetings/:meeting_id/actions/sync-n8n", post(http_sync_n8n))
        .route("/actions/bulk-approve", post(http_bulk_approve))
        .route("/actions/bulk-reject", post(http_bulk_reject))
        .route("/actions/overdue", get(http_overdue_actions))
        .route("/actions/due-soon", get(http_due_soon_actions))
        .route(
            "/actions/:action_id",
            put(http_update_action).delete(http_delete_action),
        )
        .route("/actions/:action_id/approve", put(http_approve))
        .route("/actions/:action_id/reject", put(http_reject))
        .route("/actions/:action_id/complete", put(http_complete))
        .route("/actions/:action_id/send", post(http_send_to_system));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api)
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state.api.storage.health_check().await.map_err(|error| {
        warn!(%error, "health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok("ok")
}

async fn http_list_meetings(State(state): State<Arc<AppState>>) -> HttpResult<Vec<Meeting>> {
    let meetings = list_meetings(&state.api).await.map_err(reply_error)?;
    Ok(Json(meetings))
}

async fn http_create_meeting(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateMeetingRequest>,
) -> HttpResult<Meeting> {
    let meeting = create_meeting(&state.api, req).await.map_err(reply_error)?;
    Ok(Json(meeting))
}

async fn http_list_actions(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<i64>,
) -> HttpResult<Vec<Action>> {
    let actions = list_actions(&state.api, MeetingId(meeting_id))
        .await
        .map_err(reply_error)?;
    Ok(Json(actions))
}

async fn http_create_action(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<i64>,
    Json(req): Json<CreateActionRequest>,
) -> HttpResult<Action> {
    let action = create_action(&state.api, MeetingId(meeting_id), req)
        .await
        .map_err(reply_error)?;
    Ok(Json(action))
}

async fn http_action_stats(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<i64>,
) -> HttpResult<ActionStats> {
    let stats = action_stats(&state.api, MeetingId(meeting_id))
        .await
        .map_err(reply_error)?;
    Ok(Json(stats))
}

async fn http_sync_n8n(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<i64>,
) -> HttpResult<SyncResponse> {
    let response = sync_workflow(&state.api, MeetingId(meeting_id))
        .await
        .map_err(reply_error)?;
    Ok(Json(response))
}

async fn http_update_action(
    State(state): State<Arc<AppState>>,
    Path(action_id): Path<String>,
    Json(req): Json<UpdateActionRequest>,
) -> HttpResult<Action> {
    let action = update_action(&state.api, &ActionId(action_id), req)
        .await
        .map_err(reply_error)?;
    Ok(Json(action))
}

async fn http_delete_action(
    State(state): State<Arc<AppState>>,
    Path(action_id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    delete_action(&state.api, &ActionId(action_id))
        .await
        .map_err(reply_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// Note bodies are optional; a missing or empty body means "no note".
async fn http_approve(
    State(state): State<Arc<AppState>>,
    Path(action_id): Path<String>,
    body: Option<Json<TransitionNoteRequest>>,
) -> HttpResult<TransitionResponse> {
    let notes = body.and_then(|Json(req)| req.notes);
    run_transition(&state, action_id, Transition::Approve, notes).await
}

async fn http_reject(
    State(state): State<Arc<AppState>>,
    Path(action_id): Path<String>,
    body: Option<Json<TransitionNoteRequest>>,
) -> HttpResult<TransitionResponse> {
    let notes = body.and_then(|Json(req)| req.notes);
    run_transition(&state, action_id, Transition::Reject, notes).await
}

async fn http_complete(
    State(state): State<Arc<AppState>>,
    Path(action_id): Path<String>,
    body: Option<Json<CompletionRequest>>,
) -> HttpResult<TransitionResponse> {
    let notes = body.and_then(|Json(req)| req.completion_notes);
    run_transition(&state, action_id, Transition::Complete, notes).await
}

async fn run_transition(
    state: &AppState,
    action_id: String,
    transition: Transition,
    notes: Option<String>,
) -> HttpResult<TransitionResponse> {
    let response = transition_action(&state.api, &ActionId(action_id), transition, notes)
        .await
        .map_err(reply_error)?;
    Ok(Json(response))
}

async fn http_send_to_system(
    State(state): State<Arc<AppState>>,
    Path(action_id): Path<String>,
    Json(req): Json<SendToSystemRequest>,
) -> HttpResult<SendToSystemResponse> {
    let response = send_to_system(&state.api, &ActionId(action_id), req)
        .await
        .map_err(reply_error)?;
    Ok(Json(response))
}

async fn http_bulk_approve(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkActionRequest>,
) -> HttpResult<Vec<Action>> {
    let approved = bulk_approve(&state.api, req).await.map_err(reply_error)?;
    Ok(Json(approved))
}

async fn http_bulk_reject(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkActionRequest>,
) -> HttpResult<Vec<Action>> {
    let rejected = bulk_reject(&state.api, req).await.map_err(reply_error)?;
    Ok(Json(rejected))
}

async fn http_pending_actions(
    State(state): State<Arc<AppState>>,
    Path(meeting_id): Path<i64>,
) -> HttpResult<Vec<Action>> {
    let actions = pending_actions(&state.api, MeetingId(meeting_id))
        .await
        .map_err(reply_error)?;
    Ok(Json(actions))
}

async fn http_overdue_actions(State(state): State<Arc<AppState>>) -> HttpResult<Vec<Action>> {
    let actions = overdue_actions(&state.api).await.map_err(reply_error)?;
    Ok(Json(actions))
}

#[derive(Debug, Deserialize)]
struct DueSoonQuery {
    #[serde(default = "default_due_soon_days")]
    days: u32,
}

fn default_due_soon_days() -> u32 {
    7
}

async fn http_due_soon_actions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DueSoonQuery>,
) -> HttpResult<Vec<Action>> {
    let actions = due_soon_actions(&state.api, query.days)
        .await
        .map_err(reply_error)?;
    Ok(Json(actions))
}

fn reply_error(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Upstream => StatusCode::BAD_GATEWAY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(code = ?err.code, message = %err.message, "request failed");
    } else {
        warn!(code = ?err.code, message = %err.message, "request rejected");
    }
    (status, Json(err))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
