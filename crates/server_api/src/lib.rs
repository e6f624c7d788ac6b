pub mod integrations;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use shared::{
    domain::{
        Action, ActionId, ActionStatus, Assignee, AuditTrail, ExternalIds, Meeting, MeetingId,
        Transition,
    },
    error::{ApiError, ApiException, ErrorCode},
    protocol::{
        ActionStats, BulkActionRequest, CreateActionRequest, CreateMeetingRequest,
        SendToSystemRequest, SendToSystemResponse, SyncResponse, TransitionResponse,
        UpdateActionRequest, SYNC_STATUS_SUCCESS, SYNC_STATUS_UNAVAILABLE,
    },
};
use storage::Storage;
use tracing::{info, warn};
use uuid::Uuid;

use crate::integrations::{
    operation_to_action, DisabledWorkflow, ExternalDispatcher, UnconfiguredDispatcher,
    WorkflowFetch, WorkflowSource,
};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub workflow: Arc<dyn WorkflowSource>,
    pub dispatcher: Arc<dyn ExternalDispatcher>,
}

impl ApiContext {
    /// Context with every external integration switched off.
    pub fn offline(storage: Storage) -> Self {
        Self {
            storage,
            workflow: Arc::new(DisabledWorkflow),
            dispatcher: Arc::new(UnconfiguredDispatcher),
        }
    }
}

pub async fn list_meetings(ctx: &ApiContext) -> Result<Vec<Meeting>, ApiError> {
    ctx.storage.list_meetings().await.map_err(internal)
}

pub async fn create_meeting(
    ctx: &ApiContext,
    request: CreateMeetingRequest,
) -> Result<Meeting, ApiError> {
    if request.title.trim().is_empty() {
        return Err(ApiError::validation("meeting title is required"));
    }
    let meeting = ctx
        .storage
        .insert_meeting(request)
        .await
        .map_err(internal)?;
    info!(meeting_id = %meeting.id, "meeting created");
    Ok(meeting)
}

pub async fn list_actions(ctx: &ApiContext, meeting_id: MeetingId) -> Result<Vec<Action>, ApiError> {
    ctx.storage.list_actions(meeting_id).await.map_err(internal)
}

pub async fn create_action(
    ctx: &ApiContext,
    meeting_id: MeetingId,
    request: CreateActionRequest,
) -> Result<Action, ApiError> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(ApiError::validation("action title is required"));
    }

    let now = Utc::now();
    let action = Action {
        id: ActionId::new(Uuid::new_v4().to_string()),
        meeting_id,
        title: title.to_string(),
        description: non_empty(request.description),
        status: ActionStatus::New,
        priority: request.priority,
        source: request.source,
        action_type: request.action_type,
        target_system: request.target_system,
        assignee: Assignee {
            assignee_name: non_empty(request.assignee_name),
            assignee_email: non_empty(request.assignee_email),
            assignee_id: None,
        },
        due_date: request.due_date,
        external_ids: ExternalIds::default(),
        audit: AuditTrail {
            created_at: Some(now),
            updated_at: Some(now),
            ..AuditTrail::default()
        },
        notes: non_empty(request.notes),
        approval_notes: None,
        rejection_notes: None,
        completion_notes: None,
        tags: request.tags,
    };
    ctx.storage.insert_action(&action).await.map_err(internal)?;
    info!(action_id = %action.id, meeting_id = %meeting_id, source = %action.source, "action created");
    Ok(action)
}

pub async fn update_action(
    ctx: &ApiContext,
    action_id: &ActionId,
    request: UpdateActionRequest,
) -> Result<Action, ApiError> {
    let mut action = load_action(ctx, action_id).await?;
    let loaded_status = action.status;

    if let Some(title) = request.title {
        let title = title.trim();
        if title.is_empty() {
            return Err(ApiError::validation("action title cannot be blank"));
        }
        action.title = title.to_string();
    }
    if let Some(description) = request.description {
        action.description = non_empty(Some(description));
    }
    if let Some(priority) = request.priority {
        action.priority = priority;
    }
    if let Some(action_type) = request.action_type {
        action.action_type = action_type;
    }
    if let Some(target_system) = request.target_system {
        action.target_system = Some(target_system);
    }
    if let Some(name) = request.assignee_name {
        action.assignee.assignee_name = non_empty(Some(name));
    }
    if let Some(email) = request.assignee_email {
        action.assignee.assignee_email = non_empty(Some(email));
    }
    if let Some(due_date) = request.due_date {
        action.due_date = Some(due_date);
    }
    if let Some(notes) = request.notes {
        action.notes = non_empty(Some(notes));
    }
    if let Some(tags) = request.tags {
        action.tags = tags;
    }
    action.audit.updated_at = Some(Utc::now());

    store_existing(ctx, &action, loaded_status).await?;
    info!(action_id = %action.id, "action updated");
    Ok(action)
}

/// Applies a lifecycle step after checking it against the stored status.
pub async fn transition_action(
    ctx: &ApiContext,
    action_id: &ActionId,
    transition: Transition,
    note: Option<String>,
) -> Result<TransitionResponse, ApiError> {
    let mut action = load_action(ctx, action_id).await?;
    let prior = action.status;
    apply_transition(&mut action, transition, non_empty(note))?;
    store_existing(ctx, &action, prior).await?;

    info!(action_id = %action.id, %transition, status = %action.status, "action transitioned");
    Ok(TransitionResponse {
        success: true,
        message: transition_message(transition).to_string(),
        action: Some(action),
    })
}

pub async fn delete_action(ctx: &ApiContext, action_id: &ActionId) -> Result<(), ApiError> {
    let deleted = ctx
        .storage
        .delete_action(action_id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err(ApiError::not_found(format!("action {action_id} not found")));
    }
    info!(action_id = %action_id, "action deleted");
    Ok(())
}

pub async fn send_to_system(
    ctx: &ApiContext,
    action_id: &ActionId,
    request: SendToSystemRequest,
) -> Result<SendToSystemResponse, ApiError> {
    let system = request.target_system;
    if !system.is_external() {
        return Err(ApiError::validation(format!(
            "{} is not an external system",
            system.as_str()
        )));
    }

    let mut action = load_action(ctx, action_id).await?;
    if action.status.is_terminal() {
        return Err(ApiError::new(
            ErrorCode::Conflict,
            format!("cannot send a {} action", action.status),
        ));
    }

    let receipt = ctx
        .dispatcher
        .dispatch(system, &action, &request.extra)
        .await
        .map_err(internal)?;

    let now = Utc::now();
    action.target_system = Some(system);
    action.external_ids.record(system, &receipt.external_id);
    action.audit.sent_to_system_at = Some(now);
    action.audit.updated_at = Some(now);
    store_existing(ctx, &action, action.status).await?;

    info!(action_id = %action.id, target = %system, external_id = %receipt.external_id, "action sent");
    Ok(SendToSystemResponse {
        success: true,
        message: receipt
            .message
            .unwrap_or_else(|| format!("Action sent to {}", system.label())),
        external_id: Some(receipt.external_id),
    })
}

/// Imports the workflow engine's pending operations for a meeting.
///
/// Operations already imported for the meeting are skipped, so repeated syncs do not
/// duplicate actions.
pub async fn sync_workflow(ctx: &ApiContext, meeting_id: MeetingId) -> Result<SyncResponse, ApiError> {
    let operations = match ctx.workflow.fetch_pending(meeting_id).await.map_err(internal)? {
        WorkflowFetch::Unavailable => {
            return Ok(SyncResponse {
                status: SYNC_STATUS_UNAVAILABLE.to_string(),
                message: "n8n integration is not enabled".to_string(),
                synced_count: None,
                actions: Vec::new(),
            });
        }
        WorkflowFetch::Fetched(operations) => operations,
    };

    let mut known = ctx
        .storage
        .imported_execution_ids(meeting_id)
        .await
        .map_err(internal)?;
    let now = Utc::now();
    let mut imported = Vec::new();
    for operation in &operations {
        let Some(execution_id) = operation.execution_id() else {
            warn!(meeting_id = %meeting_id, "skipping workflow operation without id");
            continue;
        };
        if !known.insert(execution_id) {
            continue;
        }
        let action = operation_to_action(
            meeting_id,
            ActionId::new(Uuid::new_v4().to_string()),
            operation,
            now,
        );
        ctx.storage.insert_action(&action).await.map_err(internal)?;
        imported.push(action);
    }

    info!(meeting_id = %meeting_id, fetched = operations.len(), imported = imported.len(), "workflow sync finished");
    Ok(SyncResponse {
        status: SYNC_STATUS_SUCCESS.to_string(),
        message: format!("Synced {} actions from n8n", imported.len()),
        synced_count: Some(imported.len()),
        actions: imported,
    })
}

pub async fn action_stats(ctx: &ApiContext, meeting_id: MeetingId) -> Result<ActionStats, ApiError> {
    let actions = list_actions(ctx, meeting_id).await?;
    Ok(ActionStats::from_actions(&actions))
}

/// Approves every listed NEW action; anything else is skipped.
pub async fn bulk_approve(
    ctx: &ApiContext,
    request: BulkActionRequest,
) -> Result<Vec<Action>, ApiError> {
    bulk_transition(ctx, Transition::Approve, request).await
}

/// Rejects every listed NEW action; anything else is skipped.
pub async fn bulk_reject(
    ctx: &ApiContext,
    request: BulkActionRequest,
) -> Result<Vec<Action>, ApiError> {
    bulk_transition(ctx, Transition::Reject, request).await
}

async fn bulk_transition(
    ctx: &ApiContext,
    transition: Transition,
    request: BulkActionRequest,
) -> Result<Vec<Action>, ApiError> {
    let note = non_empty(request.notes);
    let mut applied = Vec::new();
    for action_id in &request.action_ids {
        let Some(mut action) = ctx.storage.get_action(action_id).await.map_err(internal)? else {
            warn!(action_id = %action_id, %transition, "bulk step skipped unknown action");
            continue;
        };
        if !action.status.permits(transition) {
            warn!(action_id = %action_id, %transition, status = %action.status, "bulk step skipped action");
            continue;
        }
        let prior = action.status;
        apply_transition(&mut action, transition, note.clone())?;
        match store_if_unchanged(ctx, &action, prior).await {
            Ok(true) => applied.push(action),
            Ok(false) => {
                warn!(action_id = %action_id, %transition, "bulk step lost a concurrent update");
            }
            Err(err) if err.code == ErrorCode::NotFound => {
                warn!(action_id = %action_id, %transition, "bulk step skipped deleted action");
            }
            Err(err) => return Err(err),
        }
    }
    info!(%transition, requested = request.action_ids.len(), applied = applied.len(), "bulk step finished");
    Ok(applied)
}

/// NEW actions of a meeting, still waiting for a decision.
pub async fn pending_actions(
    ctx: &ApiContext,
    meeting_id: MeetingId,
) -> Result<Vec<Action>, ApiError> {
    let mut actions = list_actions(ctx, meeting_id).await?;
    actions.retain(Action::is_pending_approval);
    Ok(actions)
}

/// Open actions whose due date has passed, earliest first.
pub async fn overdue_actions(ctx: &ApiContext) -> Result<Vec<Action>, ApiError> {
    let now = Utc::now();
    open_actions_due(ctx, |due| due < now).await
}

/// Open actions due between now and `days` from now, earliest first.
pub async fn due_soon_actions(ctx: &ApiContext, days: u32) -> Result<Vec<Action>, ApiError> {
    let now = Utc::now();
    let horizon = now
        .checked_add_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| ApiError::validation(format!("{days} days is out of range")))?;
    open_actions_due(ctx, |due| due >= now && due <= horizon).await
}

async fn open_actions_due(
    ctx: &ApiContext,
    matches: impl Fn(DateTime<Utc>) -> bool,
) -> Result<Vec<Action>, ApiError> {
    let mut actions: Vec<Action> = ctx
        .storage
        .list_open_actions()
        .await
        .map_err(internal)?
        .into_iter()
        .filter(|action| action.due_date.is_some_and(&matches))
        .collect();
    actions.sort_by_key(|action| action.due_date);
    Ok(actions)
}

fn apply_transition(
    action: &mut Action,
    transition: Transition,
    note: Option<String>,
) -> Result<(), ApiError> {
    let Some(next) = action.status.apply(transition) else {
        return Err(ApiError::new(
            ErrorCode::Conflict,
            format!("cannot {transition} an action with status {}", action.status),
        ));
    };

    let now = Utc::now();
    action.status = next;
    action.audit.updated_at = Some(now);
    match transition {
        Transition::Approve => {
            action.audit.approved_at = Some(now);
            action.approval_notes = note;
        }
        Transition::Reject => {
            action.audit.rejected_at = Some(now);
            action.rejection_notes = note;
        }
        Transition::Complete => {
            action.audit.completed_at = Some(now);
            action.completion_notes = note;
        }
    }
    Ok(())
}

fn transition_message(transition: Transition) -> &'static str {
    match transition {
        Transition::Approve => "Action approved",
        Transition::Reject => "Action rejected",
        Transition::Complete => "Action marked as complete",
    }
}

async fn load_action(ctx: &ApiContext, action_id: &ActionId) -> Result<Action, ApiError> {
    ctx.storage
        .get_action(action_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found(format!("action {action_id} not found")))
}

/// Writes back an action loaded with status `expected`, failing with a conflict when
/// another request changed its status in between.
async fn store_existing(
    ctx: &ApiContext,
    action: &Action,
    expected: ActionStatus,
) -> Result<(), ApiError> {
    if store_if_unchanged(ctx, action, expected).await? {
        return Ok(());
    }
    Err(ApiError::new(
        ErrorCode::Conflict,
        format!("action {} was modified concurrently", action.id),
    ))
}

/// `Ok(false)` means the row still exists but no longer has status `expected`.
async fn store_if_unchanged(
    ctx: &ApiContext,
    action: &Action,
    expected: ActionStatus,
) -> Result<bool, ApiError> {
    let updated = ctx
        .storage
        .update_action_if_status(action, expected)
        .await
        .map_err(internal)?;
    if updated {
        return Ok(true);
    }
    match ctx.storage.get_action(&action.id).await.map_err(internal)? {
        Some(_) => Ok(false),
        None => Err(ApiError::not_found(format!("action {} not found", action.id))),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn internal(err: anyhow::Error) -> ApiError {
    match err.downcast::<ApiException>() {
        Ok(exception) => exception.into(),
        Err(err) => ApiError::new(ErrorCode::Internal, format!("{err:#}")),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
