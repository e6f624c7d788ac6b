use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use shared::{
    domain::{Action, ActionId, MeetingId, TargetSystem, Transition},
    protocol::{
        ActionStats, BulkActionRequest, CreateActionRequest, SendToSystemRequest,
        SendToSystemResponse, UpdateActionRequest,
    },
};
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

use crate::{
    api::ActionsApi,
    error::ClientError,
    filter::{pending_count, ActionFilter},
    lifecycle::{normalize_note, LifecycleDispatcher},
    sync::SyncOutcome,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// Transient, user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionEvent {
    /// The snapshot changed; read it again with [`ActionBoard::snapshot`].
    Changed,
    Notice(Notice),
}

/// Asks the user before destructive or outward-facing operations.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

pub struct AlwaysConfirm;

#[async_trait]
impl Confirmer for AlwaysConfirm {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardSnapshot {
    pub actions: Vec<Action>,
    /// `actions` narrowed by `filter`, order preserved.
    pub visible: Vec<Action>,
    pub filter: ActionFilter,
    pub loading: bool,
    pub syncing: bool,
    pub last_error: Option<String>,
}

impl BoardSnapshot {
    pub fn total_count(&self) -> usize {
        self.actions.len()
    }

    pub fn pending_count(&self) -> usize {
        pending_count(&self.actions)
    }

    pub fn action(&self, action_id: &ActionId) -> Option<&Action> {
        self.actions.iter().find(|a| &a.id == action_id)
    }
}

/// The actions of one meeting, kept in sync with the server.
///
/// Every successful mutation is followed by a full reload; the server stays the
/// source of truth. After [`ActionBoard::dispose`] results of in-flight calls are
/// dropped and no further events are sent.
pub struct ActionBoard {
    meeting_id: MeetingId,
    api: Arc<dyn ActionsApi>,
    confirmer: Arc<dyn Confirmer>,
    lifecycle: LifecycleDispatcher,
    state: RwLock<BoardSnapshot>,
    events: broadcast::Sender<ActionEvent>,
    disposed: AtomicBool,
}

impl ActionBoard {
    pub fn new(
        meeting_id: MeetingId,
        api: Arc<dyn ActionsApi>,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            meeting_id,
            lifecycle: LifecycleDispatcher::new(api.clone()),
            api,
            confirmer,
            state: RwLock::new(BoardSnapshot::default()),
            events,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn meeting_id(&self) -> MeetingId {
        self.meeting_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActionEvent> {
        self.events.subscribe()
    }

    pub async fn init(&self) -> Result<BoardSnapshot, ClientError> {
        info!(meeting_id = %self.meeting_id, "action board starting");
        self.reload().await
    }

    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            info!(meeting_id = %self.meeting_id, "action board disposed");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> BoardSnapshot {
        self.state.read().await.clone()
    }

    pub async fn set_filter(&self, filter: ActionFilter) -> Result<BoardSnapshot, ClientError> {
        let snapshot = self.modify(|state| state.filter = filter).await?;
        self.emit(ActionEvent::Changed);
        Ok(snapshot)
    }

    pub async fn reload(&self) -> Result<BoardSnapshot, ClientError> {
        self.modify(|state| state.loading = true).await?;
        let result = self.api.list_actions(self.meeting_id).await;
        self.ensure_live()?;

        match result {
            Ok(actions) => {
                info!(meeting_id = %self.meeting_id, count = actions.len(), "actions reloaded");
                let snapshot = self
                    .modify(|state| {
                        state.actions = actions;
                        state.loading = false;
                        state.last_error = None;
                    })
                    .await?;
                self.emit(ActionEvent::Changed);
                Ok(snapshot)
            }
            Err(err) => {
                error!(meeting_id = %self.meeting_id, error = %err, "failed to load actions");
                let message = err.user_message();
                self.modify(|state| {
                    state.loading = false;
                    state.last_error = Some(message);
                })
                .await?;
                self.notify_failure("Failed to load actions", &err);
                Err(err)
            }
        }
    }

    pub async fn approve(
        &self,
        action_id: &ActionId,
        notes: Option<&str>,
    ) -> Result<BoardSnapshot, ClientError> {
        self.transition(action_id, Transition::Approve, notes).await
    }

    pub async fn reject(
        &self,
        action_id: &ActionId,
        notes: Option<&str>,
    ) -> Result<BoardSnapshot, ClientError> {
        self.transition(action_id, Transition::Reject, notes).await
    }

    pub async fn complete(
        &self,
        action_id: &ActionId,
        completion_notes: Option<&str>,
    ) -> Result<BoardSnapshot, ClientError> {
        self.transition(action_id, Transition::Complete, completion_notes)
            .await
    }

    pub async fn transition(
        &self,
        action_id: &ActionId,
        transition: Transition,
        note: Option<&str>,
    ) -> Result<BoardSnapshot, ClientError> {
        self.ensure_live()?;
        let actions = self.state.read().await.actions.clone();
        let result = self
            .lifecycle
            .dispatch(&actions, action_id, transition, note)
            .await;
        self.ensure_live()?;

        if let Err(err) = result {
            self.notify_failure(&format!("Failed to {transition} action"), &err);
            return Err(err);
        }
        self.notify(NoticeLevel::Success, transition_notice(transition));
        self.reload().await
    }

    pub async fn create(&self, request: CreateActionRequest) -> Result<Action, ClientError> {
        self.ensure_live()?;
        if request.title.trim().is_empty() {
            let err = ClientError::Validation("action title is required".to_string());
            self.notify_failure("Failed to create action", &err);
            return Err(err);
        }

        let result = self.api.create_action(self.meeting_id, &request).await;
        self.ensure_live()?;
        let created = result.map_err(|err| {
            self.notify_failure("Failed to create action", &err);
            err
        })?;

        info!(action_id = %created.id, meeting_id = %self.meeting_id, "action created");
        self.notify(NoticeLevel::Success, "Action created successfully");
        self.reload().await?;
        Ok(created)
    }

    pub async fn update(
        &self,
        action_id: &ActionId,
        request: UpdateActionRequest,
    ) -> Result<Action, ClientError> {
        self.require_loaded(action_id).await?;
        if request.is_empty() {
            return Err(ClientError::Validation("nothing to update".to_string()));
        }
        if request.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ClientError::Validation(
                "action title cannot be blank".to_string(),
            ));
        }

        let result = self.api.update_action(action_id, &request).await;
        self.ensure_live()?;
        let updated = result.map_err(|err| {
            self.notify_failure("Failed to update action", &err);
            err
        })?;

        self.notify(NoticeLevel::Success, "Action updated");
        self.reload().await?;
        Ok(updated)
    }

    /// Deletes after confirmation. Returns `false` when the user declined.
    pub async fn delete(&self, action_id: &ActionId) -> Result<bool, ClientError> {
        let action = self.require_loaded(action_id).await?;
        let prompt = format!("Delete \"{}\"? This cannot be undone.", action.title);
        if !self.confirmer.confirm(&prompt).await {
            info!(%action_id, "delete cancelled");
            return Ok(false);
        }

        let result = self.api.delete_action(action_id).await;
        self.ensure_live()?;
        if let Err(err) = result {
            self.notify_failure("Failed to delete action", &err);
            return Err(err);
        }

        info!(%action_id, "action deleted");
        self.modify(|state| state.actions.retain(|a| &a.id != action_id))
            .await?;
        self.emit(ActionEvent::Changed);
        self.notify(NoticeLevel::Success, "Action deleted");
        self.reload().await?;
        Ok(true)
    }

    /// Hands an action to an external system after confirmation.
    ///
    /// Returns `None` when the user declined. The correlation id is picked up by the
    /// reload that follows, not merged from the reply.
    pub async fn send_to_system(
        &self,
        action_id: &ActionId,
        target: TargetSystem,
        extra: Map<String, Value>,
    ) -> Result<Option<SendToSystemResponse>, ClientError> {
        if !target.is_external() {
            return Err(ClientError::Validation(format!(
                "{} is not an external system",
                target.label()
            )));
        }
        let action = self.require_loaded(action_id).await?;
        if action.status.is_terminal() {
            let err = ClientError::Validation(format!(
                "only NEW or ACTIVE actions can be sent; this one is {}",
                action.status
            ));
            warn!(%action_id, status = %action.status, "send refused locally");
            self.notify_failure("Failed to send action", &err);
            return Err(err);
        }

        let prompt = format!("Send \"{}\" to {}?", action.title, target.label());
        if !self.confirmer.confirm(&prompt).await {
            info!(%action_id, target = %target, "send cancelled");
            return Ok(None);
        }

        let request = SendToSystemRequest {
            target_system: target,
            extra,
        };
        let result = self.api.send_to_system(action_id, &request).await;
        self.ensure_live()?;
        let response = result.map_err(|err| {
            self.notify_failure(&format!("Failed to send action to {}", target.label()), &err);
            err
        })?;

        info!(%action_id, target = %target, external_id = ?response.external_id, "action sent");
        let level = if response.success {
            NoticeLevel::Success
        } else {
            NoticeLevel::Error
        };
        self.notify(level, &response.message);
        self.reload().await?;
        Ok(Some(response))
    }

    /// Imports pending workflow operations, then reloads whatever the reply was.
    pub async fn sync(&self) -> Result<SyncOutcome, ClientError> {
        self.modify(|state| state.syncing = true).await?;
        let result = self.api.sync_n8n(self.meeting_id).await;
        self.ensure_live()?;
        self.modify(|state| state.syncing = false).await?;

        let response = result.map_err(|err| {
            error!(meeting_id = %self.meeting_id, error = %err, "workflow sync failed");
            self.notify_failure("Failed to sync with n8n", &err);
            err
        })?;

        let outcome = SyncOutcome::from_response(&response);
        info!(meeting_id = %self.meeting_id, outcome = ?outcome, "workflow sync answered");
        let level = match outcome {
            SyncOutcome::Synced { .. } => NoticeLevel::Success,
            SyncOutcome::Unavailable | SyncOutcome::Informational { .. } => NoticeLevel::Info,
        };
        self.notify(level, &outcome.message());
        self.reload().await?;
        Ok(outcome)
    }

    /// Approves several actions at once. Every one must be loaded and NEW.
    pub async fn bulk_approve(
        &self,
        action_ids: &[ActionId],
        notes: Option<&str>,
    ) -> Result<Vec<Action>, ClientError> {
        self.bulk_step(Transition::Approve, action_ids, notes).await
    }

    /// Rejects several actions at once. Every one must be loaded and NEW.
    pub async fn bulk_reject(
        &self,
        action_ids: &[ActionId],
        notes: Option<&str>,
    ) -> Result<Vec<Action>, ClientError> {
        self.bulk_step(Transition::Reject, action_ids, notes).await
    }

    async fn bulk_step(
        &self,
        transition: Transition,
        action_ids: &[ActionId],
        notes: Option<&str>,
    ) -> Result<Vec<Action>, ClientError> {
        let (failure, done) = match transition {
            Transition::Reject => ("Failed to reject actions", "rejected"),
            _ => ("Failed to approve actions", "approved"),
        };
        self.ensure_live()?;
        if action_ids.is_empty() {
            return Err(ClientError::Validation(
                "select at least one action".to_string(),
            ));
        }
        let actions = self.state.read().await.actions.clone();
        for action_id in action_ids {
            if let Err(err) = LifecycleDispatcher::validate(&actions, action_id, transition) {
                warn!(%action_id, %transition, error = %err, "bulk step refused locally");
                self.notify_failure(failure, &err);
                return Err(err);
            }
        }

        let request = BulkActionRequest {
            action_ids: action_ids.to_vec(),
            notes: normalize_note(notes),
        };
        let result = match transition {
            Transition::Reject => self.api.bulk_reject(&request).await,
            _ => self.api.bulk_approve(&request).await,
        };
        self.ensure_live()?;
        let applied = result.map_err(|err| {
            self.notify_failure(failure, &err);
            err
        })?;

        info!(%transition, requested = action_ids.len(), applied = applied.len(), "bulk step applied");
        self.notify(
            NoticeLevel::Success,
            &format!("{} actions {done}", applied.len()),
        );
        self.reload().await?;
        Ok(applied)
    }

    /// NEW actions of this meeting as the server sees them.
    pub async fn pending(&self) -> Result<Vec<Action>, ClientError> {
        self.ensure_live()?;
        self.api.pending_actions(self.meeting_id).await
    }

    pub async fn stats(&self) -> Result<ActionStats, ClientError> {
        self.ensure_live()?;
        self.api.action_stats(self.meeting_id).await
    }

    async fn require_loaded(&self, action_id: &ActionId) -> Result<Action, ClientError> {
        self.ensure_live()?;
        self.state
            .read()
            .await
            .action(action_id)
            .cloned()
            .ok_or_else(|| ClientError::UnknownAction(action_id.clone()))
    }

    async fn modify(
        &self,
        apply: impl FnOnce(&mut BoardSnapshot),
    ) -> Result<BoardSnapshot, ClientError> {
        self.ensure_live()?;
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        apply(state);
        state.visible = state.filter.apply(&state.actions);
        Ok(state.clone())
    }

    fn ensure_live(&self) -> Result<(), ClientError> {
        if self.is_disposed() {
            Err(ClientError::Disposed)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: ActionEvent) {
        if !self.is_disposed() {
            let _ = self.events.send(event);
        }
    }

    fn notify(&self, level: NoticeLevel, message: &str) {
        self.emit(ActionEvent::Notice(Notice {
            level,
            message: message.to_string(),
        }));
    }

    fn notify_failure(&self, context: &str, err: &ClientError) {
        self.notify(
            NoticeLevel::Error,
            &format!("{context}: {}", err.user_message()),
        );
    }
}

fn transition_notice(transition: Transition) -> &'static str {
    match transition {
        Transition::Approve => "Action approved and executed",
        Transition::Reject => "Action rejected",
        Transition::Complete => "Action marked as complete",
    }
}

#[cfg(test)]
#[path = "tests/board_tests.rs"]
mod tests;
