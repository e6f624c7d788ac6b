use std::sync::Arc;

use shared::{
    domain::{Action, ActionId, ActionStatus, Transition},
    protocol::TransitionResponse,
};
use tracing::{info, warn};

use crate::{api::ActionsApi, error::ClientError};

/// Applies lifecycle transitions, refusing illegal ones before any request is made.
#[derive(Clone)]
pub struct LifecycleDispatcher {
    api: Arc<dyn ActionsApi>,
}

impl LifecycleDispatcher {
    pub fn new(api: Arc<dyn ActionsApi>) -> Self {
        Self { api }
    }

    /// Status `transition` would lead to for the action with `action_id` in `actions`.
    pub fn validate(
        actions: &[Action],
        action_id: &ActionId,
        transition: Transition,
    ) -> Result<ActionStatus, ClientError> {
        let action = actions
            .iter()
            .find(|a| &a.id == action_id)
            .ok_or_else(|| ClientError::UnknownAction(action_id.clone()))?;
        action
            .status
            .apply(transition)
            .ok_or_else(|| ClientError::IllegalTransition {
                action_id: action_id.clone(),
                status: action.status,
                transition,
            })
    }

    pub async fn dispatch(
        &self,
        actions: &[Action],
        action_id: &ActionId,
        transition: Transition,
        note: Option<&str>,
    ) -> Result<TransitionResponse, ClientError> {
        let next = Self::validate(actions, action_id, transition).map_err(|err| {
            warn!(%action_id, %transition, error = %err, "transition refused locally");
            err
        })?;

        let response = self
            .api
            .apply_transition(action_id, transition, normalize_note(note))
            .await?;
        if !response.success {
            return Err(ClientError::Server {
                status: 200,
                message: response.message,
            });
        }
        info!(%action_id, %transition, status = %next, "transition applied");
        Ok(response)
    }
}

/// Trimmed note, or `None` when nothing but whitespace was entered.
pub fn normalize_note(note: Option<&str>) -> Option<String> {
    note.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}
