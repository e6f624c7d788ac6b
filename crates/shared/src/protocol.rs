use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{
    Action, ActionId, ActionSource, ActionType, Meeting, MeetingActionItem, Participant, Priority,
    TargetSystem,
};

/// Sync status tag meaning the import ran.
pub const SYNC_STATUS_SUCCESS: &str = "success";
/// Sync status tag meaning the workflow integration is disabled or unconfigured.
pub const SYNC_STATUS_UNAVAILABLE: &str = "unavailable";

/// Body of `POST /meetings/{id}/actions`.
///
/// Status is always NEW on creation and correlation ids are server-owned, so neither
/// can be supplied here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateActionRequest {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub action_type: ActionType,
    #[serde(default)]
    pub source: ActionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_system: Option<TargetSystem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Body of `PUT /actions/{id}`. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateActionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<ActionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_system: Option<TargetSystem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl UpdateActionRequest {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Body of `PUT /actions/{id}/approve` and `PUT /actions/{id}/reject`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionNoteRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Body of `PUT /actions/{id}/complete`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

/// Body of `POST /actions/{id}/send`; `extra` is forwarded to the target system as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendToSystemRequest {
    pub target_system: TargetSystem,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SendToSystemRequest {
    pub fn new(target_system: TargetSystem) -> Self {
        Self {
            target_system,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendToSystemResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub message: String,
}

/// Reply of `POST /meetings/{id}/actions/sync-n8n`, distinguished by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_count: Option<usize>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkActionRequest {
    pub action_ids: Vec<ActionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
}

impl ActionStats {
    pub fn from_actions(actions: &[Action]) -> Self {
        let mut stats = ActionStats {
            total: actions.len(),
            ..ActionStats::default()
        };
        for action in actions {
            *stats
                .by_status
                .entry(action.status.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_source
                .entry(action.source.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_priority
                .entry(action.priority.as_str().to_string())
                .or_default() += 1;
        }
        stats
    }
}

/// Body of `POST /meetings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMeetingRequest {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<String>,
    #[serde(default)]
    pub meeting_type: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub action_items: Vec<MeetingActionItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub is_just_completed: bool,
}

impl CreateMeetingRequest {
    pub fn into_meeting(self, id: crate::domain::MeetingId) -> Meeting {
        Meeting {
            id,
            title: self.title,
            subject: self.subject,
            summary: self.summary,
            description: self.description,
            details: self.details,
            next_steps: self.next_steps,
            meeting_type: self.meeting_type,
            start_time: self.start_time,
            end_time: self.end_time,
            participants: self.participants,
            action_items: self.action_items,
            recording_url: self.recording_url,
            is_just_completed: self.is_just_completed,
        }
    }
}
