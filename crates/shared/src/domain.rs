use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

id_newtype!(MeetingId);
id_newtype!(UserId);

/// Actions are keyed by an opaque string id minted by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub String);

impl ActionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Wire-named enums: serde renames, `as_str`, `Display` and case-insensitive `FromStr`
/// all agree on the same SCREAMING_SNAKE_CASE spelling.
macro_rules! wire_enum {
    (
        $(#[$attr:meta])*
        $name:ident, $kind:literal, {
            $($(#[$variant_attr:meta])* $variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$variant_attr])*
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                let normalized = raw.trim().to_ascii_uppercase().replace(|c: char| c == '-' || c == ' ', "_");
                match normalized.as_str() {
                    $($wire => Ok($name::$variant),)+
                    _ => Err(ParseEnumError {
                        kind: $kind,
                        value: raw.to_string(),
                    }),
                }
            }
        }
    };
}

wire_enum!(ActionStatus, "status", {
    New => "NEW",
    Active => "ACTIVE",
    Complete => "COMPLETE",
    Rejected => "REJECTED",
});

wire_enum!(#[derive(Default)] Priority, "priority", {
    Low => "LOW",
    #[default]
    Medium => "MEDIUM",
    High => "HIGH",
    Urgent => "URGENT",
});

wire_enum!(#[derive(Default)] ActionSource, "source", {
    #[default]
    Manual => "MANUAL",
    Fathom => "FATHOM",
    AiSuggestion => "AI_SUGGESTION",
    N8n => "N8N",
});

wire_enum!(#[derive(Default)] ActionType, "action type", {
    #[default]
    Task => "TASK",
    FollowUp => "FOLLOW_UP",
    Decision => "DECISION",
    Research => "RESEARCH",
    Approval => "APPROVAL",
    Documentation => "DOCUMENTATION",
    Meeting => "MEETING",
    ScheduleMeeting => "SCHEDULE_MEETING",
    UpdateCrm => "UPDATE_CRM",
    SendEmail => "SEND_EMAIL",
});

wire_enum!(TargetSystem, "target system", {
    MeetingManager => "MEETING_MANAGER",
    ZohoCrm => "ZOHO_CRM",
    ClickUp => "CLICKUP",
    N8nAgent => "N8N_AGENT",
});

impl ActionSource {
    pub fn label(self) -> &'static str {
        match self {
            ActionSource::Manual => "Manual",
            ActionSource::Fathom => "Fathom AI",
            ActionSource::AiSuggestion => "AI Suggested",
            ActionSource::N8n => "n8n Workflow",
        }
    }
}

impl TargetSystem {
    pub fn label(self) -> &'static str {
        match self {
            TargetSystem::MeetingManager => "Internal",
            TargetSystem::ZohoCrm => "Zoho CRM",
            TargetSystem::ClickUp => "ClickUp",
            TargetSystem::N8nAgent => "n8n Agent",
        }
    }

    /// The internal system is where actions already live; only the others accept dispatch.
    pub fn is_external(self) -> bool {
        !matches!(self, TargetSystem::MeetingManager)
    }
}

/// Requested lifecycle step for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Approve,
    Reject,
    Complete,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Approve => "approve",
            Transition::Reject => "reject",
            Transition::Complete => "complete",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ActionStatus {
    /// Status reached by applying `transition`, or `None` when the step is illegal.
    ///
    /// NEW may be approved or rejected, ACTIVE may be completed; COMPLETE and
    /// REJECTED are terminal.
    pub fn apply(self, transition: Transition) -> Option<ActionStatus> {
        match (self, transition) {
            (ActionStatus::New, Transition::Approve) => Some(ActionStatus::Active),
            (ActionStatus::New, Transition::Reject) => Some(ActionStatus::Rejected),
            (ActionStatus::Active, Transition::Complete) => Some(ActionStatus::Complete),
            _ => None,
        }
    }

    pub fn permits(self, transition: Transition) -> bool {
        self.apply(transition).is_some()
    }

    pub fn permitted_transitions(self) -> &'static [Transition] {
        match self {
            ActionStatus::New => &[Transition::Approve, Transition::Reject],
            ActionStatus::Active => &[Transition::Complete],
            ActionStatus::Complete | ActionStatus::Rejected => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ActionStatus::Complete | ActionStatus::Rejected)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignee {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<UserId>,
}

impl Assignee {
    pub fn display_name(&self) -> Option<&str> {
        self.assignee_name
            .as_deref()
            .or(self.assignee_email.as_deref())
    }
}

/// Correlation ids written by the server once a dispatch or import succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoho_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_up_task_id: Option<String>,
    /// Workflow operation this action was imported from. Set once at import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n8n_execution_id: Option<String>,
    /// Execution started when the action was handed to the n8n agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n8n_agent_execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_task_id: Option<String>,
}

impl ExternalIds {
    pub fn for_system(&self, system: TargetSystem) -> Option<&str> {
        match system {
            TargetSystem::ZohoCrm => self.zoho_task_id.as_deref(),
            TargetSystem::ClickUp => self.click_up_task_id.as_deref(),
            TargetSystem::N8nAgent => self.n8n_agent_execution_id.as_deref(),
            TargetSystem::MeetingManager => None,
        }
    }

    pub fn record(&mut self, system: TargetSystem, external_id: &str) {
        let slot = match system {
            TargetSystem::ZohoCrm => &mut self.zoho_task_id,
            TargetSystem::ClickUp => &mut self.click_up_task_id,
            TargetSystem::N8nAgent => &mut self.n8n_agent_execution_id,
            TargetSystem::MeetingManager => return,
        };
        *slot = Some(external_id.to_string());
        self.external_task_id = Some(external_id.to_string());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditTrail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_to_system_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: ActionId,
    pub meeting_id: MeetingId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: ActionStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub source: ActionSource,
    #[serde(default)]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_system: Option<TargetSystem>,
    #[serde(flatten)]
    pub assignee: Assignee,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub external_ids: ExternalIds,
    #[serde(flatten)]
    pub audit: AuditTrail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Action {
    pub fn is_pending_approval(&self) -> bool {
        self.status == ActionStatus::New
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Legacy per-meeting action item, searched by the meeting filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingActionItem {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_first_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    pub id: MeetingId,
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
