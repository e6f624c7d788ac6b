use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use shared::{
    domain::{
        Action, ActionId, ActionSource, ActionStatus, ActionType, Assignee, AuditTrail,
        ExternalIds, MeetingId, Priority, TargetSystem,
    },
    error::{ApiException, ErrorCode},
};
use tracing::warn;

/// One pending operation as reported by the workflow engine.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowOperation {
    pub id: Value,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "operation_type")]
    pub operation_type: Option<String>,
    #[serde(default)]
    pub operation: Map<String, Value>,
    #[serde(default, rename = "createdTime")]
    pub created_time: Option<String>,
    #[serde(default, rename = "created_at")]
    pub created_at: Option<String>,
    #[serde(default, rename = "updated_at")]
    pub updated_at: Option<String>,
}

impl WorkflowOperation {
    /// Operation ids arrive as strings or numbers.
    pub fn execution_id(&self) -> Option<String> {
        match &self.id {
            Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    fn field(&self, key: &str) -> Option<String> {
        match self.operation.get(key)? {
            Value::Null => None,
            Value::String(raw) => {
                let trimmed = raw.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum WorkflowFetch {
    /// The integration is disabled or not configured.
    Unavailable,
    Fetched(Vec<WorkflowOperation>),
}

#[async_trait]
pub trait WorkflowSource: Send + Sync {
    async fn fetch_pending(&self, meeting_id: MeetingId) -> anyhow::Result<WorkflowFetch>;
}

pub struct DisabledWorkflow;

#[async_trait]
impl WorkflowSource for DisabledWorkflow {
    async fn fetch_pending(&self, _meeting_id: MeetingId) -> anyhow::Result<WorkflowFetch> {
        Ok(WorkflowFetch::Unavailable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub external_id: String,
    pub message: Option<String>,
}

#[async_trait]
pub trait ExternalDispatcher: Send + Sync {
    /// Hands `action` to `system`. Errors carrying an [`ApiException`] keep their code.
    async fn dispatch(
        &self,
        system: TargetSystem,
        action: &Action,
        extra: &Map<String, Value>,
    ) -> anyhow::Result<DispatchReceipt>;
}

pub struct UnconfiguredDispatcher;

#[async_trait]
impl ExternalDispatcher for UnconfiguredDispatcher {
    async fn dispatch(
        &self,
        system: TargetSystem,
        _action: &Action,
        _extra: &Map<String, Value>,
    ) -> anyhow::Result<DispatchReceipt> {
        Err(unavailable(system).into())
    }
}

pub fn unavailable(system: TargetSystem) -> ApiException {
    ApiException::new(
        ErrorCode::Unavailable,
        format!("{} integration is not configured", system.label()),
    )
}

/// Builds an N8N-sourced action from a workflow operation.
pub fn operation_to_action(
    meeting_id: MeetingId,
    id: ActionId,
    operation: &WorkflowOperation,
    now: DateTime<Utc>,
) -> Action {
    let first_name = operation.field("FirstName");
    let last_name = operation.field("LastName");
    let email = operation.field("Email");

    let full_name = [first_name.as_deref(), last_name.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    let full_name = (!full_name.is_empty()).then_some(full_name);

    let is_contact = operation
        .operation_type
        .as_deref()
        .is_some_and(|kind| kind.trim().eq_ignore_ascii_case("contact"));
    let subject = full_name.clone().or_else(|| email.clone()).unwrap_or_default();
    let title = if is_contact {
        format!("Contact: {subject}").trim().to_string()
    } else if subject.is_empty() {
        operation
            .operation_type
            .clone()
            .unwrap_or_else(|| "Workflow operation".to_string())
    } else {
        subject
    };

    let description = [
        ("Email", email.clone()),
        ("Phone", operation.field("Phone")),
        ("Role", operation.field("Role")),
        ("Company", operation.field("Company")),
    ]
    .into_iter()
    .filter_map(|(label, value)| value.map(|value| format!("{label}: {value}")))
    .collect::<Vec<_>>()
    .join("\n");

    let created_at = operation
        .created_at
        .as_deref()
        .or(operation.created_time.as_deref())
        .map(parse_workflow_time)
        .unwrap_or(now);
    let updated_at = operation.updated_at.as_deref().map(parse_workflow_time);

    Action {
        id,
        meeting_id,
        title,
        description: (!description.is_empty()).then_some(description),
        status: map_status(operation.status.as_deref()),
        priority: Priority::Medium,
        source: ActionSource::N8n,
        action_type: map_action_type(operation.operation_type.as_deref()),
        target_system: None,
        assignee: Assignee {
            assignee_name: full_name,
            assignee_email: email,
            assignee_id: None,
        },
        due_date: None,
        external_ids: ExternalIds {
            n8n_execution_id: operation.execution_id(),
            ..ExternalIds::default()
        },
        audit: AuditTrail {
            created_at: Some(created_at),
            updated_at,
            ..AuditTrail::default()
        },
        notes: None,
        approval_notes: None,
        rejection_notes: None,
        completion_notes: None,
        tags: Vec::new(),
    }
}

pub fn map_status(raw: Option<&str>) -> ActionStatus {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("active") | Some("approved") => ActionStatus::Active,
        Some("complete") | Some("completed") => ActionStatus::Complete,
        _ => ActionStatus::New,
    }
}

pub fn map_action_type(raw: Option<&str>) -> ActionType {
    let Some(raw) = raw else {
        return ActionType::Task;
    };
    raw.parse().unwrap_or_else(|_| {
        warn!(operation_type = raw, "unknown workflow operation type, defaulting to TASK");
        ActionType::Task
    })
}

fn parse_workflow_time(raw: &str) -> DateTime<Utc> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    match NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => naive.and_utc(),
        Err(_) => {
            warn!(value = raw, "unparseable workflow timestamp");
            Utc::now()
        }
    }
}
