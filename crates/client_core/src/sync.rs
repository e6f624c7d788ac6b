use shared::protocol::{SyncResponse, SYNC_STATUS_SUCCESS, SYNC_STATUS_UNAVAILABLE};

/// How a workflow sync reply is reported back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced { count: usize },
    Unavailable,
    /// Any other status; carries the server's message.
    Informational { message: Option<String> },
}

impl SyncOutcome {
    pub fn from_response(response: &SyncResponse) -> Self {
        match response.status.as_str() {
            SYNC_STATUS_SUCCESS => SyncOutcome::Synced {
                count: response.synced_count.unwrap_or(response.actions.len()),
            },
            SYNC_STATUS_UNAVAILABLE => SyncOutcome::Unavailable,
            _ => SyncOutcome::Informational {
                message: Some(response.message.trim().to_string()).filter(|m| !m.is_empty()),
            },
        }
    }

    pub fn message(&self) -> String {
        match self {
            SyncOutcome::Synced { count } => format!("Synced {count} actions from n8n"),
            SyncOutcome::Unavailable => "n8n service is not enabled or configured".to_string(),
            SyncOutcome::Informational { message } => message
                .clone()
                .unwrap_or_else(|| "No new actions from n8n".to_string()),
        }
    }
}
