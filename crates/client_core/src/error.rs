use serde_json::Value;
use shared::domain::{ActionId, ActionStatus, Transition};
use thiserror::Error;

pub const FALLBACK_ERROR_MESSAGE: &str = "An error occurred";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{message}")]
    Server { status: u16, message: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("{0}")]
    Validation(String),
    #[error("cannot {transition} action {action_id} while it is {status}")]
    IllegalTransition {
        action_id: ActionId,
        status: ActionStatus,
        transition: Transition,
    },
    #[error("action {0} is not loaded")]
    UnknownAction(ActionId),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("the action board has been disposed")]
    Disposed,
}

impl ClientError {
    /// The one string shown to a person for this failure.
    pub fn user_message(&self) -> String {
        let message = match self {
            ClientError::Server { message, .. } => message.trim().to_string(),
            other => other.to_string(),
        };
        if message.is_empty() {
            FALLBACK_ERROR_MESSAGE.to_string()
        } else {
            message
        }
    }

    /// True when the error was raised before any request left the client.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ClientError::Validation(_)
                | ClientError::IllegalTransition { .. }
                | ClientError::UnknownAction(_)
                | ClientError::Configuration(_)
                | ClientError::Disposed
        )
    }
}

/// Pulls a human-readable message out of an error body.
///
/// Accepts this server's `{code, message}` shape as well as `{error: "..."}` and
/// `{error: {message: "..."}}` from other backends.
pub fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let candidates = [
        value.get("message"),
        value.get("error"),
        value.get("error").and_then(|e| e.get("message")),
        value.get("error").and_then(|e| e.get("error")),
    ];
    let found = candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|message| !message.is_empty())
        .map(str::to_string);
    found
}
