use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Action, ActionId, Meeting, MeetingId, Transition},
    protocol::{
        ActionStats, BulkActionRequest, CompletionRequest, CreateActionRequest,
        SendToSystemRequest, SendToSystemResponse, SyncResponse, TransitionNoteRequest,
        TransitionResponse, UpdateActionRequest,
    },
};
use tracing::{error, info};

use crate::{
    config::ClientSettings,
    error::{extract_error_message, ClientError},
};

/// Remote operations the client relies on. Every call is a single request.
#[async_trait]
pub trait ActionsApi: Send + Sync {
    async fn list_actions(&self, meeting_id: MeetingId) -> Result<Vec<Action>, ClientError>;
    async fn create_action(
        &self,
        meeting_id: MeetingId,
        request: &CreateActionRequest,
    ) -> Result<Action, ClientError>;
    async fn update_action(
        &self,
        action_id: &ActionId,
        request: &UpdateActionRequest,
    ) -> Result<Action, ClientError>;
    /// `note` is sent as `notes` for approve/reject and `completionNotes` for complete.
    async fn apply_transition(
        &self,
        action_id: &ActionId,
        transition: Transition,
        note: Option<String>,
    ) -> Result<TransitionResponse, ClientError>;
    async fn delete_action(&self, action_id: &ActionId) -> Result<(), ClientError>;
    async fn send_to_system(
        &self,
        action_id: &ActionId,
        request: &SendToSystemRequest,
    ) -> Result<SendToSystemResponse, ClientError>;
    async fn sync_n8n(&self, meeting_id: MeetingId) -> Result<SyncResponse, ClientError>;
    async fn list_meetings(&self) -> Result<Vec<Meeting>, ClientError>;
    async fn action_stats(&self, meeting_id: MeetingId) -> Result<ActionStats, ClientError>;
    async fn bulk_approve(&self, request: &BulkActionRequest)
        -> Result<Vec<Action>, ClientError>;
    async fn bulk_reject(&self, request: &BulkActionRequest) -> Result<Vec<Action>, ClientError>;
    async fn pending_actions(&self, meeting_id: MeetingId) -> Result<Vec<Action>, ClientError>;
    async fn overdue_actions(&self) -> Result<Vec<Action>, ClientError>;
    async fn due_soon_actions(&self, days: u32) -> Result<Vec<Action>, ClientError>;
}

/// JSON-over-HTTP implementation against the meeting actions server.
pub struct HttpActionsApi {
    http: Client,
    base_url: String,
}

impl HttpActionsApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self, ClientError> {
        let base_url = settings.resolve_base_url()?;
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(Self::with_client(http, base_url.as_str()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = checked(request.send().await?).await?;
        response
            .json()
            .await
            .map_err(|err| ClientError::Decode(err.to_string()))
    }
}

async fn checked(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
    });
    error!(%url, status = status.as_u16(), %message, "request rejected by server");
    Err(ClientError::Server {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ActionsApi for HttpActionsApi {
    async fn list_actions(&self, meeting_id: MeetingId) -> Result<Vec<Action>, ClientError> {
        self.fetch(
            self.http
                .get(self.url(&format!("/meetings/{meeting_id}/actions"))),
        )
        .await
    }

    async fn create_action(
        &self,
        meeting_id: MeetingId,
        request: &CreateActionRequest,
    ) -> Result<Action, ClientError> {
        self.fetch(
            self.http
                .post(self.url(&format!("/meetings/{meeting_id}/actions")))
                .json(request),
        )
        .await
    }

    async fn update_action(
        &self,
        action_id: &ActionId,
        request: &UpdateActionRequest,
    ) -> Result<Action, ClientError> {
        self.fetch(
            self.http
                .put(self.url(&format!("/actions/{action_id}")))
                .json(request),
        )
        .await
    }

    async fn apply_transition(
        &self,
        action_id: &ActionId,
        transition: Transition,
        note: Option<String>,
    ) -> Result<TransitionResponse, ClientError> {
        let url = self.url(&format!("/actions/{action_id}/{}", transition.as_str()));
        let request = match transition {
            Transition::Approve | Transition::Reject => {
                self.http.put(url).json(&TransitionNoteRequest { notes: note })
            }
            Transition::Complete => self.http.put(url).json(&CompletionRequest {
                completion_notes: note,
            }),
        };
        let response: TransitionResponse = self.fetch(request).await?;
        info!(%action_id, %transition, success = response.success, "transition acknowledged");
        Ok(response)
    }

    async fn delete_action(&self, action_id: &ActionId) -> Result<(), ClientError> {
        checked(
            self.http
                .delete(self.url(&format!("/actions/{action_id}")))
                .send()
                .await?,
        )
        .await?;
        Ok(())
    }

    async fn send_to_system(
        &self,
        action_id: &ActionId,
        request: &SendToSystemRequest,
    ) -> Result<SendToSystemResponse, ClientError> {
        self.fetch(
            self.http
                .post(self.url(&format!("/actions/{action_id}/send")))
                .json(request),
        )
        .await
    }

    async fn sync_n8n(&self, meeting_id: MeetingId) -> Result<SyncResponse, ClientError> {
        self.fetch(
            self.http
                .post(self.url(&format!("/meetings/{meeting_id}/actions/sync-n8n"))),
        )
        .await
    }

    async fn list_meetings(&self) -> Result<Vec<Meeting>, ClientError> {
        self.fetch(self.http.get(self.url("/meetings"))).await
    }

    async fn action_stats(&self, meeting_id: MeetingId) -> Result<ActionStats, ClientError> {
        self.fetch(
            self.http
                .get(self.url(&format!("/meetings/{meeting_id}/actions/stats"))),
        )
        .await
    }

    async fn bulk_approve(
        &self,
        request: &BulkActionRequest,
    ) -> Result<Vec<Action>, ClientError> {
        self.fetch(
            self.http
                .post(self.url("/actions/bulk-approve"))
                .json(request),
        )
        .await
    }

    async fn bulk_reject(&self, request: &BulkActionRequest) -> Result<Vec<Action>, ClientError> {
        self.fetch(
            self.http
                .post(self.url("/actions/bulk-reject"))
                .json(request),
        )
        .await
    }

    async fn pending_actions(&self, meeting_id: MeetingId) -> Result<Vec<Action>, ClientError> {
        self.fetch(
            self.http
                .get(self.url(&format!("/meetings/{meeting_id}/actions/pending"))),
        )
        .await
    }

    async fn overdue_actions(&self) -> Result<Vec<Action>, ClientError> {
        self.fetch(self.http.get(self.url("/actions/overdue"))).await
    }

    async fn due_soon_actions(&self, days: u32) -> Result<Vec<Action>, ClientError> {
        self.fetch(
            self.http
                .get(self.url("/actions/due-soon"))
                .query(&[("days", days)]),
        )
        .await
    }
}
