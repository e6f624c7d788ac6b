use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use server_api::integrations::{
    unavailable, DisabledWorkflow, DispatchReceipt, ExternalDispatcher, WorkflowFetch,
    WorkflowOperation, WorkflowSource,
};
use shared::{
    domain::{Action, MeetingId, TargetSystem},
    error::{ApiException, ErrorCode},
};
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

use crate::config::Settings;

/// Pulls pending operations from an n8n webhook.
pub struct WebhookWorkflow {
    client: Client,
    url: Url,
    api_key: Option<String>,
}

impl WebhookWorkflow {
    pub fn new(client: Client, url: Url, api_key: Option<String>) -> Self {
        Self {
            client,
            url,
            api_key,
        }
    }
}

#[async_trait]
impl WorkflowSource for WebhookWorkflow {
    async fn fetch_pending(&self, meeting_id: MeetingId) -> anyhow::Result<WorkflowFetch> {
        info!(%meeting_id, url = %self.url, "fetching pending workflow operations");
        let mut request = self.client.post(self.url.clone()).json(&json!({
            "action": "get_pending",
            "event_id": meeting_id.to_string(),
        }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let operations: Vec<WorkflowOperation> = async {
            request
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
        }
        .await
        .map_err(|err| {
            error!(%meeting_id, error = %err, "workflow fetch failed");
            ApiException::new(ErrorCode::Upstream, format!("n8n request failed: {err}"))
        })?;

        Ok(WorkflowFetch::Fetched(operations))
    }
}

/// Posts actions to per-system webhooks.
pub struct WebhookDispatcher {
    client: Client,
    targets: HashMap<TargetSystem, Url>,
}

impl WebhookDispatcher {
    pub fn new(client: Client, targets: HashMap<TargetSystem, Url>) -> Self {
        Self { client, targets }
    }
}

#[async_trait]
impl ExternalDispatcher for WebhookDispatcher {
    async fn dispatch(
        &self,
        system: TargetSystem,
        action: &Action,
        extra: &Map<String, Value>,
    ) -> anyhow::Result<DispatchReceipt> {
        let url = self.targets.get(&system).ok_or_else(|| unavailable(system))?;

        let mut body = extra.clone();
        body.insert("targetSystem".into(), json!(system));
        body.insert(
            "action".into(),
            serde_json::to_value(action).context("failed to encode action")?,
        );

        let reply: Value = async {
            let response = self
                .client
                .post(url.clone())
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            let bytes = response.bytes().await?;
            Ok::<_, reqwest::Error>(serde_json::from_slice(&bytes).unwrap_or(Value::Null))
        }
        .await
        .map_err(|err| {
            error!(action_id = %action.id, target = %system, error = %err, "dispatch failed");
            ApiException::new(
                ErrorCode::Upstream,
                format!("{} request failed: {err}", system.label()),
            )
        })?;

        let external_id = match reply.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        let message = reply
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(DispatchReceipt {
            external_id,
            message,
        })
    }
}

/// Builds the workflow source and dispatcher described by `settings`.
pub fn from_settings(
    settings: &Settings,
) -> anyhow::Result<(Arc<dyn WorkflowSource>, Arc<dyn ExternalDispatcher>)> {
    let client = Client::builder()
        .timeout(Duration::from_secs(settings.integration_timeout_secs))
        .build()
        .context("failed to build integration http client")?;

    let workflow: Arc<dyn WorkflowSource> = match &settings.n8n_webhook_url {
        Some(raw) => Arc::new(WebhookWorkflow::new(
            client.clone(),
            parse_url("n8n_webhook_url", raw)?,
            settings.n8n_api_key.clone(),
        )),
        None => Arc::new(DisabledWorkflow),
    };

    let mut targets = HashMap::new();
    for (system, key, raw) in [
        (TargetSystem::ZohoCrm, "zoho_webhook_url", &settings.zoho_webhook_url),
        (TargetSystem::ClickUp, "clickup_webhook_url", &settings.clickup_webhook_url),
        (TargetSystem::N8nAgent, "n8n_agent_webhook_url", &settings.n8n_agent_webhook_url),
    ] {
        if let Some(raw) = raw {
            targets.insert(system, parse_url(key, raw)?);
        }
    }
    info!(
        workflow = settings.n8n_webhook_url.is_some(),
        dispatch_targets = targets.len(),
        "integrations configured"
    );

    Ok((workflow, Arc::new(WebhookDispatcher::new(client, targets))))
}

fn parse_url(key: &str, raw: &str) -> anyhow::Result<Url> {
    Url::parse(raw).with_context(|| format!("{key} is not a valid url: {raw}"))
}

#[cfg(test)]
#[path = "tests/integrations_tests.rs"]
mod tests;
