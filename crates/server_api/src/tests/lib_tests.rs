use super::*;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use shared::domain::{ActionSource, TargetSystem};
use std::sync::Mutex;

use crate::integrations::{DispatchReceipt, WorkflowOperation};

struct FixedWorkflow(Vec<Value>);

#[async_trait]
impl WorkflowSource for FixedWorkflow {
    async fn fetch_pending(&self, _meeting_id: MeetingId) -> anyhow::Result<WorkflowFetch> {
        let operations = self
            .0
            .iter()
            .cloned()
            .map(serde_json::from_value::<WorkflowOperation>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(WorkflowFetch::Fetched(operations))
    }
}

#[derive(Default)]
struct RecordingDispatcher {
    calls: Mutex<Vec<(TargetSystem, String, Map<String, Value>)>>,
}

#[async_trait]
impl ExternalDispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        system: TargetSystem,
        action: &Action,
        extra: &Map<String, Value>,
    ) -> anyhow::Result<DispatchReceipt> {
        self.calls
            .lock()
            .expect("calls")
            .push((system, action.id.to_string(), extra.clone()));
        Ok(DispatchReceipt {
            external_id: "ext-77".to_string(),
            message: None,
        })
    }
}

async fn setup() -> ApiContext {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    ApiContext::offline(storage)
}

fn create_request(title: &str) -> CreateActionRequest {
    CreateActionRequest {
        title: title.to_string(),
        ..CreateActionRequest::default()
    }
}

#[tokio::test]
async fn create_forces_new_status_and_trims_fields() {
    let ctx = setup().await;
    let action = create_action(
        &ctx,
        MeetingId(1),
        CreateActionRequest {
            title: "  Send recap  ".to_string(),
            notes: Some("   ".to_string()),
            ..CreateActionRequest::default()
        },
    )
    .await
    .expect("create");

    assert_eq!(action.title, "Send recap");
    assert_eq!(action.status, ActionStatus::New);
    assert!(action.notes.is_none());
    assert!(action.audit.created_at.is_some());

    let listed = list_actions(&ctx, MeetingId(1)).await.expect("list");
    assert_eq!(listed, vec![action]);
}

#[tokio::test]
async fn blank_title_is_a_validation_error() {
    let ctx = setup().await;
    let err = create_action(&ctx, MeetingId(1), create_request(" "))
        .await
        .expect_err("blank title");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn illegal_transition_is_a_conflict() {
    let ctx = setup().await;
    let action = create_action(&ctx, MeetingId(1), create_request("Draft"))
        .await
        .expect("create");

    let err = transition_action(&ctx, &action.id, Transition::Complete, None)
        .await
        .expect_err("complete on NEW");
    assert_eq!(err.code, ErrorCode::Conflict);

    let approved = transition_action(
        &ctx,
        &action.id,
        Transition::Approve,
        Some(" looks good ".to_string()),
    )
    .await
    .expect("approve");
    let approved = approved.action.expect("action");
    assert_eq!(approved.status, ActionStatus::Active);
    assert_eq!(approved.approval_notes.as_deref(), Some("looks good"));
    assert!(approved.audit.approved_at.is_some());

    let completed = transition_action(&ctx, &action.id, Transition::Complete, None)
        .await
        .expect("complete")
        .action
        .expect("action");
    assert_eq!(completed.status, ActionStatus::Complete);

    let err = transition_action(&ctx, &action.id, Transition::Reject, None)
        .await
        .expect_err("terminal");
    assert_eq!(err.code, ErrorCode::Conflict);
}

#[tokio::test]
async fn delete_unknown_action_is_not_found() {
    let ctx = setup().await;
    let err = delete_action(&ctx, &ActionId::new("missing"))
        .await
        .expect_err("missing");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn update_leaves_absent_fields_untouched() {
    let ctx = setup().await;
    let action = create_action(
        &ctx,
        MeetingId(2),
        CreateActionRequest {
            title: "Call vendor".to_string(),
            assignee_email: Some("ops@example.com".to_string()),
            ..CreateActionRequest::default()
        },
    )
    .await
    .expect("create");

    let updated = update_action(
        &ctx,
        &action.id,
        UpdateActionRequest {
            title: Some("Call vendor today".to_string()),
            ..UpdateActionRequest::default()
        },
    )
    .await
    .expect("update");

    assert_eq!(updated.title, "Call vendor today");
    assert_eq!(
        updated.assignee.assignee_email.as_deref(),
        Some("ops@example.com")
    );
    assert_eq!(updated.status, ActionStatus::New);
}

#[tokio::test]
async fn send_without_configured_integration_is_unavailable() {
    let ctx = setup().await;
    let action = create_action(&ctx, MeetingId(1), create_request("Push to CRM"))
        .await
        .expect("create");

    let err = send_to_system(&ctx, &action.id, SendToSystemRequest::new(TargetSystem::ZohoCrm))
        .await
        .expect_err("unconfigured");
    assert_eq!(err.code, ErrorCode::Unavailable);

    let err = send_to_system(
        &ctx,
        &action.id,
        SendToSystemRequest::new(TargetSystem::MeetingManager),
    )
    .await
    .expect_err("internal target");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn send_records_correlation_id_and_forwards_extra_payload() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let ctx = ApiContext {
        dispatcher: dispatcher.clone(),
        ..setup().await
    };
    let action = create_action(&ctx, MeetingId(1), create_request("Track in ClickUp"))
        .await
        .expect("create");

    let mut request = SendToSystemRequest::new(TargetSystem::ClickUp);
    request.extra.insert("listId".to_string(), json!("L-1"));
    let response = send_to_system(&ctx, &action.id, request)
        .await
        .expect("send");
    assert!(response.success);
    assert_eq!(response.external_id.as_deref(), Some("ext-77"));

    let stored = ctx
        .storage
        .get_action(&action.id)
        .await
        .expect("get")
        .expect("stored");
    assert_eq!(stored.external_ids.click_up_task_id.as_deref(), Some("ext-77"));
    assert!(stored.audit.sent_to_system_at.is_some());

    let calls = dispatcher.calls.lock().expect("calls");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].2.get("listId"), Some(&json!("L-1")));
}

#[tokio::test]
async fn sync_reports_unavailable_when_disabled() {
    let ctx = setup().await;
    let response = sync_workflow(&ctx, MeetingId(5)).await.expect("sync");
    assert_eq!(response.status, SYNC_STATUS_UNAVAILABLE);
    assert!(response.actions.is_empty());
}

#[tokio::test]
async fn repeated_sync_skips_already_imported_operations() {
    let ctx = ApiContext {
        workflow: Arc::new(FixedWorkflow(vec![
            json!({"id": "op-1", "status": "new", "operation_type": "Contact",
                   "operation": {"FirstName": "Lee", "Email": "lee@example.com"}}),
            json!({"id": "op-2", "status": "approved", "operation": {"Email": "kim@example.com"}}),
        ])),
        ..setup().await
    };

    let first = sync_workflow(&ctx, MeetingId(9)).await.expect("first sync");
    assert_eq!(first.status, SYNC_STATUS_SUCCESS);
    assert_eq!(first.synced_count, Some(2));
    assert!(first.actions.iter().all(|a| a.source == ActionSource::N8n));

    let second = sync_workflow(&ctx, MeetingId(9)).await.expect("second sync");
    assert_eq!(second.synced_count, Some(0));

    let stored = list_actions(&ctx, MeetingId(9)).await.expect("list");
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].title, "Contact: Lee");
}

#[tokio::test]
async fn bulk_approve_skips_non_new_actions() {
    let ctx = setup().await;
    let first = create_action(&ctx, MeetingId(1), create_request("One"))
        .await
        .expect("one");
    let second = create_action(&ctx, MeetingId(1), create_request("Two"))
        .await
        .expect("two");
    transition_action(&ctx, &second.id, Transition::Reject, None)
        .await
        .expect("reject");

    let approved = bulk_approve(
        &ctx,
        BulkActionRequest {
            action_ids: vec![first.id.clone(), second.id.clone(), ActionId::new("ghost")],
            notes: None,
        },
    )
    .await
    .expect("bulk");
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].id, first.id);

    let stats = action_stats(&ctx, MeetingId(1)).await.expect("stats");
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_status.get("ACTIVE"), Some(&1));
    assert_eq!(stats.by_status.get("REJECTED"), Some(&1));
    assert_eq!(stats.by_source.get("MANUAL"), Some(&2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approve_and_reject_settle_on_one_outcome() {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = std::env::temp_dir().join(format!("meeting_actions_race_{nanos}.db"));
    let database_url = format!("sqlite://{}", path.to_string_lossy().replace('\\', "/"));
    let storage = Storage::new(&database_url).await.expect("db");
    let ctx = ApiContext::offline(storage);

    for round in 0..20 {
        let action = create_action(&ctx, MeetingId(1), create_request(&format!("Race {round}")))
            .await
            .expect("create");

        let approve = tokio::spawn({
            let ctx = ctx.clone();
            let id = action.id.clone();
            async move { transition_action(&ctx, &id, Transition::Approve, None).await }
        });
        let reject = tokio::spawn({
            let ctx = ctx.clone();
            let id = action.id.clone();
            async move { transition_action(&ctx, &id, Transition::Reject, None).await }
        });
        let (approve, reject) = tokio::join!(approve, reject);
        let (approve, reject) = (approve.expect("approve task"), reject.expect("reject task"));

        let winner = match (&approve, &reject) {
            (Ok(_), Err(err)) => {
                assert_eq!(err.code, ErrorCode::Conflict);
                ActionStatus::Active
            }
            (Err(err), Ok(_)) => {
                assert_eq!(err.code, ErrorCode::Conflict);
                ActionStatus::Rejected
            }
            other => panic!("round {round}: expected exactly one winner, got {other:?}"),
        };

        let stored = ctx
            .storage
            .get_action(&action.id)
            .await
            .expect("get")
            .expect("stored");
        assert_eq!(stored.status, winner, "round {round}");
    }

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn stale_write_is_a_conflict() {
    let ctx = setup().await;
    let action = create_action(&ctx, MeetingId(1), create_request("Stale"))
        .await
        .expect("create");
    transition_action(&ctx, &action.id, Transition::Reject, None)
        .await
        .expect("reject");

    let mut stale = action.clone();
    stale.status = ActionStatus::Active;
    let err = store_existing(&ctx, &stale, ActionStatus::New)
        .await
        .expect_err("status moved");
    assert_eq!(err.code, ErrorCode::Conflict);

    let mut ghost = action;
    ghost.id = ActionId::new("ghost");
    let err = store_existing(&ctx, &ghost, ActionStatus::New)
        .await
        .expect_err("missing");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn agent_dispatch_does_not_reopen_imported_operation() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let ctx = ApiContext {
        workflow: Arc::new(FixedWorkflow(vec![json!({
            "id": "op-1",
            "status": "new",
            "operation_type": "Contact",
            "operation": {"FirstName": "Lee"}
        })])),
        dispatcher: dispatcher.clone(),
        ..setup().await
    };

    let first = sync_workflow(&ctx, MeetingId(4)).await.expect("first sync");
    assert_eq!(first.synced_count, Some(1));
    let imported = &first.actions[0];

    send_to_system(&ctx, &imported.id, SendToSystemRequest::new(TargetSystem::N8nAgent))
        .await
        .expect("send to agent");
    let stored = ctx
        .storage
        .get_action(&imported.id)
        .await
        .expect("get")
        .expect("stored");
    assert_eq!(stored.external_ids.n8n_execution_id.as_deref(), Some("op-1"));
    assert_eq!(
        stored.external_ids.for_system(TargetSystem::N8nAgent),
        Some("ext-77")
    );

    let second = sync_workflow(&ctx, MeetingId(4)).await.expect("second sync");
    assert_eq!(second.synced_count, Some(0));
    assert_eq!(list_actions(&ctx, MeetingId(4)).await.expect("list").len(), 1);
}

#[tokio::test]
async fn bulk_reject_records_notes_and_skips_decided_actions() {
    let ctx = setup().await;
    let first = create_action(&ctx, MeetingId(2), create_request("One"))
        .await
        .expect("one");
    let second = create_action(&ctx, MeetingId(2), create_request("Two"))
        .await
        .expect("two");
    transition_action(&ctx, &second.id, Transition::Approve, None)
        .await
        .expect("approve");

    let rejected = bulk_reject(
        &ctx,
        BulkActionRequest {
            action_ids: vec![first.id.clone(), second.id.clone()],
            notes: Some(" out of scope ".to_string()),
        },
    )
    .await
    .expect("bulk reject");
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].id, first.id);
    assert_eq!(rejected[0].status, ActionStatus::Rejected);
    assert_eq!(rejected[0].rejection_notes.as_deref(), Some("out of scope"));
    assert!(rejected[0].audit.rejected_at.is_some());
}

#[tokio::test]
async fn pending_lists_only_new_actions_of_the_meeting() {
    let ctx = setup().await;
    let waiting = create_action(&ctx, MeetingId(3), create_request("Waiting"))
        .await
        .expect("waiting");
    let approved = create_action(&ctx, MeetingId(3), create_request("Approved"))
        .await
        .expect("approved");
    transition_action(&ctx, &approved.id, Transition::Approve, None)
        .await
        .expect("approve");
    create_action(&ctx, MeetingId(4), create_request("Elsewhere"))
        .await
        .expect("other meeting");

    let pending = pending_actions(&ctx, MeetingId(3)).await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, waiting.id);
}

#[tokio::test]
async fn due_date_queries_cover_open_actions_only() {
    let ctx = setup().await;
    let now = Utc::now();
    let due = |title: &str, offset: Duration| CreateActionRequest {
        title: title.to_string(),
        due_date: Some(now + offset),
        ..CreateActionRequest::default()
    };

    let late = create_action(&ctx, MeetingId(1), due("Late", Duration::days(-2)))
        .await
        .expect("late");
    let later = create_action(&ctx, MeetingId(2), due("Very late", Duration::days(-5)))
        .await
        .expect("very late");
    let finished = create_action(&ctx, MeetingId(1), due("Finished late", Duration::days(-1)))
        .await
        .expect("finished");
    transition_action(&ctx, &finished.id, Transition::Reject, None)
        .await
        .expect("reject");
    let soon = create_action(&ctx, MeetingId(1), due("Soon", Duration::days(3)))
        .await
        .expect("soon");
    transition_action(&ctx, &soon.id, Transition::Approve, None)
        .await
        .expect("approve");
    let sooner = create_action(&ctx, MeetingId(2), due("Sooner", Duration::hours(6)))
        .await
        .expect("sooner");
    create_action(&ctx, MeetingId(1), due("Far off", Duration::days(30)))
        .await
        .expect("far");
    create_action(&ctx, MeetingId(1), create_request("Undated"))
        .await
        .expect("undated");

    let overdue = overdue_actions(&ctx).await.expect("overdue");
    let ids: Vec<_> = overdue.iter().map(|a| a.id.clone()).collect();
    assert_eq!(ids, vec![later.id, late.id]);

    let upcoming = due_soon_actions(&ctx, 7).await.expect("due soon");
    let ids: Vec<_> = upcoming.iter().map(|a| a.id.clone()).collect();
    assert_eq!(ids, vec![sooner.id, soon.id]);

    assert!(due_soon_actions(&ctx, 0).await.expect("today").is_empty());
}
