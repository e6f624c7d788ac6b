use super::*;
use shared::{
    domain::{
        ActionSource, ActionStatus, ActionType, Assignee, AuditTrail, ExternalIds, Meeting,
        Priority,
    },
    protocol::{SyncResponse, TransitionResponse},
};
use tokio::sync::{broadcast::error::TryRecvError, Mutex};

const MEETING: MeetingId = MeetingId(1);

fn action(id: &str, status: ActionStatus) -> Action {
    Action {
        id: ActionId::new(id),
        meeting_id: MEETING,
        title: format!("Action {id}"),
        description: None,
        status,
        priority: Priority::Medium,
        source: ActionSource::Manual,
        action_type: ActionType::Task,
        target_system: None,
        assignee: Assignee::default(),
        due_date: None,
        external_ids: ExternalIds::default(),
        audit: AuditTrail::default(),
        notes: None,
        approval_notes: None,
        rejection_notes: None,
        completion_notes: None,
        tags: Vec::new(),
    }
}

#[derive(Default)]
struct FakeApi {
    actions: Mutex<Vec<Action>>,
    calls: Mutex<Vec<String>>,
    notes: Mutex<Vec<Option<String>>>,
    sync_reply: Option<SyncResponse>,
    fail_with: Option<String>,
}

impl FakeApi {
    fn with_actions(actions: Vec<Action>) -> Self {
        Self {
            actions: Mutex::new(actions),
            ..Self::default()
        }
    }

    fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    fn replying_to_sync(mut self, reply: SyncResponse) -> Self {
        self.sync_reply = Some(reply);
        self
    }

    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: &str) -> Result<(), ClientError> {
        self.calls.lock().await.push(call.to_string());
        match &self.fail_with {
            Some(message) if call != "list" => Err(ClientError::Server {
                status: 409,
                message: message.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn missing(action_id: &ActionId) -> ClientError {
        ClientError::Server {
            status: 404,
            message: format!("action {action_id} not found"),
        }
    }
}

#[async_trait]
impl ActionsApi for FakeApi {
    async fn list_actions(&self, meeting_id: MeetingId) -> Result<Vec<Action>, ClientError> {
        self.record("list").await?;
        let actions = self.actions.lock().await;
        Ok(actions
            .iter()
            .filter(|a| a.meeting_id == meeting_id)
            .cloned()
            .collect())
    }

    async fn create_action(
        &self,
        meeting_id: MeetingId,
        request: &CreateActionRequest,
    ) -> Result<Action, ClientError> {
        self.record("create").await?;
        let mut actions = self.actions.lock().await;
        let mut created = action(&format!("new-{}", actions.len() + 1), ActionStatus::New);
        created.meeting_id = meeting_id;
        created.title = request.title.trim().to_string();
        actions.push(created.clone());
        Ok(created)
    }

    async fn update_action(
        &self,
        action_id: &ActionId,
        request: &UpdateActionRequest,
    ) -> Result<Action, ClientError> {
        self.record("update").await?;
        let mut actions = self.actions.lock().await;
        let action = actions
            .iter_mut()
            .find(|a| &a.id == action_id)
            .ok_or_else(|| Self::missing(action_id))?;
        if let Some(title) = &request.title {
            action.title = title.clone();
        }
        if let Some(priority) = request.priority {
            action.priority = priority;
        }
        Ok(action.clone())
    }

    async fn apply_transition(
        &self,
        action_id: &ActionId,
        transition: Transition,
        note: Option<String>,
    ) -> Result<TransitionResponse, ClientError> {
        self.record(transition.as_str()).await?;
        self.notes.lock().await.push(note);
        let mut actions = self.actions.lock().await;
        let action = actions
            .iter_mut()
            .find(|a| &a.id == action_id)
            .ok_or_else(|| Self::missing(action_id))?;
        let Some(next) = action.status.apply(transition) else {
            return Ok(TransitionResponse {
                success: false,
                message: format!("cannot {transition} a {} action", action.status),
                action: None,
            });
        };
        action.status = next;
        Ok(TransitionResponse {
            success: true,
            message: "ok".to_string(),
            action: Some(action.clone()),
        })
    }

    async fn delete_action(&self, action_id: &ActionId) -> Result<(), ClientError> {
        self.record("delete").await?;
        self.actions.lock().await.retain(|a| &a.id != action_id);
        Ok(())
    }

    async fn send_to_system(
        &self,
        action_id: &ActionId,
        request: &SendToSystemRequest,
    ) -> Result<SendToSystemResponse, ClientError> {
        self.record("send").await?;
        let mut actions = self.actions.lock().await;
        let action = actions
            .iter_mut()
            .find(|a| &a.id == action_id)
            .ok_or_else(|| Self::missing(action_id))?;
        action
            .external_ids
            .record(request.target_system, "ext-1");
        Ok(SendToSystemResponse {
            success: true,
            external_id: Some("ext-1".to_string()),
            message: format!("Sent to {}", request.target_system.label()),
        })
    }

    async fn sync_n8n(&self, _meeting_id: MeetingId) -> Result<SyncResponse, ClientError> {
        self.calls.lock().await.push("sync".to_string());
        self.sync_reply.clone().ok_or_else(|| ClientError::Server {
            status: 502,
            message: "n8n unreachable".to_string(),
        })
    }

    async fn list_meetings(&self) -> Result<Vec<Meeting>, ClientError> {
        Ok(Vec::new())
    }

    async fn action_stats(&self, meeting_id: MeetingId) -> Result<ActionStats, ClientError> {
        let actions = self.list_actions(meeting_id).await?;
        Ok(ActionStats::from_actions(&actions))
    }

    async fn bulk_approve(
        &self,
        request: &BulkActionRequest,
    ) -> Result<Vec<Action>, ClientError> {
        self.record("bulk-approve").await?;
        let mut actions = self.actions.lock().await;
        let mut approved = Vec::new();
        for action in actions.iter_mut() {
            if request.action_ids.contains(&action.id) && action.status == ActionStatus::New {
                action.status = ActionStatus::Active;
                approved.push(action.clone());
            }
        }
        Ok(approved)
    }

    async fn bulk_reject(&self, request: &BulkActionRequest) -> Result<Vec<Action>, ClientError> {
        self.record("bulk-reject").await?;
        self.notes.lock().await.push(request.notes.clone());
        let mut actions = self.actions.lock().await;
        let mut rejected = Vec::new();
        for action in actions.iter_mut() {
            if request.action_ids.contains(&action.id) && action.status == ActionStatus::New {
                action.status = ActionStatus::Rejected;
                rejected.push(action.clone());
            }
        }
        Ok(rejected)
    }

    async fn pending_actions(&self, meeting_id: MeetingId) -> Result<Vec<Action>, ClientError> {
        let mut actions = self.list_actions(meeting_id).await?;
        actions.retain(Action::is_pending_approval);
        Ok(actions)
    }

    async fn overdue_actions(&self) -> Result<Vec<Action>, ClientError> {
        self.record("overdue").await?;
        Ok(Vec::new())
    }

    async fn due_soon_actions(&self, _days: u32) -> Result<Vec<Action>, ClientError> {
        self.record("due-soon").await?;
        Ok(Vec::new())
    }
}

struct Decline;

#[async_trait]
impl Confirmer for Decline {
    async fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}

async fn board_with(api: Arc<FakeApi>) -> ActionBoard {
    let board = ActionBoard::new(MEETING, api, Arc::new(AlwaysConfirm));
    board.init().await.expect("initial load");
    board
}

fn drain(rx: &mut broadcast::Receiver<ActionEvent>) -> Vec<ActionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn notices(events: &[ActionEvent]) -> Vec<Notice> {
    events
        .iter()
        .filter_map(|event| match event {
            ActionEvent::Notice(notice) => Some(notice.clone()),
            ActionEvent::Changed => None,
        })
        .collect()
}

#[tokio::test]
async fn init_loads_actions_and_counts() {
    let api = Arc::new(FakeApi::with_actions(vec![
        action("1", ActionStatus::New),
        action("2", ActionStatus::Active),
        action("3", ActionStatus::New),
    ]));
    let board = board_with(api).await;

    let snapshot = board.snapshot().await;
    assert_eq!(snapshot.total_count(), 3);
    assert_eq!(snapshot.pending_count(), 2);
    assert_eq!(snapshot.visible, snapshot.actions);
    assert!(!snapshot.loading);
}

#[tokio::test]
async fn complete_on_new_action_is_refused_without_request() {
    let api = Arc::new(FakeApi::with_actions(vec![action("1", ActionStatus::New)]));
    let board = board_with(api.clone()).await;
    let mut rx = board.subscribe();

    let err = board
        .complete(&ActionId::new("1"), None)
        .await
        .expect_err("must refuse");
    assert!(matches!(err, ClientError::IllegalTransition { .. }));
    assert!(err.is_local());
    assert_eq!(api.calls().await, vec!["list"]);

    let notices = notices(&drain(&mut rx));
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert!(notices[0].message.starts_with("Failed to complete action:"));
}

#[tokio::test]
async fn active_action_cannot_be_approved_or_rejected() {
    let api = Arc::new(FakeApi::with_actions(vec![action("1", ActionStatus::Active)]));
    let board = board_with(api.clone()).await;
    let id = ActionId::new("1");

    assert!(board.approve(&id, None).await.is_err());
    assert!(board.reject(&id, None).await.is_err());
    assert_eq!(api.calls().await, vec!["list"]);
}

#[tokio::test]
async fn approve_sends_trimmed_note_then_reloads() {
    let api = Arc::new(FakeApi::with_actions(vec![
        action("1", ActionStatus::New),
        action("2", ActionStatus::New),
    ]));
    let board = board_with(api.clone()).await;
    let mut rx = board.subscribe();

    let snapshot = board
        .approve(&ActionId::new("1"), Some("  looks good  "))
        .await
        .expect("approve");
    assert_eq!(snapshot.actions[0].status, ActionStatus::Active);
    assert_eq!(snapshot.pending_count(), 1);

    board
        .reject(&ActionId::new("2"), Some("   "))
        .await
        .expect("reject");

    assert_eq!(
        api.calls().await,
        vec!["list", "approve", "list", "reject", "list"]
    );
    assert_eq!(
        *api.notes.lock().await,
        vec![Some("looks good".to_string()), None]
    );

    let messages = notices(&drain(&mut rx))
        .into_iter()
        .map(|n| n.message)
        .collect::<Vec<_>>();
    assert_eq!(messages, vec!["Action approved and executed", "Action rejected"]);
}

#[tokio::test]
async fn complete_on_active_action_succeeds() {
    let api = Arc::new(FakeApi::with_actions(vec![action("1", ActionStatus::Active)]));
    let board = board_with(api.clone()).await;

    let snapshot = board
        .complete(&ActionId::new("1"), Some("shipped"))
        .await
        .expect("complete");
    assert_eq!(snapshot.actions[0].status, ActionStatus::Complete);
    assert_eq!(*api.notes.lock().await, vec![Some("shipped".to_string())]);
}

#[tokio::test]
async fn server_refusal_surfaces_as_error_notice() {
    let api = Arc::new(
        FakeApi::with_actions(vec![action("1", ActionStatus::New)])
            .failing("Action was already approved"),
    );
    let board = board_with(api.clone()).await;
    let mut rx = board.subscribe();

    let err = board
        .approve(&ActionId::new("1"), None)
        .await
        .expect_err("server refuses");
    assert_eq!(err.user_message(), "Action was already approved");
    assert_eq!(api.calls().await, vec!["list", "approve"]);

    let notices = notices(&drain(&mut rx));
    assert_eq!(
        notices[0].message,
        "Failed to approve action: Action was already approved"
    );
}

#[tokio::test]
async fn unknown_action_is_rejected_locally() {
    let api = Arc::new(FakeApi::default());
    let board = board_with(api.clone()).await;

    let err = board
        .approve(&ActionId::new("ghost"), None)
        .await
        .expect_err("unknown");
    assert!(matches!(err, ClientError::UnknownAction(_)));
    assert_eq!(api.calls().await, vec!["list"]);
}

#[tokio::test]
async fn created_action_appears_exactly_once_after_reload() {
    let api = Arc::new(FakeApi::with_actions(vec![action("1", ActionStatus::New)]));
    let board = board_with(api.clone()).await;

    let created = board
        .create(CreateActionRequest {
            title: "Send the proposal".to_string(),
            ..CreateActionRequest::default()
        })
        .await
        .expect("create");

    let snapshot = board.snapshot().await;
    assert_eq!(
        snapshot.actions.iter().filter(|a| a.id == created.id).count(),
        1
    );
    assert_eq!(snapshot.total_count(), 2);
    assert_eq!(api.calls().await, vec!["list", "create", "list"]);
}

#[tokio::test]
async fn blank_title_is_refused_before_request() {
    let api = Arc::new(FakeApi::default());
    let board = board_with(api.clone()).await;

    let err = board
        .create(CreateActionRequest {
            title: "   ".to_string(),
            ..CreateActionRequest::default()
        })
        .await
        .expect_err("blank title");
    assert!(matches!(err, ClientError::Validation(_)));
    assert_eq!(api.calls().await, vec!["list"]);
}

#[tokio::test]
async fn update_applies_fields_and_reloads() {
    let api = Arc::new(FakeApi::with_actions(vec![action("1", ActionStatus::New)]));
    let board = board_with(api.clone()).await;
    let id = ActionId::new("1");

    assert!(matches!(
        board.update(&id, UpdateActionRequest::default()).await,
        Err(ClientError::Validation(_))
    ));

    let updated = board
        .update(
            &id,
            UpdateActionRequest {
                title: Some("Renamed".to_string()),
                priority: Some(Priority::Urgent),
                ..UpdateActionRequest::default()
            },
        )
        .await
        .expect("update");
    assert_eq!(updated.title, "Renamed");
    assert_eq!(board.snapshot().await.actions[0].priority, Priority::Urgent);
    assert_eq!(api.calls().await, vec!["list", "update", "list"]);
}

#[tokio::test]
async fn declined_delete_sends_nothing() {
    let api = Arc::new(FakeApi::with_actions(vec![action("1", ActionStatus::New)]));
    let board = ActionBoard::new(MEETING, api.clone(), Arc::new(Decline));
    board.init().await.expect("load");

    let deleted = board.delete(&ActionId::new("1")).await.expect("delete");
    assert!(!deleted);
    assert_eq!(api.calls().await, vec!["list"]);
    assert_eq!(board.snapshot().await.total_count(), 1);
}

#[tokio::test]
async fn confirmed_delete_removes_action() {
    let api = Arc::new(FakeApi::with_actions(vec![
        action("1", ActionStatus::New),
        action("2", ActionStatus::Complete),
    ]));
    let board = board_with(api.clone()).await;
    let mut rx = board.subscribe();

    assert!(board.delete(&ActionId::new("2")).await.expect("delete"));
    let snapshot = board.snapshot().await;
    assert_eq!(snapshot.total_count(), 1);
    assert_eq!(snapshot.actions[0].id, ActionId::new("1"));
    assert_eq!(api.calls().await, vec!["list", "delete", "list"]);
    assert!(notices(&drain(&mut rx))
        .iter()
        .any(|n| n.message == "Action deleted"));
}

#[tokio::test]
async fn send_refuses_internal_target_and_terminal_actions() {
    let api = Arc::new(FakeApi::with_actions(vec![
        action("1", ActionStatus::Active),
        action("2", ActionStatus::Rejected),
    ]));
    let board = board_with(api.clone()).await;

    let err = board
        .send_to_system(&ActionId::new("1"), TargetSystem::MeetingManager, Map::new())
        .await
        .expect_err("internal target");
    assert!(matches!(err, ClientError::Validation(_)));

    let err = board
        .send_to_system(&ActionId::new("2"), TargetSystem::ClickUp, Map::new())
        .await
        .expect_err("terminal action");
    assert!(matches!(err, ClientError::Validation(_)));
    assert_eq!(api.calls().await, vec!["list"]);
}

#[tokio::test]
async fn confirmed_send_reloads_correlation_id() {
    let api = Arc::new(FakeApi::with_actions(vec![action("1", ActionStatus::Active)]));
    let board = board_with(api.clone()).await;

    let response = board
        .send_to_system(&ActionId::new("1"), TargetSystem::ClickUp, Map::new())
        .await
        .expect("send")
        .expect("confirmed");
    assert_eq!(response.external_id.as_deref(), Some("ext-1"));

    let snapshot = board.snapshot().await;
    assert_eq!(
        snapshot.actions[0].external_ids.click_up_task_id.as_deref(),
        Some("ext-1")
    );
    assert_eq!(api.calls().await, vec!["list", "send", "list"]);
}

#[tokio::test]
async fn declined_send_returns_none() {
    let api = Arc::new(FakeApi::with_actions(vec![action("1", ActionStatus::New)]));
    let board = ActionBoard::new(MEETING, api.clone(), Arc::new(Decline));
    board.init().await.expect("load");

    let outcome = board
        .send_to_system(&ActionId::new("1"), TargetSystem::ZohoCrm, Map::new())
        .await
        .expect("no error");
    assert!(outcome.is_none());
    assert_eq!(api.calls().await, vec!["list"]);
}

#[tokio::test]
async fn sync_success_reports_count_and_reloads() {
    let api = Arc::new(FakeApi::default().replying_to_sync(SyncResponse {
        status: "success".to_string(),
        message: String::new(),
        synced_count: Some(2),
        actions: Vec::new(),
    }));
    let board = board_with(api.clone()).await;
    let mut rx = board.subscribe();

    let outcome = board.sync().await.expect("sync");
    assert_eq!(outcome, SyncOutcome::Synced { count: 2 });
    assert_eq!(api.calls().await, vec!["list", "sync", "list"]);
    assert!(!board.snapshot().await.syncing);

    let notices = notices(&drain(&mut rx));
    assert_eq!(notices[0].level, NoticeLevel::Success);
    assert_eq!(notices[0].message, "Synced 2 actions from n8n");
}

#[tokio::test]
async fn sync_unavailable_is_informational() {
    let api = Arc::new(FakeApi::default().replying_to_sync(SyncResponse {
        status: "unavailable".to_string(),
        message: "n8n not configured".to_string(),
        synced_count: None,
        actions: Vec::new(),
    }));
    let board = board_with(api.clone()).await;

    assert_eq!(board.sync().await.expect("sync"), SyncOutcome::Unavailable);
    assert_eq!(api.calls().await, vec!["list", "sync", "list"]);
}

#[tokio::test]
async fn sync_transport_failure_skips_reload() {
    let api = Arc::new(FakeApi::default());
    let board = board_with(api.clone()).await;

    let err = board.sync().await.expect_err("sync fails");
    assert_eq!(err.user_message(), "n8n unreachable");
    assert_eq!(api.calls().await, vec!["list", "sync"]);
    assert!(!board.snapshot().await.syncing);
}

#[tokio::test]
async fn bulk_approve_requires_every_action_to_be_new() {
    let api = Arc::new(FakeApi::with_actions(vec![
        action("1", ActionStatus::New),
        action("2", ActionStatus::Active),
        action("3", ActionStatus::New),
    ]));
    let board = board_with(api.clone()).await;

    let err = board
        .bulk_approve(&[ActionId::new("1"), ActionId::new("2")], None)
        .await
        .expect_err("mixed statuses");
    assert!(matches!(err, ClientError::IllegalTransition { .. }));
    assert!(matches!(
        board.bulk_approve(&[], None).await,
        Err(ClientError::Validation(_))
    ));
    assert_eq!(api.calls().await, vec!["list"]);

    let approved = board
        .bulk_approve(&[ActionId::new("1"), ActionId::new("3")], Some("batch"))
        .await
        .expect("bulk approve");
    assert_eq!(approved.len(), 2);
    assert_eq!(board.snapshot().await.pending_count(), 0);
}

#[tokio::test]
async fn bulk_reject_sends_trimmed_notes_and_reloads() {
    let api = Arc::new(FakeApi::with_actions(vec![
        action("1", ActionStatus::New),
        action("2", ActionStatus::New),
        action("3", ActionStatus::Active),
    ]));
    let board = board_with(api.clone()).await;
    let mut events = board.subscribe();

    let err = board
        .bulk_reject(&[ActionId::new("1"), ActionId::new("3")], None)
        .await
        .expect_err("active action");
    assert!(matches!(err, ClientError::IllegalTransition { .. }));
    assert_eq!(api.calls().await, vec!["list"]);

    let rejected = board
        .bulk_reject(&[ActionId::new("1"), ActionId::new("2")], Some("  not ours "))
        .await
        .expect("bulk reject");
    assert_eq!(rejected.len(), 2);
    assert_eq!(api.calls().await, vec!["list", "bulk-reject", "list"]);
    assert_eq!(
        api.notes.lock().await.clone(),
        vec![Some("not ours".to_string())]
    );
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        ActionEvent::Notice(Notice { message, .. }) if message == "2 actions rejected"
    )));

    assert!(board.pending().await.expect("pending").is_empty());
}

#[tokio::test]
async fn filter_narrows_visible_actions() {
    let mut fathom = action("2", ActionStatus::New);
    fathom.source = ActionSource::Fathom;
    let api = Arc::new(FakeApi::with_actions(vec![
        action("1", ActionStatus::New),
        fathom,
    ]));
    let board = board_with(api).await;

    let snapshot = board
        .set_filter(ActionFilter::all().with_source(Some(ActionSource::Fathom)))
        .await
        .expect("filter");
    assert_eq!(snapshot.visible.len(), 1);
    assert_eq!(snapshot.visible[0].id, ActionId::new("2"));
    assert_eq!(snapshot.total_count(), 2);
}

#[tokio::test]
async fn stats_are_fetched_for_the_meeting() {
    let api = Arc::new(FakeApi::with_actions(vec![
        action("1", ActionStatus::New),
        action("2", ActionStatus::Complete),
    ]));
    let board = board_with(api).await;

    let stats = board.stats().await.expect("stats");
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_status.get("NEW"), Some(&1));
}

#[tokio::test]
async fn disposed_board_refuses_work_and_stays_silent() {
    let api = Arc::new(FakeApi::with_actions(vec![action("1", ActionStatus::New)]));
    let board = board_with(api.clone()).await;
    let mut rx = board.subscribe();
    let before = board.snapshot().await;

    board.dispose();
    assert!(board.is_disposed());
    assert!(matches!(
        board.approve(&ActionId::new("1"), None).await,
        Err(ClientError::Disposed)
    ));
    assert!(matches!(board.reload().await, Err(ClientError::Disposed)));
    assert!(matches!(board.sync().await, Err(ClientError::Disposed)));

    assert_eq!(api.calls().await, vec!["list"]);
    assert_eq!(board.snapshot().await, before);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}
