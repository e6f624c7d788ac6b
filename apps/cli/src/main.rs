use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use client_core::{
    filter::parse_choice,
    meeting_filter::{format_meeting_type, DateRange},
    notes::format_timestamp,
    ActionBoard, ActionEvent, ActionFilter, ActionNotesExt, ActionsApi, AlwaysConfirm,
    ClientSettings, Confirmer, Deployment, FilterConfig, HttpActionsApi, MeetingView, NoticeLevel,
};
use shared::{
    domain::{Action, ActionId, ActionType, Meeting, MeetingId, Priority, TargetSystem},
    protocol::{CreateActionRequest, UpdateActionRequest},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::broadcast,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "meeting-actions", about = "Review and route meeting action items")]
struct Cli {
    /// Client settings file; defaults to ./client.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    deployment: Option<Deployment>,
    /// Overrides the API base URL from settings.
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Answer yes to every confirmation prompt.
    #[arg(short, long, global = true)]
    yes: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recent meetings, or search results when a query or filter is given.
    Meetings {
        query: Option<String>,
        #[arg(long = "type")]
        meeting_types: Vec<String>,
        #[arg(long = "participant")]
        participants: Vec<String>,
        #[arg(long)]
        with_action_items: bool,
        #[arg(long)]
        with_recording: bool,
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    List {
        meeting_id: i64,
        #[arg(long, default_value = "ALL")]
        source: String,
        #[arg(long, default_value = "ALL")]
        status: String,
    },
    Create {
        meeting_id: i64,
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value = "MEDIUM")]
        priority: Priority,
        #[arg(long, default_value = "TASK")]
        action_type: ActionType,
        #[arg(long)]
        target: Option<TargetSystem>,
        #[arg(long)]
        assignee_name: Option<String>,
        #[arg(long)]
        assignee_email: Option<String>,
        #[arg(long)]
        due: Option<DateTime<Utc>>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    Update {
        meeting_id: i64,
        action_id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long)]
        assignee_name: Option<String>,
        #[arg(long)]
        assignee_email: Option<String>,
        #[arg(long)]
        due: Option<DateTime<Utc>>,
        #[arg(long)]
        notes: Option<String>,
    },
    Approve {
        meeting_id: i64,
        action_id: String,
        #[arg(long)]
        notes: Option<String>,
    },
    Reject {
        meeting_id: i64,
        action_id: String,
        #[arg(long)]
        notes: Option<String>,
    },
    Complete {
        meeting_id: i64,
        action_id: String,
        #[arg(long)]
        notes: Option<String>,
    },
    Delete {
        meeting_id: i64,
        action_id: String,
    },
    /// Hands an action to ZOHO_CRM, CLICKUP or N8N_AGENT.
    Send {
        meeting_id: i64,
        action_id: String,
        target: TargetSystem,
        /// Extra JSON object forwarded with the request.
        #[arg(long)]
        payload: Option<String>,
    },
    /// Imports pending operations from the n8n workflow.
    Sync {
        meeting_id: i64,
    },
    Stats {
        meeting_id: i64,
    },
    BulkApprove {
        meeting_id: i64,
        #[arg(required = true)]
        action_ids: Vec<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    BulkReject {
        meeting_id: i64,
        #[arg(required = true)]
        action_ids: Vec<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// NEW actions of a meeting awaiting approval.
    Pending {
        meeting_id: i64,
    },
    /// Open actions past their due date, across all meetings.
    Overdue,
    /// Open actions due within the next few days, across all meetings.
    DueSoon {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
}

impl Command {
    fn meeting_id(&self) -> Option<MeetingId> {
        match self {
            Command::Meetings { .. } | Command::Overdue | Command::DueSoon { .. } => None,
            Command::List { meeting_id, .. }
            | Command::Create { meeting_id, .. }
            | Command::Update { meeting_id, .. }
            | Command::Approve { meeting_id, .. }
            | Command::Reject { meeting_id, .. }
            | Command::Complete { meeting_id, .. }
            | Command::Delete { meeting_id, .. }
            | Command::Send { meeting_id, .. }
            | Command::Sync { meeting_id }
            | Command::Stats { meeting_id }
            | Command::BulkApprove { meeting_id, .. }
            | Command::BulkReject { meeting_id, .. }
            | Command::Pending { meeting_id } => Some(MeetingId(*meeting_id)),
        }
    }
}

struct StdinConfirmer;

#[async_trait]
impl Confirmer for StdinConfirmer {
    async fn confirm(&self, prompt: &str) -> bool {
        let mut stdout = tokio::io::stdout();
        if stdout
            .write_all(format!("{prompt} [y/N] ").as_bytes())
            .await
            .and(stdout.flush().await)
            .is_err()
        {
            return false;
        }
        let mut answer = String::new();
        match BufReader::new(tokio::io::stdin()).read_line(&mut answer).await {
            Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = ClientSettings::load(cli.config.as_deref())?;
    if let Some(deployment) = cli.deployment {
        settings.deployment = deployment;
    }
    if cli.api_url.is_some() {
        settings.api_base_url = cli.api_url.clone();
    }
    let api: Arc<dyn ActionsApi> = Arc::new(HttpActionsApi::from_settings(&settings)?);
    info!(deployment = %settings.deployment, "client configured");

    let Some(meeting_id) = cli.command.meeting_id() else {
        return run_unscoped(api.as_ref(), cli.command).await;
    };

    let confirmer: Arc<dyn Confirmer> = if cli.yes {
        Arc::new(AlwaysConfirm)
    } else {
        Arc::new(StdinConfirmer)
    };
    let board = ActionBoard::new(meeting_id, api, confirmer);
    let mut events = board.subscribe();
    board.init().await?;
    let _ = drain(&mut events);

    let outcome = run_board(&board, cli.command).await;
    print_notices(&mut events);
    board.dispose();
    outcome
}

async fn run_unscoped(api: &dyn ActionsApi, command: Command) -> Result<()> {
    match command {
        Command::Overdue => {
            let overdue = api.overdue_actions().await?;
            println!("{} overdue actions", overdue.len());
            overdue.iter().for_each(print_action);
            Ok(())
        }
        Command::DueSoon { days } => {
            let upcoming = api.due_soon_actions(days).await?;
            println!("{} actions due within {days} days", upcoming.len());
            upcoming.iter().for_each(print_action);
            Ok(())
        }
        command => run_meetings(api, command).await,
    }
}

async fn run_meetings(api: &dyn ActionsApi, command: Command) -> Result<()> {
    let Command::Meetings {
        query,
        meeting_types,
        participants,
        with_action_items,
        with_recording,
        from,
        to,
    } = command
    else {
        bail!("not a meetings command");
    };

    let meetings = api.list_meetings().await?;
    let config = FilterConfig {
        date_range: DateRange {
            start: from,
            end: to,
        },
        meeting_types,
        participants,
        has_action_items: with_action_items,
        has_recording: with_recording,
    };
    if let Some(current) = client_core::meeting_filter::just_completed(&meetings) {
        println!("Just completed:");
        print_meeting(current);
        println!();
    }
    match client_core::filter_meetings(&meetings, query.as_deref().unwrap_or(""), &config) {
        MeetingView::Recent(recent) => {
            println!("Recent meetings:");
            recent.iter().for_each(print_meeting);
        }
        MeetingView::SearchResults(found) => {
            println!("{} matching meetings:", found.len());
            found.iter().for_each(print_meeting);
        }
    }
    Ok(())
}

async fn run_board(board: &ActionBoard, command: Command) -> Result<()> {
    match command {
        Command::Meetings { .. } | Command::Overdue | Command::DueSoon { .. } => {
            bail!("this command does not need a meeting board")
        }
        Command::List {
            source, status, ..
        } => {
            let filter = ActionFilter::all()
                .with_source(parse_choice(&source)?)
                .with_status(parse_choice(&status)?);
            let snapshot = board.set_filter(filter).await?;
            println!(
                "{} actions, {} pending approval, {} shown",
                snapshot.total_count(),
                snapshot.pending_count(),
                snapshot.visible.len()
            );
            snapshot.visible.iter().for_each(print_action);
        }
        Command::Create {
            title,
            description,
            priority,
            action_type,
            target,
            assignee_name,
            assignee_email,
            due,
            notes,
            tags,
            ..
        } => {
            let created = board
                .create(CreateActionRequest {
                    title,
                    description,
                    priority,
                    action_type,
                    target_system: target,
                    assignee_name,
                    assignee_email,
                    due_date: due,
                    notes,
                    tags,
                    ..CreateActionRequest::default()
                })
                .await?;
            print_action(&created);
        }
        Command::Update {
            action_id,
            title,
            description,
            priority,
            assignee_name,
            assignee_email,
            due,
            notes,
            ..
        } => {
            let updated = board
                .update(
                    &ActionId::new(action_id),
                    UpdateActionRequest {
                        title,
                        description,
                        priority,
                        assignee_name,
                        assignee_email,
                        due_date: due,
                        notes,
                        ..UpdateActionRequest::default()
                    },
                )
                .await?;
            print_action(&updated);
        }
        Command::Approve {
            action_id, notes, ..
        } => {
            board
                .approve(&ActionId::new(action_id), notes.as_deref())
                .await?;
        }
        Command::Reject {
            action_id, notes, ..
        } => {
            board
                .reject(&ActionId::new(action_id), notes.as_deref())
                .await?;
        }
        Command::Complete {
            action_id, notes, ..
        } => {
            board
                .complete(&ActionId::new(action_id), notes.as_deref())
                .await?;
        }
        Command::Delete { action_id, .. } => {
            if !board.delete(&ActionId::new(action_id)).await? {
                println!("Delete cancelled");
            }
        }
        Command::Send {
            action_id,
            target,
            payload,
            ..
        } => {
            let extra = match payload {
                Some(raw) => serde_json::from_str(&raw).context("--payload must be a JSON object")?,
                None => serde_json::Map::new(),
            };
            match board
                .send_to_system(&ActionId::new(action_id), target, extra)
                .await?
            {
                Some(response) => {
                    if let Some(external_id) = response.external_id {
                        println!("external id: {external_id}");
                    }
                }
                None => println!("Send cancelled"),
            }
        }
        Command::Sync { .. } => {
            let outcome = board.sync().await?;
            info!(?outcome, "sync finished");
            let snapshot = board.snapshot().await;
            snapshot.actions.iter().for_each(print_action);
        }
        Command::Stats { .. } => {
            let stats = board.stats().await?;
            println!("total: {}", stats.total);
            for (label, counts) in [
                ("status", &stats.by_status),
                ("source", &stats.by_source),
                ("priority", &stats.by_priority),
            ] {
                let line = counts
                    .iter()
                    .map(|(key, count)| format!("{key}={count}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                println!("{label}: {line}");
            }
        }
        Command::BulkApprove {
            action_ids, notes, ..
        } => {
            let ids = action_ids.into_iter().map(ActionId::new).collect::<Vec<_>>();
            let approved = board.bulk_approve(&ids, notes.as_deref()).await?;
            approved.iter().for_each(print_action);
        }
        Command::BulkReject {
            action_ids, notes, ..
        } => {
            let ids = action_ids.into_iter().map(ActionId::new).collect::<Vec<_>>();
            let rejected = board.bulk_reject(&ids, notes.as_deref()).await?;
            rejected.iter().for_each(print_action);
        }
        Command::Pending { .. } => {
            let pending = board.pending().await?;
            println!("{} actions pending approval", pending.len());
            pending.iter().for_each(print_action);
        }
    }
    Ok(())
}

fn drain(events: &mut broadcast::Receiver<ActionEvent>) -> Vec<ActionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn print_notices(events: &mut broadcast::Receiver<ActionEvent>) {
    for event in drain(events) {
        if let ActionEvent::Notice(notice) = event {
            let tag = match notice.level {
                NoticeLevel::Success => "ok",
                NoticeLevel::Info => "info",
                NoticeLevel::Error => "error",
            };
            eprintln!("[{tag}] {}", notice.message);
        }
    }
}

fn print_meeting(meeting: &Meeting) {
    println!(
        "  #{:<5} {}  {:<28} {} ({} participants, {} action items)",
        meeting.id,
        meeting.start_time.format("%Y-%m-%d %H:%M"),
        format_meeting_type(&meeting.meeting_type),
        meeting.title,
        meeting.participants.len(),
        meeting.action_items.len()
    );
}

fn print_action(action: &Action) {
    println!(
        "{:<38} {:<9} {:<7} {:<13} {}",
        action.id.as_str(),
        action.status.as_str(),
        action.priority.as_str(),
        action.source.label(),
        action.title
    );
    if let Some(assignee) = action.assignee.display_name() {
        println!("    assignee: {assignee}");
    }
    if let Some(due) = action.due_date {
        println!("    due: {}", due.format("%Y-%m-%d %H:%M"));
    }
    if let Some(target) = action.target_system {
        match action.external_ids.for_system(target) {
            Some(external_id) => println!("    {}: {external_id}", target.label()),
            None => println!("    target: {}", target.label()),
        }
    }
    if let Some(marker) = action.recording() {
        let at = marker
            .offset_millis()
            .map(format_timestamp)
            .unwrap_or_else(|| "00:00".to_string());
        println!("    recording at {at}: {}", marker.playback_url());
    }
}
