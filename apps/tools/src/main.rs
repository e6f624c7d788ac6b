use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use server_api::ApiContext;
use shared::{
    domain::{ActionSource, ActionStatus, MeetingId, Participant, Priority},
    error::ApiException,
    protocol::{CreateActionRequest, CreateMeetingRequest},
};
use storage::Storage;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/meeting_actions.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateMeeting {
        title: String,
        #[arg(long = "type", default_value = "internal-sync")]
        meeting_type: String,
        /// RFC 3339 start time; defaults to now.
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// `Name` or `Name <email>`; repeatable.
        #[arg(long = "participant")]
        participants: Vec<String>,
        #[arg(long)]
        recording_url: Option<String>,
        #[arg(long)]
        just_completed: bool,
    },
    /// Loads a JSON array of meetings.
    ImportMeetings {
        path: PathBuf,
    },
    CreateAction {
        meeting_id: i64,
        title: String,
        #[arg(long, default_value = "MANUAL")]
        source: ActionSource,
        #[arg(long, default_value = "MEDIUM")]
        priority: Priority,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Action counts per status across all meetings.
    Counts,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;
    let ctx = ApiContext::offline(storage);

    match cli.command {
        Command::CreateMeeting {
            title,
            meeting_type,
            start,
            participants,
            recording_url,
            just_completed,
        } => {
            let request = CreateMeetingRequest {
                title,
                subject: None,
                summary: None,
                description: None,
                details: None,
                next_steps: None,
                meeting_type,
                start_time: start.unwrap_or_else(Utc::now),
                end_time: None,
                participants: participants.iter().map(|p| parse_participant(p)).collect(),
                action_items: Vec::new(),
                recording_url,
                is_just_completed: just_completed,
            };
            let meeting = server_api::create_meeting(&ctx, request)
                .await
                .map_err(ApiException::from)?;
            println!("created meeting_id={}", meeting.id);
        }
        Command::ImportMeetings { path } => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let requests: Vec<CreateMeetingRequest> =
                serde_json::from_str(&raw).context("expected a JSON array of meetings")?;
            for request in requests {
                let meeting = server_api::create_meeting(&ctx, request)
                    .await
                    .map_err(ApiException::from)?;
                println!("created meeting_id={} title={}", meeting.id, meeting.title);
            }
        }
        Command::CreateAction {
            meeting_id,
            title,
            source,
            priority,
            notes,
        } => {
            let action = server_api::create_action(
                &ctx,
                MeetingId(meeting_id),
                CreateActionRequest {
                    title,
                    source,
                    priority,
                    notes,
                    ..CreateActionRequest::default()
                },
            )
            .await
            .map_err(ApiException::from)?;
            println!("created action_id={}", action.id);
        }
        Command::Counts => {
            for status in ActionStatus::ALL {
                let count = ctx.storage.count_actions_with_status(*status).await?;
                println!("{status}: {count}");
            }
        }
    }

    Ok(())
}

fn parse_participant(raw: &str) -> Participant {
    match raw.split_once('<') {
        Some((name, email)) => Participant {
            name: name.trim().to_string(),
            email: Some(email.trim_end_matches('>').trim().to_string()),
        },
        None => Participant {
            name: raw.trim().to_string(),
            email: None,
        },
    }
}
