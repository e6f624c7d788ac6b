use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{Action, ActionId, ActionStatus, Meeting, MeetingId},
    protocol::CreateMeetingRequest,
};

/// SQLite-backed store for meetings and their actions.
///
/// Records are kept as JSON documents next to the handful of columns that queries
/// filter or order on.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn insert_meeting(&self, request: CreateMeetingRequest) -> Result<Meeting> {
        let draft = request.into_meeting(MeetingId(0));
        let body = serde_json::to_string(&draft).context("failed to encode meeting")?;
        let rec = sqlx::query("INSERT INTO meetings (start_time, body) VALUES (?, ?) RETURNING id")
            .bind(draft.start_time)
            .bind(body)
            .fetch_one(&self.pool)
            .await?;
        Ok(Meeting {
            id: MeetingId(rec.get::<i64, _>(0)),
            ..draft
        })
    }

    pub async fn get_meeting(&self, meeting_id: MeetingId) -> Result<Option<Meeting>> {
        let row = sqlx::query("SELECT id, body FROM meetings WHERE id = ?")
            .bind(meeting_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| decode_meeting(&row)).transpose()
    }

    /// Meetings, most recent first.
    pub async fn list_meetings(&self) -> Result<Vec<Meeting>> {
        let rows = sqlx::query("SELECT id, body FROM meetings ORDER BY start_time DESC, id DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_meeting).collect()
    }

    pub async fn insert_action(&self, action: &Action) -> Result<()> {
        let body = serde_json::to_string(action).context("failed to encode action")?;
        sqlx::query(
            "INSERT INTO actions (id, meeting_id, status, n8n_execution_id, created_at, body)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(action.id.as_str())
        .bind(action.meeting_id.0)
        .bind(action.status.as_str())
        .bind(action.external_ids.n8n_execution_id.as_deref())
        .bind(action.audit.created_at.unwrap_or_else(Utc::now))
        .bind(body)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert action {}", action.id))?;
        Ok(())
    }

    pub async fn get_action(&self, action_id: &ActionId) -> Result<Option<Action>> {
        let row = sqlx::query("SELECT body FROM actions WHERE id = ?")
            .bind(action_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| decode_action(&row)).transpose()
    }

    /// Actions of one meeting in creation order.
    pub async fn list_actions(&self, meeting_id: MeetingId) -> Result<Vec<Action>> {
        let rows = sqlx::query(
            "SELECT body FROM actions WHERE meeting_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(meeting_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_action).collect()
    }

    /// NEW and ACTIVE actions across every meeting, in creation order.
    pub async fn list_open_actions(&self) -> Result<Vec<Action>> {
        let rows = sqlx::query(
            "SELECT body FROM actions WHERE status IN (?, ?) ORDER BY created_at ASC, rowid ASC",
        )
        .bind(ActionStatus::New.as_str())
        .bind(ActionStatus::Active.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_action).collect()
    }

    pub async fn count_actions_with_status(&self, status: ActionStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM actions WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Overwrites a stored action only while its stored status is still `expected`.
    /// Returns `false` when the row is missing or another writer moved it first.
    /// The imported execution id column is written once, at insert.
    pub async fn update_action_if_status(
        &self,
        action: &Action,
        expected: ActionStatus,
    ) -> Result<bool> {
        let body = serde_json::to_string(action).context("failed to encode action")?;
        let result = sqlx::query(
            "UPDATE actions SET status = ?, body = ? WHERE id = ? AND status = ?",
        )
        .bind(action.status.as_str())
        .bind(body)
        .bind(action.id.as_str())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_action(&self, action_id: &ActionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM actions WHERE id = ?")
            .bind(action_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Workflow execution ids already imported into a meeting.
    pub async fn imported_execution_ids(&self, meeting_id: MeetingId) -> Result<HashSet<String>> {
        let rows = sqlx::query(
            "SELECT n8n_execution_id FROM actions
             WHERE meeting_id = ? AND n8n_execution_id IS NOT NULL",
        )
        .bind(meeting_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| r.get::<String, _>(0))
            .collect())
    }
}

fn decode_action(row: &sqlx::sqlite::SqliteRow) -> Result<Action> {
    let body: String = row.try_get("body")?;
    serde_json::from_str(&body).context("stored action body is not valid JSON")
}

fn decode_meeting(row: &sqlx::sqlite::SqliteRow) -> Result<Meeting> {
    let id: i64 = row.try_get("id")?;
    let body: String = row.try_get("body")?;
    let meeting: Meeting =
        serde_json::from_str(&body).context("stored meeting body is not valid JSON")?;
    Ok(Meeting {
        id: MeetingId(id),
        ..meeting
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
