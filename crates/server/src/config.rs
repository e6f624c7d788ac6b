use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,
    pub n8n_webhook_url: Option<String>,
    pub n8n_api_key: Option<String>,
    pub zoho_webhook_url: Option<String>,
    pub clickup_webhook_url: Option<String>,
    pub n8n_agent_webhook_url: Option<String>,
    pub integration_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".into(),
            database_url: "sqlite://./data/meeting_actions.db".into(),
            n8n_webhook_url: None,
            n8n_api_key: None,
            zoho_webhook_url: None,
            clickup_webhook_url: None,
            n8n_agent_webhook_url: None,
            integration_timeout_secs: 30,
        }
    }
}

/// Defaults, then `server.toml`, then `APP__*` environment variables.
pub fn load_settings() -> Settings {
    let file = fs::read_to_string("server.toml").ok();
    load_settings_from(file.as_deref(), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    file_contents: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file_contents {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) {
            apply(&mut settings, |key| file_cfg.get(key).cloned());
        }
    }

    apply(&mut settings, |key| env(&format!("APP__{}", key.to_ascii_uppercase())));
    settings
}

fn apply(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("bind_addr") {
        settings.bind_addr = v;
    }
    if let Some(v) = lookup("database_url") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("n8n_webhook_url") {
        settings.n8n_webhook_url = optional(v);
    }
    if let Some(v) = lookup("n8n_api_key") {
        settings.n8n_api_key = optional(v);
    }
    if let Some(v) = lookup("zoho_webhook_url") {
        settings.zoho_webhook_url = optional(v);
    }
    if let Some(v) = lookup("clickup_webhook_url") {
        settings.clickup_webhook_url = optional(v);
    }
    if let Some(v) = lookup("n8n_agent_webhook_url") {
        settings.n8n_agent_webhook_url = optional(v);
    }
    if let Some(v) = lookup("integration_timeout_secs") {
        if let Ok(parsed) = v.trim().parse::<u64>() {
            settings.integration_timeout_secs = parsed;
        }
    }
}

// Blank values switch an integration off.
fn optional(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
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
#[path = "tests/config_tests.rs"]
mod tests;
