//! Recording metadata embedded in action notes as `Recording: <url>` and
//! `Timestamp: <value>` lines.

use once_cell::sync::Lazy;
use regex::Regex;
use shared::domain::Action;

static RECORDING_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^\s*Recording:\s*(\S+)\s*$").expect("valid regex"));
static TIMESTAMP_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^\s*Timestamp:\s*(.+?)\s*$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingMarker {
    pub url: String,
    pub timestamp: Option<String>,
}

impl RecordingMarker {
    pub fn parse(notes: &str) -> Option<Self> {
        let url = RECORDING_LINE.captures(notes)?.get(1)?.as_str().to_string();
        let timestamp = TIMESTAMP_LINE
            .captures(notes)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        Some(Self { url, timestamp })
    }

    /// Offset into the recording, from either milliseconds or `[HH:]MM:SS`.
    /// `None` when the timestamp is malformed or does not fit in a `u64`.
    pub fn offset_seconds(&self) -> Option<u64> {
        let raw = self.timestamp.as_deref()?.trim();
        if let Ok(millis) = raw.parse::<u64>() {
            return Some(millis / 1000);
        }
        let parts = raw
            .split(':')
            .map(|part| part.trim().parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        let (hours, minutes, seconds) = match parts.as_slice() {
            [minutes, seconds] => (0, *minutes, *seconds),
            [hours, minutes, seconds] => (*hours, *minutes, *seconds),
            _ => return None,
        };
        hours
            .checked_mul(3600)?
            .checked_add(minutes.checked_mul(60)?)?
            .checked_add(seconds)
    }

    pub fn offset_millis(&self) -> Option<u64> {
        self.offset_seconds()?.checked_mul(1000)
    }

    pub fn playback_url(&self) -> String {
        match self.offset_millis() {
            Some(millis) => playback_url(&self.url, millis),
            None => self.url.clone(),
        }
    }
}

pub trait ActionNotesExt {
    fn recording(&self) -> Option<RecordingMarker>;
}

impl ActionNotesExt for Action {
    fn recording(&self) -> Option<RecordingMarker> {
        self.notes.as_deref().and_then(RecordingMarker::parse)
    }
}

/// Formats milliseconds as zero-padded `MM:SS`; zero renders as `00:00`.
pub fn format_timestamp(milliseconds: u64) -> String {
    let total_seconds = milliseconds / 1000;
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

pub fn playback_url(recording_url: &str, timestamp_ms: u64) -> String {
    let separator = if recording_url.contains('?') { '&' } else { '?' };
    format!("{recording_url}{separator}t={}", timestamp_ms / 1000)
}
