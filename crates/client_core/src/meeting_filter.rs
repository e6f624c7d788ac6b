//! Search and structured filtering over a meeting list.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use shared::domain::Meeting;

const RECENT_LIMIT: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    pub date_range: DateRange,
    pub meeting_types: Vec<String>,
    pub participants: Vec<String>,
    pub has_action_items: bool,
    pub has_recording: bool,
}

impl FilterConfig {
    /// A half-open date range still counts as active even though it filters nothing.
    pub fn has_active_filters(&self) -> bool {
        self.date_range.start.is_some()
            || self.date_range.end.is_some()
            || !self.meeting_types.is_empty()
            || !self.participants.is_empty()
            || self.has_action_items
            || self.has_recording
    }

    fn admits(&self, meeting: &Meeting) -> bool {
        if let (Some(start), Some(end)) = (self.date_range.start, self.date_range.end) {
            if meeting.start_time < start || meeting.start_time > end {
                return false;
            }
        }
        if !self.meeting_types.is_empty() && !self.meeting_types.contains(&meeting.meeting_type) {
            return false;
        }
        if !self.participants.is_empty() {
            let wanted = self
                .participants
                .iter()
                .map(|name| name.to_lowercase())
                .collect::<Vec<_>>();
            let any = meeting.participants.iter().any(|p| {
                let name = p.name.to_lowercase();
                wanted.iter().any(|w| name.contains(w.as_str()))
            });
            if !any {
                return false;
            }
        }
        if self.has_action_items && meeting.action_items.is_empty() {
            return false;
        }
        if self.has_recording
            && meeting
                .recording_url
                .as_deref()
                .map_or(true, str::is_empty)
        {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeetingView {
    /// Up to five most recent meetings, newest first.
    Recent(Vec<Meeting>),
    SearchResults(Vec<Meeting>),
}

impl MeetingView {
    pub fn meetings(&self) -> &[Meeting] {
        match self {
            MeetingView::Recent(meetings) | MeetingView::SearchResults(meetings) => meetings,
        }
    }

    pub fn is_search(&self) -> bool {
        matches!(self, MeetingView::SearchResults(_))
    }
}

/// Meetings matching `query` and every active filter, in input order.
pub fn apply_filters(meetings: &[Meeting], query: &str, config: &FilterConfig) -> Vec<Meeting> {
    let query = query.trim().to_lowercase();
    meetings
        .iter()
        .filter(|meeting| query.is_empty() || matches_query(meeting, &query))
        .filter(|meeting| config.admits(meeting))
        .cloned()
        .collect()
}

/// Just-completed meetings never appear in either view.
pub fn filter_meetings(meetings: &[Meeting], query: &str, config: &FilterConfig) -> MeetingView {
    if query.trim().is_empty() && !config.has_active_filters() {
        let mut recent = meetings
            .iter()
            .filter(|m| !m.is_just_completed)
            .cloned()
            .collect::<Vec<_>>();
        recent.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        recent.truncate(RECENT_LIMIT);
        return MeetingView::Recent(recent);
    }

    let results = apply_filters(meetings, query, config)
        .into_iter()
        .filter(|m| !m.is_just_completed)
        .collect();
    MeetingView::SearchResults(results)
}

fn matches_query(meeting: &Meeting, query: &str) -> bool {
    let contains = |text: &str| text.to_lowercase().contains(query);
    let contains_opt = |text: &Option<String>| text.as_deref().is_some_and(|t| contains(t));

    contains(&meeting.title)
        || contains_opt(&meeting.subject)
        || contains_opt(&meeting.summary)
        || contains_opt(&meeting.description)
        || meeting
            .participants
            .iter()
            .any(|p| contains(&p.name) || contains_opt(&p.email))
        || meeting.action_items.iter().any(|item| {
            contains(&item.description)
                || contains_opt(&item.title)
                || contains_opt(&item.assignee_first_name)
                || contains_opt(&item.assigned_to)
        })
        || contains_opt(&meeting.next_steps)
        || contains_opt(&meeting.details)
        || contains(&format_meeting_type(&meeting.meeting_type))
}

/// `external-sales-call` becomes `External Sales Call`.
pub fn format_meeting_type(meeting_type: &str) -> String {
    meeting_type
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn all_participants(meetings: &[Meeting]) -> Vec<String> {
    meetings
        .iter()
        .flat_map(|m| m.participants.iter().map(|p| p.name.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn all_meeting_types(meetings: &[Meeting]) -> Vec<String> {
    meetings
        .iter()
        .map(|m| m.meeting_type.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn just_completed(meetings: &[Meeting]) -> Option<&Meeting> {
    meetings.iter().find(|m| m.is_just_completed)
}

#[cfg(test)]
#[path = "tests/meeting_filter_tests.rs"]
mod tests;
