use shared::domain::{Action, ActionSource, ActionStatus, ParseEnumError};

/// Two independent predicates over the action list; `None` means ALL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionFilter {
    pub source: Option<ActionSource>,
    pub status: Option<ActionStatus>,
}

impl ActionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Option<ActionSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_status(mut self, status: Option<ActionStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn is_all(&self) -> bool {
        self.source.is_none() && self.status.is_none()
    }

    pub fn matches(&self, action: &Action) -> bool {
        self.source.map_or(true, |source| action.source == source)
            && self.status.map_or(true, |status| action.status == status)
    }

    /// Matching actions in their original order.
    pub fn apply(&self, actions: &[Action]) -> Vec<Action> {
        actions
            .iter()
            .filter(|action| self.matches(action))
            .cloned()
            .collect()
    }
}

pub fn pending_count(actions: &[Action]) -> usize {
    actions.iter().filter(|a| a.is_pending_approval()).count()
}

/// Parses a filter choice where `ALL` (any case) selects everything.
pub fn parse_choice<T>(raw: &str) -> Result<Option<T>, ParseEnumError>
where
    T: std::str::FromStr<Err = ParseEnumError>,
{
    if raw.trim().eq_ignore_ascii_case("all") {
        Ok(None)
    } else {
        raw.parse().map(Some)
    }
}

#[cfg(test)]
#[path = "tests/filter_tests.rs"]
mod tests;
