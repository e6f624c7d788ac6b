//! Client side of the meeting actions service: an HTTP API client, the per-meeting
//! action board and the pure filters the hosts render from.

pub mod api;
pub mod board;
pub mod config;
pub mod error;
pub mod filter;
pub mod lifecycle;
pub mod meeting_filter;
pub mod notes;
pub mod sync;

pub use api::{ActionsApi, HttpActionsApi};
pub use board::{
    ActionBoard, ActionEvent, AlwaysConfirm, BoardSnapshot, Confirmer, Notice, NoticeLevel,
};
pub use config::{ClientSettings, Deployment};
pub use error::ClientError;
pub use filter::ActionFilter;
pub use lifecycle::LifecycleDispatcher;
pub use meeting_filter::{filter_meetings, FilterConfig, MeetingView};
pub use notes::{ActionNotesExt, RecordingMarker};
pub use sync::SyncOutcome;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
