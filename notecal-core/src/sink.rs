//! Calendar sink capability.
//!
//! The engine only needs to find or create one calendar, list what lives in
//! it, and write or remove single events. Everything CalDAV-specific stays in
//! the provider crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SinkResult;
use crate::event::DesiredEvent;

/// The calendar the mirror writes into, persisted after first discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarIdentity {
    pub href: String,
    pub name: String,
    pub color: String,
}

/// An event currently stored in the calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEvent {
    pub href: String,
    /// Task id this event was written for, when the href follows the
    /// `<calendar>/<task_id>.ics` convention.
    pub task_id: Option<String>,
    pub etag: Option<String>,
}

#[async_trait]
pub trait CalendarSink: Send + Sync {
    /// Find the calendar called `name`, creating it with `color` if missing.
    async fn ensure_calendar(&self, name: &str, color: &str) -> SinkResult<CalendarIdentity>;

    async fn list_events(&self, calendar: &CalendarIdentity) -> SinkResult<Vec<RemoteEvent>>;

    /// Write a new event and return its href.
    async fn create_event(
        &self,
        calendar: &CalendarIdentity,
        event: &DesiredEvent,
    ) -> SinkResult<String>;

    async fn update_event(
        &self,
        calendar: &CalendarIdentity,
        href: &str,
        event: &DesiredEvent,
    ) -> SinkResult<()>;

    /// Remove an event. An event that is already gone counts as removed.
    async fn delete_event(&self, calendar: &CalendarIdentity, href: &str) -> SinkResult<()>;
}

/// Deterministic event href: `<calendar_href>/<task_id>.ics`.
pub fn event_href(calendar_href: &str, task_id: &str) -> String {
    format!("{}/{}.ics", calendar_href.trim_end_matches('/'), task_id)
}

/// Recover the task id from an href built by [`event_href`].
pub fn task_id_from_href(href: &str) -> Option<String> {
    let name = href.trim_end_matches('/').rsplit('/').next()?;
    let stem = name.strip_suffix(".ics")?;
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}
