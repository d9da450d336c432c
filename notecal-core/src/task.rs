//! Source-side task types.
//!
//! A `Task` is what the task source (Notion) hands to the engine on every run.
//! It is never persisted; only its projection's hash is.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventTime;

/// A task page as fetched from the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable, source-assigned identifier (Notion page id).
    pub id: String,
    pub title: String,
    pub status: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    /// Absolute reminder instant, converted to an offset from `start` when projected.
    pub reminder: Option<EventTime>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    /// Parent database (or data source) the page belongs to.
    pub database_id: Option<String>,
    pub database_name: Option<String>,
    pub last_edited: Option<DateTime<Utc>>,
    pub archived: bool,
    /// Set by the source when a property could not be read (e.g. an
    /// unparseable date). Such tasks project to `InvalidTask`.
    #[serde(default)]
    pub malformed: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Task {
            id: id.into(),
            title: title.into(),
            status: None,
            start: None,
            end: None,
            reminder: None,
            category: None,
            description: None,
            location: None,
            url: None,
            database_id: None,
            database_name: None,
            last_edited: None,
            archived: false,
            malformed: None,
        }
    }

    /// Only dated tasks can ever become calendar events.
    pub fn is_dated(&self) -> bool {
        self.start.is_some()
    }

    /// Whether the task is all-day (derived from the start value).
    pub fn is_all_day(&self) -> bool {
        self.start.as_ref().is_some_and(EventTime::is_all_day)
    }
}

/// Which databases feed the desired set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TaskScope {
    /// Every database shared with the integration that looks like a task database.
    #[default]
    AllShared,
    /// Only the listed database ids.
    Databases(BTreeSet<String>),
}

impl TaskScope {
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: BTreeSet<String> = ids
            .into_iter()
            .map(|id| normalize_id(id.as_ref()))
            .filter(|id| !id.is_empty())
            .collect();

        if ids.is_empty() {
            TaskScope::AllShared
        } else {
            TaskScope::Databases(ids)
        }
    }

    /// Check whether a task belongs to the configured scope.
    ///
    /// Pages without a parent database are never in scope.
    pub fn includes(&self, task: &Task) -> bool {
        let Some(database_id) = task.database_id.as_deref() else {
            return false;
        };

        match self {
            TaskScope::AllShared => true,
            TaskScope::Databases(ids) => ids.contains(&normalize_id(database_id)),
        }
    }
}

/// Notion ids are accepted with or without hyphens.
fn normalize_id(id: &str) -> String {
    id.trim().replace('-', "").to_ascii_lowercase()
}
