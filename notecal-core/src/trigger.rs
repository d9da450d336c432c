//! What starts a run, and whether a cron tick should do anything.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::state::SyncSettings;
use crate::sync::RunReport;

/// A change notification for a single task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSignal {
    pub task_id: String,
    /// The source reported the task as deleted; skip the refetch.
    #[serde(default)]
    pub removed: bool,
}

impl ChangeSignal {
    pub fn changed(task_id: impl Into<String>) -> Self {
        ChangeSignal {
            task_id: task_id.into(),
            removed: false,
        }
    }

    pub fn removed(task_id: impl Into<String>) -> Self {
        ChangeSignal {
            task_id: task_id.into(),
            removed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Periodic tick; runs a full sync only when the interval has elapsed.
    CronTick,
    Webhook(Vec<ChangeSignal>),
    /// Admin request; always runs a full sync.
    ForceFullSync,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Skipped { next_due: DateTime<Utc> },
    FullSync(RunReport),
    Incremental(Vec<RunReport>),
}

/// Due when no full sync ever ran, or the interval has fully elapsed.
pub fn full_sync_due(settings: &SyncSettings, now: DateTime<Utc>) -> bool {
    match next_full_sync(settings) {
        None => true,
        Some(next) => now >= next,
    }
}

/// When the next interval-gated full sync becomes due.
pub fn next_full_sync(settings: &SyncSettings) -> Option<DateTime<Utc>> {
    let interval = Duration::minutes(i64::from(settings.full_sync_interval_minutes));
    settings.last_full_sync.map(|last| last + interval)
}
