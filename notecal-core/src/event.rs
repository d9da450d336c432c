//! Calendar-side event types and the task → event projection.
//!
//! The projection is deterministic: for a given task and projection instant it
//! always yields the same `DesiredEvent`, and therefore the same content hash.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_EVENT_DURATION_MINUTES;
use crate::error::InvalidTask;
use crate::hash::{ContentHash, ContentHasher};
use crate::task::Task;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTime {
    /// All-day value (DTSTART;VALUE=DATE).
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl EventTime {
    /// Parse a Notion date value.
    ///
    /// Accepts `YYYY-MM-DD`, RFC 3339 instants, and naive datetimes. Naive
    /// datetimes are interpreted in `time_zone` (an IANA name) when given,
    /// otherwise as UTC.
    pub fn parse(value: &str, time_zone: Option<&str>) -> Option<EventTime> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        if !value.contains('T') {
            return NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .map(EventTime::Date);
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Some(EventTime::DateTime(dt.with_timezone(&Utc)));
        }

        let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())?;

        let utc = match time_zone.and_then(|tz| tz.parse::<chrono_tz::Tz>().ok()) {
            Some(tz) => tz
                .from_local_datetime(&naive)
                .earliest()?
                .with_timezone(&Utc),
            None => naive.and_utc(),
        };

        Some(EventTime::DateTime(utc))
    }

    pub fn is_all_day(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    /// Start of the value in UTC (midnight for dates).
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            EventTime::Date(date) => date.and_time(chrono::NaiveTime::MIN).and_utc(),
            EventTime::DateTime(dt) => *dt,
        }
    }

    /// Last instant covered by the value (end of day for dates).
    fn due_instant(&self) -> DateTime<Utc> {
        match self {
            EventTime::Date(date) => date
                .and_hms_opt(23, 59, 59)
                .map(|dt| dt.and_utc())
                .unwrap_or_else(|| self.to_utc()),
            EventTime::DateTime(dt) => *dt,
        }
    }

    /// ICS value string (`20250320` or `20250320T150000Z`).
    pub fn to_ics_string(&self) -> String {
        match self {
            EventTime::Date(date) => date.format("%Y%m%d").to_string(),
            EventTime::DateTime(dt) => dt.format("%Y%m%dT%H%M%SZ").to_string(),
        }
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTime::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            EventTime::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M UTC")),
        }
    }
}

/// Normalized task status, rendered as an emoji prefix on the event title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Todo,
    InProgress,
    Completed,
    Cancelled,
    Overdue,
}

impl TaskStatus {
    /// Map a free-form Notion status name onto the known statuses.
    pub fn normalize(raw: Option<&str>) -> TaskStatus {
        let Some(raw) = raw else {
            return TaskStatus::Todo;
        };

        match raw.trim().to_lowercase().as_str() {
            "in progress" | "in-progress" | "doing" | "started" => TaskStatus::InProgress,
            "done" | "complete" | "completed" => TaskStatus::Completed,
            "cancelled" | "canceled" | "won't do" => TaskStatus::Cancelled,
            "overdue" => TaskStatus::Overdue,
            _ => TaskStatus::Todo,
        }
    }

    /// Status used for rendering: unfinished tasks past their due instant are overdue.
    pub fn for_task(task: &Task, now: DateTime<Utc>) -> TaskStatus {
        let status = TaskStatus::normalize(task.status.as_deref());
        if status.is_final() {
            return status;
        }

        let due = task.end.as_ref().or(task.start.as_ref());
        match due {
            Some(due) if due.due_instant() < now => TaskStatus::Overdue,
            _ => status,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "Todo",
            TaskStatus::InProgress => "In progress",
            TaskStatus::Completed => "Completed",
            TaskStatus::Cancelled => "Cancelled",
            TaskStatus::Overdue => "Overdue",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "📝",
            TaskStatus::InProgress => "🔄",
            TaskStatus::Completed => "✅",
            TaskStatus::Cancelled => "❌",
            TaskStatus::Overdue => "⚠️",
        }
    }
}

/// The calendar event a task should render as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredEvent {
    /// Source task id; also used as the event UID.
    pub task_id: String,
    pub summary: String,
    pub start: EventTime,
    /// Exclusive end (DTEND).
    pub end: EventTime,
    pub description: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    /// Minutes before `start` to show an alarm.
    pub reminder_minutes: Option<i64>,
    pub status: TaskStatus,
}

impl DesiredEvent {
    /// Project a task into its desired event.
    ///
    /// Returns `Ok(None)` for undated tasks, which are simply not eligible.
    pub fn project(task: &Task, now: DateTime<Utc>) -> Result<Option<DesiredEvent>, InvalidTask> {
        if let Some(reason) = &task.malformed {
            return Err(InvalidTask::new(&task.id, reason.as_str()));
        }

        let Some(start) = task.start.clone() else {
            return Ok(None);
        };

        if task.id.trim().is_empty() {
            return Err(InvalidTask::new("<missing>", "task has no identifier"));
        }

        let title = task.title.trim();
        if title.is_empty() {
            return Err(InvalidTask::new(&task.id, "task has no title"));
        }

        let (start, end) = normalize_range(&task.id, start, task.end.clone())?;
        let status = TaskStatus::for_task(task, now);

        let reminder_minutes = task.reminder.as_ref().and_then(|reminder| {
            let minutes = (start.to_utc() - reminder.to_utc()).num_minutes();
            (minutes >= 0).then_some(minutes)
        });

        Ok(Some(DesiredEvent {
            task_id: task.id.clone(),
            summary: format!("{} {}", status.emoji(), title),
            start,
            end,
            description: Some(describe(task)),
            location: non_blank(task.location.as_deref()),
            url: non_blank(task.url.as_deref())
                .or_else(|| Some(format!("https://www.notion.so/{}", task.id.replace('-', "")))),
            category: non_blank(task.category.as_deref()),
            reminder_minutes,
            status,
        }))
    }

    pub fn is_all_day(&self) -> bool {
        self.start.is_all_day()
    }

    /// Digest over every field that affects how the event renders.
    ///
    /// The task id is deliberately not part of the hash: two tasks with
    /// identical projected fields hash identically.
    pub fn content_hash(&self) -> ContentHash {
        let all_day = if self.is_all_day() { "1" } else { "0" };
        let reminder = self.reminder_minutes.map(|m| m.to_string());

        let mut hasher = ContentHasher::new();
        hasher.field(Some(&self.summary));
        hasher.field(Some(&time_key(&self.start)));
        hasher.field(Some(&time_key(&self.end)));
        hasher.field(Some(all_day));
        hasher.field(self.description.as_deref());
        hasher.field(self.location.as_deref());
        hasher.field(self.url.as_deref());
        hasher.field(self.category.as_deref());
        hasher.field(reminder.as_deref());
        hasher.field(Some(self.status.label()));
        hasher.finish()
    }
}

impl fmt::Display for DesiredEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.summary, self.start)
    }
}

/// Dates and datetimes with the same digits must not share a key.
fn time_key(time: &EventTime) -> String {
    match time {
        EventTime::Date(_) => format!("D:{}", time.to_ics_string()),
        EventTime::DateTime(_) => format!("T:{}", time.to_ics_string()),
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn describe(task: &Task) -> String {
    let source = non_blank(task.database_name.as_deref()).unwrap_or_else(|| "-".to_string());
    let mut parts = vec![format!("Source: {source}")];

    if let Some(category) = non_blank(task.category.as_deref()) {
        parts.push(format!("Category: {category}"));
    }

    if let Some(description) = non_blank(task.description.as_deref()) {
        parts.push(String::new());
        parts.push(description);
    }

    parts.join("\n")
}

/// Produce an exclusive (start, end) pair.
///
/// Notion end dates are inclusive for all-day values, so they are shifted by a
/// day. Mixed date/datetime pairs are promoted to datetimes.
fn normalize_range(
    task_id: &str,
    start: EventTime,
    end: Option<EventTime>,
) -> Result<(EventTime, EventTime), InvalidTask> {
    let (start, end) = match (start, end) {
        (EventTime::Date(s), None) => (EventTime::Date(s), EventTime::Date(next_day(s))),
        (EventTime::Date(s), Some(EventTime::Date(e))) => {
            if e < s {
                return Err(InvalidTask::new(task_id, "end date is before start date"));
            }
            (EventTime::Date(s), EventTime::Date(next_day(e)))
        }
        (EventTime::DateTime(s), None) => (
            EventTime::DateTime(s),
            EventTime::DateTime(s + Duration::minutes(DEFAULT_EVENT_DURATION_MINUTES)),
        ),
        (EventTime::DateTime(s), Some(EventTime::DateTime(e))) => {
            (EventTime::DateTime(s), EventTime::DateTime(e))
        }
        (EventTime::Date(s), Some(EventTime::DateTime(e))) => (
            EventTime::DateTime(EventTime::Date(s).to_utc()),
            EventTime::DateTime(e),
        ),
        (EventTime::DateTime(s), Some(EventTime::Date(e))) => (
            EventTime::DateTime(s),
            EventTime::DateTime(EventTime::Date(next_day(e)).to_utc()),
        ),
    };

    if end.to_utc() < start.to_utc() {
        return Err(InvalidTask::new(task_id, "end is before start"));
    }

    Ok((start, end))
}

fn next_day(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}
