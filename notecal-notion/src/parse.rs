//! Notion page and database payloads to `Task`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use notecal_core::{EventTime, Task};
use serde::Deserialize;
use serde_json::Value;

pub const TITLE_PROPERTY: &str = "Title";
pub const STATUS_PROPERTY: &str = "Status";
pub const DATE_PROPERTY: &str = "Date";
pub const REMINDER_PROPERTY: &str = "Reminder";
pub const CATEGORY_PROPERTY: &str = "Category";
pub const DESCRIPTION_PROPERTY: &str = "Description";

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RichText {
    #[serde(default)]
    plain_text: Option<String>,
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TextContent {
    #[serde(default)]
    content: Option<String>,
}

impl RichText {
    fn as_str(&self) -> Option<&str> {
        self.plain_text
            .as_deref()
            .or_else(|| self.text.as_ref().and_then(|t| t.content.as_deref()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NamedOption {
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DateValue {
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
    #[serde(default)]
    time_zone: Option<String>,
}

/// The property values the mirror reads. Everything else is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum PropertyValue {
    Title {
        #[serde(default)]
        title: Vec<RichText>,
    },
    RichText {
        #[serde(default)]
        rich_text: Vec<RichText>,
    },
    Status {
        #[serde(default)]
        status: Option<NamedOption>,
    },
    Select {
        #[serde(default)]
        select: Option<NamedOption>,
    },
    Date {
        #[serde(default)]
        date: Option<DateValue>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Parent {
    #[serde(default)]
    database_id: Option<String>,
    #[serde(default)]
    data_source_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Page {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    in_trash: bool,
    #[serde(default)]
    last_edited_time: Option<DateTime<Utc>>,
    #[serde(default)]
    parent: Parent,
    #[serde(default)]
    properties: BTreeMap<String, PropertyValue>,
}

/// Database or data source metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseInfo {
    pub id: String,
    #[serde(default)]
    title: Vec<RichText>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    properties: Option<BTreeMap<String, PropertySchema>>,
}

#[derive(Debug, Clone, Deserialize)]
struct PropertySchema {
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl DatabaseInfo {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// First non-empty title fragment, then `name`, then the id.
    pub fn title(&self) -> String {
        self.title
            .iter()
            .filter_map(RichText::as_str)
            .map(str::trim)
            .find(|t| !t.is_empty())
            .map(String::from)
            .or_else(|| self.name.clone().filter(|n| !n.trim().is_empty()))
            .unwrap_or_else(|| self.id.clone())
    }

    /// `None` when the payload did not include the schema.
    pub fn is_task_database(&self) -> Option<bool> {
        let properties = self.properties.as_ref()?;
        Some(
            properties
                .get(DATE_PROPERTY)
                .and_then(|p| p.kind.as_deref())
                == Some("date"),
        )
    }
}

/// Parse a page payload. Fails only when the envelope itself is unusable.
pub fn parse_page(value: Value) -> Result<Task, serde_json::Error> {
    let page: Page = serde_json::from_value(value)?;
    Ok(page_to_task(page))
}

/// Id of the database (or data source) a page lives in.
pub fn parent_id(value: &Value, prefer_data_source: bool) -> Option<String> {
    let parent = value.get("parent")?;
    let database = parent.get("database_id").and_then(Value::as_str);
    let data_source = parent.get("data_source_id").and_then(Value::as_str);
    let id = if prefer_data_source {
        data_source.or(database)
    } else {
        database.or(data_source)
    };
    id.map(String::from)
}

fn page_to_task(page: Page) -> Task {
    let mut task = Task::new(&page.id, page_title(&page));
    task.url = page.url.clone();
    task.archived = page.archived || page.in_trash;
    task.last_edited = page.last_edited_time;
    task.database_id = page
        .parent
        .data_source_id
        .clone()
        .or_else(|| page.parent.database_id.clone());

    task.status = match page.properties.get(STATUS_PROPERTY) {
        Some(PropertyValue::Status { status }) | Some(PropertyValue::Select { select: status }) => {
            status.as_ref().and_then(|s| s.name.clone())
        }
        _ => None,
    };

    if let Some(PropertyValue::Date { date: Some(date) }) = page.properties.get(DATE_PROPERTY) {
        let tz = date.time_zone.as_deref();
        match parse_time(date.start.as_deref(), tz) {
            Ok(start) => task.start = start,
            Err(raw) => task.malformed = Some(format!("unreadable {} start '{}'", DATE_PROPERTY, raw)),
        }
        match parse_time(date.end.as_deref(), tz) {
            Ok(end) => task.end = end,
            Err(raw) => task.malformed = Some(format!("unreadable {} end '{}'", DATE_PROPERTY, raw)),
        }
    }

    if let Some(PropertyValue::Date { date: Some(date) }) = page.properties.get(REMINDER_PROPERTY) {
        match parse_time(date.start.as_deref(), date.time_zone.as_deref()) {
            Ok(reminder) => task.reminder = reminder,
            Err(raw) => {
                tracing::warn!(task_id = %page.id, value = %raw, "Ignoring unreadable reminder");
            }
        }
    }

    if let Some(PropertyValue::Select { select: Some(option) }) = page.properties.get(CATEGORY_PROPERTY) {
        task.category = option.name.clone();
    }

    if let Some(PropertyValue::RichText { rich_text }) = page.properties.get(DESCRIPTION_PROPERTY) {
        let text = join_text(rich_text);
        if !text.trim().is_empty() {
            task.description = Some(text);
        }
    }

    if let Some(reason) = &task.malformed {
        tracing::warn!(task_id = %task.id, reason = %reason, "Page has malformed properties");
    }

    task
}

/// `Title` property, then the first title-typed property, then the page id.
fn page_title(page: &Page) -> String {
    let from = |value: &PropertyValue| match value {
        PropertyValue::Title { title } => Some(join_text(title).trim().to_string()),
        _ => None,
    };

    page.properties
        .get(TITLE_PROPERTY)
        .and_then(from)
        .filter(|t| !t.is_empty())
        .or_else(|| {
            page.properties
                .iter()
                .filter(|(name, _)| name.as_str() != TITLE_PROPERTY)
                .filter_map(|(_, value)| from(value))
                .find(|t| !t.is_empty())
        })
        .unwrap_or_else(|| page.id.clone())
}

fn join_text(parts: &[RichText]) -> String {
    parts.iter().filter_map(RichText::as_str).collect()
}

/// `Ok(None)` for an absent value, `Err(raw)` for one that doesn't parse.
fn parse_time(raw: Option<&str>, time_zone: Option<&str>) -> Result<Option<EventTime>, String> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(None),
        Some(raw) => EventTime::parse(raw, time_zone)
            .map(Some)
            .ok_or_else(|| raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    fn page(properties: Value) -> Value {
        json!({
            "object": "page",
            "id": "1f2e3d4c-0000-0000-0000-000000000001",
            "url": "https://www.notion.so/Write-report-1f2e3d4c000000000000000000000001",
            "archived": false,
            "last_edited_time": "2025-03-01T10:00:00.000Z",
            "parent": { "type": "data_source_id", "data_source_id": "ds-1", "database_id": "db-1" },
            "properties": properties
        })
    }

    fn title(text: &str) -> Value {
        json!({ "id": "title", "type": "title", "title": [{ "plain_text": text }] })
    }

    #[test]
    fn parses_all_known_properties() {
        let task = parse_page(page(json!({
            "Title": title("Write report"),
            "Status": { "type": "status", "status": { "name": "In progress" } },
            "Date": { "type": "date", "date": { "start": "2025-03-20T09:00:00.000+01:00", "end": null, "time_zone": null } },
            "Reminder": { "type": "date", "date": { "start": "2025-03-20T07:30:00.000Z" } },
            "Category": { "type": "select", "select": { "name": "Work" } },
            "Description": { "type": "rich_text", "rich_text": [{ "plain_text": "Q1 " }, { "plain_text": "numbers" }] },
            "Estimate": { "type": "number", "number": 3 }
        })))
        .unwrap();

        assert_eq!(task.id, "1f2e3d4c-0000-0000-0000-000000000001");
        assert_eq!(task.title, "Write report");
        assert_eq!(task.status.as_deref(), Some("In progress"));
        assert_eq!(
            task.start,
            Some(EventTime::DateTime(Utc.with_ymd_and_hms(2025, 3, 20, 8, 0, 0).unwrap()))
        );
        assert_eq!(task.end, None);
        assert_eq!(
            task.reminder,
            Some(EventTime::DateTime(Utc.with_ymd_and_hms(2025, 3, 20, 7, 30, 0).unwrap()))
        );
        assert_eq!(task.category.as_deref(), Some("Work"));
        assert_eq!(task.description.as_deref(), Some("Q1 numbers"));
        assert_eq!(task.database_id.as_deref(), Some("ds-1"));
        assert!(!task.archived);
        assert!(task.malformed.is_none());
    }

    #[test]
    fn naive_datetime_uses_page_time_zone() {
        let task = parse_page(page(json!({
            "Title": title("Standup"),
            "Date": { "type": "date", "date": { "start": "2025-07-01T09:00:00", "time_zone": "America/New_York" } }
        })))
        .unwrap();

        assert_eq!(
            task.start,
            Some(EventTime::DateTime(Utc.with_ymd_and_hms(2025, 7, 1, 13, 0, 0).unwrap()))
        );
    }

    #[test]
    fn date_only_values_stay_all_day() {
        let task = parse_page(page(json!({
            "Title": title("Holiday"),
            "Date": { "type": "date", "date": { "start": "2025-03-20", "end": "2025-03-22" } }
        })))
        .unwrap();

        assert!(task.is_all_day());
        assert_eq!(
            task.end,
            Some(EventTime::Date(NaiveDate::from_ymd_opt(2025, 3, 22).unwrap()))
        );
    }

    #[test]
    fn title_falls_back_to_other_title_property_then_id() {
        let renamed = parse_page(page(json!({
            "Name": title("  Renamed title  "),
        })))
        .unwrap();
        assert_eq!(renamed.title, "Renamed title");

        let blank = parse_page(page(json!({
            "Title": title("   "),
            "Notes": { "type": "rich_text", "rich_text": [] }
        })))
        .unwrap();
        assert_eq!(blank.title, "1f2e3d4c-0000-0000-0000-000000000001");
    }

    #[test]
    fn title_uses_text_content_when_plain_text_missing() {
        let task = parse_page(page(json!({
            "Title": { "type": "title", "title": [{ "text": { "content": "From content" } }] }
        })))
        .unwrap();
        assert_eq!(task.title, "From content");
    }

    #[test]
    fn unreadable_date_marks_task_malformed() {
        let task = parse_page(page(json!({
            "Title": title("Broken"),
            "Date": { "type": "date", "date": { "start": "sometime soon" } }
        })))
        .unwrap();

        assert_eq!(task.start, None);
        assert!(task.malformed.as_deref().unwrap().contains("sometime soon"));
    }

    #[test]
    fn empty_date_property_is_undated() {
        let task = parse_page(page(json!({
            "Title": title("Someday"),
            "Date": { "type": "date", "date": null }
        })))
        .unwrap();
        assert!(!task.is_dated());
        assert!(task.malformed.is_none());
    }

    #[test]
    fn trashed_pages_are_archived() {
        let mut value = page(json!({ "Title": title("Old") }));
        value["in_trash"] = json!(true);
        assert!(parse_page(value).unwrap().archived);
    }

    #[test]
    fn parent_id_prefers_requested_kind() {
        let value = page(json!({}));
        assert_eq!(parent_id(&value, true).as_deref(), Some("ds-1"));
        assert_eq!(parent_id(&value, false).as_deref(), Some("db-1"));
    }

    #[test]
    fn database_title_and_task_detection() {
        let info = DatabaseInfo::from_value(json!({
            "object": "data_source",
            "id": "ds-1",
            "title": [{ "plain_text": "" }, { "plain_text": "Tasks" }],
            "properties": {
                "Date": { "id": "d", "type": "date", "date": {} },
                "Title": { "id": "title", "type": "title", "title": {} }
            }
        }))
        .unwrap();
        assert_eq!(info.title(), "Tasks");
        assert_eq!(info.is_task_database(), Some(true));

        let notes = DatabaseInfo::from_value(json!({
            "id": "db-2",
            "properties": { "Date": { "type": "created_time" } }
        }))
        .unwrap();
        assert_eq!(notes.title(), "db-2");
        assert_eq!(notes.is_task_database(), Some(false));

        let bare = DatabaseInfo::from_value(json!({ "id": "db-3", "name": "Inbox" })).unwrap();
        assert_eq!(bare.title(), "Inbox");
        assert_eq!(bare.is_task_database(), None);
    }
}
