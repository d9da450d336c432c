//! Typed view over a [`KeyValueStore`].
//!
//! Layout:
//! - `settings:value:<field>`: one JSON value per settings field
//! - `events:<task_id>`: [`EventHashRecord`]
//! - `diagnostics:full` / `diagnostics:incremental`: last [`RunReport`] per kind
//! - `settings`: legacy single-blob settings, migrated on first read

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{DEFAULT_CALENDAR_COLOR, DEFAULT_CALENDAR_NAME, DEFAULT_FULL_SYNC_MINUTES};
use crate::error::{SyncError, SyncResult};
use crate::hash::ContentHash;
use crate::sink::{CalendarIdentity, event_href};
use crate::state::KeyValueStore;
use crate::sync::{RunKind, RunReport};

const LEGACY_SETTINGS_KEY: &str = "settings";
const SETTINGS_PREFIX: &str = "settings:value:";
const EVENTS_PREFIX: &str = "events:";

const FULL_SYNC_INTERVAL: &str = "full_sync_interval_minutes";
const LAST_FULL_SYNC: &str = "last_full_sync";
const CALENDAR_HREF: &str = "calendar_href";
const CALENDAR_NAME: &str = "calendar_name";
const CALENDAR_COLOR: &str = "calendar_color";
const WEBHOOK_TOKEN: &str = "webhook_verification_token";
const LEGACY_EVENT_HASHES: &str = "event_hashes";

/// What the mirror remembers about one synced task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHashRecord {
    pub hash: ContentHash,
    pub href: String,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub full_sync_interval_minutes: u32,
    pub last_full_sync: Option<DateTime<Utc>>,
}

/// Settings as shown to admins. Never carries the webhook token itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsView {
    pub full_sync_interval_minutes: u32,
    pub last_full_sync: Option<DateTime<Utc>>,
    pub calendar_href: Option<String>,
    pub calendar_name: Option<String>,
    pub calendar_color: Option<String>,
    pub webhook_token_stored: bool,
}

/// Admin-editable fields. A blank name or color clears the stored preference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub full_sync_interval_minutes: Option<u32>,
    #[serde(default)]
    pub calendar_name: Option<String>,
    #[serde(default)]
    pub calendar_color: Option<String>,
}

#[derive(Clone)]
pub struct StateStore {
    kv: Arc<dyn KeyValueStore>,
}

impl StateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        StateStore { kv }
    }

    // ---- settings ----

    pub async fn sync_settings(&self) -> SyncResult<SyncSettings> {
        self.migrate_legacy().await?;

        let interval = match self.read_field::<u32>(FULL_SYNC_INTERVAL).await? {
            Some(minutes) if minutes > 0 => minutes,
            _ => DEFAULT_FULL_SYNC_MINUTES,
        };

        Ok(SyncSettings {
            full_sync_interval_minutes: interval,
            last_full_sync: self.read_field(LAST_FULL_SYNC).await?,
        })
    }

    pub async fn set_last_full_sync(&self, at: DateTime<Utc>) -> SyncResult<()> {
        self.write_field(LAST_FULL_SYNC, &at).await
    }

    pub async fn settings_view(&self) -> SyncResult<SettingsView> {
        let settings = self.sync_settings().await?;
        Ok(SettingsView {
            full_sync_interval_minutes: settings.full_sync_interval_minutes,
            last_full_sync: settings.last_full_sync,
            calendar_href: self.read_field(CALENDAR_HREF).await?,
            calendar_name: self.read_field(CALENDAR_NAME).await?,
            calendar_color: self.read_field(CALENDAR_COLOR).await?,
            webhook_token_stored: self.webhook_token().await?.is_some(),
        })
    }

    pub async fn apply_settings_update(&self, update: &SettingsUpdate) -> SyncResult<SettingsView> {
        self.migrate_legacy().await?;

        if let Some(minutes) = update.full_sync_interval_minutes {
            if minutes == 0 {
                return Err(SyncError::Config(
                    "full_sync_interval_minutes must be greater than zero".to_string(),
                ));
            }
            self.write_field(FULL_SYNC_INTERVAL, &minutes).await?;
        }

        for (field, value) in [
            (CALENDAR_NAME, &update.calendar_name),
            (CALENDAR_COLOR, &update.calendar_color),
        ] {
            match value.as_deref().map(str::trim) {
                None => {}
                Some("") => self.remove_field(field).await?,
                Some(v) => self.write_field(field, &v).await?,
            }
        }

        self.settings_view().await
    }

    // ---- calendar identity ----

    /// The stored calendar, if one was ever discovered or created.
    pub async fn calendar_identity(&self) -> SyncResult<Option<CalendarIdentity>> {
        self.migrate_legacy().await?;

        let Some(href) = self.read_field::<String>(CALENDAR_HREF).await? else {
            return Ok(None);
        };
        if href.trim().is_empty() {
            return Ok(None);
        }

        let name = self.read_field::<String>(CALENDAR_NAME).await?;
        let color = self.read_field::<String>(CALENDAR_COLOR).await?;
        Ok(Some(CalendarIdentity {
            href,
            name: name.unwrap_or_else(|| DEFAULT_CALENDAR_NAME.to_string()),
            color: color.unwrap_or_else(|| DEFAULT_CALENDAR_COLOR.to_string()),
        }))
    }

    /// Stored name/color preferences, used when the calendar must be created.
    pub async fn calendar_preferences(&self) -> SyncResult<(Option<String>, Option<String>)> {
        Ok((
            self.read_field(CALENDAR_NAME).await?,
            self.read_field(CALENDAR_COLOR).await?,
        ))
    }

    pub async fn save_calendar_identity(&self, identity: &CalendarIdentity) -> SyncResult<()> {
        self.write_field(CALENDAR_HREF, &identity.href).await?;
        self.write_field(CALENDAR_NAME, &identity.name).await?;
        self.write_field(CALENDAR_COLOR, &identity.color).await
    }

    // ---- webhook token ----

    pub async fn webhook_token(&self) -> SyncResult<Option<String>> {
        self.migrate_legacy().await?;
        let token = self.read_field::<String>(WEBHOOK_TOKEN).await?;
        Ok(token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()))
    }

    pub async fn save_webhook_token(&self, token: &str) -> SyncResult<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SyncError::Config(
                "webhook verification token must not be empty".to_string(),
            ));
        }
        self.write_field(WEBHOOK_TOKEN, &token).await
    }

    // ---- event hash records ----

    pub async fn event_record(&self, task_id: &str) -> SyncResult<Option<EventHashRecord>> {
        self.read_event_key(&event_key(task_id)).await
    }

    /// Every record, keyed by task id.
    pub async fn event_records(&self) -> SyncResult<BTreeMap<String, EventHashRecord>> {
        let mut records = BTreeMap::new();
        for key in self.kv.list(EVENTS_PREFIX).await? {
            let Some(task_id) = key.strip_prefix(EVENTS_PREFIX) else {
                continue;
            };
            if let Some(record) = self.read_event_key(&key).await? {
                records.insert(task_id.to_string(), record);
            }
        }
        Ok(records)
    }

    /// A corrupt record is dropped so it cannot outlive its event.
    async fn read_event_key(&self, key: &str) -> SyncResult<Option<EventHashRecord>> {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(None);
        };
        match decode(key, &raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                tracing::warn!(error = %err, "Removing corrupt event record");
                self.kv.delete(key).await?;
                Ok(None)
            }
        }
    }

    pub async fn put_event_record(&self, task_id: &str, record: &EventHashRecord) -> SyncResult<()> {
        self.write_json(&event_key(task_id), record).await
    }

    pub async fn remove_event_record(&self, task_id: &str) -> SyncResult<()> {
        self.kv.delete(&event_key(task_id)).await
    }

    // ---- diagnostics ----

    pub async fn save_report(&self, report: &RunReport) -> SyncResult<()> {
        self.write_json(report_key(report.kind), report).await
    }

    pub async fn last_report(&self, kind: RunKind) -> SyncResult<Option<RunReport>> {
        self.read_json(report_key(kind)).await
    }

    // ---- legacy migration ----

    /// Split a legacy `settings` blob into per-field keys, then drop it.
    ///
    /// Per-field values that already exist win over the blob. Returns whether
    /// anything was migrated.
    pub async fn migrate_legacy(&self) -> SyncResult<bool> {
        let Some(raw) = self.kv.get(LEGACY_SETTINGS_KEY).await? else {
            return Ok(false);
        };

        let blob = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                tracing::warn!(key = LEGACY_SETTINGS_KEY, "Discarding unreadable legacy settings");
                self.kv.delete(LEGACY_SETTINGS_KEY).await?;
                return Ok(false);
            }
        };

        for (field, value) in &blob {
            if field == LEGACY_EVENT_HASHES || value.is_null() {
                continue;
            }
            let key = field_key(field);
            if self.kv.get(&key).await?.is_none() {
                self.kv.put(&key, &serde_json::to_string(value)?).await?;
            }
        }

        if let Some(Value::Object(hashes)) = blob.get(LEGACY_EVENT_HASHES) {
            let calendar_href = match blob.get(CALENDAR_HREF).and_then(Value::as_str) {
                Some(href) => Some(href.to_string()),
                None => self.read_field::<String>(CALENDAR_HREF).await?,
            };

            match calendar_href {
                Some(calendar_href) => {
                    let now = Utc::now();
                    for (task_id, hash) in hashes {
                        let Some(hash) = hash.as_str() else { continue };
                        if self.kv.get(&event_key(task_id)).await?.is_some() {
                            continue;
                        }
                        let record = EventHashRecord {
                            hash: ContentHash::from(hash.to_string()),
                            href: event_href(&calendar_href, task_id),
                            synced_at: now,
                        };
                        self.put_event_record(task_id, &record).await?;
                    }
                }
                None => tracing::warn!(
                    count = hashes.len(),
                    "Legacy event hashes dropped: no calendar href to rebuild event hrefs"
                ),
            }
        }

        self.kv.delete(LEGACY_SETTINGS_KEY).await?;
        tracing::info!(fields = blob.len(), "Migrated legacy settings blob");
        Ok(true)
    }

    // ---- raw helpers ----

    async fn read_field<T: DeserializeOwned>(&self, field: &str) -> SyncResult<Option<T>> {
        self.read_json(&field_key(field)).await
    }

    async fn write_field<T: Serialize + ?Sized>(&self, field: &str, value: &T) -> SyncResult<()> {
        self.write_json(&field_key(field), value).await
    }

    async fn remove_field(&self, field: &str) -> SyncResult<()> {
        self.kv.delete(&field_key(field)).await
    }

    /// Corrupt values are logged and read as missing.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> SyncResult<Option<T>> {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(None);
        };
        match decode(key, &raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!(error = %err, "Ignoring corrupt state value");
                Ok(None)
            }
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> SyncResult<()> {
        let raw = serde_json::to_string(value)?;
        self.kv.put(key, &raw).await
    }
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> SyncResult<T> {
    serde_json::from_str(raw).map_err(|e| SyncError::StateCorrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn field_key(field: &str) -> String {
    format!("{}{}", SETTINGS_PREFIX, field)
}

fn event_key(task_id: &str) -> String {
    format!("{}{}", EVENTS_PREFIX, task_id)
}

fn report_key(kind: RunKind) -> &'static str {
    match kind {
        RunKind::Full => "diagnostics:full",
        RunKind::Incremental => "diagnostics:incremental",
    }
}
