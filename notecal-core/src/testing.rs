//! In-memory source and sink for exercising the engine without a network.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{SinkError, SinkResult, SourceError, SourceResult};
use crate::event::DesiredEvent;
use crate::sink::{CalendarIdentity, CalendarSink, RemoteEvent, event_href, task_id_from_href};
use crate::source::TaskSource;
use crate::task::{Task, TaskScope};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct FakeSource {
    tasks: Mutex<BTreeMap<String, Task>>,
    failure: Mutex<Option<SourceError>>,
    calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new(tasks: impl IntoIterator<Item = Task>) -> Self {
        let source = FakeSource::default();
        for task in tasks {
            source.upsert(task);
        }
        source
    }

    pub fn upsert(&self, task: Task) {
        lock(&self.tasks).insert(task.id.clone(), task);
    }

    pub fn remove(&self, task_id: &str) {
        lock(&self.tasks).remove(task_id);
    }

    /// Every following call fails with `error` until [`FakeSource::recover`].
    pub fn fail_with(&self, error: SourceError) {
        *lock(&self.failure) = Some(error);
    }

    pub fn recover(&self) {
        *lock(&self.failure) = None;
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn check_failure(&self) -> SourceResult<()> {
        match lock(&self.failure).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TaskSource for FakeSource {
    async fn fetch_tasks(&self, scope: &TaskScope) -> SourceResult<Vec<Task>> {
        lock(&self.calls).push("fetch_tasks".to_string());
        self.check_failure()?;
        Ok(lock(&self.tasks)
            .values()
            .filter(|task| match scope {
                TaskScope::AllShared => true,
                TaskScope::Databases(_) => scope.includes(task),
            })
            .cloned()
            .collect())
    }

    async fn fetch_task(&self, task_id: &str) -> SourceResult<Option<Task>> {
        lock(&self.calls).push(format!("fetch_task:{}", task_id));
        self.check_failure()?;
        Ok(lock(&self.tasks).get(task_id).cloned())
    }
}

/// Calendar sink that keeps events in memory and records every call.
///
/// Calls are recorded as `ensure_calendar`, `list_events`, `create:<task_id>`,
/// `update:<task_id>` and `delete:<href>`.
pub struct FakeSink {
    calendars: Mutex<Vec<CalendarIdentity>>,
    events: Mutex<BTreeMap<String, DesiredEvent>>,
    foreign: Mutex<HashSet<String>>,
    failing_tasks: Mutex<HashSet<String>>,
    failing_listing: Mutex<bool>,
    calls: Mutex<Vec<String>>,
}

impl Default for FakeSink {
    fn default() -> Self {
        FakeSink {
            calendars: Mutex::new(Vec::new()),
            events: Mutex::new(BTreeMap::new()),
            foreign: Mutex::new(HashSet::new()),
            failing_tasks: Mutex::new(HashSet::new()),
            failing_listing: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a calendar already exists on the server.
    pub fn with_calendar(self, identity: CalendarIdentity) -> Self {
        lock(&self.calendars).push(identity);
        self
    }

    /// Events currently stored, keyed by href.
    pub fn events(&self) -> BTreeMap<String, DesiredEvent> {
        lock(&self.events).clone()
    }

    pub fn event_for(&self, task_id: &str) -> Option<DesiredEvent> {
        lock(&self.events)
            .values()
            .find(|e| e.task_id == task_id)
            .cloned()
    }

    /// Simulate a user deleting the event by hand.
    pub fn remove_event(&self, href: &str) {
        lock(&self.events).remove(href);
    }

    /// Add a resource the mirror never wrote.
    pub fn insert_foreign(&self, href: &str) {
        lock(&self.foreign).insert(href.to_string());
    }

    pub fn foreign(&self) -> HashSet<String> {
        lock(&self.foreign).clone()
    }

    pub fn fail_task(&self, task_id: &str) {
        lock(&self.failing_tasks).insert(task_id.to_string());
    }

    pub fn heal_task(&self, task_id: &str) {
        lock(&self.failing_tasks).remove(task_id);
    }

    pub fn fail_listing(&self, fail: bool) {
        *lock(&self.failing_listing) = fail;
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Calls that change the calendar.
    pub fn write_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("create:") || c.starts_with("update:") || c.starts_with("delete:"))
            .collect()
    }

    fn check_task(&self, task_id: &str) -> SinkResult<()> {
        if lock(&self.failing_tasks).contains(task_id) {
            return Err(SinkError::Rejected {
                status: 500,
                message: format!("injected failure for {}", task_id),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CalendarSink for FakeSink {
    async fn ensure_calendar(&self, name: &str, color: &str) -> SinkResult<CalendarIdentity> {
        lock(&self.calls).push("ensure_calendar".to_string());
        let mut calendars = lock(&self.calendars);
        if let Some(existing) = calendars.iter().find(|c| c.name == name) {
            return Ok(existing.clone());
        }
        let identity = CalendarIdentity {
            href: format!("/fake/calendars/{}/", name.to_lowercase().replace(' ', "-")),
            name: name.to_string(),
            color: color.to_string(),
        };
        calendars.push(identity.clone());
        Ok(identity)
    }

    async fn list_events(&self, _calendar: &CalendarIdentity) -> SinkResult<Vec<RemoteEvent>> {
        lock(&self.calls).push("list_events".to_string());
        if *lock(&self.failing_listing) {
            return Err(SinkError::Unavailable("injected listing failure".to_string()));
        }

        let mut hrefs: Vec<String> = lock(&self.events).keys().cloned().collect();
        hrefs.extend(lock(&self.foreign).iter().cloned());
        hrefs.sort();

        Ok(hrefs
            .into_iter()
            .map(|href| RemoteEvent {
                task_id: task_id_from_href(&href),
                href,
                etag: None,
            })
            .collect())
    }

    async fn create_event(
        &self,
        calendar: &CalendarIdentity,
        event: &DesiredEvent,
    ) -> SinkResult<String> {
        lock(&self.calls).push(format!("create:{}", event.task_id));
        self.check_task(&event.task_id)?;
        let href = event_href(&calendar.href, &event.task_id);
        lock(&self.events).insert(href.clone(), event.clone());
        Ok(href)
    }

    async fn update_event(
        &self,
        _calendar: &CalendarIdentity,
        href: &str,
        event: &DesiredEvent,
    ) -> SinkResult<()> {
        lock(&self.calls).push(format!("update:{}", event.task_id));
        self.check_task(&event.task_id)?;
        lock(&self.events).insert(href.to_string(), event.clone());
        Ok(())
    }

    async fn delete_event(&self, _calendar: &CalendarIdentity, href: &str) -> SinkResult<()> {
        lock(&self.calls).push(format!("delete:{}", href));
        if let Some(task_id) = task_id_from_href(href) {
            self.check_task(&task_id)?;
        }
        lock(&self.events).remove(href);
        lock(&self.foreign).remove(href);
        Ok(())
    }
}
