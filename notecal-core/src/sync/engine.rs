//! Full reconciliation, single-task incremental updates, and trigger dispatch.

use std::collections::{BTreeMap, HashSet};
use std::collections::btree_map::Entry;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::constants::{DEFAULT_CALENDAR_COLOR, DEFAULT_CALENDAR_NAME};
use crate::error::{SyncError, SyncResult};
use crate::event::DesiredEvent;
use crate::hash::ContentHash;
use crate::sink::{CalendarIdentity, CalendarSink};
use crate::source::TaskSource;
use crate::state::{EventHashRecord, StateStore};
use crate::sync::{RunKind, RunReport, SyncAction, SyncPlan};
use crate::task::{Task, TaskScope};
use crate::trigger::{ChangeSignal, Trigger, TriggerOutcome, full_sync_due, next_full_sync};

/// Name and color used when the calendar has to be created and no admin
/// preference is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarDefaults {
    pub name: String,
    pub color: String,
}

impl Default for CalendarDefaults {
    fn default() -> Self {
        CalendarDefaults {
            name: DEFAULT_CALENDAR_NAME.to_string(),
            color: DEFAULT_CALENDAR_COLOR.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    source: Arc<dyn TaskSource>,
    sink: Arc<dyn CalendarSink>,
    state: StateStore,
    scope: TaskScope,
    defaults: CalendarDefaults,
}

impl SyncEngine {
    pub fn new(source: Arc<dyn TaskSource>, sink: Arc<dyn CalendarSink>, state: StateStore) -> Self {
        SyncEngine {
            source,
            sink,
            state,
            scope: TaskScope::default(),
            defaults: CalendarDefaults::default(),
        }
    }

    pub fn with_scope(mut self, scope: TaskScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_calendar_defaults(mut self, defaults: CalendarDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub async fn dispatch(&self, trigger: Trigger, now: DateTime<Utc>) -> SyncResult<TriggerOutcome> {
        match trigger {
            Trigger::CronTick => {
                let settings = self.state.sync_settings().await?;
                if !full_sync_due(&settings, now) {
                    let next_due = next_full_sync(&settings).unwrap_or(now);
                    tracing::debug!(%next_due, "Full sync not due yet");
                    return Ok(TriggerOutcome::Skipped { next_due });
                }
                Ok(TriggerOutcome::FullSync(self.full_sync(now).await))
            }
            Trigger::ForceFullSync => Ok(TriggerOutcome::FullSync(self.full_sync(now).await)),
            Trigger::Webhook(signals) => {
                let mut reports = Vec::with_capacity(signals.len());
                for signal in &signals {
                    match self.incremental(signal, now).await {
                        Ok(report) => reports.push(report),
                        Err(err) => {
                            tracing::warn!(task_id = %signal.task_id, error = %err, "Incremental update failed");
                            let mut report = RunReport::for_task(&signal.task_id, now);
                            report.abort(err.to_string());
                            reports.push(report);
                        }
                    }
                }
                Ok(TriggerOutcome::Incremental(reports))
            }
        }
    }

    // ---- full reconciliation ----

    /// Reconcile the whole calendar against every task in scope.
    ///
    /// Never fails: an aborted run is reported through [`RunReport::aborted`].
    /// The report is persisted either way.
    pub async fn full_sync(&self, now: DateTime<Utc>) -> RunReport {
        let mut report = RunReport::new(RunKind::Full, now);

        match self.reconcile(now, &mut report).await {
            Ok(()) => {
                if let Err(err) = self.state.set_last_full_sync(now).await {
                    tracing::error!(error = %err, "Failed to record full sync time");
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "Full sync aborted");
                report.abort(err.to_string());
            }
        }

        report.finish(Utc::now());
        self.persist_report(&report).await;
        tracing::info!("{}", report);
        report
    }

    async fn reconcile(&self, now: DateTime<Utc>, report: &mut RunReport) -> SyncResult<()> {
        let tasks = self.source.fetch_tasks(&self.scope).await?;
        tracing::debug!(count = tasks.len(), "Fetched tasks");

        let (desired, protected) = desired_set(&tasks, now, report);
        let calendar = self.calendar().await?;
        let records = self.state.event_records().await?;
        let remote = self.sink.list_events(&calendar).await?;

        let plan = SyncPlan::build(&desired, &records, &remote, &protected);
        report.unchanged = plan.unchanged;

        let (created, updated, deleted) = plan.counts();
        tracing::info!(
            calendar = %calendar.name,
            created,
            updated,
            deleted,
            unchanged = plan.unchanged,
            "Planned full sync"
        );

        for action in &plan.actions {
            self.apply_action(&calendar, action, now, report).await;
        }
        Ok(())
    }

    /// Stored identity if any, otherwise discover or create the calendar.
    async fn calendar(&self) -> SyncResult<CalendarIdentity> {
        if let Some(identity) = self.state.calendar_identity().await? {
            return Ok(identity);
        }

        let (name, color) = self.state.calendar_preferences().await?;
        let name = name.unwrap_or_else(|| self.defaults.name.clone());
        let color = color.unwrap_or_else(|| self.defaults.color.clone());

        let identity = self.sink.ensure_calendar(&name, &color).await?;
        self.state.save_calendar_identity(&identity).await?;
        tracing::info!(href = %identity.href, name = %identity.name, "Calendar initialized");
        Ok(identity)
    }

    // ---- incremental ----

    /// Bring the calendar in line with one task, touching nothing else.
    pub async fn incremental(&self, signal: &ChangeSignal, now: DateTime<Utc>) -> SyncResult<RunReport> {
        let mut report = RunReport::for_task(&signal.task_id, now);
        let result = self.update_one(signal, now, &mut report).await;

        if let Err(err) = &result {
            report.abort(err.to_string());
        }
        report.finish(Utc::now());
        self.persist_report(&report).await;

        result.map(|()| report)
    }

    async fn update_one(
        &self,
        signal: &ChangeSignal,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) -> SyncResult<()> {
        let calendar = self
            .state
            .calendar_identity()
            .await?
            .ok_or(SyncError::CalendarNotInitialized)?;

        let task = if signal.removed {
            None
        } else {
            self.source.fetch_task(&signal.task_id).await?
        };
        let record = self.state.event_record(&signal.task_id).await?;

        let task = task.filter(|t| !t.archived && self.scope.includes(t));
        let desired = match task {
            None => None,
            Some(task) => match DesiredEvent::project(&task, now) {
                Ok(event) => event,
                Err(invalid) => {
                    tracing::warn!(task_id = %invalid.task_id, reason = %invalid.reason, "Skipping invalid task");
                    report.invalid_task(&invalid.task_id, invalid.reason);
                    return Ok(());
                }
            },
        };

        let action = match (desired, record) {
            (None, None) => {
                tracing::debug!(task_id = %signal.task_id, "Task not eligible and never synced");
                return Ok(());
            }
            (None, Some(record)) => SyncAction::Delete {
                task_id: signal.task_id.clone(),
                href: record.href,
            },
            (Some(event), None) => {
                let hash = event.content_hash();
                SyncAction::Create {
                    event,
                    hash,
                    recreate: false,
                }
            }
            (Some(event), Some(record)) => {
                let hash = event.content_hash();
                if hash == record.hash {
                    report.unchanged += 1;
                    return Ok(());
                }
                SyncAction::Update {
                    event,
                    hash,
                    href: record.href,
                }
            }
        };

        self.apply_action(&calendar, &action, now, report).await;
        Ok(())
    }

    // ---- shared ----

    /// Apply one action; failures are logged and counted, never propagated.
    async fn apply_action(
        &self,
        calendar: &CalendarIdentity,
        action: &SyncAction,
        now: DateTime<Utc>,
        report: &mut RunReport,
    ) {
        match self.write(calendar, action, now).await {
            Ok(()) => {
                tracing::info!("{}", action);
                report.applied(action.kind());
            }
            Err(err) => {
                tracing::warn!(
                    task_id = action.task_id().unwrap_or("-"),
                    error = %err,
                    "Failed to apply {}",
                    action
                );
                report.failure(action.kind(), action.task_id(), action.href(), err.to_string());
            }
        }
    }

    /// Records change only after the calendar write succeeded.
    async fn write(
        &self,
        calendar: &CalendarIdentity,
        action: &SyncAction,
        now: DateTime<Utc>,
    ) -> SyncResult<()> {
        match action {
            SyncAction::Create { event, hash, .. } => {
                let href = self.sink.create_event(calendar, event).await?;
                self.store_record(&event.task_id, hash, href, now).await
            }
            SyncAction::Update { event, hash, href } => {
                self.sink.update_event(calendar, href, event).await?;
                self.store_record(&event.task_id, hash, href.clone(), now).await
            }
            SyncAction::Delete { task_id, href } => {
                self.sink.delete_event(calendar, href).await?;
                self.state.remove_event_record(task_id).await
            }
            SyncAction::DeleteOrphan { href } => {
                self.sink.delete_event(calendar, href).await?;
                Ok(())
            }
        }
    }

    async fn store_record(
        &self,
        task_id: &str,
        hash: &ContentHash,
        href: String,
        now: DateTime<Utc>,
    ) -> SyncResult<()> {
        let record = EventHashRecord {
            hash: hash.clone(),
            href,
            synced_at: now,
        };
        self.state.put_event_record(task_id, &record).await
    }

    async fn persist_report(&self, report: &RunReport) {
        if let Err(err) = self.state.save_report(report).await {
            tracing::warn!(kind = %report.kind, error = %err, "Failed to persist run report");
        }
    }
}

/// Project every fetched task.
///
/// Returns the desired events keyed by task id, plus the ids of tasks that
/// failed to project and must not lose their records this run.
fn desired_set(
    tasks: &[Task],
    now: DateTime<Utc>,
    report: &mut RunReport,
) -> (BTreeMap<String, (DesiredEvent, ContentHash)>, HashSet<String>) {
    let mut desired = BTreeMap::new();
    let mut protected = HashSet::new();

    for task in tasks {
        if task.archived {
            continue;
        }
        match DesiredEvent::project(task, now) {
            Ok(None) => report.undated += 1,
            Ok(Some(event)) => {
                let hash = event.content_hash();
                match desired.entry(event.task_id.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert((event, hash));
                    }
                    Entry::Occupied(_) => {
                        tracing::warn!(task_id = %event.task_id, "Duplicate task in source listing, keeping the first");
                    }
                }
            }
            Err(invalid) => {
                tracing::warn!(task_id = %invalid.task_id, reason = %invalid.reason, "Skipping invalid task");
                report.invalid_task(&invalid.task_id, invalid.reason);
                protected.insert(task.id.clone());
            }
        }
    }

    (desired, protected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::event::EventTime;
    use crate::state::MemoryStore;
    use crate::testing::{FakeSink, FakeSource};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    fn task(id: &str, title: &str, hour: u32) -> Task {
        let mut task = Task::new(id, title);
        task.start = Some(EventTime::DateTime(
            Utc.with_ymd_and_hms(2025, 3, 20, hour, 0, 0).unwrap(),
        ));
        task.database_id = Some("db1".to_string());
        task.database_name = Some("Tasks".to_string());
        task
    }

    struct Harness {
        source: Arc<FakeSource>,
        sink: Arc<FakeSink>,
        engine: SyncEngine,
    }

    fn harness(tasks: Vec<Task>) -> Harness {
        harness_with_sink(tasks, FakeSink::new())
    }

    fn harness_with_sink(tasks: Vec<Task>, sink: FakeSink) -> Harness {
        let source = Arc::new(FakeSource::new(tasks));
        let sink = Arc::new(sink);
        let state = StateStore::new(Arc::new(MemoryStore::new()));
        let engine = SyncEngine::new(source.clone(), sink.clone(), state);
        Harness {
            source,
            sink,
            engine,
        }
    }

    #[tokio::test]
    async fn first_run_creates_and_second_run_is_a_no_op() {
        let h = harness(vec![task("a", "Alpha", 9), task("b", "Beta", 10)]);

        let report = h.engine.full_sync(now()).await;
        assert!(!report.is_aborted());
        assert_eq!(report.created, 2);
        assert_eq!(h.sink.events().len(), 2);

        h.sink.clear_calls();
        let report = h.engine.full_sync(now()).await;
        assert_eq!(report.changes(), 0);
        assert_eq!(report.unchanged, 2);
        assert!(h.sink.write_calls().is_empty(), "{:?}", h.sink.calls());
    }

    #[tokio::test]
    async fn records_point_at_deterministic_hrefs() {
        let h = harness(vec![task("a", "Alpha", 9)]);
        h.engine.full_sync(now()).await;

        let record = h.engine.state().event_record("a").await.unwrap().unwrap();
        assert_eq!(record.href, "/fake/calendars/notion/a.ics");
        assert_eq!(record.synced_at, now());
        let event = h.sink.event_for("a").unwrap();
        assert_eq!(record.hash, event.content_hash());
    }

    #[tokio::test]
    async fn calendar_identity_is_resolved_once() {
        let h = harness(vec![task("a", "Alpha", 9)]);

        h.engine.full_sync(now()).await;
        h.engine.full_sync(now()).await;

        let ensures = h
            .sink
            .calls()
            .iter()
            .filter(|c| c.as_str() == "ensure_calendar")
            .count();
        assert_eq!(ensures, 1);

        let identity = h.engine.state().calendar_identity().await.unwrap().unwrap();
        assert_eq!(identity.name, "Notion");
        assert_eq!(identity.color, "#FF7F00");
    }

    #[tokio::test]
    async fn existing_calendar_is_adopted_with_stored_preferences() {
        let existing = CalendarIdentity {
            href: "/home/tasks/".to_string(),
            name: "Work Tasks".to_string(),
            color: "#123456".to_string(),
        };
        let h = harness_with_sink(
            vec![task("a", "Alpha", 9)],
            FakeSink::new().with_calendar(existing.clone()),
        );
        h.engine
            .state()
            .apply_settings_update(&crate::state::SettingsUpdate {
                calendar_name: Some("Work Tasks".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        h.engine.full_sync(now()).await;

        assert_eq!(
            h.engine.state().calendar_identity().await.unwrap(),
            Some(existing)
        );
        assert!(h.sink.events().contains_key("/home/tasks/a.ics"));
    }

    #[tokio::test]
    async fn undated_tasks_never_become_events_and_clearing_a_date_deletes() {
        let mut undated = task("u", "Someday", 9);
        undated.start = None;
        let h = harness(vec![task("a", "Alpha", 9), undated]);

        let report = h.engine.full_sync(now()).await;
        assert_eq!(report.created, 1);
        assert_eq!(report.undated, 1);
        assert!(h.sink.event_for("u").is_none());

        let mut cleared = task("a", "Alpha", 9);
        cleared.start = None;
        h.source.upsert(cleared);

        let report = h.engine.full_sync(now()).await;
        assert_eq!(report.deleted, 1);
        assert!(h.sink.events().is_empty());
        assert_eq!(h.engine.state().event_record("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn edited_task_is_updated_in_place() {
        let h = harness(vec![task("a", "Alpha", 9)]);
        h.engine.full_sync(now()).await;
        let before = h.engine.state().event_record("a").await.unwrap().unwrap();

        h.source.upsert(task("a", "Alpha renamed", 9));
        h.sink.clear_calls();
        let report = h.engine.full_sync(now()).await;

        assert_eq!(report.updated, 1);
        assert_eq!(h.sink.write_calls(), vec!["update:a".to_string()]);
        let after = h.engine.state().event_record("a").await.unwrap().unwrap();
        assert_eq!(after.href, before.href);
        assert_ne!(after.hash, before.hash);
        assert_eq!(h.sink.event_for("a").unwrap().summary, "📝 Alpha renamed");
    }

    #[tokio::test]
    async fn one_failing_item_does_not_stop_the_rest() {
        let tasks: Vec<Task> = (1..=5)
            .map(|i| task(&format!("t{}", i), &format!("Task {}", i), 8 + i))
            .collect();
        let h = harness(tasks);
        h.sink.fail_task("t3");

        let report = h.engine.full_sync(now()).await;
        assert!(!report.is_aborted());
        assert_eq!(report.created, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors[0].task_id.as_deref(), Some("t3"));

        let records = h.engine.state().event_records().await.unwrap();
        assert_eq!(records.len(), 4);
        assert!(!records.contains_key("t3"));

        // The failed item is retried on the next run, nothing else is touched
        h.sink.heal_task("t3");
        h.sink.clear_calls();
        let report = h.engine.full_sync(now()).await;
        assert_eq!(report.created, 1);
        assert_eq!(h.sink.write_calls(), vec!["create:t3".to_string()]);
    }

    #[tokio::test]
    async fn failed_delete_keeps_the_record() {
        let h = harness(vec![task("a", "Alpha", 9)]);
        h.engine.full_sync(now()).await;

        h.source.remove("a");
        h.sink.fail_task("a");
        let report = h.engine.full_sync(now()).await;
        assert_eq!(report.failed, 1);
        assert!(h.engine.state().event_record("a").await.unwrap().is_some());

        h.sink.heal_task("a");
        let report = h.engine.full_sync(now()).await;
        assert_eq!(report.deleted, 1);
        assert!(h.engine.state().event_record("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn manually_deleted_event_is_recreated() {
        let h = harness(vec![task("a", "Alpha", 9)]);
        h.engine.full_sync(now()).await;

        h.sink.remove_event("/fake/calendars/notion/a.ics");
        let report = h.engine.full_sync(now()).await;

        assert_eq!(report.created, 1);
        assert!(h.sink.event_for("a").is_some());
    }

    #[tokio::test]
    async fn orphans_are_removed() {
        let h = harness(vec![task("a", "Alpha", 9)]);
        h.engine.full_sync(now()).await;

        h.sink.insert_foreign("/fake/calendars/notion/stray.ics");
        let report = h.engine.full_sync(now()).await;

        assert_eq!(report.deleted, 1);
        assert!(h.sink.foreign().is_empty());
        assert!(h.sink.event_for("a").is_some());
    }

    #[tokio::test]
    async fn invalid_task_keeps_its_existing_record() {
        let h = harness(vec![task("a", "Alpha", 9)]);
        h.engine.full_sync(now()).await;

        // End before start makes the task unprojectable
        let mut broken = task("a", "Alpha", 9);
        broken.end = Some(EventTime::DateTime(
            Utc.with_ymd_and_hms(2025, 3, 19, 9, 0, 0).unwrap(),
        ));
        h.source.upsert(broken);

        h.sink.clear_calls();
        let report = h.engine.full_sync(now()).await;
        assert_eq!(report.invalid, 1);
        assert_eq!(report.deleted, 0);
        assert!(h.sink.write_calls().is_empty());
        assert!(h.engine.state().event_record("a").await.unwrap().is_some());
        assert!(h.sink.event_for("a").is_some());
    }

    #[tokio::test]
    async fn source_failure_aborts_without_touching_state() {
        let h = harness(vec![task("a", "Alpha", 9)]);
        h.source.fail_with(SourceError::Unavailable("down".to_string()));

        let report = h.engine.full_sync(now()).await;
        assert!(report.is_aborted());
        assert!(h.sink.calls().is_empty());

        let state = h.engine.state();
        assert_eq!(state.calendar_identity().await.unwrap(), None);
        assert!(state.event_records().await.unwrap().is_empty());
        assert_eq!(state.sync_settings().await.unwrap().last_full_sync, None);

        let stored = state.last_report(RunKind::Full).await.unwrap().unwrap();
        assert!(stored.aborted.unwrap().contains("down"));
    }

    #[tokio::test]
    async fn listing_failure_aborts_before_writes() {
        let h = harness(vec![task("a", "Alpha", 9)]);
        h.sink.fail_listing(true);

        let report = h.engine.full_sync(now()).await;
        assert!(report.is_aborted());
        assert!(h.sink.write_calls().is_empty());
        assert!(h.engine.state().event_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cron_tick_respects_the_interval() {
        let h = harness(vec![task("a", "Alpha", 9)]);
        let state = h.engine.state();

        let ten_minutes_ago = now() - Duration::minutes(10);
        state.set_last_full_sync(ten_minutes_ago).await.unwrap();
        let outcome = h.engine.dispatch(Trigger::CronTick, now()).await.unwrap();
        assert_eq!(
            outcome,
            TriggerOutcome::Skipped {
                next_due: ten_minutes_ago + Duration::minutes(30)
            }
        );
        assert!(h.source.calls().is_empty());

        state
            .set_last_full_sync(now() - Duration::minutes(31))
            .await
            .unwrap();
        let outcome = h.engine.dispatch(Trigger::CronTick, now()).await.unwrap();
        assert!(matches!(outcome, TriggerOutcome::FullSync(ref r) if r.created == 1));
        assert_eq!(state.sync_settings().await.unwrap().last_full_sync, Some(now()));
    }

    #[tokio::test]
    async fn forced_full_sync_ignores_the_interval() {
        let h = harness(vec![task("a", "Alpha", 9)]);
        h.engine.state().set_last_full_sync(now()).await.unwrap();

        let outcome = h.engine.dispatch(Trigger::ForceFullSync, now()).await.unwrap();
        assert!(matches!(outcome, TriggerOutcome::FullSync(_)));
        assert_eq!(h.source.calls(), vec!["fetch_tasks".to_string()]);
    }

    #[tokio::test]
    async fn incremental_requires_an_initialized_calendar() {
        let h = harness(vec![task("a", "Alpha", 9)]);

        let result = h.engine.incremental(&ChangeSignal::changed("a"), now()).await;
        assert!(matches!(result, Err(SyncError::CalendarNotInitialized)));
        assert!(h.sink.calls().is_empty());
    }

    #[tokio::test]
    async fn incremental_touches_only_the_signalled_task() {
        let h = harness(vec![task("a", "Alpha", 9), task("b", "Beta", 10)]);
        h.engine.full_sync(now()).await;
        h.source.clear_calls();
        h.sink.clear_calls();

        h.source.upsert(task("a", "Alpha v2", 9));
        h.source.upsert(task("b", "Beta v2", 10));
        let report = h
            .engine
            .incremental(&ChangeSignal::changed("a"), now())
            .await
            .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(h.source.calls(), vec!["fetch_task:a".to_string()]);
        assert_eq!(h.sink.calls(), vec!["update:a".to_string()]);
        assert_eq!(h.sink.event_for("b").unwrap().summary, "📝 Beta");
    }

    #[tokio::test]
    async fn incremental_creates_then_no_ops_on_same_content() {
        let h = harness(vec![task("a", "Alpha", 9)]);
        h.engine.full_sync(now()).await;
        h.sink.clear_calls();

        h.source.upsert(task("n", "New", 11));
        let report = h
            .engine
            .incremental(&ChangeSignal::changed("n"), now())
            .await
            .unwrap();
        assert_eq!(report.created, 1);

        let report = h
            .engine
            .incremental(&ChangeSignal::changed("n"), now())
            .await
            .unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(h.sink.write_calls(), vec!["create:n".to_string()]);
    }

    #[tokio::test]
    async fn incremental_deletes_when_task_leaves_the_desired_set() {
        let h = harness(vec![
            task("gone", "Gone", 8),
            task("arch", "Archived", 9),
            task("undated", "Undated", 10),
            task("moved", "Moved", 11),
        ]);
        let h = Harness {
            engine: h.engine.with_scope(TaskScope::from_ids(["db1"])),
            ..h
        };
        h.engine.full_sync(now()).await;
        assert_eq!(h.sink.events().len(), 4);

        h.source.remove("gone");
        let mut archived = task("arch", "Archived", 9);
        archived.archived = true;
        h.source.upsert(archived);
        let mut undated = task("undated", "Undated", 10);
        undated.start = None;
        h.source.upsert(undated);
        let mut moved = task("moved", "Moved", 11);
        moved.database_id = Some("db2".to_string());
        h.source.upsert(moved);

        for id in ["gone", "arch", "undated", "moved"] {
            let report = h
                .engine
                .incremental(&ChangeSignal::changed(id), now())
                .await
                .unwrap();
            assert_eq!(report.deleted, 1, "{}", id);
        }
        assert!(h.sink.events().is_empty());
        assert!(h.engine.state().event_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removal_signal_deletes_without_refetching() {
        let h = harness(vec![task("a", "Alpha", 9)]);
        h.engine.full_sync(now()).await;
        h.source.clear_calls();

        let report = h
            .engine
            .incremental(&ChangeSignal::removed("a"), now())
            .await
            .unwrap();

        assert_eq!(report.deleted, 1);
        assert!(h.source.calls().is_empty());
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn removal_of_unknown_task_is_a_no_op() {
        let h = harness(vec![task("a", "Alpha", 9)]);
        h.engine.full_sync(now()).await;
        h.sink.clear_calls();

        let report = h
            .engine
            .incremental(&ChangeSignal::removed("never-synced"), now())
            .await
            .unwrap();
        assert_eq!(report.changes(), 0);
        assert!(h.sink.calls().is_empty());
    }

    #[tokio::test]
    async fn webhook_dispatch_reports_each_signal() {
        let h = harness(vec![task("a", "Alpha", 9)]);

        let outcome = h
            .engine
            .dispatch(
                Trigger::Webhook(vec![ChangeSignal::changed("a")]),
                now(),
            )
            .await
            .unwrap();
        let TriggerOutcome::Incremental(reports) = outcome else {
            panic!("expected incremental outcome");
        };
        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_aborted(), "calendar not initialized yet");

        h.engine.full_sync(now()).await;
        h.source.upsert(task("a", "Alpha v2", 9));
        let outcome = h
            .engine
            .dispatch(
                Trigger::Webhook(vec![ChangeSignal::changed("a")]),
                now(),
            )
            .await
            .unwrap();
        let TriggerOutcome::Incremental(reports) = outcome else {
            panic!("expected incremental outcome");
        };
        assert_eq!(reports[0].updated, 1);
        assert_eq!(
            h.engine
                .state()
                .last_report(RunKind::Incremental)
                .await
                .unwrap()
                .unwrap()
                .task_id
                .as_deref(),
            Some("a")
        );
    }
}
