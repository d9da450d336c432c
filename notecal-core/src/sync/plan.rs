//! Three-way diff between the desired events, the stored hash records and the
//! calendar listing.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::event::DesiredEvent;
use crate::hash::ContentHash;
use crate::sink::RemoteEvent;
use crate::state::EventHashRecord;
use crate::sync::DiffKind;

/// One calendar write the engine intends to make.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// No record, or a record whose event vanished from the calendar.
    Create {
        event: DesiredEvent,
        hash: ContentHash,
        recreate: bool,
    },
    Update {
        event: DesiredEvent,
        hash: ContentHash,
        href: String,
    },
    /// A recorded task that left the desired set.
    Delete { task_id: String, href: String },
    /// A calendar resource nothing accounts for.
    DeleteOrphan { href: String },
}

impl SyncAction {
    pub fn kind(&self) -> DiffKind {
        match self {
            SyncAction::Create { .. } => DiffKind::Create,
            SyncAction::Update { .. } => DiffKind::Update,
            SyncAction::Delete { .. } | SyncAction::DeleteOrphan { .. } => DiffKind::Delete,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            SyncAction::Create { event, .. } | SyncAction::Update { event, .. } => {
                Some(&event.task_id)
            }
            SyncAction::Delete { task_id, .. } => Some(task_id),
            SyncAction::DeleteOrphan { .. } => None,
        }
    }

    pub fn href(&self) -> Option<&str> {
        match self {
            SyncAction::Create { .. } => None,
            SyncAction::Update { href, .. }
            | SyncAction::Delete { href, .. }
            | SyncAction::DeleteOrphan { href } => Some(href),
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Create { event, recreate, .. } => {
                let note = if *recreate { " (recreate)" } else { "" };
                write!(f, "{}: {}{}", self.kind(), event, note)
            }
            SyncAction::Update { event, .. } => write!(f, "{}: {}", self.kind(), event),
            SyncAction::Delete { task_id, .. } => write!(f, "{}: task {}", self.kind(), task_id),
            SyncAction::DeleteOrphan { href } => write!(f, "{}: orphan {}", self.kind(), href),
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Deletes first, then creates and updates ordered by start.
    pub actions: Vec<SyncAction>,
    pub unchanged: usize,
}

impl SyncPlan {
    /// Build the plan.
    ///
    /// `protected` holds ids of tasks that were fetched but failed to project;
    /// their records and events are left alone for this run.
    pub fn build(
        desired: &BTreeMap<String, (DesiredEvent, ContentHash)>,
        records: &BTreeMap<String, EventHashRecord>,
        remote: &[RemoteEvent],
        protected: &HashSet<String>,
    ) -> SyncPlan {
        let remote_task_ids: HashSet<&str> =
            remote.iter().filter_map(|e| e.task_id.as_deref()).collect();
        let remote_hrefs: HashSet<&str> = remote.iter().map(|e| e.href.as_str()).collect();
        let record_hrefs: HashSet<&str> = records.values().map(|r| r.href.as_str()).collect();

        let mut deletes = Vec::new();
        let mut writes = Vec::new();
        let mut unchanged = 0;

        for (task_id, (event, hash)) in desired {
            match records.get(task_id) {
                None => writes.push(SyncAction::Create {
                    event: event.clone(),
                    hash: hash.clone(),
                    recreate: false,
                }),
                Some(record) => {
                    let present = remote_task_ids.contains(task_id.as_str())
                        || remote_hrefs.contains(record.href.as_str());
                    if !present {
                        writes.push(SyncAction::Create {
                            event: event.clone(),
                            hash: hash.clone(),
                            recreate: true,
                        });
                    } else if &record.hash != hash {
                        writes.push(SyncAction::Update {
                            event: event.clone(),
                            hash: hash.clone(),
                            href: record.href.clone(),
                        });
                    } else {
                        unchanged += 1;
                    }
                }
            }
        }

        for (task_id, record) in records {
            if desired.contains_key(task_id) || protected.contains(task_id) {
                continue;
            }
            deletes.push(SyncAction::Delete {
                task_id: task_id.clone(),
                href: record.href.clone(),
            });
        }

        for event in remote {
            if record_hrefs.contains(event.href.as_str()) {
                continue;
            }
            if let Some(task_id) = event.task_id.as_deref() {
                if records.contains_key(task_id)
                    || desired.contains_key(task_id)
                    || protected.contains(task_id)
                {
                    continue;
                }
            }
            deletes.push(SyncAction::DeleteOrphan {
                href: event.href.clone(),
            });
        }

        writes.sort_by(|a, b| {
            let key = |action: &SyncAction| match action {
                SyncAction::Create { event, .. } | SyncAction::Update { event, .. } => {
                    Some((event.start.to_utc(), event.task_id.clone()))
                }
                _ => None,
            };
            key(a).cmp(&key(b))
        });

        let mut actions = deletes;
        actions.extend(writes);
        SyncPlan { actions, unchanged }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        let mut created = 0;
        let mut updated = 0;
        let mut deleted = 0;

        for action in &self.actions {
            match action.kind() {
                DiffKind::Create => created += 1,
                DiffKind::Update => updated += 1,
                DiffKind::Delete => deleted += 1,
            }
        }

        (created, updated, deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventTime, TaskStatus};
    use chrono::{TimeZone, Utc};

    fn desired(task_id: &str, hour: u32) -> (DesiredEvent, ContentHash) {
        let event = DesiredEvent {
            task_id: task_id.to_string(),
            summary: format!("📝 {}", task_id),
            start: EventTime::DateTime(Utc.with_ymd_and_hms(2025, 3, 20, hour, 0, 0).unwrap()),
            end: EventTime::DateTime(Utc.with_ymd_and_hms(2025, 3, 20, hour + 1, 0, 0).unwrap()),
            description: None,
            location: None,
            url: None,
            category: None,
            reminder_minutes: None,
            status: TaskStatus::Todo,
        };
        let hash = event.content_hash();
        (event, hash)
    }

    fn record(task_id: &str, hash: &ContentHash) -> EventHashRecord {
        EventHashRecord {
            hash: hash.clone(),
            href: format!("/cal/{}.ics", task_id),
            synced_at: Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
        }
    }

    fn remote(task_id: &str) -> RemoteEvent {
        RemoteEvent {
            href: format!("/cal/{}.ics", task_id),
            task_id: Some(task_id.to_string()),
            etag: None,
        }
    }

    fn desired_set(items: Vec<(DesiredEvent, ContentHash)>) -> BTreeMap<String, (DesiredEvent, ContentHash)> {
        items
            .into_iter()
            .map(|(e, h)| (e.task_id.clone(), (e, h)))
            .collect()
    }

    #[test]
    fn matching_hash_and_present_event_is_unchanged() {
        let (event, hash) = desired("a", 9);
        let records = BTreeMap::from([("a".to_string(), record("a", &hash))]);
        let plan = SyncPlan::build(
            &desired_set(vec![(event, hash)]),
            &records,
            &[remote("a")],
            &HashSet::new(),
        );

        assert!(plan.is_empty());
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn classifies_create_update_delete_recreate_and_orphan() {
        let (a, a_hash) = desired("a", 12);
        let (b, b_hash) = desired("b", 10);
        let (c, c_hash) = desired("c", 8);
        let stale = ContentHash::from("stale".to_string());

        let records = BTreeMap::from([
            ("b".to_string(), record("b", &stale)),
            ("c".to_string(), record("c", &c_hash)),
            ("gone".to_string(), record("gone", &stale)),
        ]);
        // "c" was deleted by hand; "stray" belongs to nobody.
        let listing = vec![remote("b"), remote("gone"), remote("stray")];

        let plan = SyncPlan::build(
            &desired_set(vec![(a, a_hash), (b, b_hash), (c, c_hash)]),
            &records,
            &listing,
            &HashSet::new(),
        );

        let summary: Vec<String> = plan.actions.iter().map(|a| a.to_string()).collect();
        assert_eq!(plan.counts(), (2, 1, 2), "{:?}", summary);

        // Deletes first
        assert!(matches!(&plan.actions[0], SyncAction::Delete { task_id, .. } if task_id == "gone"));
        assert!(matches!(&plan.actions[1], SyncAction::DeleteOrphan { href } if href == "/cal/stray.ics"));

        // Then writes ordered by start: c (08:00), b (10:00), a (12:00)
        assert!(matches!(&plan.actions[2], SyncAction::Create { event, recreate: true, .. } if event.task_id == "c"));
        assert!(matches!(&plan.actions[3], SyncAction::Update { event, href, .. } if event.task_id == "b" && href == "/cal/b.ics"));
        assert!(matches!(&plan.actions[4], SyncAction::Create { event, recreate: false, .. } if event.task_id == "a"));
    }

    #[test]
    fn protected_tasks_keep_their_records_and_events() {
        let hash = ContentHash::from("h".to_string());
        let records = BTreeMap::from([("broken".to_string(), record("broken", &hash))]);
        let protected = HashSet::from(["broken".to_string(), "unrecorded".to_string()]);

        let plan = SyncPlan::build(
            &BTreeMap::new(),
            &records,
            &[remote("broken"), remote("unrecorded")],
            &protected,
        );

        assert!(plan.is_empty(), "{:?}", plan.actions);
    }

    #[test]
    fn event_found_by_href_counts_as_present() {
        let (event, hash) = desired("a", 9);
        let records = BTreeMap::from([("a".to_string(), record("a", &hash))]);
        let listing = vec![RemoteEvent {
            href: "/cal/a.ics".to_string(),
            task_id: None,
            etag: None,
        }];

        let plan = SyncPlan::build(
            &desired_set(vec![(event, hash)]),
            &records,
            &listing,
            &HashSet::new(),
        );
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged, 1);
    }
}
