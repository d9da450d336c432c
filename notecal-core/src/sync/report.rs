//! Per-run diagnostics.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::DiffKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Full,
    Incremental,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Full => write!(f, "full"),
            RunKind::Incremental => write!(f, "incremental"),
        }
    }
}

/// A single item that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub task_id: Option<String>,
    pub href: Option<String>,
    pub kind: Option<DiffKind>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub kind: RunKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Task the run was scoped to (incremental runs only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub invalid: usize,
    pub undated: usize,
    #[serde(default)]
    pub errors: Vec<ItemError>,
    /// Set when the run stopped before touching the calendar or state.
    #[serde(default)]
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn new(kind: RunKind, started_at: DateTime<Utc>) -> Self {
        RunReport {
            kind,
            started_at,
            finished_at: None,
            task_id: None,
            created: 0,
            updated: 0,
            deleted: 0,
            unchanged: 0,
            failed: 0,
            invalid: 0,
            undated: 0,
            errors: Vec::new(),
            aborted: None,
        }
    }

    pub fn for_task(task_id: &str, started_at: DateTime<Utc>) -> Self {
        let mut report = RunReport::new(RunKind::Incremental, started_at);
        report.task_id = Some(task_id.to_string());
        report
    }

    pub fn applied(&mut self, kind: DiffKind) {
        match kind {
            DiffKind::Create => self.created += 1,
            DiffKind::Update => self.updated += 1,
            DiffKind::Delete => self.deleted += 1,
        }
    }

    pub fn failure(
        &mut self,
        kind: DiffKind,
        task_id: Option<&str>,
        href: Option<&str>,
        message: impl Into<String>,
    ) {
        self.failed += 1;
        self.errors.push(ItemError {
            task_id: task_id.map(String::from),
            href: href.map(String::from),
            kind: Some(kind),
            message: message.into(),
        });
    }

    pub fn invalid_task(&mut self, task_id: &str, message: impl Into<String>) {
        self.invalid += 1;
        self.errors.push(ItemError {
            task_id: Some(task_id.to_string()),
            href: None,
            kind: None,
            message: message.into(),
        });
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        self.aborted = Some(reason.into());
    }

    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.finished_at = Some(at);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// Number of calendar writes that succeeded.
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(reason) = &self.aborted {
            return write!(f, "{} sync aborted: {}", self.kind, reason);
        }
        write!(
            f,
            "{} sync: {}{} {}{} {}{}, {} unchanged",
            self.kind,
            DiffKind::Create,
            self.created,
            DiffKind::Update,
            self.updated,
            DiffKind::Delete,
            self.deleted,
            self.unchanged
        )?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        if self.invalid > 0 {
            write!(f, ", {} invalid", self.invalid)?;
        }
        Ok(())
    }
}
