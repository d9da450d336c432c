//! Reconciliation between the task source and the calendar sink.

mod diff_kind;
mod engine;
mod plan;
mod report;

pub use diff_kind::DiffKind;
pub use engine::{CalendarDefaults, SyncEngine};
pub use plan::{SyncAction, SyncPlan};
pub use report::{ItemError, RunKind, RunReport};
