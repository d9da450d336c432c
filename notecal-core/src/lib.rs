//! Core of the Notion to CalDAV calendar mirror.
//!
//! This crate holds everything that does not talk to a network:
//! - `Task` / `DesiredEvent` and the projection between them
//! - content hashing and ICS rendering
//! - the state store (key-value backends plus the typed schema on top)
//! - the `TaskSource` / `CalendarSink` capability traits
//! - the reconciliation engine and trigger dispatch

pub mod constants;
pub mod error;
pub mod event;
pub mod hash;
pub mod ics;
pub mod sink;
pub mod source;
pub mod state;
pub mod sync;
pub mod task;
pub mod trigger;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{InvalidTask, SinkError, SourceError, SyncError, SyncResult};
pub use event::{DesiredEvent, EventTime, TaskStatus};
pub use hash::ContentHash;
pub use sink::{CalendarIdentity, CalendarSink, RemoteEvent};
pub use source::TaskSource;
pub use state::{KeyValueStore, StateStore};
pub use sync::{RunKind, RunReport, SyncEngine};
pub use task::{Task, TaskScope};
pub use trigger::{ChangeSignal, Trigger, TriggerOutcome};
