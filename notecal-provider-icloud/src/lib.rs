//! iCloud Calendar as the mirror's calendar sink.
//!
//! Authenticates with an Apple ID and an app-specific password, discovers
//! the calendar home through the CalDAV principal, and writes one `.ics`
//! resource per task.

pub mod caldav;
pub mod credentials;
pub mod multistatus;
mod sink;

pub use credentials::{DEFAULT_CALDAV_URL, ICloudCredentials};
pub use sink::ICloudCalendarSink;
