/// Minutes between interval-gated full syncs when nothing is stored.
pub const DEFAULT_FULL_SYNC_MINUTES: u32 = 30;

pub const DEFAULT_CALENDAR_NAME: &str = "Notion";

pub const DEFAULT_CALENDAR_COLOR: &str = "#FF7F00";

/// Length of a timed event whose task has no end.
pub const DEFAULT_EVENT_DURATION_MINUTES: i64 = 60;

/// PRODID written into generated ICS payloads.
pub const PRODID: &str = "-//notecal//Notion Tasks//EN";
