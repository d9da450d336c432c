//! ICS generation for desired events (RFC 5545).

mod generate;

pub use generate::generate_ics;
