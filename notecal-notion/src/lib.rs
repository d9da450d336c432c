//! Notion as a task source.

pub mod client;
pub mod error;
pub mod parse;
mod source;

pub use client::{DEFAULT_API_VERSION, DEFAULT_BASE_URL, NotionClient, RetryPolicy};
pub use error::{NotionError, NotionResult};
pub use source::NotionSource;
