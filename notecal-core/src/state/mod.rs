//! Durable key-value state.
//!
//! The store is the only memory shared between invocations. Backends only need
//! to provide string get/put/delete/list; `StateStore` layers the typed schema
//! (settings fields, event hash records, diagnostics) on top.

mod file;
mod memory;
mod store;

use async_trait::async_trait;

use crate::error::SyncResult;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{EventHashRecord, SettingsUpdate, SettingsView, StateStore, SyncSettings};

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> SyncResult<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> SyncResult<()>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> SyncResult<()>;

    /// All keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> SyncResult<Vec<String>>;
}
