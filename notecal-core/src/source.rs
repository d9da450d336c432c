//! Task source capability.

use async_trait::async_trait;

use crate::error::SourceResult;
use crate::task::{Task, TaskScope};

#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Every task in scope, dated or not. Pagination is the source's concern.
    async fn fetch_tasks(&self, scope: &TaskScope) -> SourceResult<Vec<Task>>;

    /// A single task by id. `Ok(None)` means the page no longer exists.
    async fn fetch_task(&self, task_id: &str) -> SourceResult<Option<Task>>;
}
