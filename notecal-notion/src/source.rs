use async_trait::async_trait;
use notecal_core::error::SourceResult;
use notecal_core::{Task, TaskScope, TaskSource};
use serde_json::Value;

use crate::client::NotionClient;
use crate::error::{NotionError, NotionResult};
use crate::parse::{DatabaseInfo, parent_id, parse_page};

/// Reads tasks from every task database in scope.
///
/// With [`TaskScope::AllShared`] the shared databases are discovered through
/// search and kept only if they carry a `Date` date property. Explicitly
/// configured databases are queried as-is.
pub struct NotionSource {
    client: NotionClient,
}

impl NotionSource {
    pub fn new(client: NotionClient) -> Self {
        NotionSource { client }
    }

    async fn task_databases(&self, scope: &TaskScope) -> NotionResult<Vec<DatabaseInfo>> {
        match scope {
            TaskScope::Databases(ids) => {
                let mut databases = Vec::with_capacity(ids.len());
                for id in ids {
                    databases.push(self.database(id).await?);
                }
                Ok(databases)
            }
            TaskScope::AllShared => {
                let mut databases = Vec::new();
                for value in self.client.search_databases().await? {
                    let Some(info) = decode_database(value) else {
                        continue;
                    };
                    let is_task = match info.is_task_database() {
                        Some(is_task) => is_task,
                        None => self.database(&info.id).await?.is_task_database() == Some(true),
                    };
                    if is_task {
                        databases.push(info);
                    } else {
                        tracing::debug!(database = %info.title(), "Skipping database without a Date property");
                    }
                }
                Ok(databases)
            }
        }
    }

    async fn database(&self, id: &str) -> NotionResult<DatabaseInfo> {
        let value = self.client.get_database(id).await?;
        DatabaseInfo::from_value(value).map_err(|e| NotionError::Decode(format!("database {}: {}", id, e)))
    }

    async fn tasks_in(&self, database: &DatabaseInfo) -> NotionResult<Vec<Task>> {
        let title = database.title();
        let pages = self.client.query_database(&database.id).await?;

        let mut tasks = Vec::with_capacity(pages.len());
        for page in pages {
            match parse_page(page) {
                Ok(mut task) => {
                    task.database_id = Some(database.id.clone());
                    task.database_name = Some(title.clone());
                    tasks.push(task);
                }
                Err(e) => {
                    tracing::warn!(database = %title, error = %e, "Skipping unreadable page");
                }
            }
        }
        Ok(tasks)
    }
}

fn decode_database(value: Value) -> Option<DatabaseInfo> {
    match DatabaseInfo::from_value(value) {
        Ok(info) => Some(info),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping unreadable search result");
            None
        }
    }
}

#[async_trait]
impl TaskSource for NotionSource {
    async fn fetch_tasks(&self, scope: &TaskScope) -> SourceResult<Vec<Task>> {
        let databases = self.task_databases(scope).await?;
        tracing::info!(count = databases.len(), "Reading task databases");

        let mut tasks = Vec::new();
        for database in &databases {
            tasks.extend(self.tasks_in(database).await?);
        }
        Ok(tasks)
    }

    async fn fetch_task(&self, task_id: &str) -> SourceResult<Option<Task>> {
        let Some(page) = self.client.get_page(task_id).await? else {
            return Ok(None);
        };

        let parent = parent_id(&page, self.client.uses_data_sources());
        let mut task = parse_page(page)
            .map_err(|e| NotionError::Decode(format!("page {}: {}", task_id, e)))?;
        task.database_id = parent.clone();

        if let Some(parent) = parent {
            match self.database(&parent).await {
                Ok(info) => task.database_name = Some(info.title()),
                Err(e) => {
                    tracing::warn!(task_id, database = %parent, error = %e, "Could not resolve database title");
                }
            }
        }

        Ok(Some(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RetryPolicy;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> NotionSource {
        let client = NotionClient::new("secret_token")
            .unwrap()
            .with_base_url(server.uri())
            .with_retry(RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            });
        NotionSource::new(client)
    }

    fn task_page(id: &str, title: &str, date: &str) -> Value {
        json!({
            "object": "page",
            "id": id,
            "parent": { "type": "data_source_id", "data_source_id": "ds-tasks" },
            "properties": {
                "Title": { "type": "title", "title": [{ "plain_text": title }] },
                "Date": { "type": "date", "date": { "start": date } }
            }
        })
    }

    #[tokio::test]
    async fn discovers_task_databases_and_reads_their_pages() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/search"))
            .and(body_partial_json(json!({ "filter": { "value": "data_source" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {
                        "object": "data_source",
                        "id": "ds-tasks",
                        "title": [{ "plain_text": "Tasks" }],
                        "properties": { "Date": { "type": "date" } }
                    },
                    {
                        "object": "data_source",
                        "id": "ds-notes",
                        "title": [{ "plain_text": "Notes" }],
                        "properties": { "Tags": { "type": "multi_select" } }
                    }
                ],
                "has_more": false
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/data_sources/ds-tasks/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    task_page("p1", "Dentist", "2025-03-20"),
                    { "object": "page" },
                    task_page("p2", "Taxes", "2025-04-15")
                ],
                "has_more": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/data_sources/ds-notes/query"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let tasks = source(&server).fetch_tasks(&TaskScope::AllShared).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].title, "Dentist");
        assert_eq!(tasks[0].database_id.as_deref(), Some("ds-tasks"));
        assert_eq!(tasks[0].database_name.as_deref(), Some("Tasks"));
        assert_eq!(tasks[1].id, "p2");
    }

    #[tokio::test]
    async fn configured_databases_skip_search() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/data_sources/dstasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "data_source",
                "id": "dstasks",
                "title": [{ "plain_text": "Work" }]
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/data_sources/dstasks/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [task_page("p1", "Review", "2025-03-20")],
                "has_more": false
            })))
            .mount(&server)
            .await;

        let tasks = source(&server)
            .fetch_tasks(&TaskScope::from_ids(["dstasks"]))
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].database_name.as_deref(), Some("Work"));
    }

    #[tokio::test]
    async fn fetch_task_resolves_parent_title() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/pages/p1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(task_page("p1", "Dentist", "2025-03-20")),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/data_sources/ds-tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ds-tasks",
                "title": [{ "plain_text": "Tasks" }]
            })))
            .mount(&server)
            .await;

        let task = source(&server).fetch_task("p1").await.unwrap().unwrap();
        assert_eq!(task.title, "Dentist");
        assert_eq!(task.database_id.as_deref(), Some("ds-tasks"));
        assert_eq!(task.database_name.as_deref(), Some("Tasks"));
    }

    #[tokio::test]
    async fn fetch_task_of_deleted_page_is_none() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/pages/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert_eq!(source(&server).fetch_task("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn outage_surfaces_as_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = source(&server)
            .fetch_tasks(&TaskScope::AllShared)
            .await
            .unwrap_err();
        assert!(matches!(err, notecal_core::SourceError::Unavailable(_)));
    }
}
