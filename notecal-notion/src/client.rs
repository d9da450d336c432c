//! Thin Notion REST client: auth headers, pagination, bounded retries.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Method, Response, StatusCode};
use serde_json::{Value, json};

use crate::error::{NotionError, NotionResult};

pub const DEFAULT_BASE_URL: &str = "https://api.notion.com";
pub const DEFAULT_API_VERSION: &str = "2025-09-03";

/// First API version that addresses databases through data sources.
const DATA_SOURCES_VERSION: &str = "2025-09-03";
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound for any single wait, including server-provided Retry-After.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let wait = match retry_after_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1))),
        };
        wait.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct NotionClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    api_version: String,
    retry: RetryPolicy,
}

impl NotionClient {
    pub fn new(token: impl Into<String>) -> NotionResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("notecal/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(NotionClient {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Newer API versions query "data sources" instead of databases.
    pub fn uses_data_sources(&self) -> bool {
        self.api_version.as_str() >= DATA_SOURCES_VERSION
    }

    fn collection_path(&self) -> &'static str {
        if self.uses_data_sources() {
            "data_sources"
        } else {
            "databases"
        }
    }

    /// Every database (or data source) shared with the integration.
    pub async fn search_databases(&self) -> NotionResult<Vec<Value>> {
        let filter_value = if self.uses_data_sources() {
            "data_source"
        } else {
            "database"
        };
        let body = json!({
            "filter": { "property": "object", "value": filter_value },
            "page_size": PAGE_SIZE,
        });
        self.paginate("search", body).await
    }

    pub async fn get_database(&self, database_id: &str) -> NotionResult<Value> {
        let path = format!("{}/{}", self.collection_path(), database_id);
        self.request(Method::GET, &path, None).await
    }

    /// Every page of a database, across all result pages.
    pub async fn query_database(&self, database_id: &str) -> NotionResult<Vec<Value>> {
        let path = format!("{}/{}/query", self.collection_path(), database_id);
        self.paginate(&path, json!({ "page_size": PAGE_SIZE })).await
    }

    /// A single page, or `None` if Notion no longer knows it.
    pub async fn get_page(&self, page_id: &str) -> NotionResult<Option<Value>> {
        match self
            .request(Method::GET, &format!("pages/{}", page_id), None)
            .await
        {
            Ok(page) => Ok(Some(page)),
            Err(NotionError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn paginate(&self, path: &str, body: Value) -> NotionResult<Vec<Value>> {
        let mut results = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = body.clone();
            if let (Some(cursor), Some(map)) = (&cursor, body.as_object_mut()) {
                map.insert("start_cursor".to_string(), Value::String(cursor.clone()));
            }

            let response = self.request(Method::POST, path, Some(&body)).await?;
            let page: ListResponse = serde_json::from_value(response)
                .map_err(|e| NotionError::Decode(format!("{}: {}", path, e)))?;
            results.extend(page.results);

            if !page.has_more {
                break;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    tracing::warn!(path, "has_more without next_cursor; stopping pagination");
                    break;
                }
            }
        }

        Ok(results)
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> NotionResult<Value> {
        let url = format!("{}/v1/{}", self.base_url, path);
        let mut attempt = 1;

        loop {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.token)
                .header("Notion-Version", &self.api_version);
            if let Some(body) = body {
                request = request.json(body);
            }

            let outcome = match request.send().await {
                Ok(response) => read_response(response).await,
                Err(e) => Err(NotionError::Transport(e)),
            };

            match outcome {
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt, err.retry_after_secs());
                    tracing::warn!(
                        path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying Notion request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[derive(serde::Deserialize)]
struct ListResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

async fn read_response(response: Response) -> NotionResult<Value> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<Value>()
            .await
            .map_err(|e| NotionError::Decode(e.to_string()));
    }

    let retry_after_secs = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();

    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => NotionError::RateLimited { retry_after_secs },
        StatusCode::NOT_FOUND => NotionError::NotFound,
        _ => NotionError::Api {
            status: status.as_u16(),
            body,
        },
    })
}
