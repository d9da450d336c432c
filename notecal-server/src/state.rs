use std::sync::Arc;

use anyhow::{Context, Result};
use notecal_core::state::FileStore;
use notecal_core::sync::CalendarDefaults;
use notecal_core::{StateStore, SyncEngine, TaskScope};
use notecal_notion::{NotionClient, NotionSource};
use notecal_provider_icloud::{ICloudCalendarSink, ICloudCredentials};

use crate::config::AppConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: SyncEngine,
    admin_token: Option<String>,
    webhook_seed: Option<String>,
}

impl AppState {
    pub fn new(engine: SyncEngine) -> Self {
        AppState {
            engine,
            admin_token: None,
            webhook_seed: None,
        }
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token;
        self
    }

    pub fn with_webhook_seed(mut self, token: Option<String>) -> Self {
        self.webhook_seed = token;
        self
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let state = open_state(config).await?;
        let engine = build_engine(config, state)?;
        Ok(AppState::new(engine)
            .with_admin_token(config.admin_token())
            .with_webhook_seed(config.webhook_seed()))
    }

    pub fn state(&self) -> &StateStore {
        self.engine.state()
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }

    /// Stored verification token, seeding it from configuration when none is stored.
    pub async fn webhook_token(&self) -> Result<Option<String>> {
        if let Some(token) = self.state().webhook_token().await? {
            return Ok(Some(token));
        }
        match &self.webhook_seed {
            Some(seed) => {
                self.state().save_webhook_token(seed).await?;
                tracing::info!("Seeded webhook verification token from configuration");
                Ok(Some(seed.clone()))
            }
            None => Ok(None),
        }
    }
}

/// File-backed state store under the configured state directory.
pub async fn open_state(config: &AppConfig) -> Result<StateStore> {
    let dir = config.state_dir()?;
    let store = FileStore::open(&dir)
        .with_context(|| format!("Could not open state directory {}", dir.display()))?;
    let state = StateStore::new(Arc::new(store));

    if state.migrate_legacy().await? {
        tracing::info!(dir = %dir.display(), "Migrated legacy settings");
    }
    Ok(state)
}

/// Notion source and iCloud sink wired to `state`.
pub fn build_engine(config: &AppConfig, state: StateStore) -> Result<SyncEngine> {
    config.require_credentials()?;

    let mut client = NotionClient::new(config.notion.token.trim())
        .context("Failed to build Notion HTTP client")?;
    if let Some(base_url) = &config.notion.base_url {
        client = client.with_base_url(base_url.as_str());
    }
    if let Some(version) = &config.notion.api_version {
        client = client.with_api_version(version.as_str());
    }

    let credentials = ICloudCredentials::new(
        config.icloud.apple_id.trim(),
        config.icloud.app_password.trim(),
    );
    let mut sink = ICloudCalendarSink::new(credentials);
    if let Some(url) = &config.icloud.caldav_url {
        sink = sink.with_caldav_url(url.as_str());
    }

    Ok(SyncEngine::new(
        Arc::new(NotionSource::new(client)),
        Arc::new(sink),
        state,
    )
    .with_scope(TaskScope::from_ids(&config.notion.databases))
    .with_calendar_defaults(CalendarDefaults {
        name: config.calendar.name.clone(),
        color: config.calendar.color.clone(),
    }))
}
