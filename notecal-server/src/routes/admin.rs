//! Admin endpoints: forced full sync, settings and diagnostics.
//!
//! Every route needs the configured admin token, passed as `X-Admin-Token`,
//! `Authorization: Bearer <token>` or `?token=`. Without a configured token
//! the routes are closed.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, header::AUTHORIZATION},
    routing::{get, post},
};
use chrono::Utc;
use notecal_core::state::{SettingsUpdate, SettingsView};
use notecal_core::sync::RunKind;
use notecal_core::{RunReport, Trigger, TriggerOutcome};
use serde::{Deserialize, Serialize};

use crate::routes::AppError;
use crate::state::AppState;
use crate::webhook::secrets_match;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/full-sync", post(full_sync))
        .route(
            "/admin/settings",
            get(get_settings).put(update_settings).post(update_settings),
        )
        .route("/admin/diagnostics", get(diagnostics))
}

#[derive(Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

fn authorize(state: &AppState, headers: &HeaderMap, query: &TokenQuery) -> Result<(), AppError> {
    let Some(expected) = state.admin_token() else {
        return Err(AppError::unauthorized("Admin token not configured"));
    };

    let header_token = headers.get("x-admin-token").and_then(|v| v.to_str().ok());
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let provided = header_token
        .or(bearer)
        .or(query.token.as_deref())
        .map(str::trim);

    if provided.is_some_and(|token| secrets_match(expected, token)) {
        Ok(())
    } else {
        Err(AppError::unauthorized("Unauthorized"))
    }
}

/// POST /admin/full-sync - Run a full sync now, regardless of the interval
async fn full_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<RunReport>, AppError> {
    authorize(&state, &headers, &query)?;

    match state.engine.dispatch(Trigger::ForceFullSync, Utc::now()).await? {
        TriggerOutcome::FullSync(report) => {
            tracing::info!("Forced {}", report);
            Ok(Json(report))
        }
        other => Err(anyhow::anyhow!("Unexpected outcome for forced sync: {:?}", other).into()),
    }
}

/// GET /admin/settings
async fn get_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<SettingsView>, AppError> {
    authorize(&state, &headers, &query)?;
    Ok(Json(state.state().settings_view().await?))
}

/// PUT|POST /admin/settings - Partial update; blank name or color clears it
async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<SettingsView>, AppError> {
    authorize(&state, &headers, &query)?;
    let view = state.state().apply_settings_update(&update).await?;
    tracing::info!(
        interval = view.full_sync_interval_minutes,
        calendar_name = ?view.calendar_name,
        "Settings updated"
    );
    Ok(Json(view))
}

#[derive(Serialize)]
pub struct Diagnostics {
    settings: SettingsView,
    last_full_sync: Option<RunReport>,
    last_incremental: Option<RunReport>,
}

/// GET /admin/diagnostics - Settings plus the last run of each kind
async fn diagnostics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Diagnostics>, AppError> {
    authorize(&state, &headers, &query)?;
    let store = state.state();

    Ok(Json(Diagnostics {
        settings: store.settings_view().await?,
        last_full_sync: store.last_report(RunKind::Full).await?,
        last_incremental: store.last_report(RunKind::Incremental).await?,
    }))
}
