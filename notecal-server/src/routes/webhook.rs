//! Notion webhook endpoint

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::Utc;
use notecal_core::{Trigger, TriggerOutcome};
use serde_json::{Value, json};

use crate::routes::AppError;
use crate::state::AppState;
use crate::webhook::{
    SIGNATURE_HEADER, change_signals, collect_page_ids, handshake_token, secrets_match,
    verify_signature,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook/notion", post(notion_webhook))
}

/// POST /webhook/notion - Subscription handshake or page change notification
async fn notion_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let payload: Value = if body.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body).map_err(|_| AppError::bad_request("Invalid JSON"))?
    };

    if let Some(token) = handshake_token(&payload) {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::bad_request("Invalid verification_token"));
        }
        match state.webhook_token().await? {
            Some(stored) if secrets_match(&stored, token) => {
                tracing::debug!("Repeated handshake for the stored verification token");
            }
            Some(_) => {
                tracing::warn!("Rejected handshake: a verification token is already stored");
                return Err(AppError::unauthorized("Verification token already stored"));
            }
            None => {
                state.state().save_webhook_token(token).await?;
                tracing::info!("Stored verification token from Notion");
            }
        }
        return Ok(Json(json!({ "verification_token": token })).into_response());
    }

    let Some(stored) = state.webhook_token().await? else {
        return Err(AppError::unauthorized("Missing stored verification token"));
    };
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return Err(AppError::unauthorized("No signature"));
    };
    if !verify_signature(&stored, &body, signature) {
        tracing::warn!("Rejected webhook with invalid signature");
        return Err(AppError::unauthorized("Invalid signature"));
    }

    let page_ids = collect_page_ids(&payload);
    let event_type = payload.get("type").and_then(Value::as_str).unwrap_or("unknown");
    tracing::info!(event_type, page_ids = ?page_ids, "Webhook received");

    let signals = change_signals(&payload, &page_ids);
    if !signals.is_empty() {
        let engine = state.engine.clone();
        tokio::spawn(async move {
            match engine.dispatch(Trigger::Webhook(signals), Utc::now()).await {
                Ok(TriggerOutcome::Incremental(reports)) => {
                    for report in reports {
                        tracing::info!(task_id = ?report.task_id, "{}", report);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Webhook processing failed"),
            }
        });
    }

    Ok(Json(json!({ "ok": true, "updated": page_ids })).into_response())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::TimeZone;
    use hmac::{Hmac, Mac};
    use notecal_core::{CalendarIdentity, EventTime, Task};
    use sha2::Sha256;
    use tower::ServiceExt;

    use super::*;
    use crate::routes::router;
    use crate::routes::test_support::{app, json_body};

    const PAGE: &str = "1a2b3c4d-0000-4000-8000-00000000000a";

    fn sign(token: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(token.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn dated_task(id: &str) -> Task {
        let mut task = Task::new(id, "Dentist");
        task.database_id = Some("db1".to_string());
        task.start = Some(EventTime::DateTime(
            Utc.with_ymd_and_hms(2030, 3, 20, 9, 0, 0).unwrap(),
        ));
        task
    }

    fn post(body: &str, signature: Option<String>) -> Request<Body> {
        let mut request = Request::post("/webhook/notion").header("content-type", "application/json");
        if let Some(signature) = signature {
            request = request.header("X-Notion-Signature", signature);
        }
        request.body(Body::from(body.to_string())).unwrap()
    }

    async fn init_calendar(state: &AppState) {
        state
            .state()
            .save_calendar_identity(&CalendarIdentity {
                href: "/fake/calendars/notion/".to_string(),
                name: "Notion".to_string(),
                color: "#FF7F00".to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn handshake_stores_and_echoes_token() {
        let test = app(vec![]);
        let response = router(test.state.clone())
            .oneshot(post(r#"{"verification_token":"secret_abc"}"#, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["verification_token"], "secret_abc");
        assert_eq!(
            test.state.state().webhook_token().await.unwrap().as_deref(),
            Some("secret_abc")
        );
    }

    #[tokio::test]
    async fn second_handshake_keeps_the_first_token() {
        let test = app(vec![]);
        test.state.state().save_webhook_token("legit").await.unwrap();

        let response = router(test.state.clone())
            .oneshot(post(r#"{"verification_token":"attacker"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            test.state.state().webhook_token().await.unwrap().as_deref(),
            Some("legit")
        );

        let repeat = router(test.state.clone())
            .oneshot(post(r#"{"verification_token":"legit"}"#, None))
            .await
            .unwrap();
        assert_eq!(repeat.status(), StatusCode::OK);
        assert_eq!(json_body(repeat).await["verification_token"], "legit");
    }

    #[tokio::test]
    async fn handshake_cannot_override_configured_seed() {
        let test = app(vec![]);
        let state = test.state.clone().with_webhook_seed(Some("seeded".to_string()));

        let response = router(state.clone())
            .oneshot(post(r#"{"verification_token":"other"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.state().webhook_token().await.unwrap().as_deref(), Some("seeded"));
    }

    #[tokio::test]
    async fn unsigned_or_forged_payloads_are_rejected() {
        let test = app(vec![]);
        test.state.state().save_webhook_token("secret_abc").await.unwrap();
        let body = format!(r#"{{"type":"page.created","entity":{{"id":"{}","type":"page"}}}}"#, PAGE);

        let missing = router(test.state.clone()).oneshot(post(&body, None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let forged = router(test.state.clone())
            .oneshot(post(&body, Some(sign("wrong", body.as_bytes()))))
            .await
            .unwrap();
        assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
        assert!(test.source.calls().is_empty());
    }

    #[tokio::test]
    async fn no_stored_token_is_unauthorized() {
        let test = app(vec![]);
        let response = router(test.state.clone())
            .oneshot(post(r#"{"type":"page.created"}"#, Some("sha256=00".to_string())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn configured_seed_is_persisted_on_first_use() {
        let test = app(vec![]);
        let state = test.state.clone().with_webhook_seed(Some("seeded".to_string()));
        let body = r#"{"type":"page.created"}"#;

        let response = router(state.clone())
            .oneshot(post(body, Some(sign("seeded", body.as_bytes()))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.state().webhook_token().await.unwrap().as_deref(), Some("seeded"));
    }

    #[tokio::test]
    async fn invalid_json_is_a_bad_request() {
        let test = app(vec![]);
        let response = router(test.state.clone()).oneshot(post("{not json", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn signed_change_runs_incremental_update() {
        let test = app(vec![dated_task(PAGE)]);
        test.state.state().save_webhook_token("secret_abc").await.unwrap();
        init_calendar(&test.state).await;

        let body = format!(
            r#"{{"type":"page.properties_updated","entity":{{"id":"{}","type":"page"}}}}"#,
            PAGE
        );
        let response = router(test.state.clone())
            .oneshot(post(&body, Some(sign("secret_abc", body.as_bytes()))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["updated"], json!([PAGE]));

        // The update runs in the background
        let mut synced = false;
        for _ in 0..100 {
            if test.sink.event_for(PAGE).is_some() {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(synced, "event was never written");
        assert_eq!(test.source.calls(), vec![format!("fetch_task:{}", PAGE)]);
    }

    #[tokio::test]
    async fn page_outside_any_database_is_ignored() {
        let mut loose = dated_task(PAGE);
        loose.database_id = None;
        let test = app(vec![loose]);
        test.state.state().save_webhook_token("secret_abc").await.unwrap();
        init_calendar(&test.state).await;

        let body = format!(
            r#"{{"type":"page.properties_updated","entity":{{"id":"{}","type":"page"}}}}"#,
            PAGE
        );
        let response = router(test.state.clone())
            .oneshot(post(&body, Some(sign("secret_abc", body.as_bytes()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut fetched = false;
        for _ in 0..100 {
            if !test.source.calls().is_empty() {
                fetched = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(fetched, "page was never fetched");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(test.sink.event_for(PAGE).is_none());
        assert!(test.sink.events().is_empty());
    }
}
