//! In-process cron loop for `notecal serve`.

use std::time::Duration;

use chrono::Utc;
use notecal_core::{SyncEngine, Trigger, TriggerOutcome};
use tokio::time::MissedTickBehavior;

/// Send a cron tick every `every`. The stored interval decides whether a
/// tick actually runs a full sync.
pub async fn run(engine: SyncEngine, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        tick(&engine).await;
    }
}

pub async fn tick(engine: &SyncEngine) -> Option<TriggerOutcome> {
    match engine.dispatch(Trigger::CronTick, Utc::now()).await {
        Ok(outcome) => {
            match &outcome {
                TriggerOutcome::Skipped { next_due } => {
                    tracing::debug!(%next_due, "Cron tick skipped");
                }
                TriggerOutcome::FullSync(report) if report.is_aborted() => {
                    tracing::warn!(reason = ?report.aborted, "Scheduled full sync aborted");
                }
                TriggerOutcome::FullSync(report) => {
                    tracing::info!("Scheduled {}", report);
                }
                TriggerOutcome::Incremental(_) => {}
            }
            Some(outcome)
        }
        Err(e) => {
            tracing::error!(error = %e, "Cron tick failed");
            None
        }
    }
}
