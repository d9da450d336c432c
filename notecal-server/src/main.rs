mod config;
mod cron;
mod routes;
mod state;
mod webhook;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use notecal_core::state::SettingsUpdate;
use notecal_core::{Trigger, TriggerOutcome};

use crate::config::AppConfig;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "notecal")]
#[command(about = "Mirror dated Notion tasks into an iCloud calendar")]
struct Cli {
    /// Config file (default: ~/.config/notecal/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the webhook and admin endpoints and run the cron loop
    Serve {
        /// Address to listen on (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,

        /// Do not start the in-process cron loop
        #[arg(long)]
        no_cron: bool,
    },
    /// Run one cron tick: a full sync if the interval has elapsed
    Tick,
    /// Run a full sync now
    FullSync,
    /// Show or change sync settings
    Settings {
        /// Minutes between scheduled full syncs
        #[arg(long)]
        interval: Option<u32>,

        /// Calendar name used when the calendar has to be created
        #[arg(long)]
        calendar_name: Option<String>,

        /// Calendar color used when the calendar has to be created
        #[arg(long)]
        calendar_color: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind, no_cron } => serve(&config, bind, no_cron).await,
        Commands::Tick => {
            let state = AppState::from_config(&config).await?;
            match cron::tick(&state.engine).await {
                Some(TriggerOutcome::Skipped { next_due }) => {
                    println!("Full sync not due until {}", next_due.to_rfc3339());
                }
                Some(TriggerOutcome::FullSync(report)) => print_report(&report),
                Some(TriggerOutcome::Incremental(_)) => {}
                None => anyhow::bail!("Cron tick failed"),
            }
            Ok(())
        }
        Commands::FullSync => {
            let state = AppState::from_config(&config).await?;
            match state.engine.dispatch(Trigger::ForceFullSync, Utc::now()).await? {
                TriggerOutcome::FullSync(report) => {
                    print_report(&report);
                    if report.is_aborted() {
                        anyhow::bail!("Full sync aborted");
                    }
                    Ok(())
                }
                other => anyhow::bail!("Unexpected outcome: {:?}", other),
            }
        }
        Commands::Settings {
            interval,
            calendar_name,
            calendar_color,
        } => {
            let store = state::open_state(&config).await?;
            let update = SettingsUpdate {
                full_sync_interval_minutes: interval,
                calendar_name,
                calendar_color,
            };
            let view = store.apply_settings_update(&update).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
    }
}

async fn serve(config: &AppConfig, bind: Option<String>, no_cron: bool) -> Result<()> {
    let state = AppState::from_config(config).await?;

    if state.admin_token().is_none() {
        tracing::warn!("server.admin_token is not set; admin endpoints are disabled");
    }

    if !no_cron {
        let every = config.tick_every()?;
        tracing::info!(every = %humantime::format_duration(every), "Starting cron loop");
        tokio::spawn(cron::run(state.engine.clone(), every));
    }

    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", bind))?;

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Could not listen on {}", addr))?;
    tracing::info!(%addr, "notecal listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

fn print_report(report: &notecal_core::RunReport) {
    println!("{}", report);
    for error in &report.errors {
        let target = error
            .task_id
            .as_deref()
            .or(error.href.as_deref())
            .unwrap_or("-");
        println!("  {}: {}", target, error.message);
    }
    if let Some(reason) = &report.aborted {
        println!("  aborted: {}", reason);
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
