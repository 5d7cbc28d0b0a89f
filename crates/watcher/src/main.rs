//! `auditwatch` -- headless audit status watcher.
//!
//! Tracks the audits named in `AUDIT_IDS` by polling the audit API and
//! listening on the push channel, and logs every change to the merged
//! notification feed until interrupted.
//!
//! # Environment variables
//!
//! | Variable               | Required | Default | Description                              |
//! |------------------------|----------|---------|------------------------------------------|
//! | `AUDIT_API_URL`        | yes      | --      | Base HTTP URL, e.g. `http://host:8000/api` |
//! | `AUDIT_WS_URL`         | yes      | --      | Push endpoint, e.g. `ws://host:8000/ws`  |
//! | `POLL_INTERVAL_MS`     | no       | `15000` | Base polling interval                    |
//! | `REQUEST_TIMEOUT_SECS` | no       | `30`    | Upper bound for one status request       |
//! | `AUDIT_IDS`            | no       | --      | Comma-separated audits to track          |

use auditwatch_events::FeedChange;
use auditwatch_watcher::{AuditWatch, WatchConfig};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "auditwatch=info,auditwatch_watcher=info,auditwatch_poller=info,auditwatch_realtime=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match WatchConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        audits = config.audit_ids.len(),
        "Starting auditwatch",
    );

    let audit_ids = config.audit_ids.clone();
    let watch = AuditWatch::new(config);
    let mut feed = watch.notifications().subscribe();

    watch.start();
    for audit_id in &audit_ids {
        watch.track(audit_id);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received, shutting down");
                break;
            }
            change = feed.recv() => match change {
                Ok(change) => log_change(&change),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Feed subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    watch.shutdown().await;
    tracing::info!(unread = watch.notifications().unread(), "auditwatch stopped");
}

fn log_change(change: &FeedChange) {
    match change {
        FeedChange::Added(notification) => {
            let json = serde_json::to_string(notification).unwrap_or_default();
            tracing::info!(
                kind = ?notification.kind,
                job_id = notification.job_id.as_deref(),
                notification = %json,
                "{}: {}",
                notification.title,
                notification.message,
            );
        }
        FeedChange::Connection { state } => {
            tracing::info!(state = ?state, "Push channel state");
        }
        other => tracing::debug!(change = ?other, "Feed changed"),
    }
}
