//! Bounded reconnection for the push channel.
//!
//! When the connection drops, [`reconnect_loop`] retries a fixed number of
//! times with a fixed delay between attempts. Exhausting the attempts is
//! not fatal: polling remains the source of truth.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{ChannelClient, ChannelConnection};

/// Tunable parameters for the retry policy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Attempts made before giving up.
    pub max_attempts: u32,
    /// Delay before every attempt.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(1000),
        }
    }
}

/// Why [`reconnect_loop`] returned without a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectFailure {
    Cancelled,
    Exhausted,
}

/// Attempt to reconnect, waiting `config.delay` before each attempt.
///
/// Returns the new connection, or why none was made.
pub async fn reconnect_loop(
    client: &ChannelClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Result<ChannelConnection, ReconnectFailure> {
    for attempt in 1..=config.max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => return Err(ReconnectFailure::Cancelled),
            _ = tokio::time::sleep(config.delay) => {}
        }

        tracing::info!(
            attempt,
            max_attempts = config.max_attempts,
            "Reconnecting to push channel",
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reconnect cancelled");
                return Err(ReconnectFailure::Cancelled);
            }
            result = client.connect() => match result {
                Ok(conn) => {
                    tracing::info!(attempt, "Reconnected to push channel");
                    return Ok(conn);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Reconnect attempt {attempt} failed");
                }
            }
        }
    }

    Err(ReconnectFailure::Exhausted)
}
