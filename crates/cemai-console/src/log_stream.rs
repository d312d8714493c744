//! Master-control log feed: startup backfill, push entries and the
//! simulated demo feed all land in the capped [`LogBuffer`].
//!
//! [`LogBuffer`]: cemai_state::LogBuffer

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;

use cemai_gateway::{fallback, ApiClient};
use cemai_protocol::{LogEntry, LogLevel, Origin};
use cemai_state::DashboardState;

use crate::pollers::run_periodic;
use crate::workflow::note_gateway_error;

pub fn append(state: &DashboardState, entry: LogEntry) {
    state.logs.update(|logs| logs.push(entry));
}

/// Load the most recent entries. Returns where they came from, or `None`
/// when the call failed outright.
pub async fn backfill(api: &ApiClient, state: &DashboardState, limit: u32) -> Option<Origin> {
    match api.master_logs(LogLevel::Info, limit).await {
        Ok(fetched) => {
            let (mut entries, origin) = fetched.into_parts();
            entries.sort_by_key(|e| e.timestamp);
            let count = entries.len();
            state.logs.update(|logs| logs.extend(entries));
            tracing::info!(count, ?origin, "log backfill loaded");
            Some(origin)
        }
        Err(e) => {
            tracing::warn!(error = %e, "log backfill failed");
            note_gateway_error(state, &e);
            None
        }
    }
}

/// Emit one sample entry every `interval` until shutdown.
pub async fn run_simulated_feed(
    state: std::sync::Arc<DashboardState>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) {
    let mut rng = StdRng::from_entropy();
    run_periodic("log-feed", interval, shutdown, move || {
        let entry = fallback::demo_log_entry(&mut rng);
        append(&state, entry);
        std::future::ready(())
    })
    .await;
}
