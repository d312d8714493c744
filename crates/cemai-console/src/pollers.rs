//! Fixed-interval pollers for KPIs, health predictions and connectivity.

use std::future::Future;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use cemai_gateway::{ApiClient, Fetched, GatewayResult};
use cemai_protocol::{HealthStatus, ServiceHealth, AGENT_NAMESPACES, HEALTH_SYSTEMS};
use cemai_state::DashboardState;

use crate::workflow::note_gateway_error;

/// Call `tick` every `period` until `shutdown` flips to `true` or its
/// sender goes away. The flag is checked before each tick; a tick already
/// running is never interrupted.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::debug!(task = name, period_ms = period.as_millis() as u64, "poller started");

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }
        tick().await;
    }
    tracing::debug!(task = name, "poller stopped");
}

/// Replace the KPI snapshot, or mark the current one stale.
pub async fn refresh_kpis(api: &ApiClient, state: &DashboardState) {
    match api.realtime_kpis().await {
        Ok(fetched) => {
            let (snapshot, origin) = fetched.into_parts();
            state.kpis.update(|feed| feed.replace(snapshot, origin));
        }
        Err(e) => {
            tracing::warn!(error = %e, "KPI refresh failed");
            note_gateway_error(state, &e);
            state.kpis.update(|feed| feed.mark_stale(e.to_string()));
        }
    }
}

/// Replace the health map. Any unstable system refreshes the chat
/// suggestions.
pub async fn refresh_health(api: &ApiClient, state: &DashboardState) {
    match api.health_predictions(&HEALTH_SYSTEMS).await {
        Ok(fetched) => {
            let (health, origin) = fetched.into_parts();
            let alert = health.any_unstable().then(|| {
                health
                    .iter()
                    .filter(|h| h.status != HealthStatus::Stable)
                    .map(|h| format!("{} {:?}", h.system.label(), h.status).to_lowercase())
                    .collect::<Vec<_>>()
                    .join(", ")
            });
            state.health.update(|feed| feed.replace(health, origin));
            if let Some(alert) = alert {
                refresh_suggestions(api, state, &format!("health alert: {alert}")).await;
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "health refresh failed");
            note_gateway_error(state, &e);
            state.health.update(|feed| feed.mark_stale(e.to_string()));
        }
    }
}

pub async fn refresh_suggestions(api: &ApiClient, state: &DashboardState, context: &str) {
    match api.chat_suggestions(context).await {
        Ok(fetched) => {
            let suggestions = fetched.into_value();
            state.chat.update(|chat| chat.set_suggestions(suggestions));
        }
        Err(e) => tracing::debug!(error = %e, "suggestion refresh failed"),
    }
}

/// Probe the backend and record reachability and round-trip time.
pub async fn ping(api: &ApiClient, state: &DashboardState) {
    match api.ping().await {
        Ok((_pong, latency)) => {
            state.link.update(|link| {
                link.api_reachable = Some(true);
                link.latency_ms = Some(latency.as_millis() as u64);
            });
        }
        Err(e) => {
            tracing::debug!(error = %e, "ping failed");
            note_gateway_error(state, &e);
            state.link.update(|link| {
                link.api_reachable = Some(false);
                link.latency_ms = None;
            });
        }
    }
}

/// Health of every agent namespace, in display order. Namespaces are
/// queried concurrently.
pub async fn agent_health(api: &ApiClient) -> Vec<(&'static str, GatewayResult<Fetched<ServiceHealth>>)> {
    let checks = AGENT_NAMESPACES
        .into_iter()
        .map(|namespace| async move { (namespace, api.agent_health(namespace).await) });
    join_all(checks).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn periodic_runner_stops_on_shutdown() {
        let ticks = Arc::new(AtomicU32::new(0));
        let (tx, rx) = watch::channel(false);
        let counter = ticks.clone();
        let task = tokio::spawn(run_periodic("test", Duration::from_millis(5), rx, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();

        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, saw {seen}");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn periodic_runner_stops_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_periodic("orphan", Duration::from_millis(5), rx, || async {}));
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }
}
