//! Applies push-channel signals to the dashboard state.

use chrono::Utc;

use cemai_gateway::PushSignal;
use cemai_protocol::{KpiData, KpiId, KpiSnapshot, Origin, Priority, PushEvent};
use cemai_state::{DashboardState, NoticeVariant, PushLink};

use crate::log_stream;

pub fn apply_signal(state: &DashboardState, signal: PushSignal) {
    match signal {
        PushSignal::Connecting => state.link.update(|l| l.push = PushLink::Connecting),
        PushSignal::Connected => state.link.update(|l| l.push = PushLink::Connected),
        PushSignal::Disconnected => state.link.update(|l| l.push = PushLink::Connecting),
        PushSignal::Reconnecting { attempt } => {
            state.link.update(|l| l.push = PushLink::Reconnecting { attempt })
        }
        PushSignal::GaveUp => {
            state.link.update(|l| l.push = PushLink::Down);
            state.notify(NoticeVariant::Warning, "Live updates unavailable, polling only");
        }
        PushSignal::Event(event) => apply_event(state, event),
    }
}

pub fn apply_event(state: &DashboardState, event: PushEvent) {
    tracing::trace!(kind = event.kind(), "push event");
    match event {
        PushEvent::KpiUpdate(readings) => {
            let now = Utc::now();
            state.kpis.update(|feed| {
                // Push updates may carry a subset of KPIs; merge into the
                // current snapshot when there is one.
                let snapshot = match feed.value() {
                    Some(current) => {
                        let mut merged = current.clone();
                        for (key, reading) in readings {
                            if let Ok(id) = key.parse::<KpiId>() {
                                merged.kpis.insert(id, KpiData::from_reading(id, reading, now));
                            }
                        }
                        merged
                    }
                    None => KpiSnapshot::from_readings(readings, now),
                };
                feed.replace(snapshot, Origin::Live);
            });
        }
        PushEvent::AgentProposal(proposal) => {
            state.notify(
                NoticeVariant::Info,
                format!("New {:?} proposal: {}", proposal.agent, proposal.title),
            );
        }
        PushEvent::LogEntry(entry) => log_stream::append(state, entry),
        PushEvent::ProcessAlert(alert) => {
            let variant = match alert.severity {
                Priority::Critical | Priority::High => NoticeVariant::Error,
                Priority::Medium => NoticeVariant::Warning,
                Priority::Low => NoticeVariant::Info,
            };
            state.notify(variant, format!("{}: {}", alert.kind, alert.message));
        }
        PushEvent::Notification(notification) => {
            let variant = match notification.priority {
                Priority::Critical | Priority::High => NoticeVariant::Warning,
                _ => NoticeVariant::Info,
            };
            state.notify(variant, format!("{}: {}", notification.title, notification.message));
        }
        PushEvent::SystemStatus(update) => {
            state.link.update(|l| l.system = Some(update.status));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use cemai_gateway::fallback;
    use cemai_protocol::{KpiStatus, SystemStatus, SystemStatusUpdate};

    #[test]
    fn partial_kpi_update_merges_into_snapshot() {
        let state = DashboardState::default();
        let full = KpiSnapshot::from_readings(fallback::demo_kpi_readings(), Utc::now());
        state.kpis.update(|f| f.replace(full, Origin::Demo));

        let mut update = BTreeMap::new();
        let mut tsr = fallback::demo_kpi_readings().remove("tsr").unwrap();
        tsr.value = 21.5;
        update.insert("tsr".to_string(), tsr);
        apply_event(&state, PushEvent::KpiUpdate(update));

        state.kpis.read(|feed| {
            let snapshot = feed.value().unwrap();
            assert_eq!(feed.origin(), Origin::Live);
            assert_eq!(snapshot.get(KpiId::Tsr).unwrap().value, 21.5);
            assert_eq!(snapshot.get(KpiId::HeatRate).unwrap().value, 780.0);
        });
    }

    #[test]
    fn first_kpi_update_marks_missing_offline() {
        let state = DashboardState::default();
        let mut update = fallback::demo_kpi_readings();
        update.remove("heatRate");
        apply_event(&state, PushEvent::KpiUpdate(update));
        let status = state
            .kpis
            .read(|f| f.value().unwrap().get(KpiId::HeatRate).unwrap().status);
        assert_eq!(status, KpiStatus::Offline);
    }

    #[test]
    fn link_signals_track_push_state() {
        let state = DashboardState::default();
        apply_signal(&state, PushSignal::Connected);
        assert_eq!(state.link.read(|l| l.push), PushLink::Connected);
        apply_signal(&state, PushSignal::Reconnecting { attempt: 3 });
        assert_eq!(state.link.read(|l| l.push), PushLink::Reconnecting { attempt: 3 });
        apply_signal(&state, PushSignal::GaveUp);
        assert_eq!(state.link.read(|l| l.push), PushLink::Down);
        assert_eq!(state.notices.read(|n| n.last().map(|n| n.variant)), Some(NoticeVariant::Warning));

        apply_signal(
            &state,
            PushSignal::Event(PushEvent::SystemStatus(SystemStatusUpdate {
                status: SystemStatus::Maintenance,
            })),
        );
        assert_eq!(state.link.read(|l| l.system), Some(SystemStatus::Maintenance));
    }
}
