//! Control Tower runtime against the in-memory demo backend.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cemai_console::workflow::{APPROVED_NOTICE, REJECTED_NOTICE};
use cemai_console::*;
use cemai_gateway::{ApiClient, GatewayError, SessionStore};
use cemai_protocol::{AutonomyMode, Role, Verdict, DECISION_REQUIRED_REASON};
use cemai_state::{AutonomyAction, DashboardState, NoticeVariant, PushLink};

async fn demo() -> (SocketAddr, DemoHandle) {
    DemoBackend::new("127.0.0.1:0").spawn().await.unwrap()
}

fn config_for(addr: SocketAddr) -> ConsoleConfig {
    let mut config = ConsoleConfig::default();
    config.api.base_url = format!("http://{addr}");
    config.api.demo_fallback = false;
    config.push.enabled = false;
    config
}

fn tower_for(addr: SocketAddr) -> ControlTower {
    ControlTower::new(config_for(addr), Arc::new(SessionStore::in_memory())).unwrap()
}

/// A local address with nothing listening on it.
fn closed_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn last_notice(state: &DashboardState) -> Option<(NoticeVariant, String)> {
    state
        .notices
        .read(|board| board.last().map(|n| (n.variant, n.message.clone())))
}

#[tokio::test]
async fn autonomy_on_approves_pending_decision() {
    let (addr, handle) = demo().await;
    let tower = tower_for(addr);
    handle.push_decision("dec_1", false).await;

    let outcome = tower.workflow().tick().await;
    assert_eq!(outcome, TickOutcome::AutoApproved { id: "dec_1".into() });
    assert!(handle.pending_ids().await.is_empty());
    assert_eq!(handle.resolution_calls().await, vec!["approve:dec_1".to_string()]);
    assert_eq!(
        last_notice(tower.state()),
        Some((NoticeVariant::Success, APPROVED_NOTICE.to_string()))
    );

    assert_eq!(tower.workflow().tick().await, TickOutcome::Cleared);
    assert_eq!(handle.resolution_calls().await.len(), 1);
}

#[tokio::test]
async fn failed_auto_approval_keeps_decision_and_retries() {
    let (addr, handle) = demo().await;
    let tower = tower_for(addr);
    handle.push_decision("dec_1", false).await;
    handle.fail_resolutions(Some(500)).await;

    let outcome = tower.workflow().tick().await;
    assert_eq!(outcome, TickOutcome::AutoApproveFailed { id: "dec_1".into() });
    assert_eq!(handle.pending_ids().await, vec!["dec_1".to_string()]);
    assert_eq!(handle.resolution_calls().await.len(), 1);
    let active = tower
        .state()
        .decisions
        .read(|desk| desk.active().map(|d| d.id.clone()));
    assert_eq!(active.as_deref(), Some("dec_1"));
    assert_eq!(last_notice(tower.state()).map(|n| n.0), Some(NoticeVariant::Error));

    handle.fail_resolutions(None).await;
    assert_eq!(
        tower.workflow().tick().await,
        TickOutcome::AutoApproved { id: "dec_1".into() }
    );
    assert_eq!(handle.resolution_calls().await.len(), 2);
}

#[tokio::test]
async fn pause_after_failed_auto_approval_hands_decision_to_operator() {
    let (addr, handle) = demo().await;
    let tower = tower_for(addr);
    handle.push_decision("dec_1", false).await;
    handle.fail_resolutions(Some(500)).await;

    assert_eq!(
        tower.workflow().tick().await,
        TickOutcome::AutoApproveFailed { id: "dec_1".into() }
    );
    assert!(!tower.state().decisions.read(|desk| desk.hub_open()));

    tower.workflow().change_autonomy(AutonomyAction::Pause).await.unwrap();
    assert_eq!(
        tower.workflow().tick().await,
        TickOutcome::AwaitingOperator { id: "dec_1".into() }
    );
    assert!(tower.state().decisions.read(|desk| desk.hub_open()));
    let (variant, message) = last_notice(tower.state()).unwrap();
    assert_eq!(variant, NoticeVariant::Info);
    assert!(message.starts_with("Decision required"), "{message}");
    assert_eq!(handle.resolution_calls().await.len(), 1);

    handle.fail_resolutions(None).await;
    let id = tower.workflow().resolve_active(Verdict::Approve, None).await.unwrap();
    assert_eq!(id, "dec_1");
    assert!(handle.pending_ids().await.is_empty());
}

#[tokio::test]
async fn demo_fallback_never_drives_autonomy() {
    let mut config = config_for(closed_addr());
    config.api.demo_fallback = true;
    config.api.timeout_secs = 1;
    let tower = ControlTower::new(config, Arc::new(SessionStore::in_memory())).unwrap();

    let outcome = tower.workflow().tick().await;
    assert!(matches!(outcome, TickOutcome::DemoOnly { .. }), "{outcome:?}");
    assert_eq!(tower.state().autonomy_mode(), AutonomyMode::On);
    assert!(!tower.state().decisions.read(|desk| desk.hub_open()));

    // The backend cannot be told; the local change still stands.
    tower.workflow().change_autonomy(AutonomyAction::Pause).await.unwrap();
    tower.workflow().change_autonomy(AutonomyAction::Resume).await.unwrap();
    tower.workflow().tick().await;
    assert_eq!(tower.state().autonomy_mode(), AutonomyMode::On);
    assert!(tower
        .state()
        .decisions
        .read(|desk| desk.history().next().is_none() && desk.in_flight().is_none()));
}

#[tokio::test]
async fn huge_history_page_is_empty() {
    let (addr, handle) = demo().await;
    let tower = tower_for(addr);
    handle.push_decision("dec_1", false).await;
    tower.workflow().tick().await;

    let page = tower.api().decision_history(u32::MAX, u32::MAX, None).await.unwrap();
    assert!(!page.is_demo());
    let page = page.into_value();
    assert!(page.decisions.is_empty());
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn paused_autonomy_never_calls_approve() {
    let (addr, handle) = demo().await;
    let tower = tower_for(addr);

    let transition = tower.workflow().change_autonomy(AutonomyAction::Pause).await.unwrap();
    assert_eq!(transition.to, AutonomyMode::Paused);
    assert_eq!(handle.agent_state().await.autonomy, AutonomyMode::Paused);

    handle.push_decision("dec_2", false).await;
    assert_eq!(
        tower.workflow().tick().await,
        TickOutcome::AwaitingOperator { id: "dec_2".into() }
    );
    assert!(tower.state().decisions.read(|desk| desk.hub_open()));
    assert!(handle.resolution_calls().await.is_empty());
}

#[tokio::test]
async fn decision_required_pauses_and_operator_rejects() {
    let (addr, handle) = demo().await;
    let tower = tower_for(addr);
    handle.push_decision("dec_9", true).await;
    assert_eq!(
        handle.agent_state().await.reason.as_deref(),
        Some(DECISION_REQUIRED_REASON)
    );

    assert_eq!(
        tower.workflow().tick().await,
        TickOutcome::AwaitingOperator { id: "dec_9".into() }
    );
    assert_eq!(tower.state().autonomy_mode(), AutonomyMode::Paused);
    assert!(handle.resolution_calls().await.is_empty());

    let id = tower
        .workflow()
        .resolve_active(Verdict::Reject, Some("fuel ratio too aggressive"))
        .await
        .unwrap();
    assert_eq!(id, "dec_9");
    assert_eq!(handle.resolution_calls().await, vec!["reject:dec_9".to_string()]);
    assert!(handle.agent_state().await.pending_decision_id.is_none());
    assert_eq!(
        last_notice(tower.state()),
        Some((NoticeVariant::Warning, REJECTED_NOTICE.to_string()))
    );
    assert!(tower.state().decisions.read(|desk| desk.active().is_none()));
}

#[tokio::test]
async fn engineer_cannot_pause() {
    let (addr, handle) = demo().await;
    let tower = tower_for(addr);
    tower.set_role(Role::Engineer);

    assert!(tower.workflow().change_autonomy(AutonomyAction::Pause).await.is_err());
    assert_eq!(tower.state().autonomy_mode(), AutonomyMode::On);
    assert_eq!(handle.agent_state().await.autonomy, AutonomyMode::On);
}

#[tokio::test]
async fn oracle_answers_with_suggestions() {
    let (addr, _handle) = demo().await;
    let tower = tower_for(addr);

    assert_eq!(tower.oracle().ask("why is the kiln running hot?").await, AskOutcome::Answered);
    let (count, awaiting, suggestions) = tower.state().chat.read(|chat| {
        (
            chat.messages().len(),
            chat.awaiting_reply(),
            chat.visible_suggestions(false),
        )
    });
    assert_eq!(count, 2);
    assert!(!awaiting);
    assert!(!suggestions.is_empty());
    assert_eq!(tower.oracle().ask("   ").await, AskOutcome::Empty);
}

#[tokio::test]
async fn login_persists_session_and_logout_clears_it() {
    let (addr, _handle) = demo().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let config = config_for(addr);

    let api = ApiClient::new(config.client_config(), Arc::new(SessionStore::open(path.clone()).unwrap()))
        .unwrap();
    let user = api.login("ops@plant.example", "secret").await.unwrap();
    assert!(!user.is_demo());
    assert!(SessionStore::open(path.clone()).unwrap().is_logged_in());

    api.logout().await.unwrap();
    assert!(!SessionStore::open(path).unwrap().is_logged_in());
}

#[tokio::test]
async fn rejected_login_is_not_replaced_by_demo() {
    let (addr, _handle) = demo().await;
    let mut config = config_for(addr);
    config.api.demo_fallback = true;
    let api = ApiClient::new(config.client_config(), Arc::new(SessionStore::in_memory())).unwrap();

    let err = api.login("ops@plant.example", "").await.unwrap_err();
    assert!(matches!(err, GatewayError::Status { status: 401, .. }));
    assert!(!api.session().is_logged_in());
}

#[tokio::test]
async fn started_tower_fills_state_and_stops() {
    let (addr, _handle) = demo().await;
    let mut config = config_for(addr);
    config.push.enabled = true;
    config.polling.kpis_ms = 200;
    let mut tower = ControlTower::new(config, Arc::new(SessionStore::in_memory())).unwrap();
    tower.start().await;

    let mut ready = false;
    for _ in 0..50 {
        let connected = tower.state().link.read(|l| l.push == PushLink::Connected);
        let kpis = tower.state().kpis.read(|feed| feed.value().is_some());
        if connected && kpis {
            ready = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(ready, "push link and KPI feed never came up");
    assert!(tower.state().user.read(|u| u.is_some()));

    tokio::time::timeout(Duration::from_secs(5), tower.shutdown())
        .await
        .expect("shutdown timed out");
}
