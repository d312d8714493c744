//! Decision resolution: auto-approve while autonomy is on, hand the
//! decision to the operator otherwise.

use std::sync::Arc;

use thiserror::Error;

use cemai_gateway::{AgentApi, Fetched, GatewayError};
use cemai_protocol::{
    AutonomyMode, DecisionPayload, Verdict, AUTO_APPROVE_RATIONALE, OPERATOR_APPROVE_RATIONALE,
    OPERATOR_REJECT_RATIONALE,
};
use cemai_state::{ActionRejected, AutonomyAction, DashboardState, NoticeVariant, Transition};

pub const APPROVED_NOTICE: &str = "Decision approved and executed";
pub const REJECTED_NOTICE: &str = "Decision rejected, new plan will be generated";

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("no pending decision")]
    NoActiveDecision,

    #[error("decision {0} is already being resolved")]
    InFlight(String),

    #[error("decision {0} was already resolved")]
    AlreadyResolved(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// What one poll tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing pending.
    Cleared,
    AutoApproved { id: String },
    AutoApproveFailed { id: String },
    /// Autonomy is paused or manual; the decision waits in the hub.
    AwaitingOperator { id: String },
    /// The decision is in flight or was resolved earlier in this session.
    AlreadyHandled { id: String },
    /// The pending list is demo data: shown, never approved automatically.
    DemoOnly { id: String },
    /// Pending decisions could not be fetched.
    Unavailable,
}

/// Flag an expired session so the console can ask for a new login.
pub fn note_gateway_error(state: &DashboardState, error: &GatewayError) {
    if matches!(error, GatewayError::SessionExpired | GatewayError::NotAuthenticated) {
        let newly = state.link.update(|link| !std::mem::replace(&mut link.session_expired, true));
        if newly {
            state.notify(NoticeVariant::Error, error.to_string());
        }
    }
}

pub struct DecisionWorkflow<A: AgentApi + ?Sized> {
    api: Arc<A>,
    state: Arc<DashboardState>,
}

impl<A: AgentApi + ?Sized> Clone for DecisionWorkflow<A> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            state: self.state.clone(),
        }
    }
}

impl<A: AgentApi + ?Sized> DecisionWorkflow<A> {
    pub fn new(api: Arc<A>, state: Arc<DashboardState>) -> Self {
        Self { api, state }
    }

    pub fn state(&self) -> &Arc<DashboardState> {
        &self.state
    }

    /// One decision poll.
    ///
    /// 1. fetch the agent state and apply a backend-driven pause;
    /// 2. fetch pending decisions, clearing the hub when none remain;
    /// 3. autonomy on: approve the first entry, at most once per id;
    /// 4. paused or manual: surface it to the operator without any call.
    ///
    /// Demo fallback data never pauses autonomy and is never auto-approved.
    pub async fn tick(&self) -> TickOutcome {
        match self.api.agent_state().await {
            Ok(Fetched::Live(agent)) => {
                self.state.apply_agent_state(&agent);
            }
            Ok(Fetched::Demo { reason, .. }) => {
                tracing::debug!(%reason, "ignoring demo agent state");
            }
            Err(e) => {
                tracing::warn!(error = %e, "agent state poll failed");
                note_gateway_error(&self.state, &e);
            }
        }

        let (pending, demo) = match self.api.pending_decisions().await {
            Ok(fetched) => {
                let demo = fetched.is_demo();
                (fetched.into_value(), demo)
            }
            Err(e) => {
                tracing::warn!(error = %e, "pending decisions poll failed");
                note_gateway_error(&self.state, &e);
                return TickOutcome::Unavailable;
            }
        };

        let Some(first) = pending.into_iter().next() else {
            self.state.decisions.update(|desk| desk.clear());
            return TickOutcome::Cleared;
        };

        match self.state.autonomy_mode() {
            AutonomyMode::On if demo => {
                let id = first.id.clone();
                self.state.decisions.update(|desk| desk.hold(first));
                TickOutcome::DemoOnly { id }
            }
            AutonomyMode::On => self.auto_approve(first).await,
            AutonomyMode::Paused | AutonomyMode::Manual => {
                let id = first.id.clone();
                let summary = first.synthesis.summary.clone();
                let is_new = self.state.decisions.update(|desk| desk.surface(first));
                if is_new {
                    tracing::info!(decision_id = %id, "decision awaiting operator");
                    self.state
                        .notify(NoticeVariant::Info, format!("Decision required: {summary}"));
                }
                TickOutcome::AwaitingOperator { id }
            }
        }
    }

    async fn auto_approve(&self, decision: DecisionPayload) -> TickOutcome {
        let id = decision.id.clone();
        let claimed = self.state.decisions.update(|desk| {
            if desk.was_resolved(&id) {
                return false;
            }
            desk.hold(decision);
            desk.begin(&id)
        });
        if !claimed {
            tracing::debug!(decision_id = %id, "skipping decision already handled");
            return TickOutcome::AlreadyHandled { id };
        }

        match self.api.resolve_decision(&id, Verdict::Approve, AUTO_APPROVE_RATIONALE).await {
            Ok(()) => {
                self.state
                    .decisions
                    .update(|desk| desk.complete(&id, Verdict::Approve, AUTO_APPROVE_RATIONALE, true));
                tracing::info!(decision_id = %id, "decision auto-approved");
                self.state.notify(NoticeVariant::Success, APPROVED_NOTICE);
                TickOutcome::AutoApproved { id }
            }
            Err(e) => {
                self.state.decisions.update(|desk| desk.fail(&id));
                note_gateway_error(&self.state, &e);
                self.state
                    .notify(NoticeVariant::Error, format!("Auto-approval of {id} failed: {e}"));
                TickOutcome::AutoApproveFailed { id }
            }
        }
    }

    /// Operator approve/reject of the active decision. One call, no retry;
    /// only success clears the decision.
    pub async fn resolve_active(
        &self,
        verdict: Verdict,
        rationale: Option<&str>,
    ) -> Result<String, WorkflowError> {
        let rationale = rationale
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(match verdict {
                Verdict::Approve => OPERATOR_APPROVE_RATIONALE,
                Verdict::Reject => OPERATOR_REJECT_RATIONALE,
            })
            .to_string();

        let id = self.state.decisions.update(|desk| {
            let id = desk
                .active()
                .map(|d| d.id.clone())
                .ok_or(WorkflowError::NoActiveDecision)?;
            if let Some(busy) = desk.in_flight() {
                return Err(WorkflowError::InFlight(busy.to_string()));
            }
            if !desk.begin(&id) {
                return Err(WorkflowError::AlreadyResolved(id));
            }
            Ok(id)
        });
        let id = match id {
            Ok(id) => id,
            Err(e) => {
                self.state.notify(NoticeVariant::Info, e.to_string());
                return Err(e);
            }
        };

        match self.api.resolve_decision(&id, verdict, &rationale).await {
            Ok(()) => {
                self.state
                    .decisions
                    .update(|desk| desk.complete(&id, verdict, &rationale, false));
                let (variant, message) = match verdict {
                    Verdict::Approve => (NoticeVariant::Success, APPROVED_NOTICE),
                    Verdict::Reject => (NoticeVariant::Warning, REJECTED_NOTICE),
                };
                self.state.notify(variant, message);
                Ok(id)
            }
            Err(e) => {
                self.state.decisions.update(|desk| desk.fail(&id));
                note_gateway_error(&self.state, &e);
                self.state.notify(
                    NoticeVariant::Error,
                    format!("Failed to {} decision: {e}", verdict.path_segment()),
                );
                Err(e.into())
            }
        }
    }

    /// Role-gated autonomy change. The local mode moves first; a backend
    /// that could not be told only earns a warning.
    pub async fn change_autonomy(&self, action: AutonomyAction) -> Result<Transition, ActionRejected> {
        let transition = self.state.request_autonomy(action)?;
        let reason = match transition.to {
            AutonomyMode::Paused => Some("Paused by operator"),
            AutonomyMode::Manual => Some("Manual control requested by operator"),
            AutonomyMode::On => None,
        };
        if let Err(e) = self.api.set_autonomy(transition.to, reason).await {
            tracing::warn!(mode = %transition.to, error = %e, "backend not informed of autonomy change");
            note_gateway_error(&self.state, &e);
            self.state.notify(
                NoticeVariant::Warning,
                format!("Autonomy is {} locally, backend not updated: {e}", transition.to),
            );
        }
        Ok(transition)
    }

    /// Open the decision hub; posts an info notice when nothing is pending.
    pub fn open_hub(&self) -> bool {
        let opened = self.state.decisions.update(|desk| desk.open_hub());
        if !opened {
            self.state.notify(NoticeVariant::Info, "No pending decisions available");
        }
        opened
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use cemai_gateway::{fallback, ApiFuture};
    use cemai_protocol::{AgentState, Role};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        AgentState,
        Pending,
        Resolve(String, Verdict, String),
        SetAutonomy(AutonomyMode),
    }

    /// Backend double that records calls and replays scripted answers.
    #[derive(Default)]
    struct ScriptedApi {
        calls: Mutex<Vec<Call>>,
        agent: Mutex<Option<AgentState>>,
        pending: Mutex<Vec<DecisionPayload>>,
        resolve_status: Mutex<VecDeque<u16>>,
        autonomy_fails: Mutex<bool>,
        /// Answer reads the way the client does when it falls back to demo data.
        demo: Mutex<bool>,
    }

    impl ScriptedApi {
        fn with_pending(ids: &[&str]) -> Self {
            let api = Self::default();
            *api.pending.lock().unwrap() = ids.iter().map(|id| fallback::demo_decision(id)).collect();
            api
        }

        fn fetched<T>(&self, value: T) -> Fetched<T> {
            if *self.demo.lock().unwrap() {
                Fetched::Demo {
                    value,
                    reason: "backend unreachable".into(),
                }
            } else {
                Fetched::Live(value)
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn resolve_calls(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Resolve(..)))
                .count()
        }
    }

    fn status_error(status: u16) -> GatewayError {
        GatewayError::Status {
            status,
            body: "scripted".into(),
        }
    }

    impl AgentApi for ScriptedApi {
        fn agent_state(&self) -> ApiFuture<'_, Fetched<AgentState>> {
            self.calls.lock().unwrap().push(Call::AgentState);
            let state = self.agent.lock().unwrap().clone().unwrap_or(AgentState {
                autonomy: AutonomyMode::On,
                reason: None,
                pending_decision_id: None,
            });
            let fetched = self.fetched(state);
            Box::pin(async move { Ok(fetched) })
        }

        fn pending_decisions(&self) -> ApiFuture<'_, Fetched<Vec<DecisionPayload>>> {
            self.calls.lock().unwrap().push(Call::Pending);
            let pending = self.pending.lock().unwrap().clone();
            let fetched = self.fetched(pending);
            Box::pin(async move { Ok(fetched) })
        }

        fn resolve_decision<'a>(&'a self, id: &'a str, verdict: Verdict, rationale: &'a str) -> ApiFuture<'a, ()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Resolve(id.to_string(), verdict, rationale.to_string()));
            let status = self.resolve_status.lock().unwrap().pop_front().unwrap_or(200);
            if status == 200 {
                self.pending.lock().unwrap().retain(|d| d.id != id);
            }
            Box::pin(async move {
                if status == 200 {
                    Ok(())
                } else {
                    Err(status_error(status))
                }
            })
        }

        fn set_autonomy<'a>(&'a self, mode: AutonomyMode, _reason: Option<&'a str>) -> ApiFuture<'a, ()> {
            self.calls.lock().unwrap().push(Call::SetAutonomy(mode));
            let fails = *self.autonomy_fails.lock().unwrap();
            Box::pin(async move {
                if fails {
                    Err(status_error(503))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn workflow(api: ScriptedApi, role: Role) -> (Arc<ScriptedApi>, DecisionWorkflow<ScriptedApi>) {
        let api = Arc::new(api);
        let state = Arc::new(DashboardState::new(role));
        (api.clone(), DecisionWorkflow::new(api, state))
    }

    fn last_notice(workflow: &DecisionWorkflow<ScriptedApi>) -> (NoticeVariant, String) {
        workflow
            .state()
            .notices
            .read(|board| board.last().map(|n| (n.variant, n.message.clone())))
            .expect("a notice")
    }

    #[tokio::test]
    async fn auto_approves_first_pending_once() {
        let (api, wf) = workflow(ScriptedApi::with_pending(&["dec_1", "dec_2"]), Role::Operator);

        assert_eq!(wf.tick().await, TickOutcome::AutoApproved { id: "dec_1".into() });
        assert!(api
            .calls()
            .contains(&Call::Resolve("dec_1".into(), Verdict::Approve, AUTO_APPROVE_RATIONALE.into())));
        assert_eq!(last_notice(&wf), (NoticeVariant::Success, APPROVED_NOTICE.to_string()));
        assert!(wf.state().decisions.read(|d| d.active().is_none()));

        // A stale backend that still lists dec_1 must not trigger a second call.
        api.pending.lock().unwrap().insert(0, fallback::demo_decision("dec_1"));
        assert_eq!(wf.tick().await, TickOutcome::AlreadyHandled { id: "dec_1".into() });
        assert_eq!(api.resolve_calls(), 1);
    }

    #[tokio::test]
    async fn failed_auto_approve_keeps_decision_until_next_tick() {
        let api = ScriptedApi::with_pending(&["dec_1"]);
        api.resolve_status.lock().unwrap().push_back(500);
        let (api, wf) = workflow(api, Role::Operator);

        assert_eq!(wf.tick().await, TickOutcome::AutoApproveFailed { id: "dec_1".into() });
        assert_eq!(api.resolve_calls(), 1, "no retry inside the tick");
        assert_eq!(
            wf.state().decisions.read(|d| d.active().map(|a| a.id.clone())),
            Some("dec_1".to_string())
        );
        assert_eq!(last_notice(&wf).0, NoticeVariant::Error);
        assert!(wf.state().decisions.read(|d| d.in_flight().is_none()));

        assert_eq!(wf.tick().await, TickOutcome::AutoApproved { id: "dec_1".into() });
        assert_eq!(api.resolve_calls(), 2);
    }

    #[tokio::test]
    async fn pause_after_failed_auto_approve_presents_decision() {
        let api = ScriptedApi::with_pending(&["dec_1"]);
        api.resolve_status.lock().unwrap().push_back(500);
        let (api, wf) = workflow(api, Role::Operator);

        assert_eq!(wf.tick().await, TickOutcome::AutoApproveFailed { id: "dec_1".into() });
        assert!(!wf.state().decisions.read(|d| d.hub_open()));

        wf.state().request_autonomy(AutonomyAction::Pause).unwrap();
        assert_eq!(wf.tick().await, TickOutcome::AwaitingOperator { id: "dec_1".into() });
        assert!(wf.state().decisions.read(|d| d.hub_open()));
        let (variant, message) = last_notice(&wf);
        assert_eq!(variant, NoticeVariant::Info);
        assert!(message.starts_with("Decision required"), "{message}");
        assert_eq!(api.resolve_calls(), 1);
    }

    #[tokio::test]
    async fn paused_surfaces_without_calls() {
        let (api, wf) = workflow(ScriptedApi::with_pending(&["dec_9"]), Role::Operator);
        wf.state().request_autonomy(AutonomyAction::Pause).unwrap();

        assert_eq!(wf.tick().await, TickOutcome::AwaitingOperator { id: "dec_9".into() });
        assert_eq!(api.calls(), vec![Call::AgentState, Call::Pending]);
        assert!(wf.state().decisions.read(|d| d.hub_open()));
    }

    #[tokio::test]
    async fn backend_pause_stops_auto_approval() {
        let api = ScriptedApi::with_pending(&["dec_123"]);
        *api.agent.lock().unwrap() = Some(fallback::demo_agent_state());
        let (api, wf) = workflow(api, Role::Manager);

        assert_eq!(wf.tick().await, TickOutcome::AwaitingOperator { id: "dec_123".into() });
        assert_eq!(wf.state().autonomy_mode(), AutonomyMode::Paused);
        assert_eq!(api.resolve_calls(), 0);
    }

    #[tokio::test]
    async fn demo_data_neither_pauses_nor_approves() {
        let api = ScriptedApi::with_pending(&["dec_123"]);
        *api.agent.lock().unwrap() = Some(fallback::demo_agent_state());
        *api.demo.lock().unwrap() = true;
        let (api, wf) = workflow(api, Role::Operator);

        assert_eq!(wf.tick().await, TickOutcome::DemoOnly { id: "dec_123".into() });
        assert_eq!(wf.state().autonomy_mode(), AutonomyMode::On);
        assert!(wf.state().decisions.read(|d| d.active().is_some() && !d.hub_open()));

        wf.state().request_autonomy(AutonomyAction::Pause).unwrap();
        wf.state().request_autonomy(AutonomyAction::Resume).unwrap();
        wf.tick().await;
        assert_eq!(wf.state().autonomy_mode(), AutonomyMode::On);
        assert_eq!(api.resolve_calls(), 0);
    }

    #[tokio::test]
    async fn empty_pending_clears_hub() {
        let (api, wf) = workflow(ScriptedApi::with_pending(&["dec_4"]), Role::Operator);
        wf.state().request_autonomy(AutonomyAction::Manual).unwrap();
        wf.tick().await;
        assert!(wf.state().decisions.read(|d| d.active().is_some()));

        api.pending.lock().unwrap().clear();
        assert_eq!(wf.tick().await, TickOutcome::Cleared);
        assert!(wf.state().decisions.read(|d| d.active().is_none() && !d.hub_open()));
    }

    #[tokio::test]
    async fn manual_reject_uses_free_text_and_warns() {
        let (api, wf) = workflow(ScriptedApi::with_pending(&["dec_5"]), Role::Operator);
        wf.state().request_autonomy(AutonomyAction::Pause).unwrap();
        wf.tick().await;

        let id = wf.resolve_active(Verdict::Reject, Some("kiln shell too hot")).await.unwrap();
        assert_eq!(id, "dec_5");
        assert!(api
            .calls()
            .contains(&Call::Resolve("dec_5".into(), Verdict::Reject, "kiln shell too hot".into())));
        assert_eq!(last_notice(&wf), (NoticeVariant::Warning, REJECTED_NOTICE.to_string()));
        let history: Vec<_> = wf.state().decisions.read(|d| d.history().cloned().collect());
        assert_eq!(history.len(), 1);
        assert!(!history[0].automatic);
    }

    #[tokio::test]
    async fn manual_approve_failure_keeps_decision() {
        let api = ScriptedApi::with_pending(&["dec_6"]);
        api.resolve_status.lock().unwrap().push_back(500);
        let (api, wf) = workflow(api, Role::Operator);
        wf.state().request_autonomy(AutonomyAction::Pause).unwrap();
        wf.tick().await;

        let err = wf.resolve_active(Verdict::Approve, None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Gateway(_)));
        assert!(api
            .calls()
            .contains(&Call::Resolve("dec_6".into(), Verdict::Approve, OPERATOR_APPROVE_RATIONALE.into())));
        assert!(wf.state().decisions.read(|d| d.active().is_some()));
        assert_eq!(last_notice(&wf).0, NoticeVariant::Error);
    }

    #[tokio::test]
    async fn resolve_without_decision_is_rejected() {
        let (api, wf) = workflow(ScriptedApi::default(), Role::Operator);
        let err = wf.resolve_active(Verdict::Approve, None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NoActiveDecision));
        assert_eq!(api.resolve_calls(), 0);
        assert!(!wf.open_hub());
        assert_eq!(last_notice(&wf), (NoticeVariant::Info, "No pending decisions available".to_string()));
    }

    #[tokio::test]
    async fn autonomy_change_is_optimistic() {
        let api = ScriptedApi::default();
        *api.autonomy_fails.lock().unwrap() = true;
        let (api, wf) = workflow(api, Role::Operator);

        let transition = wf.change_autonomy(AutonomyAction::Toggle).await.unwrap();
        assert_eq!(transition.to, AutonomyMode::Paused);
        assert_eq!(wf.state().autonomy_mode(), AutonomyMode::Paused);
        assert_eq!(api.calls(), vec![Call::SetAutonomy(AutonomyMode::Paused)]);
        assert_eq!(last_notice(&wf).0, NoticeVariant::Warning);
    }

    #[tokio::test]
    async fn non_operator_cannot_change_autonomy() {
        let (api, wf) = workflow(ScriptedApi::default(), Role::Engineer);
        assert!(wf.change_autonomy(AutonomyAction::Pause).await.is_err());
        assert_eq!(wf.state().autonomy_mode(), AutonomyMode::On);
        assert!(api.calls().is_empty());
    }
}
