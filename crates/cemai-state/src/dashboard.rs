use cemai_protocol::{AgentState, AutonomyMode, HealthMap, KpiSnapshot, Role, SystemStatus, User};

use crate::autonomy::{ActionRejected, AutonomyAction, AutonomyMachine, Transition};
use crate::chat::ChatTranscript;
use crate::decision::DecisionDesk;
use crate::feed::Feed;
use crate::log_buffer::LogBuffer;
use crate::notices::{NoticeBoard, NoticeVariant};
use crate::store::Store;

/// State of the WebSocket push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushLink {
    #[default]
    Disabled,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted.
    Down,
}

/// Backend reachability as seen by the status bar.
#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    /// `None` until the first ping completes.
    pub api_reachable: Option<bool>,
    pub latency_ms: Option<u64>,
    pub push: PushLink,
    pub system: Option<SystemStatus>,
    /// Token refresh failed; a new login is required.
    pub session_expired: bool,
}

/// Persisted console preferences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UiPrefs {
    pub side_panel_collapsed: bool,
}

/// Every store of a Control Tower session.
///
/// Constructed once and shared behind an `Arc`; no part of the state is
/// global.
#[derive(Debug)]
pub struct DashboardState {
    pub autonomy: Store<AutonomyMachine>,
    pub role: Store<Role>,
    pub user: Store<Option<User>>,
    pub kpis: Store<Feed<KpiSnapshot>>,
    pub health: Store<Feed<HealthMap>>,
    pub decisions: Store<DecisionDesk>,
    pub logs: Store<LogBuffer>,
    pub notices: Store<NoticeBoard>,
    pub link: Store<LinkStatus>,
    pub chat: Store<ChatTranscript>,
    pub prefs: Store<UiPrefs>,
}

impl DashboardState {
    pub fn new(role: Role) -> Self {
        Self {
            autonomy: Store::new(AutonomyMachine::new()),
            role: Store::new(role),
            user: Store::new(None),
            kpis: Store::default(),
            health: Store::default(),
            decisions: Store::default(),
            logs: Store::default(),
            notices: Store::default(),
            link: Store::default(),
            chat: Store::default(),
            prefs: Store::default(),
        }
    }

    pub fn autonomy_mode(&self) -> AutonomyMode {
        self.autonomy.read(|a| a.mode())
    }

    pub fn notify(&self, variant: NoticeVariant, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(?variant, %message, "notice");
        self.notices.update(|board| {
            board.push(variant, message);
        });
    }

    /// Operator autonomy action, gated by the current role.
    ///
    /// Rejections leave the stored mode untouched and surface a notice.
    pub fn request_autonomy(&self, action: AutonomyAction) -> Result<Transition, ActionRejected> {
        let role = self.role.get();
        match self.autonomy.try_update(|machine| machine.apply(role, action)) {
            Ok(transition) => {
                let (variant, message) = match transition.to {
                    AutonomyMode::Paused => (NoticeVariant::Warning, "Autonomy paused"),
                    AutonomyMode::On => (NoticeVariant::Success, "Autonomy resumed"),
                    AutonomyMode::Manual => (NoticeVariant::Error, "Manual mode enabled"),
                };
                tracing::info!(from = %transition.from, to = %transition.to, %role, "autonomy changed");
                self.notify(variant, message);
                Ok(transition)
            }
            Err(rejected) => {
                tracing::warn!(%role, %action, error = %rejected, "autonomy action rejected");
                let message = match rejected {
                    ActionRejected::InsufficientPermissions { .. } => "Insufficient permissions".to_string(),
                    ActionRejected::InvalidTransition { .. } => rejected.to_string(),
                };
                self.notify(NoticeVariant::Error, message);
                Err(rejected)
            }
        }
    }

    /// Backend-driven pause from a fetched agent state.
    pub fn apply_agent_state(&self, state: &AgentState) -> Option<Transition> {
        let transition = self
            .autonomy
            .try_update(|machine| machine.apply_agent_state(state).ok_or(()))
            .ok()?;
        tracing::info!(
            pending = ?state.pending_decision_id,
            "autonomy paused by backend: decision required"
        );
        self.notify(NoticeVariant::Warning, "Autonomy paused: decision required");
        Some(transition)
    }
}

impl Default for DashboardState {
    fn default() -> Self {
        Self::new(Role::Operator)
    }
}
