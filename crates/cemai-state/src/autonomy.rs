//! Autonomy state machine.
//!
//! ```text
//!            pause / decision_required
//!     ┌────┐ ───────────────────────► ┌────────┐
//!     │ on │                           │ paused │
//!     └────┘ ◄─────────────────────── └────────┘
//!       ▲  │          resume               │
//!       │  │ manual                 manual │
//!       │  ▼                               ▼
//!       │ ┌────────┐ ◄─────────────────────┘
//!       └─│ manual │
//!  resume └────────┘
//! ```
//!
//! Operator actions are role-gated; the backend-driven pause is not.

use chrono::{DateTime, Utc};
use thiserror::Error;

use cemai_protocol::{AgentState, AutonomyMode, Role};

/// Operator-initiated autonomy action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutonomyAction {
    Pause,
    Resume,
    Manual,
    /// Space-bar toggle: on→paused, paused→on, manual→on.
    Toggle,
}

impl std::fmt::Display for AutonomyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Manual => "switch to manual",
            Self::Toggle => "toggle autonomy",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionRejected {
    #[error("insufficient permissions: {role} may not {action}")]
    InsufficientPermissions { role: Role, action: AutonomyAction },

    #[error("cannot {action} while autonomy is {from}")]
    InvalidTransition { from: AutonomyMode, action: AutonomyAction },
}

/// What moved the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionCause {
    Operator(AutonomyAction),
    /// Backend reported `reason: decision_required`.
    DecisionRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: AutonomyMode,
    pub to: AutonomyMode,
    pub cause: TransitionCause,
}

#[derive(Debug, Clone)]
pub struct AutonomyMachine {
    mode: AutonomyMode,
    changed_at: DateTime<Utc>,
}

impl AutonomyMachine {
    /// Every session starts with autonomy on.
    pub fn new() -> Self {
        Self {
            mode: AutonomyMode::On,
            changed_at: Utc::now(),
        }
    }

    pub fn mode(&self) -> AutonomyMode {
        self.mode
    }

    pub fn changed_at(&self) -> DateTime<Utc> {
        self.changed_at
    }

    /// Target mode for `action` from `from`, ignoring roles.
    pub fn target(from: AutonomyMode, action: AutonomyAction) -> Result<AutonomyMode, ActionRejected> {
        use AutonomyMode::*;
        let to = match (action, from) {
            (AutonomyAction::Pause, On) => Paused,
            (AutonomyAction::Resume, Paused | Manual) => On,
            (AutonomyAction::Manual, On | Paused) => Manual,
            (AutonomyAction::Toggle, On) => Paused,
            (AutonomyAction::Toggle, Paused | Manual) => On,
            _ => return Err(ActionRejected::InvalidTransition { from, action }),
        };
        Ok(to)
    }

    /// Apply an operator action. On rejection the mode is unchanged.
    pub fn apply(&mut self, role: Role, action: AutonomyAction) -> Result<Transition, ActionRejected> {
        if role != Role::Operator {
            return Err(ActionRejected::InsufficientPermissions { role, action });
        }
        let to = Self::target(self.mode, action)?;
        Ok(self.move_to(to, TransitionCause::Operator(action)))
    }

    /// Apply a fetched agent state. Only `on → paused` is driven this way.
    pub fn apply_agent_state(&mut self, state: &AgentState) -> Option<Transition> {
        if self.mode == AutonomyMode::On && state.requires_decision() {
            Some(self.move_to(AutonomyMode::Paused, TransitionCause::DecisionRequired))
        } else {
            None
        }
    }

    fn move_to(&mut self, to: AutonomyMode, cause: TransitionCause) -> Transition {
        let from = self.mode;
        self.mode = to;
        self.changed_at = Utc::now();
        Transition { from, to, cause }
    }
}

impl Default for AutonomyMachine {
    fn default() -> Self {
        Self::new()
    }
}
