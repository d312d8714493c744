//! CemAI Console - the Control Tower runtime
//!
//! [`ControlTower`] owns one [`cemai_state::DashboardState`] and drives it:
//! fixed-interval pollers, the push channel, the decision workflow with
//! its auto-approval policy, and the Oracle chat. The operator console TUI
//! renders the state and turns keys and slash commands into workflow calls.
//! [`DemoBackend`] is an in-memory stand-in for the agent backend.

pub mod commands;
pub mod config;
pub mod demo_backend;
pub mod events;
pub mod log_stream;
pub mod operator_console;
pub mod oracle;
pub mod pollers;
pub mod runtime;
pub mod workflow;

pub use commands::{Command, CommandError};
pub use config::{ConfigError, ConsoleConfig};
pub use demo_backend::{DemoBackend, DemoHandle};
pub use operator_console::run_operator_console;
pub use oracle::{AskOutcome, Oracle};
pub use runtime::ControlTower;
pub use workflow::{DecisionWorkflow, TickOutcome, WorkflowError};
