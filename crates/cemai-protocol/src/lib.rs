//! CemAI Protocol - Domain types and wire messages
//!
//! Shared vocabulary of the Control Tower: KPI snapshots, health
//! predictions, agent autonomy state, decision proposals, log entries,
//! the REST response envelope and the WebSocket push frames.

pub mod constants;
pub mod error;
pub mod messages;
pub mod types;

pub use constants::*;
pub use error::*;
pub use messages::*;
pub use types::*;
