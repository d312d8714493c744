//! CemAI State - session state of the Control Tower
//!
//! Every piece of shared state lives in a [`Store`], an explicit container
//! with subscribe/notify semantics. [`DashboardState`] bundles the stores
//! and is handed to the pollers, the decision workflow and the console.

pub mod autonomy;
pub mod chat;
pub mod dashboard;
pub mod decision;
pub mod feed;
pub mod log_buffer;
pub mod notices;
pub mod store;

pub use autonomy::{ActionRejected, AutonomyAction, AutonomyMachine, Transition, TransitionCause};
pub use chat::ChatTranscript;
pub use dashboard::{DashboardState, LinkStatus, PushLink, UiPrefs};
pub use decision::{DecisionDesk, ResolvedDecision};
pub use feed::Feed;
pub use log_buffer::LogBuffer;
pub use notices::{Notice, NoticeBoard, NoticeVariant};
pub use store::Store;
