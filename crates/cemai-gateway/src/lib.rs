//! CemAI Gateway - client side of the agent backend
//!
//! [`ApiClient`] wraps every REST endpoint: bearer auth from the persisted
//! [`SessionStore`], a single shared token refresh on 401, and demo data for
//! failed reads when fallback is enabled. [`PushClient`] maintains the
//! WebSocket push channel.

pub mod api;
pub mod client;
pub mod error;
pub mod fallback;
pub mod push;
pub mod session;

pub use api::{AgentApi, ApiFuture};
pub use client::{ApiClient, ClientConfig, Fetched};
pub use error::{GatewayError, GatewayResult};
pub use push::{decode_text, ws_url_from_base, PushClient, PushConfig, PushSignal};
pub use session::{PersistedSession, SessionStore};
