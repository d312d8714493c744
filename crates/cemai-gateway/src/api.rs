//! Trait seam between the decision workflow and the backend.

use std::future::Future;
use std::pin::Pin;

use cemai_protocol::{AgentState, AutonomyMode, DecisionPayload, Verdict};

use crate::client::{ApiClient, Fetched};
use crate::GatewayResult;

pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send + 'a>>;

/// Backend calls the decision workflow depends on.
///
/// [`ApiClient`] is the production implementation; tests substitute a
/// scripted backend to observe exactly which calls are issued.
pub trait AgentApi: Send + Sync {
    fn agent_state(&self) -> ApiFuture<'_, Fetched<AgentState>>;

    fn pending_decisions(&self) -> ApiFuture<'_, Fetched<Vec<DecisionPayload>>>;

    fn resolve_decision<'a>(&'a self, id: &'a str, verdict: Verdict, rationale: &'a str) -> ApiFuture<'a, ()>;

    fn set_autonomy<'a>(&'a self, mode: AutonomyMode, reason: Option<&'a str>) -> ApiFuture<'a, ()>;
}

impl AgentApi for ApiClient {
    fn agent_state(&self) -> ApiFuture<'_, Fetched<AgentState>> {
        Box::pin(ApiClient::agent_state(self))
    }

    fn pending_decisions(&self) -> ApiFuture<'_, Fetched<Vec<DecisionPayload>>> {
        Box::pin(ApiClient::pending_decisions(self))
    }

    fn resolve_decision<'a>(&'a self, id: &'a str, verdict: Verdict, rationale: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(ApiClient::resolve_decision(self, id, verdict, rationale))
    }

    fn set_autonomy<'a>(&'a self, mode: AutonomyMode, reason: Option<&'a str>) -> ApiFuture<'a, ()> {
        Box::pin(ApiClient::set_autonomy(self, mode, reason))
    }
}
