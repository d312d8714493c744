//! REST client for the agent backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use cemai_protocol::*;

use crate::fallback;
use crate::session::SessionStore;
use crate::{GatewayError, GatewayResult};

const AUTH_LOGIN: &str = "/api/v1/auth/login";
const AUTH_REFRESH: &str = "/api/v1/auth/refresh";
const AUTH_ME: &str = "/api/v1/auth/me";
const AUTH_LOGOUT: &str = "/api/v1/auth/logout";
const KPIS_REALTIME: &str = "/api/v1/kpis/realtime";
const HEALTH_PREDICTIONS: &str = "/api/v1/health/predictions";
const PROCESS_ALERTS: &str = "/api/v1/alerts/process";
const MASTER_LOGS: &str = "/api/v1/logs/master";
const AGENT_STATE: &str = "/api/v1/agent/state";
const DECISIONS_PENDING: &str = "/api/v1/decisions/pending";
const DECISIONS_HISTORY: &str = "/api/v1/decisions/history";
const CHAT_MESSAGE: &str = "/api/v1/chat/message";
const CHAT_SUGGESTIONS: &str = "/api/v1/chat/suggestions";
const NOTIFICATIONS: &str = "/api/v1/notifications";
const PING: &str = "/api/v1/ping";
const VERSION: &str = "/api/v1/version";
const EMERGENCY_STOP: &str = "/guardian/emergency-stop";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Substitute demo data when a read fails.
    pub demo_fallback: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout: Duration::from_secs(10),
            demo_fallback: true,
        }
    }
}

/// Result of a read: live backend data or substituted demo data.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Live(T),
    Demo { value: T, reason: String },
}

impl<T> Fetched<T> {
    pub fn origin(&self) -> Origin {
        match self {
            Self::Live(_) => Origin::Live,
            Self::Demo { .. } => Origin::Demo,
        }
    }

    pub fn is_demo(&self) -> bool {
        matches!(self, Self::Demo { .. })
    }

    pub fn value(&self) -> &T {
        match self {
            Self::Live(value) | Self::Demo { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Live(value) | Self::Demo { value, .. } => value,
        }
    }

    pub fn into_parts(self) -> (T, Origin) {
        let origin = self.origin();
        (self.into_value(), origin)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        match self {
            Self::Live(value) => Fetched::Live(f(value)),
            Self::Demo { value, reason } => Fetched::Demo {
                value: f(value),
                reason,
            },
        }
    }
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    demo_fallback: bool,
    session: Arc<SessionStore>,
    /// Serializes token refreshes so concurrent 401s share one attempt.
    refresh_gate: Mutex<()>,
}

/// Cheaply cloneable handle to the backend.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.base_url)
            .field("demo_fallback", &self.inner.demo_fallback)
            .finish()
    }
}

fn unwrap_envelope<T: DeserializeOwned>(bytes: &[u8]) -> GatewayResult<T> {
    let envelope: ApiEnvelope<T> = serde_json::from_slice(bytes)?;
    Ok(envelope.data)
}

fn level_param(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "info",
        LogLevel::Warning => "warning",
        LogLevel::Error => "error",
    }
}

impl ApiClient {
    pub fn new(config: ClientConfig, session: Arc<SessionStore>) -> GatewayResult<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(GatewayError::InvalidUrl(config.base_url));
        }
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url,
                demo_fallback: config.demo_fallback,
                session,
                refresh_gate: Mutex::new(()),
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn demo_fallback(&self) -> bool {
        self.inner.demo_fallback
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.inner.session
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        token: Option<&str>,
    ) -> GatewayResult<Vec<u8>> {
        let request_id = request_id();
        let url = format!("{}{}", self.inner.base_url, path);
        let mut request = self
            .inner
            .http
            .request(method.clone(), &url)
            .header("X-Request-Id", &request_id);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let started = Instant::now();
        let response = request.send().await?;
        let status = response.status();
        tracing::debug!(
            %request_id,
            %method,
            path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "api call"
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Send with the current token. A 401 triggers one shared refresh and
    /// a single replay.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> GatewayResult<Vec<u8>> {
        let token = self.inner.session.access_token();
        match self
            .send_once(method.clone(), path, query, body, token.as_deref())
            .await
        {
            Err(GatewayError::Status { status: 401, .. }) => {
                self.refresh_session(token.as_deref()).await?;
                let token = self.inner.session.access_token();
                match self.send_once(method, path, query, body, token.as_deref()).await {
                    Err(GatewayError::Status { status: 401, .. }) => {
                        tracing::warn!(path, "request rejected after token refresh");
                        self.expire_session();
                        Err(GatewayError::SessionExpired)
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn refresh_session(&self, stale_token: Option<&str>) -> GatewayResult<()> {
        let _gate = self.inner.refresh_gate.lock().await;

        let current = self.inner.session.access_token();
        if current.is_some() && current.as_deref() != stale_token {
            // Another caller refreshed while we waited.
            return Ok(());
        }

        let Some(refresh_token) = self.inner.session.refresh_token() else {
            if stale_token.is_none() {
                return Err(GatewayError::NotAuthenticated);
            }
            self.expire_session();
            return Err(GatewayError::SessionExpired);
        };

        let body = serde_json::to_value(RefreshRequest { refresh_token })?;
        let refreshed = self
            .send_once(Method::POST, AUTH_REFRESH, &[], Some(&body), None)
            .await
            .and_then(|bytes| unwrap_envelope::<AuthTokens>(&bytes));

        match refreshed {
            Ok(tokens) => {
                self.inner.session.set_tokens(&tokens)?;
                tracing::info!(user = %tokens.user.email, "access token refreshed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed");
                self.expire_session();
                Err(GatewayError::SessionExpired)
            }
        }
    }

    fn expire_session(&self) {
        if let Err(e) = self.inner.session.clear_tokens() {
            tracing::warn!(error = %e, "failed to clear session tokens");
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> GatewayResult<T> {
        let bytes = self.execute(Method::GET, path, query, None).await?;
        unwrap_envelope(&bytes)
    }

    async fn post_json<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> GatewayResult<T> {
        let body = serde_json::to_value(body)?;
        let bytes = self.execute(Method::POST, path, &[], Some(&body)).await?;
        unwrap_envelope(&bytes)
    }

    /// POST whose response body is ignored.
    async fn post_unit<B: Serialize>(&self, path: &str, body: &B) -> GatewayResult<()> {
        let body = serde_json::to_value(body)?;
        self.execute(Method::POST, path, &[], Some(&body)).await?;
        Ok(())
    }

    fn or_demo<T>(
        &self,
        endpoint: &'static str,
        result: GatewayResult<T>,
        demo: impl FnOnce() -> T,
    ) -> GatewayResult<Fetched<T>> {
        match result {
            Ok(value) => Ok(Fetched::Live(value)),
            Err(e) if e.is_auth() || !self.inner.demo_fallback => Err(e),
            Err(e) => {
                tracing::warn!(endpoint, error = %e, "API call failed, using demo data");
                Ok(Fetched::Demo {
                    value: demo(),
                    reason: e.to_string(),
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Auth
    // -----------------------------------------------------------------------

    /// Log in and persist the token pair. Rejected credentials are never
    /// replaced by the demo login.
    pub async fn login(&self, email: &str, password: &str) -> GatewayResult<Fetched<User>> {
        let body = serde_json::to_value(LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        })?;
        let result = self
            .send_once(Method::POST, AUTH_LOGIN, &[], Some(&body), None)
            .await
            .and_then(|bytes| unwrap_envelope::<AuthTokens>(&bytes));
        let result = match result {
            Err(e) if matches!(e.status(), Some(400 | 401 | 403)) => {
                tracing::warn!(%email, error = %e, "login rejected");
                return Err(e);
            }
            other => other,
        };

        let tokens = self.or_demo("auth/login", result, || fallback::demo_tokens(Some(email)))?;
        self.inner.session.set_tokens(tokens.value())?;
        tracing::info!(%email, demo = tokens.is_demo(), "logged in");
        Ok(tokens.map(|t| t.user))
    }

    pub async fn me(&self) -> GatewayResult<Fetched<User>> {
        let result = self.get_json(AUTH_ME, &[]).await;
        self.or_demo("auth/me", result, || fallback::demo_user(None))
    }

    /// Revoke the refresh token. Local tokens are cleared even when the
    /// backend call fails.
    pub async fn logout(&self) -> GatewayResult<()> {
        let result = match self.inner.session.refresh_token() {
            Some(refresh_token) => self.post_unit(AUTH_LOGOUT, &RefreshRequest { refresh_token }).await,
            None => Ok(()),
        };
        self.inner.session.clear_tokens()?;
        tracing::info!("logged out");
        result
    }

    // -----------------------------------------------------------------------
    // Glass cockpit
    // -----------------------------------------------------------------------

    pub async fn realtime_kpis(&self) -> GatewayResult<Fetched<KpiSnapshot>> {
        let result = self.get_json::<BTreeMap<String, KpiReading>>(KPIS_REALTIME, &[]).await;
        let readings = self.or_demo("kpis/realtime", result, fallback::demo_kpi_readings)?;
        Ok(readings.map(|r| KpiSnapshot::from_readings(r, Utc::now())))
    }

    pub async fn health_predictions(&self, systems: &[&str]) -> GatewayResult<Fetched<HealthMap>> {
        let result = self
            .post_json::<HealthPredictionResponse, _>(HEALTH_PREDICTIONS, &json!({ "systems": systems }))
            .await
            .map(|response| response.systems);
        let readings = self.or_demo("health/predictions", result, fallback::demo_health_readings)?;
        Ok(readings.map(HealthMap::from_readings))
    }

    pub async fn process_alerts(&self) -> GatewayResult<Fetched<Vec<ProcessAlert>>> {
        let result = self.get_json(PROCESS_ALERTS, &[]).await;
        self.or_demo("alerts/process", result, Vec::new)
    }

    pub async fn master_logs(&self, level: LogLevel, limit: u32) -> GatewayResult<Fetched<Vec<LogEntry>>> {
        let query = [("level", level_param(level).to_string()), ("limit", limit.to_string())];
        let result = self.get_json(MASTER_LOGS, &query).await;
        self.or_demo("logs/master", result, Vec::new)
    }

    // -----------------------------------------------------------------------
    // Co-pilot
    // -----------------------------------------------------------------------

    pub async fn agent_state(&self) -> GatewayResult<Fetched<AgentState>> {
        let result = self.get_json(AGENT_STATE, &[]).await;
        self.or_demo("agent/state", result, fallback::demo_agent_state)
    }

    /// Inform the backend of an autonomy change. Never falls back.
    pub async fn set_autonomy(&self, mode: AutonomyMode, reason: Option<&str>) -> GatewayResult<()> {
        let path = match mode {
            AutonomyMode::Paused => "/api/v1/agent/pause",
            AutonomyMode::On => "/api/v1/agent/resume",
            AutonomyMode::Manual => "/api/v1/agent/manual",
        };
        let body = AutonomyRequest {
            reason: reason.map(str::to_string),
        };
        self.post_unit(path, &body).await
    }

    pub async fn pending_decisions(&self) -> GatewayResult<Fetched<Vec<DecisionPayload>>> {
        let result = self
            .get_json::<PendingDecisions>(DECISIONS_PENDING, &[])
            .await
            .map(|pending| pending.decisions);
        self.or_demo("decisions/pending", result, fallback::demo_pending_decisions)
    }

    /// Approve or reject a decision. Never falls back and never retries.
    pub async fn resolve_decision(&self, id: &str, verdict: Verdict, rationale: &str) -> GatewayResult<()> {
        let path = format!("/api/v1/decisions/{id}/{}", verdict.path_segment());
        let result = self
            .post_unit(
                &path,
                &ResolutionRequest {
                    rationale: rationale.to_string(),
                },
            )
            .await;
        match &result {
            Ok(()) => tracing::info!(decision_id = %id, verdict = verdict.path_segment(), "decision resolved"),
            Err(e) => tracing::warn!(decision_id = %id, verdict = verdict.path_segment(), error = %e, "decision resolution failed"),
        }
        result
    }

    pub async fn approve_decision(&self, id: &str, rationale: &str) -> GatewayResult<()> {
        self.resolve_decision(id, Verdict::Approve, rationale).await
    }

    pub async fn reject_decision(&self, id: &str, rationale: &str) -> GatewayResult<()> {
        self.resolve_decision(id, Verdict::Reject, rationale).await
    }

    pub async fn decision_history(
        &self,
        page: u32,
        size: u32,
        status: Option<DecisionStatus>,
    ) -> GatewayResult<Fetched<DecisionHistoryPage>> {
        let mut query = vec![("page", page.to_string()), ("size", size.to_string())];
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }
        let result = self.get_json(DECISIONS_HISTORY, &query).await;
        self.or_demo("decisions/history", result, || fallback::demo_history_page(page, size))
    }

    // -----------------------------------------------------------------------
    // Oracle
    // -----------------------------------------------------------------------

    pub async fn chat(&self, message: &str, context: ChatContext) -> GatewayResult<Fetched<ChatReply>> {
        let request = ChatRequest {
            message: message.to_string(),
            context: context.clone(),
        };
        let result = self.post_json(CHAT_MESSAGE, &request).await;
        self.or_demo("chat/message", result, || fallback::demo_chat_reply(message, &context))
    }

    pub async fn chat_suggestions(&self, context: &str) -> GatewayResult<Fetched<Vec<String>>> {
        let request = SuggestionsRequest {
            context: context.to_string(),
        };
        let result = self
            .post_json::<Suggestions, _>(CHAT_SUGGESTIONS, &request)
            .await
            .map(|s| s.suggestions);
        self.or_demo("chat/suggestions", result, fallback::demo_suggestions)
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    pub async fn notifications(
        &self,
        unread_only: bool,
        page: u32,
        size: u32,
    ) -> GatewayResult<Fetched<Vec<Notification>>> {
        let query = [
            ("unreadOnly", unread_only.to_string()),
            ("page", page.to_string()),
            ("size", size.to_string()),
        ];
        let result = self.get_json(NOTIFICATIONS, &query).await;
        self.or_demo("notifications", result, fallback::demo_notifications)
    }

    pub async fn mark_notification_read(&self, id: &str) -> GatewayResult<()> {
        self.post_unit(&format!("{NOTIFICATIONS}/{id}/read"), &json!({})).await
    }

    // -----------------------------------------------------------------------
    // System
    // -----------------------------------------------------------------------

    /// Connectivity check. Never falls back; returns the round-trip time.
    pub async fn ping(&self) -> GatewayResult<(Pong, Duration)> {
        let started = Instant::now();
        let pong = self.get_json::<Pong>(PING, &[]).await?;
        Ok((pong, started.elapsed()))
    }

    pub async fn version(&self) -> GatewayResult<Fetched<VersionInfo>> {
        let result = self.get_json(VERSION, &[]).await;
        self.or_demo("version", result, fallback::demo_version)
    }

    /// `GET /{namespace}/health` for one agent service.
    pub async fn agent_health(&self, namespace: &str) -> GatewayResult<Fetched<ServiceHealth>> {
        let result = self.get_json(&format!("/{namespace}/health"), &[]).await;
        self.or_demo("agent health", result, fallback::demo_service_health)
    }

    /// Halt the plant through the guardian agent. Never falls back.
    pub async fn emergency_stop(&self) -> GatewayResult<()> {
        tracing::warn!("emergency stop requested");
        self.post_unit(EMERGENCY_STOP, &json!({})).await
    }
}
