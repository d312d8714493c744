//! In-memory stand-in for the agent backend.
//!
//! Serves every endpoint the gateway calls plus the `/ws` push feed, so the
//! console can be demonstrated and integration-tested without the real
//! services. [`DemoHandle`] scripts the plant from tests: queue decisions,
//! ask for a human, inject approve/reject failures.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

use cemai_gateway::fallback;
use cemai_protocol::*;

const PUSH_INTERVAL: Duration = Duration::from_secs(2);
const EVENT_BUFFER: usize = 64;
const HUMAN_EVERY_NTH_DECISION: u64 = 3;

/// Mutable plant state behind the demo endpoints.
struct Plant {
    autonomy: AutonomyMode,
    reason: Option<String>,
    pending_decision_id: Option<String>,
    pending: Vec<DecisionPayload>,
    history: Vec<DecisionHistoryEntry>,
    notifications: Vec<Notification>,
    alerts: Vec<ProcessAlert>,
    logs: Vec<LogEntry>,
    kpis: BTreeMap<String, KpiReading>,
    fail_resolutions: Option<u16>,
    resolution_calls: Vec<String>,
    decision_seq: u64,
}

impl Plant {
    fn new() -> Self {
        Self {
            autonomy: AutonomyMode::On,
            reason: None,
            pending_decision_id: None,
            pending: Vec::new(),
            history: Vec::new(),
            notifications: fallback::demo_notifications(),
            alerts: Vec::new(),
            logs: Vec::new(),
            kpis: fallback::demo_kpi_readings(),
            fail_resolutions: None,
            resolution_calls: Vec::new(),
            decision_seq: 0,
        }
    }

    fn agent_state(&self) -> AgentState {
        AgentState {
            autonomy: self.autonomy,
            reason: self.reason.clone(),
            pending_decision_id: self.pending_decision_id.clone(),
        }
    }

    fn push_log(&mut self, entry: LogEntry) {
        if self.logs.len() >= LOG_BUFFER_CAPACITY {
            self.logs.remove(0);
        }
        self.logs.push(entry);
    }

    fn ask_for_human(&mut self, id: &str) {
        self.reason = Some(DECISION_REQUIRED_REASON.to_string());
        self.pending_decision_id = Some(id.to_string());
    }
}

#[derive(Clone)]
struct DemoState {
    plant: Arc<RwLock<Plant>>,
    events: broadcast::Sender<PushEvent>,
    started: Instant,
}

/// Test and scenario control over a running demo backend.
#[derive(Clone)]
pub struct DemoHandle {
    state: DemoState,
}

impl DemoHandle {
    /// Queue a decision. With `human` set the agent state reports
    /// `decision_required` for it.
    pub async fn push_decision(&self, id: &str, human: bool) {
        let decision = fallback::demo_decision(id);
        let proposal = decision.guardian.clone();
        {
            let mut plant = self.state.plant.write().await;
            plant.pending.push(decision);
            if human {
                plant.ask_for_human(id);
            }
        }
        let _ = self.state.events.send(PushEvent::AgentProposal(proposal));
    }

    /// Answer every approve/reject with `status` until cleared with `None`.
    pub async fn fail_resolutions(&self, status: Option<u16>) {
        self.state.plant.write().await.fail_resolutions = status;
    }

    /// `"<verdict>:<id>"` for every approve/reject call received.
    pub async fn resolution_calls(&self) -> Vec<String> {
        self.state.plant.read().await.resolution_calls.clone()
    }

    pub async fn pending_ids(&self) -> Vec<String> {
        self.state.plant.read().await.pending.iter().map(|d| d.id.clone()).collect()
    }

    pub async fn agent_state(&self) -> AgentState {
        self.state.plant.read().await.agent_state()
    }

    pub fn broadcast(&self, event: PushEvent) {
        let _ = self.state.events.send(event);
    }
}

pub struct DemoBackend {
    bind_addr: String,
    state: DemoState,
    decision_every: Option<Duration>,
}

impl DemoBackend {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            bind_addr: bind_addr.into(),
            state: DemoState {
                plant: Arc::new(RwLock::new(Plant::new())),
                events,
                started: Instant::now(),
            },
            decision_every: None,
        }
    }

    /// Generate a new decision every `every`; each third one asks for a human.
    pub fn with_decision_scenario(mut self, every: Duration) -> Self {
        self.decision_every = Some(every);
        self
    }

    pub fn handle(&self) -> DemoHandle {
        DemoHandle {
            state: self.state.clone(),
        }
    }

    fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/api/v1/auth/login", post(auth_login))
            .route("/api/v1/auth/refresh", post(auth_refresh))
            .route("/api/v1/auth/me", get(auth_me))
            .route("/api/v1/auth/logout", post(auth_logout))
            .route("/api/v1/kpis/realtime", get(kpis_realtime))
            .route("/api/v1/health/predictions", post(health_predictions))
            .route("/api/v1/alerts/process", get(process_alerts))
            .route("/api/v1/logs/master", get(master_logs))
            .route("/api/v1/agent/state", get(agent_state))
            .route("/api/v1/agent/pause", post(agent_pause))
            .route("/api/v1/agent/resume", post(agent_resume))
            .route("/api/v1/agent/manual", post(agent_manual))
            .route("/api/v1/decisions/pending", get(decisions_pending))
            .route("/api/v1/decisions/history", get(decisions_history))
            .route("/api/v1/decisions/:id/approve", post(decision_approve))
            .route("/api/v1/decisions/:id/reject", post(decision_reject))
            .route("/api/v1/chat/message", post(chat_message))
            .route("/api/v1/chat/suggestions", post(chat_suggestions))
            .route("/api/v1/notifications", get(notifications))
            .route("/api/v1/notifications/:id/read", post(notification_read))
            .route("/api/v1/ping", get(ping))
            .route("/api/v1/version", get(version))
            .route("/guardian/emergency-stop", post(emergency_stop))
            .route("/ws", get(push_stream));
        for namespace in AGENT_NAMESPACES {
            router = router.route(&format!("/{namespace}/health"), get(service_health));
        }
        router.with_state(self.state.clone())
    }

    /// Bind and serve until the process exits.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "demo backend listening");
        self.serve(listener).await
    }

    /// Bind, serve in the background and return the bound address.
    pub async fn spawn(self) -> Result<(SocketAddr, DemoHandle), anyhow::Error> {
        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;
        let addr = listener.local_addr()?;
        let handle = self.handle();
        tokio::spawn(async move {
            if let Err(e) = self.serve(listener).await {
                tracing::error!(error = %e, "demo backend stopped");
            }
        });
        Ok((addr, handle))
    }

    async fn serve(self, listener: tokio::net::TcpListener) -> Result<(), anyhow::Error> {
        if let Some(every) = self.decision_every {
            tokio::spawn(decision_scenario(self.handle(), every));
        }
        let app = self.router();
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn decision_scenario(handle: DemoHandle, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        let seq = {
            let mut plant = handle.state.plant.write().await;
            plant.decision_seq += 1;
            plant.decision_seq
        };
        let id = format!("dec_{seq:04}");
        let human = seq % HUMAN_EVERY_NTH_DECISION == 0;
        tracing::info!(decision_id = %id, human, "demo decision proposed");
        handle.push_decision(&id, human).await;
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn envelope<T: Serialize>(data: T) -> Response {
    Json(ApiEnvelope::new(data, request_id())).into_response()
}

fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    let body = ApiErrorBody {
        code: code.to_string(),
        message: message.into(),
        request_id: request_id(),
    };
    (status, Json(body)).into_response()
}

fn issue_tokens(user: User) -> AuthTokens {
    AuthTokens {
        access_token: format!("demo-access-{}", uuid::Uuid::new_v4()),
        refresh_token: format!("demo-refresh-{}", uuid::Uuid::new_v4()),
        user,
    }
}

// ── Auth ────────────────────────────────────────────────────────────────────

async fn auth_login(Json(req): Json<LoginRequest>) -> Response {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return api_error(StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS", "Invalid email or password");
    }
    envelope(issue_tokens(fallback::demo_user(Some(req.email.trim()))))
}

async fn auth_refresh(Json(req): Json<RefreshRequest>) -> Response {
    if req.refresh_token.is_empty() {
        return api_error(StatusCode::UNAUTHORIZED, "INVALID_TOKEN", "Refresh token required");
    }
    envelope(issue_tokens(fallback::demo_user(None)))
}

async fn auth_me() -> Response {
    envelope(fallback::demo_user(None))
}

async fn auth_logout() -> Response {
    envelope(serde_json::json!({}))
}

// ── Glass cockpit ───────────────────────────────────────────────────────────

async fn kpis_realtime(State(web): State<DemoState>) -> Response {
    envelope(web.plant.read().await.kpis.clone())
}

async fn health_predictions() -> Response {
    envelope(HealthPredictionResponse {
        systems: fallback::demo_health_readings(),
    })
}

async fn process_alerts(State(web): State<DemoState>) -> Response {
    envelope(web.plant.read().await.alerts.clone())
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    limit: Option<usize>,
}

async fn master_logs(State(web): State<DemoState>, Query(query): Query<LogQuery>) -> Response {
    let plant = web.plant.read().await;
    let limit = query.limit.unwrap_or(LOG_BACKFILL_LIMIT as usize);
    let skip = plant.logs.len().saturating_sub(limit);
    envelope(plant.logs[skip..].to_vec())
}

// ── Co-pilot ────────────────────────────────────────────────────────────────

async fn agent_state(State(web): State<DemoState>) -> Response {
    envelope(web.plant.read().await.agent_state())
}

async fn set_autonomy(web: DemoState, mode: AutonomyMode, request: AutonomyRequest) -> Response {
    let state = {
        let mut plant = web.plant.write().await;
        plant.autonomy = mode;
        if mode == AutonomyMode::On {
            plant.reason = None;
            plant.pending_decision_id = None;
        } else if plant.reason.as_deref() != Some(DECISION_REQUIRED_REASON) {
            plant.reason = request.reason;
        }
        plant.agent_state()
    };
    tracing::info!(%mode, "demo autonomy changed");
    envelope(state)
}

async fn agent_pause(State(web): State<DemoState>, Json(req): Json<AutonomyRequest>) -> Response {
    set_autonomy(web, AutonomyMode::Paused, req).await
}

async fn agent_resume(State(web): State<DemoState>, Json(req): Json<AutonomyRequest>) -> Response {
    set_autonomy(web, AutonomyMode::On, req).await
}

async fn agent_manual(State(web): State<DemoState>, Json(req): Json<AutonomyRequest>) -> Response {
    set_autonomy(web, AutonomyMode::Manual, req).await
}

async fn decisions_pending(State(web): State<DemoState>) -> Response {
    let decisions = web.plant.read().await.pending.clone();
    envelope(PendingDecisions { decisions })
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    page: Option<u32>,
    size: Option<u32>,
    status: Option<DecisionStatus>,
}

async fn decisions_history(State(web): State<DemoState>, Query(query): Query<HistoryQuery>) -> Response {
    let page = query.page.unwrap_or(1).max(1);
    let size = query.size.unwrap_or(20).max(1);
    let plant = web.plant.read().await;
    let matching: Vec<_> = plant
        .history
        .iter()
        .rev()
        .filter(|entry| query.status.map(|s| s == entry.status).unwrap_or(true))
        .cloned()
        .collect();
    let total = matching.len() as u64;
    let decisions = matching
        .into_iter()
        .skip((page as usize - 1).saturating_mul(size as usize))
        .take(size as usize)
        .collect();
    envelope(DecisionHistoryPage {
        decisions,
        total,
        page,
        size,
    })
}

async fn resolve(web: DemoState, id: String, verdict: Verdict, rationale: String) -> Response {
    let mut plant = web.plant.write().await;
    plant
        .resolution_calls
        .push(format!("{}:{id}", verdict.path_segment()));

    if let Some(status) = plant.fail_resolutions {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return api_error(status, "INJECTED_FAILURE", "Resolution failed");
    }
    let Some(index) = plant.pending.iter().position(|d| d.id == id) else {
        return api_error(StatusCode::NOT_FOUND, "DECISION_NOT_FOUND", format!("No pending decision {id}"));
    };

    let decision = plant.pending.remove(index);
    let status = verdict.resulting_status();
    plant.history.push(DecisionHistoryEntry {
        id: decision.id.clone(),
        timestamp: Utc::now(),
        status,
        summary: decision.synthesis.summary.clone(),
        impact: Some(decision.guardian.predicted_impact.clone()),
        rationale: Some(rationale),
    });
    if plant.pending_decision_id.as_deref() == Some(id.as_str()) {
        plant.reason = None;
        plant.pending_decision_id = None;
    }
    let entry = LogEntry {
        id: format!("{}-{id}", Utc::now().timestamp_millis()),
        timestamp: Utc::now(),
        agent: LogAgent::Master,
        level: LogLevel::Info,
        message: format!("Decision {id} {status}"),
    };
    plant.push_log(entry.clone());
    drop(plant);

    let _ = web.events.send(PushEvent::LogEntry(entry));
    envelope(serde_json::json!({ "id": id, "status": status }))
}

async fn decision_approve(
    State(web): State<DemoState>,
    AxumPath(id): AxumPath<String>,
    Json(req): Json<ResolutionRequest>,
) -> Response {
    resolve(web, id, Verdict::Approve, req.rationale).await
}

async fn decision_reject(
    State(web): State<DemoState>,
    AxumPath(id): AxumPath<String>,
    Json(req): Json<ResolutionRequest>,
) -> Response {
    resolve(web, id, Verdict::Reject, req.rationale).await
}

// ── Oracle ──────────────────────────────────────────────────────────────────

async fn chat_message(Json(req): Json<ChatRequest>) -> Response {
    let mut reply = fallback::demo_chat_reply(&req.message, &req.context);
    reply.suggestions = fallback::demo_suggestions();
    envelope(reply)
}

async fn chat_suggestions(Json(_req): Json<SuggestionsRequest>) -> Response {
    envelope(Suggestions {
        suggestions: fallback::demo_suggestions(),
    })
}

// ── Notifications ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationQuery {
    unread_only: Option<bool>,
}

async fn notifications(State(web): State<DemoState>, Query(query): Query<NotificationQuery>) -> Response {
    let unread_only = query.unread_only.unwrap_or(false);
    let list: Vec<_> = web
        .plant
        .read()
        .await
        .notifications
        .iter()
        .filter(|n| !unread_only || !n.read)
        .cloned()
        .collect();
    envelope(list)
}

async fn notification_read(State(web): State<DemoState>, AxumPath(id): AxumPath<String>) -> Response {
    let mut plant = web.plant.write().await;
    match plant.notifications.iter_mut().find(|n| n.id == id) {
        Some(notification) => {
            notification.read = true;
            envelope(serde_json::json!({ "id": id }))
        }
        None => api_error(StatusCode::NOT_FOUND, "NOT_FOUND", format!("No notification {id}")),
    }
}

// ── System ──────────────────────────────────────────────────────────────────

async fn ping(State(web): State<DemoState>) -> Response {
    envelope(Pong {
        status: "ok".to_string(),
        uptime: Some(web.started.elapsed().as_secs()),
    })
}

async fn version() -> Response {
    envelope(VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: Some("demo".to_string()),
        commit: None,
    })
}

async fn service_health() -> Response {
    envelope(fallback::demo_service_health())
}

async fn emergency_stop(State(web): State<DemoState>) -> Response {
    let alert = ProcessAlert {
        id: format!("alert_{}", Utc::now().timestamp_millis()),
        kind: "emergency_stop".to_string(),
        severity: Priority::Critical,
        message: "Emergency stop engaged by operator".to_string(),
        timestamp: Utc::now(),
        acknowledged: false,
    };
    {
        let mut plant = web.plant.write().await;
        plant.autonomy = AutonomyMode::Manual;
        plant.alerts.push(alert.clone());
    }
    tracing::warn!("demo emergency stop engaged");
    let _ = web.events.send(PushEvent::ProcessAlert(alert));
    envelope(serde_json::json!({ "stopped": true }))
}

// ── Push feed ───────────────────────────────────────────────────────────────

async fn push_stream(ws: WebSocketUpgrade, State(web): State<DemoState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| push_loop(socket, web))
}

fn frame_text(event: &PushEvent) -> Option<String> {
    let frame = PushFrame::encode(event).ok()?;
    serde_json::to_string(&frame).ok()
}

/// Nudge every KPI within ±1% of its target span.
fn jitter_kpis(kpis: &mut BTreeMap<String, KpiReading>, rng: &mut impl Rng) {
    for reading in kpis.values_mut() {
        let span = (reading.target.max - reading.target.min).max(1.0);
        let delta = rng.gen_range(-0.01..0.01) * span;
        reading.value = ((reading.value + delta) * 100.0).round() / 100.0;
        reading.trend = if delta > 0.0 { KpiTrend::Up } else { KpiTrend::Down };
        reading.status = if reading.target.contains(reading.value) {
            KpiStatus::Normal
        } else {
            KpiStatus::Warning
        };
    }
}

async fn push_loop(mut socket: WebSocket, web: DemoState) {
    let mut events = web.events.subscribe();
    let mut ticker = tokio::time::interval(PUSH_INTERVAL);
    let mut rng = StdRng::from_entropy();

    loop {
        let outgoing: Vec<PushEvent> = tokio::select! {
            _ = ticker.tick() => {
                let mut plant = web.plant.write().await;
                jitter_kpis(&mut plant.kpis, &mut rng);
                let entry = fallback::demo_log_entry(&mut rng);
                plant.push_log(entry.clone());
                vec![PushEvent::KpiUpdate(plant.kpis.clone()), PushEvent::LogEntry(entry)]
            }
            event = events.recv() => match event {
                Ok(event) => vec![event],
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "push subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if PushFrame::parse(&text).map(|f| f.kind == "ping").unwrap_or(false) {
                        let pong = serde_json::json!({
                            "type": "pong",
                            "data": null,
                            "timestamp": Utc::now().timestamp_millis(),
                        });
                        if socket.send(Message::Text(pong.to_string())).await.is_err() {
                            break;
                        }
                    }
                    continue;
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            },
        };

        for event in &outgoing {
            let Some(payload) = frame_text(event) else {
                continue;
            };
            if socket.send(Message::Text(payload)).await.is_err() {
                return;
            }
        }
    }
}
