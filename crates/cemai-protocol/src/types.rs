use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::DECISION_REQUIRED_REASON;
use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Accepts either an RFC 3339 string or epoch milliseconds.
///
/// The REST endpoints send strings while push frames carry `Date.now()`
/// style integers; both land in the same `DateTime<Utc>` field.
pub fn flexible_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Millis(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp {ms} out of range"))),
        Raw::Text(text) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom),
    }
}

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Where a displayed value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Returned by the backend.
    #[default]
    Live,
    /// Substituted demo data after a failed call.
    Demo,
}

// ---------------------------------------------------------------------------
// Autonomy and roles
// ---------------------------------------------------------------------------

/// Whether the agents resolve proposals themselves or wait for a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AutonomyMode {
    #[default]
    On,
    Paused,
    Manual,
}

impl AutonomyMode {
    /// True when pending decisions need a human.
    pub fn requires_human(&self) -> bool {
        !matches!(self, AutonomyMode::On)
    }
}

impl std::fmt::Display for AutonomyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::On => "on",
            Self::Paused => "paused",
            Self::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// Plant role of the logged-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Operator,
    Manager,
    Engineer,
}

impl Role {
    /// Roles in selector order.
    pub const ALL: [Role; 3] = [Role::Operator, Role::Manager, Role::Engineer];

    /// Next role in selector order, wrapping around.
    pub fn next(&self) -> Role {
        match self {
            Self::Operator => Self::Manager,
            Self::Manager => Self::Engineer,
            Self::Engineer => Self::Operator,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::Manager => "manager",
            Self::Engineer => "engineer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "operator" => Ok(Self::Operator),
            "manager" => Ok(Self::Manager),
            "engineer" => Ok(Self::Engineer),
            other => Err(ProtocolError::UnknownIdentifier {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// Autonomy state reported by `/api/v1/agent/state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub autonomy: AutonomyMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_decision_id: Option<String>,
}

impl AgentState {
    /// The backend asks for a human decision.
    pub fn requires_decision(&self) -> bool {
        self.reason.as_deref() == Some(DECISION_REQUIRED_REASON)
    }
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

// ---------------------------------------------------------------------------
// KPIs
// ---------------------------------------------------------------------------

/// The fixed set of plant KPIs shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KpiId {
    #[serde(rename = "specificPower")]
    SpecificPower,
    #[serde(rename = "heatRate")]
    HeatRate,
    #[serde(rename = "clinkerLSF")]
    ClinkerLsf,
    #[serde(rename = "tsr")]
    Tsr,
}

impl KpiId {
    pub const ALL: [KpiId; 4] = [
        KpiId::SpecificPower,
        KpiId::HeatRate,
        KpiId::ClinkerLsf,
        KpiId::Tsr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpecificPower => "specificPower",
            Self::HeatRate => "heatRate",
            Self::ClinkerLsf => "clinkerLSF",
            Self::Tsr => "tsr",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::SpecificPower => "Specific Power",
            Self::HeatRate => "Heat Rate",
            Self::ClinkerLsf => "Clinker LSF",
            Self::Tsr => "TSR",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::SpecificPower => "kWh/ton",
            Self::HeatRate => "kcal/kg",
            Self::ClinkerLsf => "",
            Self::Tsr => "%",
        }
    }

    /// Plant target band.
    pub fn default_target(&self) -> KpiTarget {
        match self {
            Self::SpecificPower => KpiTarget { min: 26.0, max: 30.0 },
            Self::HeatRate => KpiTarget { min: 700.0, max: 820.0 },
            Self::ClinkerLsf => KpiTarget { min: 95.0, max: 98.0 },
            Self::Tsr => KpiTarget { min: 10.0, max: 30.0 },
        }
    }
}

impl FromStr for KpiId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KpiId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownIdentifier {
                kind: "kpi",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KpiTrend {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KpiStatus {
    Normal,
    Warning,
    Critical,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KpiTarget {
    pub min: f64,
    pub max: f64,
}

impl KpiTarget {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// A KPI as the backend reports it. The timestamp is optional on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiReading {
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub trend: KpiTrend,
    pub status: KpiStatus,
    pub target: KpiTarget,
}

/// A KPI as held by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiData {
    pub id: KpiId,
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub trend: KpiTrend,
    pub status: KpiStatus,
    pub target: KpiTarget,
    pub timestamp: DateTime<Utc>,
}

impl KpiData {
    pub fn from_reading(id: KpiId, reading: KpiReading, at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: reading.name,
            value: reading.value,
            unit: reading.unit,
            trend: reading.trend,
            status: reading.status,
            target: reading.target,
            timestamp: at,
        }
    }

    /// Placeholder for a KPI the backend did not report.
    pub fn offline(id: KpiId, at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: id.display_name().to_string(),
            value: 0.0,
            unit: id.unit().to_string(),
            trend: KpiTrend::Stable,
            status: KpiStatus::Offline,
            target: id.default_target(),
            timestamp: at,
        }
    }

    pub fn in_target(&self) -> bool {
        self.status != KpiStatus::Offline && self.target.contains(self.value)
    }
}

/// Complete KPI snapshot. Always holds every [`KpiId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSnapshot {
    pub kpis: BTreeMap<KpiId, KpiData>,
}

impl KpiSnapshot {
    /// Build a snapshot from wire readings keyed by KPI identifier.
    ///
    /// Unknown identifiers are dropped; KPIs missing from the readings are
    /// marked offline.
    pub fn from_readings(readings: BTreeMap<String, KpiReading>, at: DateTime<Utc>) -> Self {
        let mut kpis: BTreeMap<KpiId, KpiData> = readings
            .into_iter()
            .filter_map(|(key, reading)| {
                let id = key.parse::<KpiId>().ok()?;
                Some((id, KpiData::from_reading(id, reading, at)))
            })
            .collect();
        for id in KpiId::ALL {
            kpis.entry(id).or_insert_with(|| KpiData::offline(id, at));
        }
        Self { kpis }
    }

    pub fn get(&self, id: KpiId) -> Option<&KpiData> {
        self.kpis.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KpiData> {
        self.kpis.values()
    }

    /// Current values keyed by wire identifier, as sent to the chat assistant.
    pub fn values(&self) -> BTreeMap<String, f64> {
        self.kpis
            .iter()
            .map(|(id, kpi)| (id.as_str().to_string(), kpi.value))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Health predictions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessSystem {
    Kiln,
    Cooler,
    Mill,
}

impl ProcessSystem {
    pub const ALL: [ProcessSystem; 3] = [ProcessSystem::Kiln, ProcessSystem::Cooler, ProcessSystem::Mill];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Kiln => "Kiln",
            Self::Cooler => "Cooler",
            Self::Mill => "Mill",
        }
    }
}

impl FromStr for ProcessSystem {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kiln" => Ok(Self::Kiln),
            "cooler" => Ok(Self::Cooler),
            "mill" => Ok(Self::Mill),
            other => Err(ProtocolError::UnknownIdentifier {
                kind: "process system",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Stable,
    Warning,
    Critical,
}

/// One system entry as returned by `/api/v1/health/predictions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReading {
    pub system: String,
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction_minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthPredictionResponse {
    pub systems: Vec<HealthReading>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthPrediction {
    pub system: ProcessSystem,
    pub status: HealthStatus,
    pub prediction_minutes: Option<u32>,
}

/// Health per process system. Always holds every [`ProcessSystem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMap {
    pub systems: BTreeMap<ProcessSystem, HealthPrediction>,
}

impl HealthMap {
    /// Systems the backend did not mention are assumed stable; systems
    /// the dashboard does not display are ignored.
    pub fn from_readings(readings: Vec<HealthReading>) -> Self {
        let mut systems: BTreeMap<ProcessSystem, HealthPrediction> = ProcessSystem::ALL
            .into_iter()
            .map(|system| {
                (
                    system,
                    HealthPrediction {
                        system,
                        status: HealthStatus::Stable,
                        prediction_minutes: None,
                    },
                )
            })
            .collect();
        for reading in readings {
            if let Ok(system) = reading.system.parse::<ProcessSystem>() {
                systems.insert(
                    system,
                    HealthPrediction {
                        system,
                        status: reading.status,
                        prediction_minutes: reading.prediction_minutes,
                    },
                );
            }
        }
        Self { systems }
    }

    pub fn get(&self, system: ProcessSystem) -> Option<&HealthPrediction> {
        self.systems.get(&system)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HealthPrediction> {
        self.systems.values()
    }

    pub fn any_unstable(&self) -> bool {
        self.systems.values().any(|h| h.status != HealthStatus::Stable)
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalAgent {
    Guardian,
    Optimizer,
}

/// One agent's recommended parameter adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: String,
    pub agent: ProposalAgent,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub adjustments: BTreeMap<String, f64>,
    #[serde(default)]
    pub predicted_impact: BTreeMap<String, f64>,
    /// 0..=1
    pub confidence: f64,
}

/// Master-control reconciliation of the two proposals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Synthesis {
    pub summary: String,
    pub rationale: String,
    #[serde(default)]
    pub recommended_adjustments: BTreeMap<String, f64>,
}

/// A pending proposal bundle awaiting resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionPayload {
    pub id: String,
    pub guardian: Proposal,
    pub optimizer: Proposal,
    pub synthesis: Synthesis,
    #[serde(deserialize_with = "flexible_timestamp")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDecisions {
    pub decisions: Vec<DecisionPayload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Approved,
    Rejected,
    Pending,
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Pending => "pending",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Approve,
    Reject,
}

impl Verdict {
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    pub fn resulting_status(&self) -> DecisionStatus {
        match self {
            Self::Approve => DecisionStatus::Approved,
            Self::Reject => DecisionStatus::Rejected,
        }
    }
}

/// Body of approve/reject calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionRequest {
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionHistoryEntry {
    pub id: String,
    #[serde(deserialize_with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub status: DecisionStatus,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionHistoryPage {
    #[serde(default)]
    pub decisions: Vec<DecisionHistoryEntry>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub size: u32,
}

impl DecisionHistoryPage {
    /// Entries whose summary contains `query`, case-insensitively.
    pub fn filter(&self, query: &str) -> Vec<&DecisionHistoryEntry> {
        let needle = query.trim().to_lowercase();
        self.decisions
            .iter()
            .filter(|entry| needle.is_empty() || entry.summary.to_lowercase().contains(&needle))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogAgent {
    Guardian,
    Optimizer,
    Master,
    Egress,
}

impl LogAgent {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Guardian => "GUARDIAN",
            Self::Optimizer => "OPTIMIZER",
            Self::Master => "MASTER",
            Self::Egress => "EGRESS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// A timestamped, agent-tagged master-control log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    #[serde(deserialize_with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub agent: LogAgent,
    pub level: LogLevel,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Notifications and alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    DecisionPending,
    SystemAlert,
    Maintenance,
    Info,
    Optimization,
    Quality,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(deserialize_with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessAlert {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Priority,
    pub message: String,
    #[serde(deserialize_with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged: bool,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Plant context attached to every chat question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContext {
    pub current_kpis: BTreeMap<String, f64>,
    pub autonomy: AutonomyMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub context: ChatContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionsRequest {
    pub context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestions {
    pub suggestions: Vec<String>,
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    Online,
    Offline,
    Maintenance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub status: String,
    #[serde(default)]
    pub uptime: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
}

/// Body of `/{agent}/health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: String,
}

/// Body of autonomy control calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutonomyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
