//! Fixed intervals, caps and canned strings shared across the workspace.

/// Backend used when no configuration overrides it.
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:9380";

pub const DECISION_POLL_INTERVAL_MS: u64 = 3_000;
pub const KPI_POLL_INTERVAL_MS: u64 = 5_000;
pub const HEALTH_POLL_INTERVAL_MS: u64 = 10_000;
pub const PING_INTERVAL_MS: u64 = 5_000;

/// Simulated master-control feed cadence.
pub const LOG_FEED_INTERVAL_MS: u64 = 1_500;
/// The log buffer never holds more than this many entries.
pub const LOG_BUFFER_CAPACITY: usize = 200;
/// Entries requested from `/api/v1/logs/master` on startup.
pub const LOG_BACKFILL_LIMIT: u32 = 50;

pub const WS_RECONNECT_INTERVAL_MS: u64 = 5_000;
pub const WS_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const WS_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Notices disappear after this many seconds.
pub const NOTICE_TTL_SECS: i64 = 5;
pub const NOTICE_CAPACITY: usize = 50;

/// Reason attached by the backend when autonomy must pause for a human.
pub const DECISION_REQUIRED_REASON: &str = "decision_required";

pub const AUTO_APPROVE_RATIONALE: &str = "Auto-approved while autonomy is on";
pub const OPERATOR_APPROVE_RATIONALE: &str = "Approved by operator via Decision Hub";
pub const OPERATOR_REJECT_RATIONALE: &str = "Rejected by operator via Decision Hub";

/// Systems requested from the health prediction endpoint.
pub const HEALTH_SYSTEMS: [&str; 4] = ["kiln", "preheater", "mill", "cooler"];

/// Agent namespaces exposing a `/health` endpoint.
pub const AGENT_NAMESPACES: [&str; 4] = ["guardian", "optimizer", "master-control", "egress"];

/// Prompts offered by the chat assistant when the backend has none.
pub const DEFAULT_CHAT_SUGGESTIONS: [&str; 3] = [
    "Show SOP for LSF deviation",
    "Raw mix parameters 1h ago",
    "Plot kiln temperature vs fuel rate (3h)",
];
