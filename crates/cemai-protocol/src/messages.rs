use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::types::*;
use crate::ProtocolError;

/// Generate a request correlation id of the form `req_<millis>_<5 base36>`.
pub fn request_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..5)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("req_{}_{}", Utc::now().timestamp_millis(), suffix)
}

/// Envelope wrapping every REST response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
    pub data: T,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub request_id: String,
}

impl<T> ApiEnvelope<T> {
    pub fn new(data: T, request_id: impl Into<String>) -> Self {
        Self {
            data,
            timestamp: Utc::now(),
            request_id: request_id.into(),
        }
    }
}

/// Error body returned by the backend on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub request_id: String,
}

// ---------------------------------------------------------------------------
// WebSocket push
// ---------------------------------------------------------------------------

/// Raw WebSocket frame `{type, data, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default = "Utc::now", deserialize_with = "flexible_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Status change broadcast by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatusUpdate {
    pub status: SystemStatus,
}

/// Typed push message.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    KpiUpdate(BTreeMap<String, KpiReading>),
    AgentProposal(Proposal),
    LogEntry(LogEntry),
    ProcessAlert(ProcessAlert),
    Notification(Notification),
    SystemStatus(SystemStatusUpdate),
}

impl PushEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::KpiUpdate(_) => "kpi_update",
            Self::AgentProposal(_) => "agent_proposal",
            Self::LogEntry(_) => "log_entry",
            Self::ProcessAlert(_) => "process_alert",
            Self::Notification(_) => "notification",
            Self::SystemStatus(_) => "system_status",
        }
    }
}

fn decode_data<T: DeserializeOwned>(data: serde_json::Value) -> Result<T, ProtocolError> {
    Ok(serde_json::from_value(data)?)
}

impl PushFrame {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Heartbeat sent by the client.
    pub fn ping() -> Self {
        Self {
            kind: "ping".to_string(),
            data: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self.kind.as_str(), "ping" | "pong")
    }

    pub fn decode(self) -> Result<PushEvent, ProtocolError> {
        match self.kind.as_str() {
            "kpi_update" => Ok(PushEvent::KpiUpdate(decode_data(self.data)?)),
            "agent_proposal" => Ok(PushEvent::AgentProposal(decode_data(self.data)?)),
            "log_entry" => Ok(PushEvent::LogEntry(decode_data(self.data)?)),
            "process_alert" => Ok(PushEvent::ProcessAlert(decode_data(self.data)?)),
            "notification" => Ok(PushEvent::Notification(decode_data(self.data)?)),
            "system_status" => Ok(PushEvent::SystemStatus(decode_data(self.data)?)),
            other => Err(ProtocolError::UnknownPushType(other.to_string())),
        }
    }

    pub fn encode(event: &PushEvent) -> Result<Self, ProtocolError> {
        let data = match event {
            PushEvent::KpiUpdate(readings) => serde_json::to_value(readings)?,
            PushEvent::AgentProposal(proposal) => serde_json::to_value(proposal)?,
            PushEvent::LogEntry(entry) => serde_json::to_value(entry)?,
            PushEvent::ProcessAlert(alert) => serde_json::to_value(alert)?,
            PushEvent::Notification(notification) => serde_json::to_value(notification)?,
            PushEvent::SystemStatus(update) => serde_json::to_value(update)?,
        };
        Ok(Self {
            kind: event.kind().to_string(),
            data,
            timestamp: Utc::now(),
        })
    }
}
