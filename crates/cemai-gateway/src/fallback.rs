//! Demo payloads substituted for failed reads.
//!
//! Everything returned here is tagged `Origin::Demo` by the caller and must
//! never be presented as live plant data.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use rand::Rng;

use cemai_protocol::*;

pub const DEMO_USER_ID: &str = "user_001";
pub const DEMO_USER_NAME: &str = "John Operator";
pub const DEMO_USER_EMAIL: &str = "operator@cemai.com";
pub const DEMO_DECISION_ID: &str = "dec_123";

const DEMO_PERMISSIONS: [&str; 7] = [
    "view_dashboard",
    "view_kpis",
    "view_decisions",
    "approve_decisions",
    "chat_with_oracle",
    "view_logs",
    "view_notifications",
];

pub fn demo_user(email: Option<&str>) -> User {
    User {
        id: DEMO_USER_ID.to_string(),
        name: DEMO_USER_NAME.to_string(),
        email: email.unwrap_or(DEMO_USER_EMAIL).to_string(),
        role: Role::Operator,
        permissions: DEMO_PERMISSIONS.iter().map(|p| p.to_string()).collect(),
    }
}

pub fn demo_tokens(email: Option<&str>) -> AuthTokens {
    let millis = Utc::now().timestamp_millis();
    AuthTokens {
        access_token: format!("demo_access_token_{millis}"),
        refresh_token: format!("demo_refresh_token_{millis}"),
        user: demo_user(email),
    }
}

fn reading(id: KpiId, value: f64, trend: KpiTrend, status: KpiStatus) -> (String, KpiReading) {
    (
        id.as_str().to_string(),
        KpiReading {
            name: id.display_name().to_string(),
            value,
            unit: id.unit().to_string(),
            trend,
            status,
            target: id.default_target(),
        },
    )
}

pub fn demo_kpi_readings() -> BTreeMap<String, KpiReading> {
    BTreeMap::from([
        reading(KpiId::SpecificPower, 28.5, KpiTrend::Up, KpiStatus::Normal),
        reading(KpiId::HeatRate, 780.0, KpiTrend::Stable, KpiStatus::Normal),
        reading(KpiId::ClinkerLsf, 96.5, KpiTrend::Down, KpiStatus::Warning),
        reading(KpiId::Tsr, 18.0, KpiTrend::Up, KpiStatus::Normal),
    ])
}

pub fn demo_health_readings() -> Vec<HealthReading> {
    vec![
        HealthReading {
            system: "kiln".into(),
            status: HealthStatus::Warning,
            prediction_minutes: Some(45),
        },
        HealthReading {
            system: "cooler".into(),
            status: HealthStatus::Stable,
            prediction_minutes: None,
        },
        HealthReading {
            system: "mill".into(),
            status: HealthStatus::Critical,
            prediction_minutes: Some(10),
        },
    ]
}

/// The backend asking for a human on the demo decision.
pub fn demo_agent_state() -> AgentState {
    AgentState {
        autonomy: AutonomyMode::Paused,
        reason: Some(DECISION_REQUIRED_REASON.to_string()),
        pending_decision_id: Some(DEMO_DECISION_ID.to_string()),
    }
}

pub fn demo_decision(id: &str) -> DecisionPayload {
    DecisionPayload {
        id: id.to_string(),
        guardian: Proposal {
            id: format!("prop_guardian_{id}"),
            agent: ProposalAgent::Guardian,
            title: "LSF Stability Correction".into(),
            description: "Adjust kiln speed to maintain LSF within quality band".into(),
            adjustments: BTreeMap::from([("kiln_speed".to_string(), 0.1)]),
            predicted_impact: BTreeMap::from([("lsf_deviation".to_string(), -0.5)]),
            confidence: 0.95,
        },
        optimizer: Proposal {
            id: format!("prop_optimizer_{id}"),
            agent: ProposalAgent::Optimizer,
            title: "Fuel Mix Optimization".into(),
            description: "Increase alternative fuel ratio for cost savings".into(),
            adjustments: BTreeMap::from([("alternative_fuel_ratio".to_string(), 0.05)]),
            predicted_impact: BTreeMap::from([("cost_savings".to_string(), 2.5)]),
            confidence: 0.88,
        },
        synthesis: Synthesis {
            summary: "Combined stability and optimization approach".into(),
            rationale: "Guardian proposal takes priority for safety, optimizer adjustments \
                        applied within safety bounds"
                .into(),
            recommended_adjustments: BTreeMap::from([
                ("kiln_speed".to_string(), 0.1),
                ("alternative_fuel_ratio".to_string(), 0.02),
            ]),
        },
        created_at: Utc::now(),
    }
}

pub fn demo_pending_decisions() -> Vec<DecisionPayload> {
    vec![demo_decision(DEMO_DECISION_ID)]
}

pub fn demo_history_page(page: u32, size: u32) -> DecisionHistoryPage {
    DecisionHistoryPage {
        decisions: Vec::new(),
        total: 0,
        page,
        size,
    }
}

pub fn demo_notifications() -> Vec<Notification> {
    let now = Utc::now();
    vec![
        Notification {
            id: "notif_001".into(),
            kind: NotificationKind::DecisionPending,
            title: "Decision Required".into(),
            message: "New AI proposal requires your approval".into(),
            timestamp: now,
            read: false,
            priority: Priority::High,
        },
        Notification {
            id: "notif_002".into(),
            kind: NotificationKind::SystemAlert,
            title: "Kiln Temperature Alert".into(),
            message: "Kiln temperature approaching critical threshold".into(),
            timestamp: now - Duration::minutes(5),
            read: false,
            priority: Priority::Critical,
        },
    ]
}

pub fn demo_suggestions() -> Vec<String> {
    vec![
        "Show me the SOP for LSF deviation".to_string(),
        "What is the current kiln temperature?".to_string(),
    ]
}

pub fn demo_version() -> VersionInfo {
    VersionInfo {
        version: "1.0.0-dev".into(),
        build: None,
        commit: None,
    }
}

pub fn demo_service_health() -> ServiceHealth {
    ServiceHealth {
        status: "healthy".into(),
    }
}

// ---------------------------------------------------------------------------
// Simulated master-control feed
// ---------------------------------------------------------------------------

const LOG_SAMPLES: [(LogAgent, &str); 5] = [
    (LogAgent::Guardian, "Monitoring kiln stability window... OK"),
    (LogAgent::Optimizer, "RDF increase +1.5% projected savings $210/hr"),
    (LogAgent::Master, "Harmonizing proposals: limit RDF to +1% to avoid temp drop"),
    (LogAgent::Guardian, "Predicted LSF deviation in 45 min, proposing raw mix tweak"),
    (LogAgent::Optimizer, "Fuel rate optimization candidate detected"),
];

const LOG_LEVELS: [LogLevel; 3] = [LogLevel::Info, LogLevel::Warning, LogLevel::Error];

/// One simulated log line drawn from the fixed sample set.
pub fn demo_log_entry(rng: &mut impl Rng) -> LogEntry {
    let now = Utc::now();
    let (agent, message) = LOG_SAMPLES[rng.gen_range(0..LOG_SAMPLES.len())];
    let suffix: u32 = rng.gen_range(0..36u32.pow(5));
    LogEntry {
        id: format!("{}-{suffix:x}", now.timestamp_millis()),
        timestamp: now,
        agent,
        level: LOG_LEVELS[rng.gen_range(0..LOG_LEVELS.len())],
        message: message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Oracle canned analyses
// ---------------------------------------------------------------------------

fn kpi_value(context: &ChatContext, id: KpiId) -> String {
    context
        .current_kpis
        .get(id.as_str())
        .map(|v| format!("{v}"))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Keyword-matched answer used when the chat endpoint is unreachable.
pub fn demo_chat_reply(question: &str, context: &ChatContext) -> ChatReply {
    let input = question.to_lowercase();
    let has = |needle: &str| input.contains(needle);

    let message = if has("lsf") || has("lime saturation") {
        format!(
            "Current LSF status: {}\n\n\
             LSF is within the acceptable range (95-98) but trending slightly high.\n\
             - Monitor kiln feed chemistry closely\n\
             - Consider adjusting the limestone/clay ratio if the trend continues\n\
             - Check preheater calcination efficiency\n\n\
             SOP reference: LSF Control Procedure SOP-2024-001",
            kpi_value(context, KpiId::ClinkerLsf)
        )
    } else if has("kiln") && has("temp") {
        "Kiln temperature analysis\n\n\
         Temperature zones are stable:\n\
         - Burning zone ~1450°C (optimal)\n\
         - Transition zone ~1200°C\n\
         - Calcination zone ~900°C\n\n\
         Guardian recommends monitoring temperature stability after recent fluctuations."
            .to_string()
    } else if has("power") || has("energy") {
        format!(
            "Power consumption analysis\n\n\
             Current specific power: {} kWh/t\n\
             - Mill efficiency 85% (target 90%)\n\
             - Mill load balancing could reduce power by 2-3%\n\
             - Variable frequency drives on fans could save 5-8%",
            kpi_value(context, KpiId::SpecificPower)
        )
    } else if has("fuel") || has("optimization") {
        format!(
            "Fuel optimization analysis\n\n\
             Current heat rate: {} kcal/kg\n\
             - Alternative fuel ratio currently 12%, can increase to 15%\n\
             - Expected savings $2,500/day with 8% CO2 reduction\n\n\
             Optimizer suggests a gradual increase to 15% over the next 24 hours.",
            kpi_value(context, KpiId::HeatRate)
        )
    } else if has("maintenance") || has("repair") {
        "Maintenance insights\n\n\
         - Kiln: good condition, next inspection due in 30 days\n\
         - Mill: bearing temperature elevated, monitor closely\n\
         - Cooler: operating normally\n\
         - Preheater: efficiency at 95%\n\n\
         Priority: mill bearing requires immediate attention."
            .to_string()
    } else if has("help") || has("what can you do") {
        "I can help with process monitoring (KPI analysis and trends), troubleshooting \
         (deviation analysis, equipment health), SOPs and maintenance schedules, and \
         optimization opportunities.\n\n\
         Examples: \"What's wrong with LSF?\", \"How to optimize fuel mix?\""
            .to_string()
    } else {
        let autonomy = if context.autonomy == AutonomyMode::On {
            "Active"
        } else {
            "Human control"
        };
        format!(
            "Analysis request received: \"{question}\"\n\n\
             Current plant status:\n\
             - Specific Power: {} kWh/t\n\
             - Heat Rate: {} kcal/kg\n\
             - LSF: {}\n\
             - TSR: {}%\n\n\
             Autonomy: {autonomy}\n\n\
             Try asking about LSF, kiln temperature, power, fuel or maintenance.",
            kpi_value(context, KpiId::SpecificPower),
            kpi_value(context, KpiId::HeatRate),
            kpi_value(context, KpiId::ClinkerLsf),
            kpi_value(context, KpiId::Tsr),
        )
    };

    ChatReply {
        message,
        suggestions: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_kpis_cover_every_id() {
        let snapshot = KpiSnapshot::from_readings(demo_kpi_readings(), Utc::now());
        assert!(snapshot.iter().all(|k| k.status != KpiStatus::Offline));
        assert_eq!(snapshot.get(KpiId::ClinkerLsf).unwrap().value, 96.5);
    }

    #[test]
    fn demo_health_flags_mill_critical() {
        let map = HealthMap::from_readings(demo_health_readings());
        assert_eq!(map.get(ProcessSystem::Mill).unwrap().status, HealthStatus::Critical);
        assert!(map.any_unstable());
    }

    #[test]
    fn chat_reply_matches_keywords() {
        let context = ChatContext {
            current_kpis: BTreeMap::from([("clinkerLSF".to_string(), 96.5)]),
            autonomy: AutonomyMode::Paused,
        };
        assert!(demo_chat_reply("Why is LSF high?", &context).message.contains("96.5"));
        assert!(demo_chat_reply("kiln temperature?", &context).message.contains("1450"));
        assert!(demo_chat_reply("schedule a repair", &context).message.contains("bearing"));

        let fallback = demo_chat_reply("hello", &context);
        assert!(fallback.message.contains("\"hello\""));
        assert!(fallback.message.contains("Human control"));
    }

    #[test]
    fn demo_log_entries_come_from_samples() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let entry = demo_log_entry(&mut rng);
            assert!(LOG_SAMPLES.iter().any(|(a, m)| *a == entry.agent && *m == entry.message));
        }
    }
}
