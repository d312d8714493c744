use std::collections::BTreeMap;

use cemai_protocol::*;

#[test]
fn test_request_id_shape() {
    let id = request_id();
    let parts: Vec<&str> = id.split('_').collect();
    assert_eq!(parts.len(), 3, "request id must be req_<millis>_<suffix>: {id}");
    assert_eq!(parts[0], "req");
    assert!(parts[1].parse::<i64>().is_ok());
    assert_eq!(parts[2].len(), 5);
    assert!(parts[2].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
}

#[test]
fn test_envelope_unwraps_pending_decisions() {
    let body = r#"{
        "data": {"decisions": [{
            "id": "dec_1",
            "guardian": {"id": "g1", "agent": "guardian", "title": "LSF", "description": "d",
                         "adjustments": {"kiln_speed": 0.1}, "predictedImpact": {"lsf_deviation": -0.5},
                         "confidence": 0.95},
            "optimizer": {"id": "o1", "agent": "optimizer", "title": "Fuel", "description": "d",
                          "adjustments": {}, "predictedImpact": {}, "confidence": 0.88},
            "synthesis": {"summary": "s", "rationale": "r", "recommendedAdjustments": {"kiln_speed": 0.1}},
            "createdAt": "2026-01-05T10:00:00Z"
        }]},
        "timestamp": "2026-01-05T10:00:01Z",
        "requestId": "req_1_abcde"
    }"#;
    let envelope: ApiEnvelope<PendingDecisions> = serde_json::from_str(body).unwrap();
    assert_eq!(envelope.request_id, "req_1_abcde");
    assert_eq!(envelope.data.decisions.len(), 1);
    let decision = &envelope.data.decisions[0];
    assert_eq!(decision.id, "dec_1");
    assert_eq!(decision.guardian.adjustments.get("kiln_speed"), Some(&0.1));
}

#[test]
fn test_log_entry_push_accepts_millis_timestamp() {
    let text = r#"{"type":"log_entry","data":{"id":"l1","timestamp":1767607200000,
        "agent":"guardian","level":"warning","message":"kiln drift"},"timestamp":"2026-01-05T10:00:00Z"}"#;
    let event = PushFrame::parse(text).unwrap().decode().unwrap();
    match event {
        PushEvent::LogEntry(entry) => {
            assert_eq!(entry.agent, LogAgent::Guardian);
            assert_eq!(entry.level, LogLevel::Warning);
            assert_eq!(entry.timestamp.timestamp_millis(), 1_767_607_200_000);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_unknown_push_type_rejected() {
    let frame = PushFrame::parse(r#"{"type":"weather","data":{}}"#).unwrap();
    assert!(matches!(frame.decode(), Err(ProtocolError::UnknownPushType(t)) if t == "weather"));
}

#[test]
fn test_heartbeat_frames_are_recognised() {
    assert!(PushFrame::ping().is_heartbeat());
    let pong = PushFrame::parse(r#"{"type":"pong"}"#).unwrap();
    assert!(pong.is_heartbeat());
}

#[test]
fn test_encoded_system_status_decodes_to_same_event() {
    let event = PushEvent::SystemStatus(SystemStatusUpdate { status: SystemStatus::Maintenance });
    let text = serde_json::to_string(&PushFrame::encode(&event).unwrap()).unwrap();
    assert_eq!(PushFrame::parse(&text).unwrap().decode().unwrap(), event);
}

#[test]
fn test_agent_state_decision_required() {
    let state: AgentState = serde_json::from_str(
        r#"{"autonomy":"on","reason":"decision_required","pendingDecisionId":"dec_1"}"#,
    )
    .unwrap();
    assert!(state.requires_decision());
    assert_eq!(state.pending_decision_id.as_deref(), Some("dec_1"));

    let quiet: AgentState = serde_json::from_str(r#"{"autonomy":"paused"}"#).unwrap();
    assert!(!quiet.requires_decision());
    assert!(quiet.autonomy.requires_human());
}

#[test]
fn test_kpi_snapshot_marks_missing_kpis_offline() {
    let mut readings = BTreeMap::new();
    readings.insert(
        "heatRate".to_string(),
        KpiReading {
            name: "Heat Rate".into(),
            value: 780.0,
            unit: "kcal/kg".into(),
            trend: KpiTrend::Stable,
            status: KpiStatus::Normal,
            target: KpiTarget { min: 700.0, max: 820.0 },
        },
    );
    readings.insert(
        "bogus".to_string(),
        KpiReading {
            name: "x".into(),
            value: 1.0,
            unit: String::new(),
            trend: KpiTrend::Up,
            status: KpiStatus::Normal,
            target: KpiTarget { min: 0.0, max: 2.0 },
        },
    );

    let snapshot = KpiSnapshot::from_readings(readings, chrono::Utc::now());
    assert_eq!(snapshot.kpis.len(), 4, "snapshot always covers the fixed KPI set");
    assert!(snapshot.get(KpiId::HeatRate).unwrap().in_target());
    let tsr = snapshot.get(KpiId::Tsr).unwrap();
    assert_eq!(tsr.status, KpiStatus::Offline);
    assert!(!tsr.in_target());
}

#[test]
fn test_health_map_defaults_and_ignores_unknown() {
    let map = HealthMap::from_readings(vec![
        HealthReading { system: "mill".into(), status: HealthStatus::Critical, prediction_minutes: Some(10) },
        HealthReading { system: "preheater".into(), status: HealthStatus::Warning, prediction_minutes: None },
    ]);
    assert_eq!(map.systems.len(), 3);
    assert_eq!(map.get(ProcessSystem::Kiln).unwrap().status, HealthStatus::Stable);
    assert_eq!(map.get(ProcessSystem::Mill).unwrap().prediction_minutes, Some(10));
    assert!(map.any_unstable());
}

#[test]
fn test_role_parsing_and_cycle() {
    assert_eq!("Operator".parse::<Role>().unwrap(), Role::Operator);
    assert!("admin".parse::<Role>().is_err());
    let mut role = Role::Operator;
    for _ in 0..Role::ALL.len() {
        role = role.next();
    }
    assert_eq!(role, Role::Operator, "cycling through every role returns to the start");
}

#[test]
fn test_history_filter_is_case_insensitive() {
    let page: DecisionHistoryPage = serde_json::from_str(
        r#"{"decisions":[
            {"id":"d-1","timestamp":"2026-01-05T10:00:00Z","status":"approved","summary":"Compromise +0.8% RDF"},
            {"id":"d-2","timestamp":"2026-01-05T09:00:00Z","status":"rejected","summary":"Raw mix tweak"}
        ],"total":2,"page":1,"size":20}"#,
    )
    .unwrap();
    let hits = page.filter("rdf");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "d-1");
    assert_eq!(page.filter("").len(), 2);
}
