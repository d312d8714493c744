use std::collections::BTreeMap;

use chrono::Utc;

use cemai_protocol::*;
use cemai_state::{ChatTranscript, DecisionDesk};

fn proposal(agent: ProposalAgent) -> Proposal {
    Proposal {
        id: uuid::Uuid::new_v4().to_string(),
        agent,
        title: "Adjust kiln feed".into(),
        description: "Reduce feed by 2%".into(),
        adjustments: BTreeMap::from([("kiln_feed".to_string(), -2.0)]),
        predicted_impact: BTreeMap::new(),
        confidence: 0.8,
    }
}

fn decision(id: &str) -> DecisionPayload {
    DecisionPayload {
        id: id.to_string(),
        guardian: proposal(ProposalAgent::Guardian),
        optimizer: proposal(ProposalAgent::Optimizer),
        synthesis: Synthesis {
            summary: format!("Balanced plan {id}"),
            rationale: "Keeps LSF within band".into(),
            recommended_adjustments: BTreeMap::new(),
        },
        created_at: Utc::now(),
    }
}

#[test]
fn test_surface_opens_hub_only_for_new_decision() {
    let mut desk = DecisionDesk::new();
    assert!(desk.surface(decision("dec_1")));
    assert!(desk.hub_open());

    desk.close_hub();
    assert!(!desk.surface(decision("dec_1")), "same decision is not new");
    assert!(!desk.hub_open(), "re-surfacing does not reopen a closed hub");

    assert!(desk.surface(decision("dec_2")));
    assert!(desk.hub_open());
}

#[test]
fn test_held_decision_is_presented_when_surfaced() {
    let mut desk = DecisionDesk::new();
    desk.hold(decision("dec_1"));
    assert!(!desk.hub_open());

    assert!(desk.surface(decision("dec_1")), "held decision reaches the operator");
    assert!(desk.hub_open());

    desk.close_hub();
    assert!(!desk.surface(decision("dec_1")));
    assert!(!desk.hub_open());

    desk.hold(decision("dec_1"));
    assert!(desk.surface(decision("dec_1")), "held again after a resume");
}

#[test]
fn test_open_hub_requires_active_decision() {
    let mut desk = DecisionDesk::new();
    assert!(!desk.open_hub());
    desk.surface(decision("dec_1"));
    desk.clear();
    assert!(desk.active().is_none());
    assert!(!desk.hub_open());
}

#[test]
fn test_resolution_is_at_most_once() {
    let mut desk = DecisionDesk::new();
    desk.surface(decision("dec_1"));

    assert!(desk.begin("dec_1"));
    assert!(!desk.begin("dec_1"), "a call is already in flight");
    desk.complete("dec_1", Verdict::Approve, AUTO_APPROVE_RATIONALE, true);

    assert!(desk.active().is_none());
    assert!(desk.was_resolved("dec_1"));
    assert!(!desk.begin("dec_1"));

    let history: Vec<_> = desk.history().collect();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, DecisionStatus::Approved);
    assert_eq!(history[0].summary, "Balanced plan dec_1");
    assert!(history[0].automatic);
}

#[test]
fn test_failed_resolution_keeps_decision() {
    let mut desk = DecisionDesk::new();
    desk.surface(decision("dec_1"));
    assert!(desk.begin("dec_1"));
    desk.fail("dec_1");

    assert_eq!(desk.active().map(|d| d.id.as_str()), Some("dec_1"));
    assert!(desk.in_flight().is_none());
    assert!(!desk.was_resolved("dec_1"));
    assert!(desk.begin("dec_1"), "operator may retry");
}

#[test]
fn test_chat_single_question_in_flight() {
    let mut chat = ChatTranscript::new();
    assert_eq!(chat.messages().len(), 1, "greeting");
    assert!(chat.begin_question());
    assert!(!chat.begin_question());
    chat.push(ChatRole::Assistant, "LSF is 96.5");
    chat.end_question();
    assert!(chat.begin_question());
}

#[test]
fn test_chat_default_suggestions_when_human_required() {
    let mut chat = ChatTranscript::new();
    assert!(chat.visible_suggestions(false).is_empty());
    assert_eq!(chat.visible_suggestions(true).len(), DEFAULT_CHAT_SUGGESTIONS.len());

    chat.set_suggestions(vec!["Check cooler".into()]);
    assert_eq!(chat.visible_suggestions(false), vec!["Check cooler".to_string()]);
}
