use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use cemai_protocol::{DecisionPayload, DecisionStatus, Verdict};

/// Resolved ids remembered to keep auto-approval at-most-once.
const RESOLVED_MEMORY: usize = 64;
const LOCAL_HISTORY_CAP: usize = 100;

/// A decision resolved during this session.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDecision {
    pub id: String,
    pub status: DecisionStatus,
    pub summary: String,
    pub rationale: String,
    pub automatic: bool,
    pub resolved_at: DateTime<Utc>,
}

/// The single active decision and what happened to earlier ones.
#[derive(Debug, Clone, Default)]
pub struct DecisionDesk {
    active: Option<DecisionPayload>,
    hub_open: bool,
    /// The active decision was handed to the operator by [`Self::surface`].
    presented: bool,
    in_flight: Option<String>,
    resolved: VecDeque<String>,
    history: VecDeque<ResolvedDecision>,
}

impl DecisionDesk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&DecisionPayload> {
        self.active.as_ref()
    }

    pub fn hub_open(&self) -> bool {
        self.hub_open && self.active.is_some()
    }

    /// Make `decision` the active one and hand it to the operator.
    ///
    /// Opens the hub and returns `true` when the decision was not presented
    /// yet: a new id, or one only held while autonomy was on. Once presented,
    /// a closed hub stays closed.
    pub fn surface(&mut self, decision: DecisionPayload) -> bool {
        let present = !self.presented || self.is_new(&decision);
        if present {
            self.hub_open = true;
            self.presented = true;
        }
        self.active = Some(decision);
        present
    }

    /// Track `decision` as active without opening the hub (autonomy on).
    pub fn hold(&mut self, decision: DecisionPayload) {
        if self.is_new(&decision) {
            self.hub_open = false;
        }
        self.presented = false;
        self.active = Some(decision);
    }

    fn is_new(&self, decision: &DecisionPayload) -> bool {
        self.active.as_ref().map(|d| d.id != decision.id).unwrap_or(true)
    }

    /// The backend reports nothing pending.
    pub fn clear(&mut self) {
        self.active = None;
        self.hub_open = false;
        self.presented = false;
    }

    /// Returns `false` when nothing is pending.
    pub fn open_hub(&mut self) -> bool {
        self.hub_open = self.active.is_some();
        self.hub_open
    }

    pub fn close_hub(&mut self) {
        self.hub_open = false;
    }

    pub fn was_resolved(&self, id: &str) -> bool {
        self.resolved.iter().any(|r| r == id)
    }

    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    /// Claim `id` for a resolution call. Fails if a call is already out
    /// or the id was resolved before.
    pub fn begin(&mut self, id: &str) -> bool {
        if self.in_flight.is_some() || self.was_resolved(id) {
            return false;
        }
        self.in_flight = Some(id.to_string());
        true
    }

    /// The resolution call succeeded: forget the decision locally.
    pub fn complete(&mut self, id: &str, verdict: Verdict, rationale: &str, automatic: bool) {
        let summary = self
            .active
            .as_ref()
            .filter(|d| d.id == id)
            .map(|d| d.synthesis.summary.clone())
            .unwrap_or_default();

        if self.in_flight.as_deref() == Some(id) {
            self.in_flight = None;
        }
        if self.resolved.len() >= RESOLVED_MEMORY {
            self.resolved.pop_front();
        }
        self.resolved.push_back(id.to_string());

        if self.history.len() >= LOCAL_HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(ResolvedDecision {
            id: id.to_string(),
            status: verdict.resulting_status(),
            summary,
            rationale: rationale.to_string(),
            automatic,
            resolved_at: Utc::now(),
        });

        if self.active.as_ref().map(|d| d.id == id).unwrap_or(false) {
            self.clear();
        }
    }

    /// The resolution call failed: the decision stays active.
    pub fn fail(&mut self, id: &str) {
        if self.in_flight.as_deref() == Some(id) {
            self.in_flight = None;
        }
    }

    /// Decisions resolved this session, newest last.
    pub fn history(&self) -> impl Iterator<Item = &ResolvedDecision> {
        self.history.iter()
    }
}
