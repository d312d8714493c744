//! Operator console for the Control Tower.
//!
//! A ratatui TUI over the shared [`DashboardState`]: status bar, KPI cards,
//! health glyphs, the decision hub, the master-control log, the Oracle chat
//! and a command line. Hotkeys act while the command line is empty; slash
//! commands and free-text questions go through the command line.
//!
//! Launch with `control-tower run`.

use std::io::{self, Stdout};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};

use cemai_protocol::{
    AutonomyMode, ChatMessage, ChatRole, DecisionPayload, HealthMap, HealthStatus, KpiData,
    KpiId, KpiSnapshot, KpiStatus, KpiTrend, LogEntry, LogLevel, Origin, Proposal, Role, Verdict,
};
use cemai_state::{AutonomyAction, DashboardState, LinkStatus, Notice, NoticeVariant, PushLink};

use crate::commands::{self, Command, HELP};
use crate::pollers;
use crate::runtime::ControlTower;

const CONSOLE_MESSAGE_CAP: usize = 500;
const LOG_LINES: usize = 60;
const CHAT_LINES: usize = 40;

/// What a key press asks the console to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    None,
    Quit,
    Submit,
    Autonomy(AutonomyAction),
    OpenHub,
    CloseHub,
    Resolve(Verdict),
    CycleRole,
    ToggleSidePanel,
}

/// Snapshot of dashboard state for rendering.
struct ConsoleSnapshot {
    role: Role,
    user: Option<String>,
    autonomy: AutonomyMode,
    link: LinkStatus,
    kpis: Option<KpiSnapshot>,
    kpi_origin: Origin,
    kpi_error: Option<String>,
    kpi_updated: Option<DateTime<Utc>>,
    health: Option<HealthMap>,
    health_error: Option<String>,
    decision: Option<DecisionPayload>,
    hub_open: bool,
    resolving: bool,
    logs: Vec<LogEntry>,
    chat: Vec<ChatMessage>,
    awaiting_reply: bool,
    suggestions: Vec<String>,
    notices: Vec<Notice>,
    side_panel_collapsed: bool,
}

impl ConsoleSnapshot {
    fn capture(state: &DashboardState) -> Self {
        let now = Utc::now();
        let autonomy = state.autonomy_mode();
        let (kpis, kpi_origin, kpi_error, kpi_updated) = state.kpis.read(|feed| {
            (
                feed.value().cloned(),
                feed.origin(),
                feed.error().map(str::to_string),
                feed.updated_at(),
            )
        });
        let (health, health_error) = state
            .health
            .read(|feed| (feed.value().cloned(), feed.error().map(str::to_string)));
        let (decision, hub_open, resolving) = state.decisions.read(|desk| {
            (desk.active().cloned(), desk.hub_open(), desk.in_flight().is_some())
        });
        let (chat, awaiting_reply, suggestions) = state.chat.read(|chat| {
            let messages = chat.messages();
            let skip = messages.len().saturating_sub(CHAT_LINES);
            (
                messages[skip..].to_vec(),
                chat.awaiting_reply(),
                chat.visible_suggestions(autonomy.requires_human()),
            )
        });

        Self {
            role: state.role.get(),
            user: state.user.read(|u| u.as_ref().map(|u| u.name.clone())),
            autonomy,
            link: state.link.get(),
            kpis,
            kpi_origin,
            kpi_error,
            kpi_updated,
            health,
            health_error,
            decision,
            hub_open,
            resolving,
            logs: state.logs.read(|logs| logs.latest(LOG_LINES).into_iter().cloned().collect()),
            chat,
            awaiting_reply,
            suggestions,
            notices: state
                .notices
                .read(|board| board.active(now).into_iter().cloned().collect()),
            side_panel_collapsed: state.prefs.read(|p| p.side_panel_collapsed),
        }
    }
}

/// The operator console TUI state.
struct OperatorConsole {
    /// Current text in the input field.
    input: String,
    /// Cursor position within the input field, in characters.
    cursor_pos: usize,
    /// Command history for up/down arrow navigation.
    history: Vec<String>,
    history_pos: Option<usize>,
    /// Command feedback shown in the console output pane.
    console_messages: Vec<(DateTime<Utc>, String, Color)>,
}

impl OperatorConsole {
    fn new() -> Self {
        let mut console = Self {
            input: String::new(),
            cursor_pos: 0,
            history: Vec::new(),
            history_pos: None,
            console_messages: Vec::new(),
        };
        console.add_message("CemAI Control Tower ready. Type a question or /help.", Color::Cyan);
        console.add_message(
            "Keys: Space autonomy | m manual | h decisions | a/x approve/reject | r role | b panel",
            Color::DarkGray,
        );
        console
    }

    fn add_message(&mut self, msg: &str, color: Color) {
        self.console_messages.push((Utc::now(), msg.to_string(), color));
        if self.console_messages.len() > CONSOLE_MESSAGE_CAP {
            self.console_messages.remove(0);
        }
    }

    fn byte_index(&self) -> usize {
        self.input
            .char_indices()
            .nth(self.cursor_pos)
            .map(|(i, _)| i)
            .unwrap_or(self.input.len())
    }

    /// Map a key press to an action. Hotkeys only fire on an empty input line.
    fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers, hub_open: bool) -> KeyAction {
        if code == KeyCode::Char('c') && modifiers.contains(KeyModifiers::CONTROL) {
            return KeyAction::Quit;
        }

        if self.input.is_empty() {
            let hotkey = match code {
                KeyCode::Char(' ') => Some(KeyAction::Autonomy(AutonomyAction::Toggle)),
                KeyCode::Char('m') => Some(KeyAction::Autonomy(AutonomyAction::Manual)),
                KeyCode::Char('h') => Some(KeyAction::OpenHub),
                KeyCode::Char('r') => Some(KeyAction::CycleRole),
                KeyCode::Char('b') => Some(KeyAction::ToggleSidePanel),
                KeyCode::Char('a') if hub_open => Some(KeyAction::Resolve(Verdict::Approve)),
                KeyCode::Char('x') if hub_open => Some(KeyAction::Resolve(Verdict::Reject)),
                KeyCode::Esc if hub_open => Some(KeyAction::CloseHub),
                _ => None,
            };
            if let Some(action) = hotkey {
                return action;
            }
        }

        match code {
            KeyCode::Enter => return KeyAction::Submit,
            KeyCode::Char(c) => {
                let at = self.byte_index();
                self.input.insert(at, c);
                self.cursor_pos += 1;
            }
            KeyCode::Backspace => {
                if self.cursor_pos > 0 {
                    self.cursor_pos -= 1;
                    let at = self.byte_index();
                    self.input.remove(at);
                }
            }
            KeyCode::Delete => {
                if self.cursor_pos < self.input.chars().count() {
                    let at = self.byte_index();
                    self.input.remove(at);
                }
            }
            KeyCode::Left => self.cursor_pos = self.cursor_pos.saturating_sub(1),
            KeyCode::Right => {
                if self.cursor_pos < self.input.chars().count() {
                    self.cursor_pos += 1;
                }
            }
            KeyCode::Home => self.cursor_pos = 0,
            KeyCode::End => self.cursor_pos = self.input.chars().count(),
            KeyCode::Esc => {
                self.input.clear();
                self.cursor_pos = 0;
            }
            KeyCode::Up => {
                if !self.history.is_empty() {
                    let pos = match self.history_pos {
                        Some(p) if p > 0 => p - 1,
                        Some(p) => p,
                        None => self.history.len() - 1,
                    };
                    self.history_pos = Some(pos);
                    self.input = self.history[pos].clone();
                    self.cursor_pos = self.input.chars().count();
                }
            }
            KeyCode::Down => {
                if let Some(pos) = self.history_pos {
                    if pos + 1 < self.history.len() {
                        self.history_pos = Some(pos + 1);
                        self.input = self.history[pos + 1].clone();
                        self.cursor_pos = self.input.chars().count();
                    } else {
                        self.history_pos = None;
                        self.input.clear();
                        self.cursor_pos = 0;
                    }
                }
            }
            _ => {}
        }
        KeyAction::None
    }

    /// Run a hotkey action. Returns `true` if the console should exit.
    async fn perform(&mut self, tower: &ControlTower, action: KeyAction) -> bool {
        match action {
            KeyAction::None | KeyAction::Submit => {}
            KeyAction::Quit => return true,
            KeyAction::Autonomy(action) => {
                let workflow = tower.workflow().clone();
                tokio::spawn(async move {
                    let _ = workflow.change_autonomy(action).await;
                });
            }
            KeyAction::OpenHub => {
                tower.workflow().open_hub();
            }
            KeyAction::CloseHub => tower.state().decisions.update(|desk| desk.close_hub()),
            KeyAction::Resolve(verdict) => self.resolve(tower, verdict, None),
            KeyAction::CycleRole => {
                let role = tower.cycle_role();
                self.add_message(&format!("Role: {role}"), Color::Cyan);
            }
            KeyAction::ToggleSidePanel => {
                tower.toggle_side_panel();
            }
        }
        false
    }

    fn resolve(&mut self, tower: &ControlTower, verdict: Verdict, rationale: Option<String>) {
        let workflow = tower.workflow().clone();
        tokio::spawn(async move {
            let _ = workflow.resolve_active(verdict, rationale.as_deref()).await;
        });
    }

    /// Process the command line. Returns `true` if the console should exit.
    async fn process_input(&mut self, tower: &ControlTower) -> bool {
        let input = self.input.trim().to_string();
        self.input.clear();
        self.cursor_pos = 0;
        if input.is_empty() {
            return false;
        }

        self.history.push(input.clone());
        self.history_pos = None;

        match commands::parse(&input) {
            Ok(command) => self.process_command(tower, command).await,
            Err(e) => {
                self.add_message(&e.to_string(), Color::Yellow);
                false
            }
        }
    }

    async fn process_command(&mut self, tower: &ControlTower, command: Command) -> bool {
        match command {
            Command::Quit => return true,
            Command::Help => {
                self.add_message("Available commands:", Color::Cyan);
                for (usage, description) in HELP {
                    self.add_message(&format!("  {usage:<18} - {description}"), Color::White);
                }
                self.add_message(
                    "  Hotkeys act on an empty input line; Esc clears the line or closes the hub.",
                    Color::DarkGray,
                );
            }
            Command::Status => self.show_status(tower),
            Command::Pause => self.perform_autonomy(tower, AutonomyAction::Pause),
            Command::Resume => self.perform_autonomy(tower, AutonomyAction::Resume),
            Command::Manual => self.perform_autonomy(tower, AutonomyAction::Manual),
            Command::Approve(rationale) => self.resolve(tower, Verdict::Approve, rationale),
            Command::Reject(rationale) => self.resolve(tower, Verdict::Reject, rationale),
            Command::History(query) => self.show_history(tower, query.as_deref()).await,
            Command::Agents => self.show_agents(tower).await,
            Command::Notifications => self.show_notifications(tower).await,
            Command::Ask(question) => {
                self.add_message(&format!("Asking Oracle: {question}"), Color::DarkGray);
                let oracle = tower.oracle().clone();
                tokio::spawn(async move {
                    oracle.ask(&question).await;
                });
            }
            Command::Role(role) => {
                tower.set_role(role);
                self.add_message(&format!("Role: {role}"), Color::Cyan);
            }
            Command::EmergencyStop => self.emergency_stop(tower).await,
        }
        false
    }

    fn perform_autonomy(&mut self, tower: &ControlTower, action: AutonomyAction) {
        let workflow = tower.workflow().clone();
        tokio::spawn(async move {
            let _ = workflow.change_autonomy(action).await;
        });
    }

    fn show_status(&mut self, tower: &ControlTower) {
        let snap = ConsoleSnapshot::capture(tower.state());
        self.add_message(
            &format!(
                "API: {} ({}) | Push: {} | Base: {}",
                format_reachability(snap.link.api_reachable),
                snap.link.latency_ms.map(|ms| format!("{ms} ms")).unwrap_or_else(|| "-".into()),
                format_push(snap.link.push),
                tower.api().base_url(),
            ),
            Color::Green,
        );
        self.add_message(
            &format!(
                "Role: {} | User: {} | Autonomy: {}",
                snap.role,
                snap.user.as_deref().unwrap_or("-"),
                snap.autonomy
            ),
            Color::Green,
        );
        self.add_message(
            &format!(
                "KPIs: {} | Health: {} | Logs: {} | Demo fallback: {}",
                feed_label(snap.kpis.is_some(), snap.kpi_origin, snap.kpi_error.as_deref()),
                if snap.health_error.is_some() { "stale" } else { "ok" },
                tower.state().logs.read(|l| l.len()),
                if tower.api().demo_fallback() { "on" } else { "off" },
            ),
            Color::Green,
        );
        if snap.link.session_expired {
            self.add_message("Session expired: run `control-tower login` again.", Color::Red);
        }
    }

    async fn show_history(&mut self, tower: &ControlTower, query: Option<&str>) {
        let local: Vec<_> = tower
            .state()
            .decisions
            .read(|desk| desk.history().cloned().collect());
        if !local.is_empty() {
            self.add_message(&format!("Resolved this session ({}):", local.len()), Color::Cyan);
            for entry in local.iter().rev().take(10) {
                self.add_message(
                    &format!(
                        "  {} {} [{}{}] {}",
                        entry.resolved_at.format("%H:%M:%S"),
                        entry.id,
                        entry.status,
                        if entry.automatic { ", auto" } else { "" },
                        entry.rationale
                    ),
                    Color::White,
                );
            }
        }

        match tower.api().decision_history(1, 50, None).await {
            Ok(fetched) => {
                let demo = fetched.is_demo();
                let page = fetched.into_value();
                let matches = page.filter(query.unwrap_or(""));
                if matches.is_empty() {
                    self.add_message("No decision history found.", Color::Yellow);
                    return;
                }
                self.add_message(
                    &format!(
                        "Decision history ({} of {}){}:",
                        matches.len(),
                        page.total,
                        if demo { " [demo]" } else { "" }
                    ),
                    Color::Cyan,
                );
                for entry in matches {
                    self.add_message(
                        &format!(
                            "  {} {} [{}] {}",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.id,
                            entry.status,
                            entry.summary
                        ),
                        Color::White,
                    );
                }
            }
            Err(e) => self.add_message(&format!("History unavailable: {e}"), Color::Red),
        }
    }

    async fn show_agents(&mut self, tower: &ControlTower) {
        self.add_message("Agent services:", Color::Cyan);
        for (namespace, result) in pollers::agent_health(tower.api()).await {
            let (text, color) = match result {
                Ok(fetched) if fetched.is_demo() => {
                    (format!("{} [demo]", fetched.value().status), Color::Yellow)
                }
                Ok(fetched) => (fetched.value().status.clone(), Color::Green),
                Err(e) => (format!("unreachable ({e})"), Color::Red),
            };
            self.add_message(&format!("  {namespace:<15} {text}"), color);
        }
    }

    async fn show_notifications(&mut self, tower: &ControlTower) {
        let api = tower.api();
        match api.notifications(true, 1, 20).await {
            Ok(fetched) => {
                let demo = fetched.is_demo();
                let list = fetched.into_value();
                if list.is_empty() {
                    self.add_message("No unread notifications.", Color::Yellow);
                } else {
                    self.add_message(&format!("Unread notifications ({}):", list.len()), Color::Cyan);
                }
                for notification in &list {
                    self.add_message(
                        &format!(
                            "  [{:?}] {} - {}",
                            notification.priority, notification.title, notification.message
                        ),
                        priority_color(notification.priority >= cemai_protocol::Priority::High),
                    );
                    // Listing marks as read; demo notifications are not on the backend.
                    if !demo {
                        if let Err(e) = api.mark_notification_read(&notification.id).await {
                            tracing::debug!(id = %notification.id, error = %e, "mark read failed");
                        }
                    }
                }
            }
            Err(e) => self.add_message(&format!("Notifications unavailable: {e}"), Color::Red),
        }

        match api.process_alerts().await {
            Ok(fetched) => {
                let alerts = fetched.into_value();
                let open: Vec<_> = alerts.iter().filter(|a| !a.acknowledged).collect();
                if !open.is_empty() {
                    self.add_message(&format!("Process alerts ({}):", open.len()), Color::Cyan);
                }
                for alert in open {
                    self.add_message(
                        &format!("  [{:?}] {}: {}", alert.severity, alert.kind, alert.message),
                        priority_color(alert.severity >= cemai_protocol::Priority::High),
                    );
                }
            }
            Err(e) => self.add_message(&format!("Process alerts unavailable: {e}"), Color::Red),
        }
    }

    async fn emergency_stop(&mut self, tower: &ControlTower) {
        if tower.state().role.get() != Role::Operator {
            tower.state().notify(NoticeVariant::Error, "Insufficient permissions");
            return;
        }
        match tower.api().emergency_stop().await {
            Ok(()) => {
                tower.state().notify(NoticeVariant::Warning, "Emergency stop engaged");
                self.add_message("Emergency stop engaged.", Color::Red);
            }
            Err(e) => {
                tower
                    .state()
                    .notify(NoticeVariant::Error, format!("Emergency stop failed: {e}"));
            }
        }
    }

    /// Render the full console layout.
    fn render(&self, frame: &mut Frame, snap: &ConsoleSnapshot) {
        let outer = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Status bar
                Constraint::Min(12),   // Main area
                Constraint::Length(3), // Notices
                Constraint::Length(5), // Input area
            ])
            .split(frame.area());

        self.render_status_bar(frame, outer[0], snap);
        self.render_main_area(frame, outer[1], snap);
        self.render_notices(frame, outer[2], snap);
        self.render_input(frame, outer[3]);
    }

    fn render_status_bar(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let block = Block::default()
            .title(" CemAI Control Tower ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan));

        let reachable_color = match snap.link.api_reachable {
            Some(true) => Color::Green,
            Some(false) => Color::Red,
            None => Color::DarkGray,
        };
        let mut spans = vec![
            Span::styled("  API: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format_reachability(snap.link.api_reachable),
                Style::default().fg(reachable_color),
            ),
            Span::styled("  |  Latency: ", Style::default().fg(Color::Gray)),
            Span::styled(
                snap.link.latency_ms.map(|ms| format!("{ms}ms")).unwrap_or_else(|| "-".into()),
                Style::default().fg(Color::White),
            ),
            Span::styled("  |  Push: ", Style::default().fg(Color::Gray)),
            Span::styled(format_push(snap.link.push), Style::default().fg(push_color(snap.link.push))),
            Span::styled("  |  Updated: ", Style::default().fg(Color::Gray)),
            Span::styled(
                snap.kpi_updated
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".into()),
                Style::default().fg(Color::White),
            ),
            Span::styled("  |  Role: ", Style::default().fg(Color::Gray)),
            Span::styled(snap.role.to_string(), Style::default().fg(Color::LightCyan)),
            Span::styled("  |  Autonomy: ", Style::default().fg(Color::Gray)),
            Span::styled(
                snap.autonomy.to_string().to_uppercase(),
                Style::default()
                    .fg(autonomy_color(snap.autonomy))
                    .add_modifier(Modifier::BOLD),
            ),
        ];
        if let Some(system) = snap.link.system {
            spans.push(Span::styled("  |  Plant: ", Style::default().fg(Color::Gray)));
            spans.push(Span::styled(
                format!("{system:?}").to_lowercase(),
                Style::default().fg(Color::Magenta),
            ));
        }
        if snap.kpis.is_some() && snap.kpi_origin == Origin::Demo {
            spans.push(Span::styled(
                "  DEMO DATA",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ));
        }
        if snap.link.session_expired {
            spans.push(Span::styled(
                "  SESSION EXPIRED",
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            ));
        }

        frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
    }

    fn render_main_area(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let constraints = if snap.side_panel_collapsed {
            vec![Constraint::Percentage(100)]
        } else {
            vec![Constraint::Percentage(60), Constraint::Percentage(40)]
        };
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(constraints)
            .split(area);

        let left = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(7), // KPI cards
                Constraint::Length(3), // Health
                Constraint::Min(8),    // Decision hub
                Constraint::Length(8), // Console output
            ])
            .split(columns[0]);

        self.render_kpis(frame, left[0], snap);
        self.render_health(frame, left[1], snap);
        self.render_decision(frame, left[2], snap);
        self.render_console_output(frame, left[3]);

        if !snap.side_panel_collapsed {
            let right = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(columns[1]);
            self.render_log(frame, right[0], snap);
            self.render_chat(frame, right[1], snap);
        }
    }

    fn render_kpis(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let cards = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Ratio(1, 4); 4])
            .split(area);

        for (slot, id) in KpiId::ALL.into_iter().enumerate() {
            let kpi = snap.kpis.as_ref().and_then(|s| s.get(id));
            let mut title = format!(" {} ", id.display_name());
            if snap.kpi_error.is_some() {
                title.push_str("(stale) ");
            }
            let block = Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(kpi.map(kpi_color).unwrap_or(Color::DarkGray)));
            let lines = match kpi {
                Some(kpi) => kpi_card_lines(kpi),
                None if snap.kpi_error.is_some() => vec![Line::from(Span::styled(
                    "  unavailable",
                    Style::default().fg(Color::Red),
                ))],
                None => vec![Line::from(Span::styled(
                    "  loading...",
                    Style::default().fg(Color::DarkGray),
                ))],
            };
            frame.render_widget(Paragraph::new(lines).block(block), cards[slot]);
        }
    }

    fn render_health(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let title = if snap.health_error.is_some() {
            " Process Health (stale) "
        } else {
            " Process Health "
        };
        let block = Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::LightBlue));

        let line = match &snap.health {
            Some(health) => {
                let mut spans = Vec::new();
                for prediction in health.iter() {
                    let (glyph, color) = health_glyph(prediction.status);
                    spans.push(Span::styled(format!("  {glyph} "), Style::default().fg(color)));
                    spans.push(Span::styled(prediction.system.label(), Style::default().fg(Color::White)));
                    if let Some(minutes) = prediction.prediction_minutes {
                        spans.push(Span::styled(
                            format!(" ({minutes} min)"),
                            Style::default().fg(Color::Gray),
                        ));
                    }
                }
                Line::from(spans)
            }
            None => Line::from(Span::styled("  loading...", Style::default().fg(Color::DarkGray))),
        };
        frame.render_widget(Paragraph::new(line).block(block), area);
    }

    fn render_decision(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let Some(decision) = snap.decision.as_ref().filter(|_| snap.hub_open) else {
            let block = Block::default()
                .title(" Decision Hub ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White));
            let text = match &snap.decision {
                Some(decision) => vec![
                    Line::from(Span::styled(
                        format!("  Decision {} pending: {}", decision.id, decision.synthesis.summary),
                        Style::default().fg(Color::Yellow),
                    )),
                    Line::from(Span::styled("  Press h to review.", Style::default().fg(Color::DarkGray))),
                ],
                None => vec![Line::from(Span::styled(
                    format!("  No pending decisions. Autonomy is {}.", snap.autonomy),
                    Style::default().fg(Color::DarkGray),
                ))],
            };
            frame.render_widget(Paragraph::new(text).block(block), area);
            return;
        };

        let title = if snap.resolving {
            format!(" Decision Hub - {} (resolving...) ", decision.id)
        } else {
            format!(" Decision Hub - {}  [a] approve  [x] reject  [Esc] close ", decision.id)
        };
        let block = Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Ratio(1, 3); 3])
            .split(inner);

        frame.render_widget(
            proposal_panel(&decision.guardian, " Guardian ", Color::Red),
            columns[0],
        );

        let mut synthesis = vec![
            Line::from(Span::styled(
                decision.synthesis.summary.clone(),
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(
                decision.synthesis.rationale.clone(),
                Style::default().fg(Color::Gray),
            )),
            Line::from(""),
        ];
        synthesis.extend(adjustment_lines(&decision.synthesis.recommended_adjustments, Color::Magenta));
        frame.render_widget(
            Paragraph::new(synthesis)
                .wrap(Wrap { trim: true })
                .block(
                    Block::default()
                        .title(" Master Control ")
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(Color::Magenta)),
                ),
            columns[1],
        );

        frame.render_widget(
            proposal_panel(&decision.optimizer, " Optimizer ", Color::Green),
            columns[2],
        );
    }

    fn render_console_output(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .title(" Console Output ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White));

        let inner_height = area.height.saturating_sub(2) as usize;
        let start = self.console_messages.len().saturating_sub(inner_height);
        let lines: Vec<Line> = self.console_messages[start..]
            .iter()
            .map(|(ts, msg, color)| {
                Line::from(vec![
                    Span::styled(
                        format!("  [{}] ", ts.format("%H:%M:%S")),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::styled(msg.as_str(), Style::default().fg(*color)),
                ])
            })
            .collect();

        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn render_log(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let block = Block::default()
            .title(" Master Control Log ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::LightBlue));

        if snap.logs.is_empty() {
            let text = Paragraph::new(Line::from(Span::styled(
                "  Waiting for agent activity...",
                Style::default().fg(Color::DarkGray),
            )))
            .block(block);
            frame.render_widget(text, area);
            return;
        }

        let inner_height = area.height.saturating_sub(2) as usize;
        let start = snap.logs.len().saturating_sub(inner_height);
        let lines: Vec<Line> = snap.logs[start..].iter().map(log_line).collect();
        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn render_chat(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let block = Block::default()
            .title(" Oracle ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta));

        let mut lines: Vec<Line> = Vec::new();
        for message in &snap.chat {
            let (who, color) = match message.role {
                ChatRole::User => ("you", Color::Cyan),
                ChatRole::Assistant => ("oracle", Color::Magenta),
                ChatRole::System => ("system", Color::DarkGray),
            };
            for (i, text) in message.content.lines().enumerate() {
                let prefix = if i == 0 { format!("{who}: ") } else { "  ".to_string() };
                lines.push(Line::from(vec![
                    Span::styled(prefix, Style::default().fg(color).add_modifier(Modifier::BOLD)),
                    Span::styled(text.to_string(), Style::default().fg(Color::White)),
                ]));
            }
        }
        if snap.awaiting_reply {
            lines.push(Line::from(Span::styled(
                "oracle is thinking...",
                Style::default().fg(Color::DarkGray),
            )));
        }
        if !snap.suggestions.is_empty() {
            lines.push(Line::from(Span::styled("Try:", Style::default().fg(Color::Gray))));
            for suggestion in &snap.suggestions {
                lines.push(Line::from(Span::styled(
                    format!("  /ask {suggestion}"),
                    Style::default().fg(Color::DarkGray),
                )));
            }
        }

        let inner_height = area.height.saturating_sub(2) as usize;
        let skip = lines.len().saturating_sub(inner_height);
        let visible: Vec<Line> = lines.into_iter().skip(skip).collect();
        frame.render_widget(Paragraph::new(visible).block(block), area);
    }

    fn render_notices(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let block = Block::default()
            .title(" Notices ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray));

        let mut spans = Vec::new();
        for notice in snap.notices.iter().rev().take(3) {
            spans.push(Span::styled(
                format!("  {}", notice.message),
                Style::default().fg(notice_color(notice.variant)),
            ));
        }
        frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
    }

    fn render_input(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default()
            .title(" Command Input (Enter = ask Oracle, /help = commands, /quit = exit) ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green));

        let input_display = if self.input.is_empty() {
            Line::from(vec![
                Span::styled("  > ", Style::default().fg(Color::Green)),
                Span::styled(
                    "Type a question or /command...",
                    Style::default().fg(Color::DarkGray),
                ),
            ])
        } else {
            Line::from(vec![
                Span::styled("  > ", Style::default().fg(Color::Green)),
                Span::styled(self.input.as_str(), Style::default().fg(Color::White)),
            ])
        };

        let hint_line = Line::from(Span::styled(
            "  Ctrl+C or /quit to exit  |  Up/Down for history  |  Space toggles autonomy",
            Style::default().fg(Color::DarkGray),
        ));

        let paragraph = Paragraph::new(vec![Line::from(""), input_display, hint_line]).block(block);
        frame.render_widget(paragraph, area);

        let cursor_x = area.x + 4 + self.cursor_pos as u16;
        let cursor_y = area.y + 2;
        frame.set_cursor_position((cursor_x, cursor_y));
    }
}

fn kpi_card_lines(kpi: &KpiData) -> Vec<Line<'static>> {
    if kpi.status == KpiStatus::Offline {
        return vec![Line::from(Span::styled(
            "  offline",
            Style::default().fg(Color::DarkGray),
        ))];
    }
    let arrow = match kpi.trend {
        KpiTrend::Up => "↑",
        KpiTrend::Down => "↓",
        KpiTrend::Stable => "→",
    };
    vec![
        Line::from(vec![
            Span::styled(
                format!("  {:.1} {}", kpi.value, kpi.unit),
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!(" {arrow}"), Style::default().fg(Color::Gray)),
        ]),
        Line::from(Span::styled(
            format!("  target {}-{}", kpi.target.min, kpi.target.max),
            Style::default().fg(Color::Gray),
        )),
        Line::from(Span::styled(
            format!("  {:?}", kpi.status).to_lowercase(),
            Style::default().fg(kpi_color(kpi)),
        )),
    ]
}

fn kpi_color(kpi: &KpiData) -> Color {
    match kpi.status {
        KpiStatus::Normal => Color::Green,
        KpiStatus::Warning => Color::Yellow,
        KpiStatus::Critical => Color::Red,
        KpiStatus::Offline => Color::DarkGray,
    }
}

fn health_glyph(status: HealthStatus) -> (&'static str, Color) {
    match status {
        HealthStatus::Stable => ("●", Color::Green),
        HealthStatus::Warning => ("▲", Color::Yellow),
        HealthStatus::Critical => ("✖", Color::Red),
    }
}

fn adjustment_lines(adjustments: &std::collections::BTreeMap<String, f64>, color: Color) -> Vec<Line<'static>> {
    adjustments
        .iter()
        .map(|(name, delta)| {
            Line::from(Span::styled(
                format!("{name}: {delta:+}"),
                Style::default().fg(color),
            ))
        })
        .collect()
}

fn proposal_panel(proposal: &Proposal, title: &'static str, color: Color) -> Paragraph<'static> {
    let mut lines = vec![
        Line::from(Span::styled(
            proposal.title.clone(),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(proposal.description.clone(), Style::default().fg(Color::Gray))),
        Line::from(Span::styled(
            format!("confidence {:.0}%", proposal.confidence * 100.0),
            Style::default().fg(color),
        )),
    ];
    lines.extend(adjustment_lines(&proposal.adjustments, Color::Cyan));
    for (name, impact) in &proposal.predicted_impact {
        lines.push(Line::from(Span::styled(
            format!("impact {name}: {impact:+}"),
            Style::default().fg(Color::DarkGray),
        )));
    }
    Paragraph::new(lines).wrap(Wrap { trim: true }).block(
        Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(color)),
    )
}

fn log_line(entry: &LogEntry) -> Line<'static> {
    let level_color = match entry.level {
        LogLevel::Info => Color::White,
        LogLevel::Warning => Color::Yellow,
        LogLevel::Error => Color::Red,
    };
    Line::from(vec![
        Span::styled(
            format!(" {} ", entry.timestamp.format("%H:%M:%S")),
            Style::default().fg(Color::DarkGray),
        ),
        Span::styled(
            format!("[{}] ", entry.agent.tag()),
            Style::default().fg(Color::Cyan),
        ),
        Span::styled(entry.message.clone(), Style::default().fg(level_color)),
    ])
}

fn format_reachability(reachable: Option<bool>) -> &'static str {
    match reachable {
        Some(true) => "online",
        Some(false) => "offline",
        None => "checking",
    }
}

fn format_push(link: PushLink) -> String {
    match link {
        PushLink::Disabled => "off".to_string(),
        PushLink::Connecting => "connecting".to_string(),
        PushLink::Connected => "live".to_string(),
        PushLink::Reconnecting { attempt } => format!("retry {attempt}"),
        PushLink::Down => "down".to_string(),
    }
}

fn push_color(link: PushLink) -> Color {
    match link {
        PushLink::Connected => Color::Green,
        PushLink::Connecting | PushLink::Reconnecting { .. } => Color::Yellow,
        PushLink::Down => Color::Red,
        PushLink::Disabled => Color::DarkGray,
    }
}

fn autonomy_color(mode: AutonomyMode) -> Color {
    match mode {
        AutonomyMode::On => Color::Green,
        AutonomyMode::Paused => Color::Yellow,
        AutonomyMode::Manual => Color::Red,
    }
}

fn notice_color(variant: NoticeVariant) -> Color {
    match variant {
        NoticeVariant::Info => Color::Cyan,
        NoticeVariant::Success => Color::Green,
        NoticeVariant::Warning => Color::Yellow,
        NoticeVariant::Error => Color::Red,
    }
}

fn priority_color(high: bool) -> Color {
    if high {
        Color::Red
    } else {
        Color::White
    }
}

fn feed_label(has_value: bool, origin: Origin, error: Option<&str>) -> String {
    match (has_value, origin, error) {
        (_, _, Some(error)) => format!("stale ({error})"),
        (false, _, None) => "loading".to_string(),
        (true, Origin::Demo, None) => "demo".to_string(),
        (true, Origin::Live, None) => "live".to_string(),
    }
}

/// Set up the terminal for TUI rendering.
fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

/// Restore the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Drop expired notices so the board does not grow stale entries.
fn prune_notices(state: &DashboardState) {
    let now = Utc::now();
    let expired = state
        .notices
        .read(|board| board.all().count() != board.active(now).len());
    if expired {
        state.notices.update(|board| board.prune(now));
    }
}

/// Run the operator console event loop until the operator quits.
pub async fn run_operator_console(tower: &ControlTower) -> Result<(), anyhow::Error> {
    use std::io::IsTerminal;
    if !io::stdin().is_terminal() || !io::stdout().is_terminal() {
        return Err(anyhow::anyhow!("Operator console requires a terminal (TTY)."));
    }

    // Restore the terminal before the default hook prints the panic.
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic_info);
    }));

    let mut terminal = setup_terminal()?;
    let mut console = OperatorConsole::new();
    let tick_rate = Duration::from_millis(100);

    let result: Result<(), anyhow::Error> = async {
        loop {
            prune_notices(tower.state());
            let snapshot = ConsoleSnapshot::capture(tower.state());
            terminal.draw(|frame| console.render(frame, &snapshot))?;

            if !event::poll(tick_rate)? {
                continue;
            }
            let Event::Key(key_event) = event::read()? else {
                continue;
            };
            if key_event.kind != KeyEventKind::Press {
                continue;
            }

            let action = console.handle_key(key_event.code, key_event.modifiers, snapshot.hub_open);
            let quit = match action {
                KeyAction::Submit => console.process_input(tower).await,
                other => console.perform(tower, other).await,
            };
            if quit {
                break;
            }
        }
        Ok(())
    }
    .await;

    restore_terminal(&mut terminal)?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use cemai_gateway::fallback;
    use ratatui::backend::TestBackend;

    fn type_text(console: &mut OperatorConsole, text: &str) {
        for c in text.chars() {
            assert_eq!(console.handle_key(KeyCode::Char(c), KeyModifiers::NONE, false), KeyAction::None);
        }
    }

    fn rendered_text(state: &DashboardState, console: &OperatorConsole) -> String {
        let mut terminal = Terminal::new(TestBackend::new(160, 48)).unwrap();
        let snapshot = ConsoleSnapshot::capture(state);
        terminal.draw(|frame| console.render(frame, &snapshot)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn hotkeys_fire_only_on_empty_input() {
        let mut console = OperatorConsole::new();
        assert_eq!(
            console.handle_key(KeyCode::Char(' '), KeyModifiers::NONE, false),
            KeyAction::Autonomy(AutonomyAction::Toggle)
        );
        assert_eq!(console.handle_key(KeyCode::Char('h'), KeyModifiers::NONE, false), KeyAction::OpenHub);
        assert_eq!(
            console.handle_key(KeyCode::Char('a'), KeyModifiers::NONE, true),
            KeyAction::Resolve(Verdict::Approve)
        );

        type_text(&mut console, "/ask mill");
        assert_eq!(console.input, "/ask mill");
        assert_eq!(console.handle_key(KeyCode::Char('m'), KeyModifiers::NONE, false), KeyAction::None);
        assert_eq!(console.input, "/ask millm");
        assert_eq!(console.handle_key(KeyCode::Enter, KeyModifiers::NONE, false), KeyAction::Submit);
        assert_eq!(
            console.handle_key(KeyCode::Char('c'), KeyModifiers::CONTROL, false),
            KeyAction::Quit
        );
    }

    #[test]
    fn approve_key_types_when_hub_closed() {
        let mut console = OperatorConsole::new();
        assert_eq!(console.handle_key(KeyCode::Char('a'), KeyModifiers::NONE, false), KeyAction::None);
        assert_eq!(console.input, "a");
    }

    #[test]
    fn editing_handles_multibyte_input() {
        let mut console = OperatorConsole::new();
        type_text(&mut console, "/ask 1450°C");
        console.handle_key(KeyCode::Left, KeyModifiers::NONE, false);
        console.handle_key(KeyCode::Backspace, KeyModifiers::NONE, false);
        assert_eq!(console.input, "/ask 1450C");
        console.handle_key(KeyCode::Home, KeyModifiers::NONE, false);
        console.handle_key(KeyCode::Delete, KeyModifiers::NONE, false);
        assert_eq!(console.input, "ask 1450C");
    }

    #[test]
    fn console_messages_are_capped() {
        let mut console = OperatorConsole::new();
        for i in 0..(CONSOLE_MESSAGE_CAP + 20) {
            console.add_message(&format!("line {i}"), Color::White);
        }
        assert_eq!(console.console_messages.len(), CONSOLE_MESSAGE_CAP);
    }

    #[test]
    fn renders_loading_state() {
        let state = DashboardState::default();
        let text = rendered_text(&state, &OperatorConsole::new());
        assert!(text.contains("CemAI Control Tower"));
        assert!(text.contains("loading..."));
        assert!(text.contains("No pending decisions"));
        assert!(text.contains("Master Control Log"));
    }

    #[test]
    fn renders_open_decision_hub_and_demo_flag() {
        let state = DashboardState::default();
        state.kpis.update(|feed| {
            feed.replace(
                KpiSnapshot::from_readings(fallback::demo_kpi_readings(), Utc::now()),
                Origin::Demo,
            )
        });
        state
            .health
            .update(|feed| feed.replace(HealthMap::from_readings(fallback::demo_health_readings()), Origin::Demo));
        state
            .decisions
            .update(|desk| desk.surface(fallback::demo_decision("dec_77")));

        let text = rendered_text(&state, &OperatorConsole::new());
        assert!(text.contains("Decision Hub - dec_77"));
        assert!(text.contains("Guardian"));
        assert!(text.contains("Optimizer"));
        assert!(text.contains("DEMO DATA"));
        assert!(text.contains("Mill"));
    }

    #[test]
    fn collapsed_side_panel_hides_log_and_chat() {
        let state = DashboardState::default();
        state.prefs.update(|p| p.side_panel_collapsed = true);
        let text = rendered_text(&state, &OperatorConsole::new());
        assert!(!text.contains("Master Control Log"));
        assert!(!text.contains("┌ Oracle"));
    }

    #[test]
    fn feed_labels() {
        assert_eq!(feed_label(false, Origin::Live, None), "loading");
        assert_eq!(feed_label(true, Origin::Demo, None), "demo");
        assert_eq!(feed_label(true, Origin::Live, Some("timeout")), "stale (timeout)");
    }
}
