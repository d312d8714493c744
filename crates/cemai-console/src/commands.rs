//! Operator console slash commands.

use thiserror::Error;

use cemai_protocol::Role;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Pause,
    Resume,
    Manual,
    Approve(Option<String>),
    Reject(Option<String>),
    History(Option<String>),
    Agents,
    Notifications,
    Ask(String),
    Role(Role),
    EmergencyStop,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command '{0}', type /help")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

/// (command, description) pairs shown by `/help`.
pub const HELP: [(&str, &str); 15] = [
    ("<text>", "Ask the Oracle assistant"),
    ("/ask <text>", "Ask the Oracle assistant"),
    ("/status", "Connection, autonomy and data freshness"),
    ("/pause", "Pause autonomy (operator)"),
    ("/resume", "Resume autonomy (operator)"),
    ("/manual", "Switch to manual control (operator)"),
    ("/approve [text]", "Approve the active decision"),
    ("/reject [text]", "Reject the active decision"),
    ("/history [query]", "Decision history, filtered by summary"),
    ("/agents", "Health of the agent services"),
    ("/notifications", "Unread notifications and process alerts"),
    ("/role <role>", "Switch role: operator, manager, engineer"),
    ("/estop", "Emergency stop through the guardian (operator)"),
    ("/help", "Show this help message"),
    ("/quit", "Exit the console"),
];

fn rest(args: &str) -> Option<String> {
    let args = args.trim();
    (!args.is_empty()).then(|| args.to_string())
}

/// Parse one line of operator input. Text without a leading `/` is a
/// question for the Oracle.
pub fn parse(input: &str) -> Result<Command, CommandError> {
    let input = input.trim();
    if !input.starts_with('/') {
        return Ok(Command::Ask(input.to_string()));
    }

    let (command, args) = input.split_once(' ').unwrap_or((input, ""));
    let command = match command {
        "/help" | "/?" => Command::Help,
        "/status" => Command::Status,
        "/pause" => Command::Pause,
        "/resume" => Command::Resume,
        "/manual" => Command::Manual,
        "/approve" => Command::Approve(rest(args)),
        "/reject" => Command::Reject(rest(args)),
        "/history" => Command::History(rest(args)),
        "/agents" => Command::Agents,
        "/notifications" | "/alerts" => Command::Notifications,
        "/ask" => Command::Ask(rest(args).ok_or(CommandError::Usage("/ask <question>"))?),
        "/role" => {
            let role = rest(args)
                .and_then(|r| r.parse::<Role>().ok())
                .ok_or(CommandError::Usage("/role <operator|manager|engineer>"))?;
            Command::Role(role)
        }
        "/estop" => Command::EmergencyStop,
        "/quit" | "/exit" | "/q" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(command)
}
