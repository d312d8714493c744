use chrono::Utc;

use cemai_protocol::{ChatMessage, ChatRole, DEFAULT_CHAT_SUGGESTIONS};

const GREETING: &str = "Oracle assistant ready. Ask about plant operations, SOPs, \
troubleshooting or optimization.";
const TRANSCRIPT_CAP: usize = 200;

/// Oracle chat transcript and the current suggestion buttons.
#[derive(Debug, Clone)]
pub struct ChatTranscript {
    messages: Vec<ChatMessage>,
    suggestions: Vec<String>,
    awaiting_reply: bool,
    next_seq: u64,
}

impl ChatTranscript {
    pub fn new() -> Self {
        let mut transcript = Self {
            messages: Vec::new(),
            suggestions: Vec::new(),
            awaiting_reply: false,
            next_seq: 0,
        };
        transcript.push(ChatRole::System, GREETING);
        transcript
    }

    pub fn push(&mut self, role: ChatRole, content: impl Into<String>) -> &ChatMessage {
        let prefix = match role {
            ChatRole::User => "u",
            ChatRole::Assistant => "a",
            ChatRole::System => "s",
        };
        self.next_seq += 1;
        if self.messages.len() >= TRANSCRIPT_CAP {
            self.messages.remove(0);
        }
        self.messages.push(ChatMessage {
            id: format!("{prefix}-{}", self.next_seq),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
        &self.messages[self.messages.len() - 1]
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Marks a question as sent. Returns `false` while another is pending.
    pub fn begin_question(&mut self) -> bool {
        if self.awaiting_reply {
            return false;
        }
        self.awaiting_reply = true;
        true
    }

    pub fn end_question(&mut self) {
        self.awaiting_reply = false;
    }

    pub fn awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    pub fn set_suggestions(&mut self, suggestions: Vec<String>) {
        self.suggestions = suggestions;
    }

    /// Suggestions to offer. Falls back to the default prompts when the
    /// operator must act and the backend supplied none.
    pub fn visible_suggestions(&self, human_required: bool) -> Vec<String> {
        if !self.suggestions.is_empty() {
            self.suggestions.clone()
        } else if human_required {
            DEFAULT_CHAT_SUGGESTIONS.iter().map(|s| s.to_string()).collect()
        } else {
            Vec::new()
        }
    }
}

impl Default for ChatTranscript {
    fn default() -> Self {
        Self::new()
    }
}
