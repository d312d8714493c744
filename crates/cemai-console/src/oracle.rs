//! Oracle chat assistant.

use std::sync::Arc;

use cemai_gateway::ApiClient;
use cemai_protocol::{ChatContext, ChatRole};
use cemai_state::{DashboardState, NoticeVariant};

use crate::workflow::note_gateway_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AskOutcome {
    Answered,
    /// The answer is canned demo text.
    AnsweredDemo,
    Failed,
    /// Another question is still waiting for its answer.
    Busy,
    Empty,
}

#[derive(Clone)]
pub struct Oracle {
    api: ApiClient,
    state: Arc<DashboardState>,
}

impl Oracle {
    pub fn new(api: ApiClient, state: Arc<DashboardState>) -> Self {
        Self { api, state }
    }

    /// Plant context sent with every question.
    pub fn context(&self) -> ChatContext {
        ChatContext {
            current_kpis: self
                .state
                .kpis
                .read(|feed| feed.value().map(|s| s.values()).unwrap_or_default()),
            autonomy: self.state.autonomy_mode(),
        }
    }

    /// Send `question` and append both sides to the transcript. Only one
    /// question is in flight at a time.
    pub async fn ask(&self, question: &str) -> AskOutcome {
        let question = question.trim();
        if question.is_empty() {
            return AskOutcome::Empty;
        }
        let accepted = self.state.chat.update(|chat| {
            if !chat.begin_question() {
                return false;
            }
            chat.push(ChatRole::User, question);
            true
        });
        if !accepted {
            self.state
                .notify(NoticeVariant::Info, "Oracle is still answering the previous question");
            return AskOutcome::Busy;
        }

        let outcome = match self.api.chat(question, self.context()).await {
            Ok(fetched) => {
                let demo = fetched.is_demo();
                let reply = fetched.into_value();
                self.state.chat.update(|chat| {
                    chat.push(ChatRole::Assistant, reply.message);
                    if !reply.suggestions.is_empty() {
                        chat.set_suggestions(reply.suggestions);
                    }
                });
                if demo {
                    AskOutcome::AnsweredDemo
                } else {
                    AskOutcome::Answered
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "oracle request failed");
                note_gateway_error(&self.state, &e);
                self.state.chat.update(|chat| {
                    chat.push(ChatRole::System, format!("Oracle unavailable: {e}"));
                });
                self.state.notify(NoticeVariant::Error, "Failed to get a response from Oracle");
                AskOutcome::Failed
            }
        };
        self.state.chat.update(|chat| chat.end_question());
        outcome
    }
}
