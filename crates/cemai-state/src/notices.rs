use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use cemai_protocol::{NOTICE_CAPACITY, NOTICE_TTL_SECS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeVariant {
    Info,
    Success,
    Warning,
    Error,
}

/// A transient user-facing message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub id: u64,
    pub variant: NoticeVariant,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Queue of transient notices. Nothing here is persisted.
#[derive(Debug, Clone)]
pub struct NoticeBoard {
    notices: VecDeque<Notice>,
    next_id: u64,
    ttl: Duration,
}

impl NoticeBoard {
    pub fn new() -> Self {
        Self {
            notices: VecDeque::new(),
            next_id: 1,
            ttl: Duration::seconds(NOTICE_TTL_SECS),
        }
    }

    pub fn push(&mut self, variant: NoticeVariant, message: impl Into<String>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        if self.notices.len() >= NOTICE_CAPACITY {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice {
            id,
            variant,
            message: message.into(),
            created_at: Utc::now(),
        });
        id
    }

    /// Drop notices older than the TTL.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.notices.retain(|n| now.signed_duration_since(n.created_at) < ttl);
    }

    pub fn active(&self, now: DateTime<Utc>) -> Vec<&Notice> {
        self.notices
            .iter()
            .filter(|n| now.signed_duration_since(n.created_at) < self.ttl)
            .collect()
    }

    /// Every notice still queued, expired or not.
    pub fn all(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter()
    }

    pub fn last(&self) -> Option<&Notice> {
        self.notices.back()
    }

    pub fn dismiss(&mut self, id: u64) {
        self.notices.retain(|n| n.id != id);
    }
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_expire_after_ttl() {
        let mut board = NoticeBoard::new();
        board.push(NoticeVariant::Success, "Decision approved");
        let now = Utc::now();
        assert_eq!(board.active(now).len(), 1);
        let later = now + Duration::seconds(NOTICE_TTL_SECS + 1);
        assert!(board.active(later).is_empty());
        board.prune(later);
        assert!(board.last().is_none());
    }

    #[test]
    fn board_is_capped() {
        let mut board = NoticeBoard::new();
        for i in 0..(NOTICE_CAPACITY + 10) {
            board.push(NoticeVariant::Info, format!("n{i}"));
        }
        assert_eq!(board.all().count(), NOTICE_CAPACITY);
        assert_eq!(board.last().unwrap().message, format!("n{}", NOTICE_CAPACITY + 9));
    }

    #[test]
    fn dismiss_removes_by_id() {
        let mut board = NoticeBoard::new();
        let a = board.push(NoticeVariant::Warning, "a");
        board.push(NoticeVariant::Error, "b");
        board.dismiss(a);
        let left: Vec<_> = board.all().map(|n| n.message.as_str()).collect();
        assert_eq!(left, vec!["b"]);
    }
}
