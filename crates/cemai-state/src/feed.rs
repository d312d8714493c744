use chrono::{DateTime, Utc};

use cemai_protocol::Origin;

/// A polled value together with its loading / stale / demo status.
///
/// Loading: nothing fetched yet. Stale: the last fetch failed and the
/// previous value (if any) is still shown. Demo: the value is substituted
/// data, never mistaken for live plant data.
#[derive(Debug, Clone)]
pub struct Feed<T> {
    value: Option<T>,
    origin: Origin,
    updated_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl<T> Feed<T> {
    pub fn new() -> Self {
        Self {
            value: None,
            origin: Origin::Live,
            updated_at: None,
            error: None,
        }
    }

    /// Replace the value wholesale. Clears any previous error.
    pub fn replace(&mut self, value: T, origin: Origin) {
        self.value = Some(value);
        self.origin = origin;
        self.updated_at = Some(Utc::now());
        self.error = None;
    }

    /// Record a failed fetch, keeping whatever value is displayed.
    pub fn mark_stale(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.value.is_none() && self.error.is_none()
    }

    pub fn is_stale(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_demo(&self) -> bool {
        self.value.is_some() && self.origin == Origin::Demo
    }
}

impl<T> Default for Feed<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_then_live_then_stale() {
        let mut feed: Feed<u32> = Feed::new();
        assert!(feed.is_loading());

        feed.replace(7, Origin::Live);
        assert!(!feed.is_loading());
        assert_eq!(feed.value(), Some(&7));

        feed.mark_stale("connection refused");
        assert!(feed.is_stale());
        assert_eq!(feed.value(), Some(&7), "stale data remains displayed");

        feed.replace(8, Origin::Demo);
        assert!(!feed.is_stale());
        assert!(feed.is_demo());
    }

    #[test]
    fn failure_before_first_value_is_not_loading() {
        let mut feed: Feed<u32> = Feed::new();
        feed.mark_stale("timeout");
        assert!(!feed.is_loading());
        assert!(feed.value().is_none());
    }
}
