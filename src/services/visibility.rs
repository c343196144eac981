// src/services/visibility.rs

use chrono::{DateTime, Utc};

use crate::models::exam_progress::TabChangeEvent;

/// Append-only record of tab visibility changes for one attempt.
///
/// Kept apart from the session lock so events arriving while a save or a
/// submission is in flight are still captured. Once closed (attempt over)
/// further events are ignored.
#[derive(Debug, Default)]
pub struct TabActivityLog {
    events: Vec<TabChangeEvent>,
    hidden_since: Option<DateTime<Utc>>,
    closed: bool,
}

impl TabActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the log with events saved by an earlier visit.
    pub fn restore(&mut self, events: Vec<TabChangeEvent>) {
        let mut restored = events;
        restored.append(&mut self.events);
        self.events = restored;
    }

    /// Records a transition. Returns `false` if the log no longer listens.
    pub fn record(&mut self, hidden: bool, at: DateTime<Utc>) -> bool {
        if self.closed {
            return false;
        }

        let event = if hidden {
            self.hidden_since = Some(at);
            TabChangeEvent {
                timestamp: at,
                was_hidden: true,
                duration_hidden_ms: None,
            }
        } else {
            let duration_hidden_ms = self
                .hidden_since
                .take()
                .map(|since| (at - since).num_milliseconds().max(0));
            TabChangeEvent {
                timestamp: at,
                was_hidden: false,
                duration_hidden_ms,
            }
        };
        self.events.push(event);
        true
    }

    pub fn events(&self) -> &[TabChangeEvent] {
        &self.events
    }

    /// Number of times the tab was hidden.
    pub fn change_count(&self) -> usize {
        self.events.iter().filter(|e| e.was_hidden).count()
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn hidden_then_visible_records_duration() {
        let t0 = Utc::now();
        let mut log = TabActivityLog::new();
        assert!(log.record(true, t0));
        assert!(log.record(false, t0 + Duration::milliseconds(2_500)));

        assert_eq!(log.events().len(), 2);
        assert_eq!(log.events()[1].duration_hidden_ms, Some(2_500));
        assert_eq!(log.change_count(), 1);
    }

    #[test]
    fn visible_without_prior_hidden_has_no_duration() {
        let mut log = TabActivityLog::new();
        log.record(false, Utc::now());
        assert_eq!(log.events()[0].duration_hidden_ms, None);
        assert_eq!(log.change_count(), 0);
    }

    #[test]
    fn restore_keeps_earlier_events_first() {
        let t0 = Utc::now();
        let mut log = TabActivityLog::new();
        log.record(true, t0 + Duration::seconds(10));
        log.restore(vec![TabChangeEvent {
            timestamp: t0,
            was_hidden: true,
            duration_hidden_ms: None,
        }]);

        assert_eq!(log.events().len(), 2);
        assert_eq!(log.events()[0].timestamp, t0);
        assert_eq!(log.change_count(), 2);
    }

    #[test]
    fn closed_log_ignores_events() {
        let mut log = TabActivityLog::new();
        log.close();
        assert!(!log.record(true, Utc::now()));
        assert!(log.events().is_empty());
    }
}
