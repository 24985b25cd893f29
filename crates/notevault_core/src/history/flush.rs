//! Debounced flush scheduling.

use chrono::{DateTime, Duration, Utc};

/// Tracks when a coalesced write is due.
///
/// Every [`DebouncedFlush::schedule`] pushes the deadline out by the full
/// window. The host polls [`DebouncedFlush::take_if_due`] from whatever
/// timer it owns.
#[derive(Debug, Clone)]
pub struct DebouncedFlush {
    window: Duration,
    deadline: Option<DateTime<Utc>>,
}

impl DebouncedFlush {
    /// Creates an idle flush with the given coalescing window.
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::zero()),
            deadline: None,
        }
    }

    /// Requests a flush `window` after `now`, replacing any earlier request.
    pub fn schedule(&mut self, now: DateTime<Utc>) {
        self.deadline = Some(now + self.window);
    }

    /// Drops the pending request.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// When the pending flush is due.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// True if a flush is pending and its deadline has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Clears and returns true if the flush is due.
    pub fn take_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_due(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescheduling_pushes_deadline() {
        let start = Utc::now();
        let mut flush = DebouncedFlush::new(std::time::Duration::from_secs(2));
        assert!(!flush.is_due(start));

        flush.schedule(start);
        flush.schedule(start + Duration::seconds(1));
        assert!(!flush.take_if_due(start + Duration::seconds(2)));
        assert!(flush.take_if_due(start + Duration::seconds(3)));
        assert!(flush.deadline().is_none());
    }

    #[test]
    fn cancel_clears() {
        let now = Utc::now();
        let mut flush = DebouncedFlush::new(std::time::Duration::from_secs(2));
        flush.schedule(now);
        flush.cancel();
        assert!(!flush.is_due(now + Duration::seconds(10)));
    }
}
