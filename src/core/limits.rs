use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// Tracks how many producers are running right now and the highest count seen
#[derive(Debug, Default)]
pub struct InFlightTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a producer as started; it is marked finished when the guard drops
    pub fn enter(&self) -> InFlightGuard<'_> {
        let now_running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);
        trace!("Producer started, in flight: {}", now_running);
        InFlightGuard { tracker: self }
    }

    fn exit(&self) {
        let previous = self.current.fetch_sub(1, Ordering::SeqCst);
        trace!("Producer finished, in flight: {}", previous.saturating_sub(1));
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Reset the peak to the number of producers currently running
    pub fn reset_peak(&self) {
        self.peak.store(self.current(), Ordering::SeqCst);
    }
}

/// RAII in-flight marker
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    tracker: &'a InFlightTracker,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.tracker.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_tracks_current_and_peak() {
        let tracker = InFlightTracker::new();

        let first = tracker.enter();
        let second = tracker.enter();
        assert_eq!(tracker.current(), 2);
        assert_eq!(tracker.peak(), 2);

        drop(first);
        assert_eq!(tracker.current(), 1);
        assert_eq!(tracker.peak(), 2);

        drop(second);
        assert_eq!(tracker.current(), 0);
        assert_eq!(tracker.peak(), 2);
    }

    #[test]
    fn test_reset_peak() {
        let tracker = InFlightTracker::new();
        let guard = tracker.enter();
        drop(tracker.enter());
        assert_eq!(tracker.peak(), 2);

        tracker.reset_peak();
        assert_eq!(tracker.peak(), 1);

        drop(guard);
        tracker.reset_peak();
        assert_eq!(tracker.peak(), 0);
    }
}
