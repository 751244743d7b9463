//! Debounced buffer of formatted warning lines.
//!
//! The event watcher appends, the timer loop drains. Both sides go through
//! the same lock, which is held only for the append or the drain itself and
//! never across I/O, so a drain always captures exactly the lines appended
//! since the previous one, in arrival order.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

struct BufferState {
    lines: Vec<String>,
    /// Time of the last drain that returned something.
    last_drain: Instant,
}

/// Shared error buffer with a debounce clock.
pub struct ErrorAggregator {
    state: Mutex<BufferState>,
    debounce: Duration,
}

impl ErrorAggregator {
    /// Create an aggregator whose debounce clock starts now.
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        Self::starting_at(debounce, Instant::now())
    }

    /// Create an aggregator whose debounce clock starts at `start`.
    #[must_use]
    pub fn starting_at(debounce: Duration, start: Instant) -> Self {
        Self {
            state: Mutex::new(BufferState {
                lines: Vec::new(),
                last_drain: start,
            }),
            debounce,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one formatted warning line.
    pub fn append(&self, line: impl Into<String>) {
        let line = line.into();
        debug!(line = %line, "Buffered warning");
        self.lock().lines.push(line);
    }

    /// Number of lines waiting for the next drain.
    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every buffered line, joined with `\n`, and empty the buffer.
    ///
    /// Returns an empty string when nothing was buffered. Does not consult or
    /// move the debounce clock.
    pub fn drain_and_clear(&self) -> String {
        let lines = std::mem::take(&mut self.lock().lines);
        lines.join("\n")
    }

    /// Drain only if the debounce window has passed since the last non-empty
    /// drain.
    ///
    /// Returns `None` without touching the buffer when the window is still
    /// open, and `None` without moving the clock when the buffer is empty.
    pub fn drain_if_due(&self, now: Instant) -> Option<String> {
        let mut state = self.lock();

        if now.saturating_duration_since(state.last_drain) < self.debounce {
            return None;
        }

        if state.lines.is_empty() {
            return None;
        }

        let lines = std::mem::take(&mut state.lines);
        state.last_drain = now;
        drop(state);

        debug!(lines = lines.len(), "Drained error buffer");
        Some(lines.join("\n"))
    }

    /// Restart the debounce window at `finished`, the end of a remediation
    /// cycle started by the last drain.
    pub fn mark_cycle_finished(&self, finished: Instant) {
        let mut state = self.lock();
        if finished > state.last_drain {
            state.last_drain = finished;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const DEBOUNCE: Duration = Duration::from_secs(10);

    #[test]
    fn test_drain_returns_lines_in_order_and_empties() {
        let aggregator = ErrorAggregator::new(DEBOUNCE);
        aggregator.append("first");
        aggregator.append("second");
        aggregator.append("third");

        assert_eq!(aggregator.drain_and_clear(), "first\nsecond\nthird");
        assert!(aggregator.is_empty());
        assert_eq!(aggregator.drain_and_clear(), "");
    }

    #[test]
    fn test_consecutive_drains_never_share_lines() {
        let aggregator = ErrorAggregator::new(DEBOUNCE);
        aggregator.append("a");
        let first = aggregator.drain_and_clear();
        aggregator.append("b");
        aggregator.append("c");
        let second = aggregator.drain_and_clear();

        assert_eq!(first, "a");
        assert_eq!(second, "b\nc");
    }

    #[test]
    fn test_early_drain_is_a_no_op() {
        let start = Instant::now();
        let aggregator = ErrorAggregator::starting_at(DEBOUNCE, start);
        aggregator.append("ImagePullBackOff");

        assert_eq!(aggregator.drain_if_due(start + Duration::from_secs(5)), None);
        assert_eq!(aggregator.len(), 1);

        assert_eq!(
            aggregator.drain_if_due(start + DEBOUNCE).as_deref(),
            Some("ImagePullBackOff")
        );
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_debounce_measured_from_last_non_empty_drain() {
        let start = Instant::now();
        let aggregator = ErrorAggregator::starting_at(DEBOUNCE, start);

        aggregator.append("one");
        let drained_at = start + Duration::from_secs(10);
        assert!(aggregator.drain_if_due(drained_at).is_some());

        aggregator.append("two");
        assert_eq!(aggregator.drain_if_due(drained_at + Duration::from_secs(5)), None);
        assert_eq!(aggregator.len(), 1);
        assert!(aggregator
            .drain_if_due(drained_at + Duration::from_secs(10))
            .is_some());
    }

    #[test]
    fn test_window_reopens_after_cycle_finishes() {
        let start = Instant::now();
        let aggregator = ErrorAggregator::starting_at(DEBOUNCE, start);

        aggregator.append("one");
        let drained_at = start + DEBOUNCE;
        assert!(aggregator.drain_if_due(drained_at).is_some());

        let cycle_end = drained_at + Duration::from_secs(20);
        aggregator.mark_cycle_finished(cycle_end);
        aggregator.append("raised during rollout");

        assert_eq!(aggregator.drain_if_due(cycle_end + Duration::from_secs(1)), None);
        assert_eq!(aggregator.len(), 1);
        assert!(aggregator.drain_if_due(cycle_end + DEBOUNCE).is_some());

        // An earlier instant never moves the clock back.
        aggregator.mark_cycle_finished(start);
        aggregator.append("again");
        assert_eq!(aggregator.drain_if_due(cycle_end + DEBOUNCE), None);
    }

    #[test]
    fn test_empty_drain_does_not_reset_clock() {
        let start = Instant::now();
        let aggregator = ErrorAggregator::starting_at(DEBOUNCE, start);

        // Window open but nothing buffered: no action and the clock stays put.
        assert_eq!(aggregator.drain_if_due(start + Duration::from_secs(15)), None);

        aggregator.append("late");
        assert_eq!(
            aggregator
                .drain_if_due(start + Duration::from_secs(16))
                .as_deref(),
            Some("late")
        );
    }

    #[test]
    fn test_concurrent_appends_are_all_drained_once() {
        let aggregator = Arc::new(ErrorAggregator::new(DEBOUNCE));
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let aggregator = Arc::clone(&aggregator);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        aggregator.append(format!("w{w}-{i}"));
                    }
                })
            })
            .collect();

        let mut drained = Vec::new();
        for writer in writers {
            writer.join().unwrap();
            drained.push(aggregator.drain_and_clear());
        }
        drained.push(aggregator.drain_and_clear());

        let lines: Vec<&str> = drained
            .iter()
            .flat_map(|chunk| chunk.lines())
            .collect();
        assert_eq!(lines.len(), 1000);

        let unique: std::collections::HashSet<&str> = lines.iter().copied().collect();
        assert_eq!(unique.len(), 1000);

        // Per-writer order survives the interleaving.
        for w in 0..4 {
            let prefix = format!("w{w}-");
            let seq: Vec<usize> = lines
                .iter()
                .filter_map(|l| l.strip_prefix(&prefix))
                .map(|n| n.parse().unwrap())
                .collect();
            assert_eq!(seq, (0..250).collect::<Vec<_>>());
        }
    }
}
