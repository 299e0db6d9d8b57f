//! Ping/pong liveness for observer connections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Outcome of one heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// Keep the connection.
    Alive,
    /// The client stopped responding within the timeout window.
    TimedOut,
}

/// Set by the read half whenever any frame arrives.
#[derive(Debug)]
pub struct Liveness {
    alive: AtomicBool,
}

impl Liveness {
    /// A fresh connection counts as alive.
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
        }
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Whether anything arrived since the last check; resets the flag.
    pub fn check_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts consecutive silent intervals.
///
/// `max_missed` is `timeout / interval`, rounded up and at least 1, so a
/// 90s timeout at a 30s interval tolerates three silent ticks.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    missed: u32,
    max_missed: u32,
}

impl HeartbeatMonitor {
    /// Monitor for the given cadence.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        let interval_ms = interval.as_millis().max(1);
        let max_missed = timeout.as_millis().div_ceil(interval_ms).max(1);
        Self {
            missed: 0,
            max_missed: u32::try_from(max_missed).unwrap_or(u32::MAX),
        }
    }

    /// Evaluate one interval tick.
    pub fn tick(&mut self, liveness: &Liveness) -> HeartbeatResult {
        if liveness.check_alive() {
            self.missed = 0;
            return HeartbeatResult::Alive;
        }
        self.missed += 1;
        if self.missed >= self.max_missed {
            HeartbeatResult::TimedOut
        } else {
            HeartbeatResult::Alive
        }
    }

    /// Consecutive silent ticks tolerated.
    pub fn max_missed(&self) -> u32 {
        self.max_missed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn max_missed_from_timeout_and_interval() {
        assert_eq!(HeartbeatMonitor::new(secs(30), secs(90)).max_missed(), 3);
        assert_eq!(HeartbeatMonitor::new(secs(30), secs(100)).max_missed(), 4);
        assert_eq!(HeartbeatMonitor::new(secs(30), secs(10)).max_missed(), 1);
        assert_eq!(
            HeartbeatMonitor::new(Duration::from_millis(100), Duration::from_millis(300)).max_missed(),
            3
        );
    }

    #[test]
    fn fresh_connection_survives_first_tick() {
        let liveness = Liveness::new();
        let mut monitor = HeartbeatMonitor::new(secs(1), secs(1));
        assert_eq!(monitor.tick(&liveness), HeartbeatResult::Alive);
        assert_eq!(monitor.tick(&liveness), HeartbeatResult::TimedOut);
    }

    #[test]
    fn silence_times_out_after_max_missed() {
        let liveness = Liveness::new();
        let _ = liveness.check_alive();
        let mut monitor = HeartbeatMonitor::new(secs(30), secs(90));
        assert_eq!(monitor.tick(&liveness), HeartbeatResult::Alive);
        assert_eq!(monitor.tick(&liveness), HeartbeatResult::Alive);
        assert_eq!(monitor.tick(&liveness), HeartbeatResult::TimedOut);
    }

    #[test]
    fn activity_resets_missed_count() {
        let liveness = Liveness::new();
        let mut monitor = HeartbeatMonitor::new(secs(30), secs(60));
        for _ in 0..10 {
            let _ = liveness.check_alive();
            assert_eq!(monitor.tick(&liveness), HeartbeatResult::Alive);
            liveness.mark_alive();
            assert_eq!(monitor.tick(&liveness), HeartbeatResult::Alive);
        }
    }
}
