//! Pause gate shared between a unit's periodic monitor poller and
//! foreground operations that need the bus to themselves.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Nestable pause counter.
///
/// Every `pause()` must be matched by one `resume()`; the monitor is paused
/// while the depth is non-zero.
#[derive(Debug, Default)]
pub struct MonitorGate {
    depth: AtomicU32,
    polls: AtomicU64,
}

impl MonitorGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increase the pause depth.
    pub fn pause(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrease the pause depth; unmatched resumes are ignored.
    pub fn resume(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));
    }

    pub fn is_paused(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }

    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::SeqCst)
    }

    /// Count one completed monitor poll.
    pub fn record_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of polls completed since creation.
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_pause() {
        let gate = MonitorGate::new();
        assert!(!gate.is_paused());

        gate.pause();
        gate.pause();
        gate.resume();
        assert!(gate.is_paused());

        gate.resume();
        assert!(!gate.is_paused());
    }

    #[test]
    fn test_unmatched_resume() {
        let gate = MonitorGate::new();
        gate.resume();
        assert_eq!(gate.depth(), 0);
        gate.pause();
        assert_eq!(gate.depth(), 1);
    }
}
