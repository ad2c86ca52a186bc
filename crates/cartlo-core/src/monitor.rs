//! # Monitor Loop
//!
//! Periodic polling of a unit's monitor points on a background thread, and
//! the pause guard foreground operations hold so their bus traffic never
//! interleaves with the poller's.
//!
//! ```text
//!   MonitorLoop thread            foreground operation
//!   ──────────────────            ────────────────────
//!   gate paused? ── no ─► poll    let _pause = MonitorPause::new(gate);
//!        │                        ... sweep / lock / optimize ...
//!       yes ─► skip               (drop) ─► resume
//! ```

use std::sync::Arc;
use std::time::Duration;

use cartlo_hal::{MonitorGate, Monitored};
use tracing::{debug, warn};

use crate::error::LoResult;
use crate::rt::{StopToken, Worker, WorkerConfig};

/// Pauses a monitor gate for the guard's lifetime.
///
/// Pauses nest, so a lock search inside a bias optimization keeps the
/// poller quiet until the outermost guard drops.
#[derive(Debug)]
#[must_use = "the monitor resumes as soon as the guard is dropped"]
pub struct MonitorPause<'a> {
    gate: &'a MonitorGate,
}

impl<'a> MonitorPause<'a> {
    pub fn new(gate: &'a MonitorGate) -> Self {
        gate.pause();
        Self { gate }
    }

    /// Pause an optional unit's gate; `None` pauses nothing.
    pub fn optional(gate: Option<&'a MonitorGate>) -> Option<Self> {
        gate.map(Self::new)
    }
}

impl Drop for MonitorPause<'_> {
    fn drop(&mut self) {
        self.gate.resume();
    }
}

/// Background poller for one unit.
#[derive(Debug)]
pub struct MonitorLoop {
    worker: Worker<u64>,
}

impl MonitorLoop {
    /// Start polling `unit` every `interval`.
    pub fn spawn<M>(name: &str, unit: Arc<M>, interval: Duration) -> LoResult<Self>
    where
        M: Monitored + ?Sized + 'static,
    {
        let config = WorkerConfig::new(&format!("monitor_{}", name));
        let worker = Worker::spawn(config, move |stop: StopToken| {
            let mut polls = 0u64;
            while !stop.is_stopped() {
                if !unit.monitor_gate().is_paused() {
                    if let Err(e) = unit.poll_monitor() {
                        warn!(error = %e, "Monitor poll failed");
                    }
                    polls += 1;
                }
                if !stop.sleep(interval) {
                    break;
                }
            }
            debug!(polls, "Monitor loop stopped");
            polls
        })?;
        Ok(Self { worker })
    }

    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }

    /// Stop the loop and return how many polls it made.
    pub fn stop(self) -> u64 {
        self.worker.stop();
        self.worker.join().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartlo_hal::sim::SimColdUnit;
    use std::thread;

    #[test]
    fn test_pause_guard_nests() {
        let gate = MonitorGate::new();
        {
            let _outer = MonitorPause::new(&gate);
            {
                let _inner = MonitorPause::new(&gate);
                assert_eq!(gate.depth(), 2);
            }
            assert!(gate.is_paused());
        }
        assert!(!gate.is_paused());
    }

    #[test]
    fn test_pause_resumes_on_early_return() {
        fn failing(gate: &MonitorGate) -> Result<(), ()> {
            let _pause = MonitorPause::new(gate);
            Err(())
        }
        let gate = MonitorGate::new();
        assert!(failing(&gate).is_err());
        assert_eq!(gate.depth(), 0);
    }

    #[test]
    fn test_optional_pause() {
        assert!(MonitorPause::optional(None).is_none());
        let gate = MonitorGate::new();
        let pause = MonitorPause::optional(Some(&gate));
        assert!(gate.is_paused());
        drop(pause);
        assert!(!gate.is_paused());
    }

    #[test]
    fn test_loop_polls_and_stops() {
        let cold = Arc::new(SimColdUnit::default());
        let monitor = MonitorLoop::spawn("cold", cold.clone(), Duration::from_millis(1)).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(monitor.is_running());
        let polls = monitor.stop();
        assert!(polls > 0);
        assert_eq!(cold.monitor_gate().polls(), polls);
    }

    #[test]
    fn test_loop_skips_while_paused() {
        let cold = Arc::new(SimColdUnit::default());
        let _pause = MonitorPause::new(cold.monitor_gate());
        let monitor = MonitorLoop::spawn("cold", cold.clone(), Duration::from_millis(1)).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(monitor.stop(), 0);
        assert_eq!(cold.monitor_gate().polls(), 0);
    }
}
