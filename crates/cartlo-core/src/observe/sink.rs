//! Status, event and record sinks.
//!
//! The engines report through two narrow traits: a [`StatusSink`] for
//! success/failure messages, progress and operation events, and a
//! [`RecordSink`] for tab-delimited data rows. Presentation and persistence
//! live behind them.

use std::fmt::Display;
use std::sync::{Arc, Mutex};

use cartlo_hal::Polarization;
use tracing::{debug, error, info};

/// Operation events addressed to collaborators outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpEvent {
    /// The bias optimizer is waiting for an IF power reading of `pol`
    RequestIfPower { pol: Polarization },
    /// The bias optimizer finished, successfully or not
    Done,
    /// Power readings are no longer needed
    RequestStopPowerReadings,
}

impl std::fmt::Display for OpEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpEvent::RequestIfPower { pol } => write!(f, "request-if-power {}", pol),
            OpEvent::Done => write!(f, "done"),
            OpEvent::RequestStopPowerReadings => write!(f, "request-stop-power-readings"),
        }
    }
}

/// Receiver of human-readable status, progress and events.
pub trait StatusSink: Send + Sync {
    fn status(&self, success: bool, message: &str);

    /// Percent complete of the running operation, 0..=100
    fn progress(&self, _percent: f64) {}

    fn event(&self, _event: OpEvent) {}
}

/// Receiver of tab-delimited data rows.
pub trait RecordSink: Send + Sync {
    fn record(&self, row: &str);
}

/// Join values into one tab-delimited row.
pub fn tab_row<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\t")
}

/// Sink that forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn status(&self, success: bool, message: &str) {
        if success {
            info!(target: "cartlo::status", "{}", message);
        } else {
            error!(target: "cartlo::status", "{}", message);
        }
    }

    fn progress(&self, percent: f64) {
        debug!(target: "cartlo::status", percent, "progress");
    }

    fn event(&self, event: OpEvent) {
        info!(target: "cartlo::status", %event, "event");
    }
}

impl RecordSink for TracingSink {
    fn record(&self, row: &str) {
        info!(target: "cartlo::record", "{}", row);
    }
}

/// Sink that keeps everything in memory, for bench runs and inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    statuses: Mutex<Vec<(bool, String)>>,
    progress: Mutex<Vec<f64>>,
    events: Mutex<Vec<OpEvent>>,
    rows: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> Vec<(bool, String)> {
        self.statuses.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn progress_values(&self) -> Vec<f64> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn events(&self) -> Vec<OpEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn rows(&self) -> Vec<String> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Whether any failure status was reported.
    pub fn any_failure(&self) -> bool {
        self.statuses().iter().any(|(ok, _)| !ok)
    }
}

impl StatusSink for MemorySink {
    fn status(&self, success: bool, message: &str) {
        self.statuses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((success, message.to_string()));
    }

    fn progress(&self, percent: f64) {
        self.progress.lock().unwrap_or_else(|e| e.into_inner()).push(percent);
    }

    fn event(&self, event: OpEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

impl RecordSink for MemorySink {
    fn record(&self, row: &str) {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(row.to_string());
    }
}

/// The pair of sinks an engine reports through.
#[derive(Clone)]
pub struct Sinks {
    pub status: Arc<dyn StatusSink>,
    pub records: Arc<dyn RecordSink>,
}

impl Sinks {
    pub fn new(status: Arc<dyn StatusSink>, records: Arc<dyn RecordSink>) -> Self {
        Self { status, records }
    }

    /// Both sinks backed by one shared [`MemorySink`].
    pub fn memory() -> (Self, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (Self::new(sink.clone(), sink.clone()), sink)
    }

    pub fn status(&self, success: bool, message: &str) {
        self.status.status(success, message);
    }

    pub fn progress(&self, percent: f64) {
        self.status.progress(percent.clamp(0.0, 100.0));
    }

    pub fn event(&self, event: OpEvent) {
        self.status.event(event);
    }

    pub fn record(&self, row: &str) {
        self.records.record(row);
    }
}

impl Default for Sinks {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink), Arc::new(TracingSink))
    }
}

impl std::fmt::Debug for Sinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sinks").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tab_row() {
        assert_eq!(tab_row(&[1.0, 2.5, -3.0]), "1\t2.5\t-3");
        assert_eq!(tab_row(&["pol0", "VD"]), "pol0\tVD");
    }

    #[test]
    fn test_memory_sink_collects() {
        let (sinks, memory) = Sinks::memory();
        sinks.status(true, "locked");
        sinks.status(false, "timeout");
        sinks.progress(150.0);
        sinks.event(OpEvent::Done);
        sinks.record("a\tb");

        assert_eq!(memory.statuses().len(), 2);
        assert!(memory.any_failure());
        assert_eq!(memory.progress_values(), vec![100.0]);
        assert_eq!(memory.events(), vec![OpEvent::Done]);
        assert_eq!(memory.rows(), vec!["a\tb".to_string()]);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(OpEvent::RequestStopPowerReadings.to_string(), "request-stop-power-readings");
        assert_eq!(
            OpEvent::RequestIfPower { pol: Polarization::Pol1 }.to_string(),
            "request-if-power pol1"
        );
    }
}
