//! The single background-operation slot of a cartridge.
//!
//! At most one measurement or optimization runs per cartridge. Starting
//! another while one is running is rejected as busy; a finished run is
//! reaped when the next one starts or when it is waited for.

use std::fmt;

use tracing::debug;

use crate::bias_optimizer::{BiasOptimizer, OptimizationReport};
use crate::error::{LoError, LoResult};
use crate::measure::{MeasurementKind, MeasurementReport};
use crate::rt::Worker;

/// What is occupying the slot.
pub enum RunningOperation {
    Measurement {
        kind: MeasurementKind,
        worker: Worker<MeasurementReport>,
    },
    BiasOptimization(BiasOptimizer),
}

impl RunningOperation {
    pub fn label(&self) -> String {
        match self {
            RunningOperation::Measurement { kind, .. } => kind.to_string(),
            RunningOperation::BiasOptimization(_) => "IF power optimization".to_string(),
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            RunningOperation::Measurement { worker, .. } => worker.is_finished(),
            RunningOperation::BiasOptimization(optimizer) => !optimizer.is_busy(),
        }
    }

    fn abort(&self) {
        match self {
            RunningOperation::Measurement { worker, .. } => worker.stop(),
            RunningOperation::BiasOptimization(optimizer) => optimizer.abort(),
        }
    }

    fn finish(self) -> Option<OperationOutcome> {
        match self {
            RunningOperation::Measurement { worker, .. } => {
                worker.join().map(OperationOutcome::Measurement)
            }
            RunningOperation::BiasOptimization(mut optimizer) => {
                optimizer.join().map(OperationOutcome::BiasOptimization)
            }
        }
    }
}

/// Result of a finished background operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Measurement(MeasurementReport),
    BiasOptimization(OptimizationReport),
}

impl OperationOutcome {
    pub fn succeeded(&self) -> bool {
        match self {
            OperationOutcome::Measurement(report) => report.completed,
            OperationOutcome::BiasOptimization(report) => report.succeeded(),
        }
    }
}

/// Idle, or holding the one running operation.
#[derive(Default)]
pub enum ActiveOperation {
    #[default]
    Idle,
    Running(RunningOperation),
}

impl ActiveOperation {
    /// True while an operation's thread is still working.
    pub fn is_busy(&self) -> bool {
        match self {
            ActiveOperation::Idle => false,
            ActiveOperation::Running(op) => !op.is_finished(),
        }
    }

    /// Label of the operation in the slot, finished or not.
    pub fn label(&self) -> Option<String> {
        match self {
            ActiveOperation::Idle => None,
            ActiveOperation::Running(op) => Some(op.label()),
        }
    }

    /// Make the slot free for a new operation.
    ///
    /// Fails with [`LoError::Busy`] while one is running; otherwise reaps
    /// and returns the outcome of a finished one.
    pub fn ensure_idle(&mut self) -> LoResult<Option<OperationOutcome>> {
        if let ActiveOperation::Running(op) = self {
            if !op.is_finished() {
                return Err(LoError::Busy(op.label()));
            }
        }
        Ok(self.take_outcome())
    }

    /// Occupy the slot. The caller has checked [`ensure_idle`](Self::ensure_idle).
    pub fn begin(&mut self, op: RunningOperation) {
        debug!(operation = %op.label(), "Background operation started");
        *self = ActiveOperation::Running(op);
    }

    /// Signal cancellation to whatever is running; true if anything was.
    pub fn abort(&self) -> bool {
        match self {
            ActiveOperation::Running(op) if !op.is_finished() => {
                op.abort();
                true
            }
            _ => false,
        }
    }

    /// Block until the running operation ends and take its outcome.
    pub fn wait(&mut self) -> Option<OperationOutcome> {
        self.take_outcome()
    }

    /// The running bias optimizer, for delivering power readings.
    pub fn bias_optimizer(&self) -> Option<&BiasOptimizer> {
        match self {
            ActiveOperation::Running(RunningOperation::BiasOptimization(optimizer)) => {
                Some(optimizer)
            }
            _ => None,
        }
    }

    fn take_outcome(&mut self) -> Option<OperationOutcome> {
        match std::mem::take(self) {
            ActiveOperation::Idle => None,
            ActiveOperation::Running(op) => op.finish(),
        }
    }
}

impl fmt::Debug for ActiveOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveOperation::Idle => f.write_str("Idle"),
            ActiveOperation::Running(op) => f
                .debug_struct("Running")
                .field("operation", &op.label())
                .field("finished", &op.is_finished())
                .finish(),
        }
    }
}
