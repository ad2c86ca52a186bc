//! # Background Measurements
//!
//! Long-running characterisation runs, each on its own worker thread:
//!
//! | Measurement | Control stepped | Recorded |
//! |-------------|-----------------|----------|
//! | [`IvCurve`] | junction voltage | junction current |
//! | [`FineLoSweep`] | tuning code | lock detect, correction voltage, IF power |
//! | [`MagnetSweep`] | magnet current | junction current |
//! | [`MixerDeflux`] | magnet current, decaying ± | applied current |
//! | [`MixerHeating`] | heater on/off | temperature, heater current |
//!
//! A measurement pauses the monitor of the unit it drives, checks the stop
//! token between steps and writes one tab-delimited record per point.
//! Stopping leaves the hardware at the last committed value.

pub mod deflux;
pub mod heating;
pub mod iv_curve;
pub mod lo_sweep;
pub mod magnet_sweep;

use std::fmt;

use tracing::{info, warn};

use crate::error::{LoError, LoResult};
use crate::observe::Sinks;
use crate::rt::{StopToken, Worker, WorkerConfig};

pub use deflux::{deflux_sequence, MixerDeflux};
pub use heating::MixerHeating;
pub use iv_curve::IvCurve;
pub use lo_sweep::FineLoSweep;
pub use magnet_sweep::MagnetSweep;

/// Which measurement a report or running operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementKind {
    IvCurve,
    FineLoSweep,
    MagnetSweep,
    MixerDeflux,
    MixerHeating,
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeasurementKind::IvCurve => "IV curve",
            MeasurementKind::FineLoSweep => "fine LO sweep",
            MeasurementKind::MagnetSweep => "SIS current vs magnet sweep",
            MeasurementKind::MixerDeflux => "mixer deflux",
            MeasurementKind::MixerHeating => "mixer heating",
        };
        f.write_str(name)
    }
}

/// Outcome of one measurement run.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementReport {
    pub kind: MeasurementKind,
    /// Records written by a run that completed
    pub points: usize,
    /// False when stopped or failed part way
    pub completed: bool,
    pub message: String,
}

/// A measurement that can run to completion on a worker thread.
pub trait Measurement: Send + 'static {
    fn kind(&self) -> MeasurementKind;

    /// Run every step, returning the number of records written.
    ///
    /// A stop request is reported as [`LoError::Aborted`].
    fn run(&self, stop: &StopToken, sinks: &Sinks) -> LoResult<usize>;
}

/// Run `measurement` on the calling thread and summarise the result.
pub fn run_measurement(
    measurement: &dyn Measurement,
    stop: &StopToken,
    sinks: &Sinks,
) -> MeasurementReport {
    let kind = measurement.kind();
    info!(%kind, "Measurement started");

    let (points, completed, message) = match measurement.run(stop, sinks) {
        Ok(points) => (points, true, format!("{} finished: {} points", kind, points)),
        Err(LoError::Aborted) => (0, false, format!("{} aborted", kind)),
        Err(e) => {
            warn!(%kind, error = %e, "Measurement failed");
            (0, false, format!("{} failed: {}", kind, e))
        }
    };

    sinks.status(completed, &message);
    MeasurementReport {
        kind,
        points,
        completed,
        message,
    }
}

/// Start `measurement` on a named worker thread.
pub fn spawn_measurement<M: Measurement>(
    measurement: M,
    sinks: Sinks,
) -> LoResult<Worker<MeasurementReport>> {
    let name = match measurement.kind() {
        MeasurementKind::IvCurve => "measure_iv_curve",
        MeasurementKind::FineLoSweep => "fine_lo_sweep",
        MeasurementKind::MagnetSweep => "sis_magnet_sweep",
        MeasurementKind::MixerDeflux => "mixer_deflux",
        MeasurementKind::MixerHeating => "mixer_heating",
    };
    Worker::spawn(WorkerConfig::new(name), move |stop| {
        run_measurement(&measurement, &stop, &sinks)
    })
}

/// Evenly spaced points from `low` to `high` inclusive.
///
/// `high` is included when it lies on the grid within rounding; a range
/// with `high < low` runs downwards.
pub fn linear_points(low: f64, high: f64, step: f64) -> Vec<f64> {
    let step = step.abs();
    if step == 0.0 || low == high {
        return vec![low];
    }
    let span = (high - low).abs();
    let count = (span / step + 1e-9).floor() as usize + 1;
    let sign = if high >= low { 1.0 } else { -1.0 };
    (0..count).map(|i| low + sign * step * i as f64).collect()
}

/// Dwell between steps, failing with `Aborted` once stopped.
pub(crate) fn dwell(stop: &StopToken, ms: u64) -> LoResult<()> {
    if stop.is_stopped() || !stop.sleep(std::time::Duration::from_millis(ms)) {
        return Err(LoError::Aborted);
    }
    Ok(())
}

/// Percent complete after `done` of `total` steps.
pub(crate) fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        100.0 * done as f64 / total as f64
    }
}
