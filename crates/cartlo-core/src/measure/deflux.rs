//! Mixer deflux by a decaying alternating magnet current.
//!
//! Trapped flux in the junctions is shaken out by driving the magnet
//! through `+I0, -I0, +I0·k, -I0·k, …` until the amplitude falls below
//! the floor, then parking it at zero.

use std::sync::Arc;

use cartlo_hal::{ColdUnit, Polarization, Sideband};
use tracing::info;

use super::{dwell, percent, Measurement, MeasurementKind};
use crate::config::DefluxConfig;
use crate::error::{LoError, LoResult};
use crate::monitor::MonitorPause;
use crate::observe::{tab_row, Sinks};
use crate::rt::StopToken;

/// The alternating setpoints, ending with zero.
pub fn deflux_sequence(start_ma: f64, decay: f64, min_ma: f64) -> Vec<f64> {
    let mut sequence = Vec::new();
    let mut amplitude = start_ma.abs();
    if decay > 0.0 && decay < 1.0 {
        while amplitude >= min_ma && amplitude > 0.0 {
            sequence.push(amplitude);
            sequence.push(-amplitude);
            amplitude *= decay;
        }
    }
    sequence.push(0.0);
    sequence
}

/// Deflux both junctions of one polarization.
pub struct MixerDeflux {
    cold: Arc<dyn ColdUnit>,
    pol: Polarization,
    config: DefluxConfig,
}

impl MixerDeflux {
    pub fn new(cold: Arc<dyn ColdUnit>, pol: Polarization, config: DefluxConfig) -> LoResult<Self> {
        if !cold.info().has_magnet {
            return Err(LoError::InvalidArgument(format!(
                "cold cartridge {} has no SIS magnet",
                cold.info().serial
            )));
        }
        Ok(Self { cold, pol, config })
    }
}

impl Measurement for MixerDeflux {
    fn kind(&self) -> MeasurementKind {
        MeasurementKind::MixerDeflux
    }

    fn run(&self, stop: &StopToken, sinks: &Sinks) -> LoResult<usize> {
        let cold = self.cold.as_ref();
        let pol = self.pol;
        let _pause = MonitorPause::new(cold.monitor_gate());

        let sequence = deflux_sequence(self.config.start_ma, self.config.decay, self.config.min_ma);
        info!(%pol, steps = sequence.len(), "Mixer deflux");

        for (i, &im) in sequence.iter().enumerate() {
            dwell(stop, 0)?;
            for sb in Sideband::ALL {
                cold.set_sis_magnet_current(pol, sb, im)?;
            }
            sinks.record(&tab_row(&[im]));
            sinks.progress(percent(i + 1, sequence.len()));
            if i + 1 < sequence.len() {
                dwell(stop, self.config.dwell_ms)?;
            }
        }
        Ok(sequence.len())
    }
}
