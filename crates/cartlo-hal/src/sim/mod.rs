//! Simulated cartridge hardware for development and testing
//!
//! The simulated units share the facade traits with real hardware, so the
//! control engines can be exercised without a fieldbus:
//!
//! - [`SimWarmUnit`]: oscillator, PLL capture window, LO amplifier
//! - [`SimColdUnit`]: SIS junctions, magnets, heaters, LNAs
//! - [`SimPhotonicReceiver`]: reference delivery, coupled into the warm unit
//! - [`SimRouter`]: photonic and IF band switches
//! - [`SimPowerMeter`]: synthetic IF power as a function of bias
//!
//! [`SimBench`] wires one of each together.

mod cold;
mod photonic;
mod warm;

pub use cold::{ColdWrite, SimColdUnit};
pub use photonic::SimPhotonicReceiver;
pub use warm::{SimWarmConfig, SimWarmUnit};

use std::sync::{Arc, Mutex};

use crate::error::HalResult;
use crate::traits::{ColdUnit, SignalRouter, WarmUnit};
use crate::types::{Band, Polarization, Sideband};

/// Simulated photonic and IF switches.
#[derive(Debug, Default)]
pub struct SimRouter {
    photonic: Mutex<Option<Band>>,
    if_band: Mutex<Option<Band>>,
}

impl SimRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn photonic_band(&self) -> Option<Band> {
        *self.photonic.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn if_band(&self) -> Option<Band> {
        *self.if_band.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SignalRouter for SimRouter {
    fn select_photonic_band(&self, band: Band) -> HalResult<()> {
        *self.photonic.lock().unwrap_or_else(|e| e.into_inner()) = Some(band);
        Ok(())
    }

    fn select_if_band(&self, band: Band) -> HalResult<()> {
        *self.if_band.lock().unwrap_or_else(|e| e.into_inner()) = Some(band);
        Ok(())
    }
}

/// Synthetic IF power meter.
///
/// Each sideband's power is a downward parabola in the LO amplifier drain
/// voltage and in that sideband's junction voltage, so the response has a
/// single maximum at (`vd_peak`, `vj_peak`).
#[derive(Debug, Clone)]
pub struct SimPowerMeter {
    /// Power at the optimum, dBm
    pub peak_dbm: f64,
    /// Drain voltage of maximum power, V
    pub vd_peak: f64,
    /// Junction voltage of maximum power per sideband, mV
    pub vj_peak: [f64; 2],
    /// dB lost per V^2 of drain voltage error
    pub vd_curvature: f64,
    /// dB lost per mV^2 of junction voltage error
    pub vj_curvature: f64,
}

impl Default for SimPowerMeter {
    fn default() -> Self {
        Self {
            peak_dbm: -30.0,
            vd_peak: 1.4,
            vj_peak: [2.3, 2.3],
            vd_curvature: 20.0,
            vj_curvature: 2.0,
        }
    }
}

impl SimPowerMeter {
    /// Read (SB1, SB2) IF power for one polarization from the current bias.
    pub fn read(
        &self,
        warm: &dyn WarmUnit,
        cold: &dyn ColdUnit,
        pol: Polarization,
    ) -> HalResult<(f64, f64)> {
        let vd = warm.pa_drain_voltage(pol)?;
        let drive_loss = self.vd_curvature * (vd - self.vd_peak).powi(2);
        let mut power = [0.0; 2];
        for sb in Sideband::ALL {
            let vj = cold.sis_voltage(pol, sb)?;
            let bias_loss = self.vj_curvature * (vj - self.vj_peak[sb.index()]).powi(2);
            power[sb.index()] = self.peak_dbm - drive_loss - bias_loss;
        }
        Ok((power[0], power[1]))
    }
}

/// One simulated cartridge with its reference path and switches.
pub struct SimBench {
    pub warm: Arc<SimWarmUnit>,
    pub cold: Arc<SimColdUnit>,
    pub photonic: Arc<SimPhotonicReceiver>,
    pub router: Arc<SimRouter>,
    pub meter: SimPowerMeter,
}

impl SimBench {
    pub fn new(warm_config: SimWarmConfig) -> Self {
        let photonic = Arc::new(SimPhotonicReceiver::default());
        let warm = Arc::new(SimWarmUnit::new(warm_config).with_photonic(photonic.clone()));
        Self {
            warm,
            cold: Arc::new(SimColdUnit::default()),
            photonic,
            router: Arc::new(SimRouter::new()),
            meter: SimPowerMeter::default(),
        }
    }

    /// Read IF power for one polarization from the bench's current bias.
    pub fn if_power(&self, pol: Polarization) -> HalResult<(f64, f64)> {
        self.meter.read(self.warm.as_ref(), self.cold.as_ref(), pol)
    }
}

impl Default for SimBench {
    fn default() -> Self {
        Self::new(SimWarmConfig::default())
    }
}
