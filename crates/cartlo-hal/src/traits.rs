//! Hardware facade traits
//!
//! These are the only paths by which the control engines touch hardware.
//! Every method takes `&self`: implementations serialize their own bus
//! access so that a facade can be shared between the monitor poller and a
//! worker thread.

use crate::error::HalResult;
use crate::gate::MonitorGate;
use crate::types::{
    Band, ColdUnitInfo, Polarization, Sideband, TuningCode, WarmUnitInfo,
    CORRECTION_VOLTAGE_RAIL, LOCK_DETECT_THRESHOLD,
};

/// A unit with a periodic monitor poller that can be paused.
pub trait Monitored: Send + Sync {
    /// Gate shared with the unit's monitor poller
    fn monitor_gate(&self) -> &MonitorGate;

    /// Read and cache the unit's monitor points once
    fn poll_monitor(&self) -> HalResult<()>;

    fn pause_monitor(&self) {
        self.monitor_gate().pause();
    }

    fn resume_monitor(&self) {
        self.monitor_gate().resume();
    }

    fn monitor_paused(&self) -> bool {
        self.monitor_gate().is_paused()
    }
}

/// Warm cartridge assembly: tunable oscillator, PLL and LO power amplifier.
pub trait WarmUnit: Monitored {
    // =========================================================================
    // Device Information
    // =========================================================================

    fn info(&self) -> WarmUnitInfo;

    // =========================================================================
    // Oscillator and PLL
    // =========================================================================

    /// Command the oscillator coarse tune
    fn set_tuning_code(&self, code: TuningCode) -> HalResult<()>;

    /// Last commanded coarse tune
    fn tuning_code(&self) -> HalResult<TuningCode>;

    /// PLL lock-detect voltage, V
    fn lock_detect_voltage(&self) -> HalResult<f64>;

    /// PLL correction voltage, V
    fn correction_voltage(&self) -> HalResult<f64>;

    /// IF total power detector, V
    fn if_total_power(&self) -> HalResult<f64>;

    /// Reference total power detector, V
    fn reference_total_power(&self) -> HalResult<f64>;

    /// Photomixer current, mA
    fn photomixer_current(&self) -> HalResult<f64>;

    /// Null (disable) or release the PLL loop integrator
    fn set_null_integrator(&self, nulled: bool) -> HalResult<()>;

    /// Clear the latched unlock-detect flag
    fn clear_unlock_detect(&self) -> HalResult<()>;

    /// Whether the unlock-detect latch is set
    fn unlock_detected(&self) -> HalResult<bool>;

    /// Lock test: lock-detect above threshold and correction voltage off the rails
    fn is_locked(&self) -> HalResult<bool> {
        let lock_detect = self.lock_detect_voltage()?;
        if lock_detect < LOCK_DETECT_THRESHOLD {
            return Ok(false);
        }
        Ok(self.correction_voltage()?.abs() < CORRECTION_VOLTAGE_RAIL)
    }

    // =========================================================================
    // LO Power Amplifier
    // =========================================================================

    /// Set LO amplifier drain voltage, V
    fn set_pa_drain_voltage(&self, pol: Polarization, volts: f64) -> HalResult<()>;

    /// Set LO amplifier gate voltage, V
    fn set_pa_gate_voltage(&self, pol: Polarization, volts: f64) -> HalResult<()>;

    /// Last commanded LO amplifier drain voltage, V
    fn pa_drain_voltage(&self, pol: Polarization) -> HalResult<f64>;
}

/// Cold cartridge: SIS mixers, magnets, heaters and LNAs.
pub trait ColdUnit: Monitored {
    fn info(&self) -> ColdUnitInfo;

    // =========================================================================
    // SIS Junctions
    // =========================================================================

    /// Write the junction bias voltage in one step, mV
    fn set_sis_voltage(&self, pol: Polarization, sb: Sideband, millivolts: f64) -> HalResult<()>;

    /// Junction bias voltage readback, mV
    fn sis_voltage(&self, pol: Polarization, sb: Sideband) -> HalResult<f64>;

    /// Junction current, uA
    fn sis_current(&self, pol: Polarization, sb: Sideband) -> HalResult<f64>;

    // =========================================================================
    // Magnets and Heaters
    // =========================================================================

    /// Write the SIS magnet current in one step, mA
    fn set_sis_magnet_current(&self, pol: Polarization, sb: Sideband, milliamps: f64)
        -> HalResult<()>;

    /// SIS magnet current readback, mA
    fn sis_magnet_current(&self, pol: Polarization, sb: Sideband) -> HalResult<f64>;

    /// Switch the mixer heater
    fn set_sis_heater(&self, pol: Polarization, on: bool) -> HalResult<()>;

    /// Heater current, mA
    fn heater_current(&self, pol: Polarization) -> HalResult<f64>;

    /// Mixer stage temperature, K
    fn mixer_temperature(&self) -> HalResult<f64>;

    // =========================================================================
    // LNAs
    // =========================================================================

    fn set_lna_enable(&self, pol: Polarization, sb: Sideband, enable: bool) -> HalResult<()>;
}

/// Photonic receiver delivering the reference to the photomixer.
pub trait PhotonicReceiver: Send + Sync {
    /// Optical amplifier modulation input, V
    fn modulation_voltage(&self) -> HalResult<f64>;

    fn set_modulation_voltage(&self, volts: f64) -> HalResult<()>;

    /// Photodetector power, mW
    fn photodetect_power(&self) -> HalResult<f64>;

    /// Photodetector current, mA
    fn photodetect_current(&self) -> HalResult<f64>;
}

/// Shared photonic and IF switches selecting which band is observed.
pub trait SignalRouter: Send + Sync {
    fn select_photonic_band(&self, band: Band) -> HalResult<()>;

    fn select_if_band(&self, band: Band) -> HalResult<()>;
}
