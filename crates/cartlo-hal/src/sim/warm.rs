//! Simulated warm cartridge assembly
//!
//! The PLL is modelled as a capture window of tuning codes around
//! `lock_center`. Inside the window, with the loop integrator released and
//! enough reference power, the loop locks and the correction voltage is
//! linear in the code offset. IF total power peaks at
//! `lock_center + iftp_peak_offset` and scales with photomixer current.

use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::debug;

use super::photonic::SimPhotonicReceiver;
use crate::error::{HalError, HalResult};
use crate::gate::MonitorGate;
use crate::traits::{Monitored, PhotonicReceiver, WarmUnit};
use crate::types::{Polarization, TuningCode, WarmUnitInfo, TUNING_CODE_MAX};

const LOCK_DETECT_LOCKED: f64 = 4.6;
const LOCK_DETECT_UNLOCKED: f64 = 0.2;
const PA_DRAIN_MAX: f64 = 2.5;

/// Parameters of the simulated oscillator and PLL.
#[derive(Debug, Clone)]
pub struct SimWarmConfig {
    pub info: WarmUnitInfo,
    /// Tuning code at which the PLL correction voltage is zero
    pub lock_center: TuningCode,
    /// Codes within this distance of `lock_center` can lock
    pub capture_half_width: u16,
    /// Correction voltage per tuning step away from `lock_center`, V
    pub cv_slope: f64,
    /// Offset of the IF total power peak from `lock_center`, steps
    pub iftp_peak_offset: i32,
    /// Gaussian width of the IF total power response, steps
    pub iftp_width: f64,
    /// IF total power magnitude per mA of photomixer current, V
    pub iftp_gain: f64,
    /// Photomixer current magnitude needed for lock when a photonic
    /// receiver is attached, mA
    pub min_photomixer_current: f64,
    /// Photomixer current magnitude per volt of modulation, mA
    pub photomixer_per_volt: f64,
    /// Standard deviation of additive readback noise, V
    pub noise_std: f64,
}

impl Default for SimWarmConfig {
    fn default() -> Self {
        Self {
            info: WarmUnitInfo {
                serial: "SIM-WCA".to_string(),
                osc_low_ghz: 12.0,
                osc_high_ghz: 16.095,
                warm_multiplier: 1,
            },
            lock_center: 2048,
            capture_half_width: 12,
            cv_slope: -0.4,
            iftp_peak_offset: 0,
            iftp_width: 40.0,
            iftp_gain: 1.5,
            min_photomixer_current: 0.5,
            photomixer_per_volt: 0.8,
            noise_std: 0.0,
        }
    }
}

#[derive(Debug)]
struct WarmState {
    code: TuningCode,
    nulled: bool,
    unlock_latched: bool,
    was_locked: bool,
    drain: [f64; 2],
    gate: [f64; 2],
    code_history: Vec<TuningCode>,
    null_toggles: u32,
    unlock_clears: u32,
}

/// Simulated warm cartridge assembly for development and testing.
pub struct SimWarmUnit {
    config: SimWarmConfig,
    state: Mutex<WarmState>,
    photonic: Option<Arc<SimPhotonicReceiver>>,
    gate: MonitorGate,
    rng: Mutex<StdRng>,
}

impl SimWarmUnit {
    pub fn new(config: SimWarmConfig) -> Self {
        Self {
            config,
            state: Mutex::new(WarmState {
                code: 0,
                nulled: false,
                unlock_latched: false,
                was_locked: false,
                drain: [0.0; 2],
                gate: [0.0; 2],
                code_history: Vec::new(),
                null_toggles: 0,
                unlock_clears: 0,
            }),
            photonic: None,
            gate: MonitorGate::new(),
            rng: Mutex::new(StdRng::seed_from_u64(0x5EED)),
        }
    }

    /// Couple reference power to a simulated photonic receiver.
    pub fn with_photonic(mut self, photonic: Arc<SimPhotonicReceiver>) -> Self {
        self.photonic = Some(photonic);
        self
    }

    pub fn config(&self) -> &SimWarmConfig {
        &self.config
    }

    /// Every tuning code commanded so far, in order.
    pub fn code_history(&self) -> Vec<TuningCode> {
        self.lock_state().code_history.clone()
    }

    /// Number of times the loop integrator has been nulled.
    pub fn null_toggles(&self) -> u32 {
        self.lock_state().null_toggles
    }

    /// Number of times the unlock latch has been cleared.
    pub fn unlock_clears(&self) -> u32 {
        self.lock_state().unlock_clears
    }

    fn lock_state(&self) -> MutexGuard<'_, WarmState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn modulation(&self) -> f64 {
        self.photonic
            .as_ref()
            .and_then(|p| p.modulation_voltage().ok())
            .unwrap_or(0.0)
    }

    fn photomixer_magnitude(&self) -> f64 {
        match self.photonic {
            Some(_) => self.config.photomixer_per_volt * self.modulation(),
            None => 1.0,
        }
    }

    fn locked(&self, state: &WarmState) -> bool {
        if state.nulled {
            return false;
        }
        if self.photonic.is_some()
            && self.photomixer_magnitude() < self.config.min_photomixer_current
        {
            return false;
        }
        let offset = (state.code as i32 - self.config.lock_center as i32).unsigned_abs();
        offset <= self.config.capture_half_width as u32
    }

    fn update_latch(&self, state: &mut WarmState) {
        let locked = self.locked(state);
        if state.was_locked && !locked {
            state.unlock_latched = true;
        }
        state.was_locked = locked;
    }

    fn noise(&self) -> f64 {
        if self.config.noise_std <= 0.0 {
            return 0.0;
        }
        let normal = match Normal::new(0.0, self.config.noise_std) {
            Ok(n) => n,
            Err(_) => return 0.0,
        };
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        normal.sample(&mut *rng)
    }

    fn check_drain(volts: f64) -> HalResult<()> {
        if !(0.0..=PA_DRAIN_MAX).contains(&volts) {
            return Err(HalError::out_of_range("LO PA drain voltage", volts, 0.0, PA_DRAIN_MAX));
        }
        Ok(())
    }
}

impl Default for SimWarmUnit {
    fn default() -> Self {
        Self::new(SimWarmConfig::default())
    }
}

impl Monitored for SimWarmUnit {
    fn monitor_gate(&self) -> &MonitorGate {
        &self.gate
    }

    fn poll_monitor(&self) -> HalResult<()> {
        let mut state = self.lock_state();
        self.update_latch(&mut state);
        self.gate.record_poll();
        Ok(())
    }
}

impl WarmUnit for SimWarmUnit {
    fn info(&self) -> WarmUnitInfo {
        self.config.info.clone()
    }

    fn set_tuning_code(&self, code: TuningCode) -> HalResult<()> {
        if code > TUNING_CODE_MAX {
            return Err(HalError::out_of_range(
                "tuning code",
                code as f64,
                0.0,
                TUNING_CODE_MAX as f64,
            ));
        }
        let mut state = self.lock_state();
        state.code = code;
        state.code_history.push(code);
        self.update_latch(&mut state);
        debug!(code, "Simulated oscillator tuned");
        Ok(())
    }

    fn tuning_code(&self) -> HalResult<TuningCode> {
        Ok(self.lock_state().code)
    }

    fn lock_detect_voltage(&self) -> HalResult<f64> {
        let state = self.lock_state();
        Ok(if self.locked(&state) {
            LOCK_DETECT_LOCKED
        } else {
            LOCK_DETECT_UNLOCKED
        })
    }

    fn correction_voltage(&self) -> HalResult<f64> {
        let state = self.lock_state();
        if !self.locked(&state) {
            return Ok(0.0);
        }
        let offset = state.code as f64 - self.config.lock_center as f64;
        Ok(self.config.cv_slope * offset + self.noise())
    }

    fn if_total_power(&self) -> HalResult<f64> {
        let code = self.lock_state().code as f64;
        let peak = self.config.lock_center as f64 + self.config.iftp_peak_offset as f64;
        let x = (code - peak) / self.config.iftp_width;
        let level = self.config.iftp_gain * self.photomixer_magnitude() * (-x * x).exp();
        Ok(-(level + 0.02) + self.noise())
    }

    fn reference_total_power(&self) -> HalResult<f64> {
        Ok(-0.5 * self.photomixer_magnitude())
    }

    fn photomixer_current(&self) -> HalResult<f64> {
        Ok(-self.photomixer_magnitude())
    }

    fn set_null_integrator(&self, nulled: bool) -> HalResult<()> {
        let mut state = self.lock_state();
        if nulled && !state.nulled {
            state.null_toggles += 1;
        }
        state.nulled = nulled;
        self.update_latch(&mut state);
        Ok(())
    }

    fn clear_unlock_detect(&self) -> HalResult<()> {
        let mut state = self.lock_state();
        state.unlock_latched = false;
        state.unlock_clears += 1;
        Ok(())
    }

    fn unlock_detected(&self) -> HalResult<bool> {
        Ok(self.lock_state().unlock_latched)
    }

    fn set_pa_drain_voltage(&self, pol: Polarization, volts: f64) -> HalResult<()> {
        Self::check_drain(volts)?;
        self.lock_state().drain[pol.index()] = volts;
        Ok(())
    }

    fn set_pa_gate_voltage(&self, pol: Polarization, volts: f64) -> HalResult<()> {
        if !(-0.5..=0.5).contains(&volts) {
            return Err(HalError::out_of_range("LO PA gate voltage", volts, -0.5, 0.5));
        }
        self.lock_state().gate[pol.index()] = volts;
        Ok(())
    }

    fn pa_drain_voltage(&self, pol: Polarization) -> HalResult<f64> {
        Ok(self.lock_state().drain[pol.index()])
    }
}
