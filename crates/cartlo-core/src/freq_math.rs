//! # Frequency Math
//!
//! Maps an LO frequency onto the oscillator's 12-bit coarse-tune code and
//! back. The oscillator frequency is the LO frequency divided by the warm
//! and cold multipliers; the code is its linear position between the
//! oscillator's low and high limits.
//!
//! ```text
//! f_osc = f_LO / (warm × cold)
//! code  = round( (f_osc - f_low) / (f_high - f_low) × 4095 )   clamped to [0, 4095]
//! f_REF = f_LO + f_FLOOG   (LO below reference)
//!       = f_LO - f_FLOOG   (LO above reference)
//! ```

use cartlo_hal::{clamp_tuning_code, SidebandLock, TuningCode, WarmUnitInfo, TUNING_CODE_MAX};
use serde::{Deserialize, Serialize};

use crate::error::{LoError, LoResult};

/// Inputs of one lock attempt. Immutable for the duration of the attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningRequest {
    /// LO frequency, GHz
    pub freq_lo_ghz: f64,
    /// Offset generator frequency, GHz
    pub freq_floog_ghz: f64,
    pub sb_lock: SidebandLock,
    /// Oscillator frequency at code 0, GHz
    pub osc_low_ghz: f64,
    /// Oscillator frequency at code 4095, GHz
    pub osc_high_ghz: f64,
    pub warm_multiplier: u32,
    pub cold_multiplier: u32,
}

impl TuningRequest {
    /// Build a request from a warm unit's description and a cold multiplier.
    pub fn new(
        freq_lo_ghz: f64,
        freq_floog_ghz: f64,
        sb_lock: SidebandLock,
        warm: &WarmUnitInfo,
        cold_multiplier: u32,
    ) -> Self {
        Self {
            freq_lo_ghz,
            freq_floog_ghz,
            sb_lock,
            osc_low_ghz: warm.osc_low_ghz,
            osc_high_ghz: warm.osc_high_ghz,
            warm_multiplier: warm.warm_multiplier,
            cold_multiplier,
        }
    }

    /// Solve this request for its coarse tuning code.
    pub fn solve(&self) -> LoResult<TuningSolution> {
        compute_tuning_code(
            self.freq_lo_ghz,
            self.freq_floog_ghz,
            self.sb_lock,
            self.osc_low_ghz,
            self.osc_high_ghz,
            self.warm_multiplier,
            self.cold_multiplier,
        )
    }

    /// Oscillator frequency step per tuning code, GHz.
    pub fn resolution_ghz(&self) -> f64 {
        (self.osc_high_ghz - self.osc_low_ghz) / TUNING_CODE_MAX as f64
    }

    /// Convert an oscillator frequency span in MHz to whole tuning steps.
    pub fn mhz_to_steps(&self, mhz: f64) -> u16 {
        let resolution_mhz = self.resolution_ghz() * 1000.0;
        if resolution_mhz <= 0.0 {
            return 0;
        }
        (mhz / resolution_mhz).round().clamp(0.0, TUNING_CODE_MAX as f64) as u16
    }

    /// FLOOG expressed as an oscillator offset in tuning steps.
    pub fn floog_offset_steps(&self) -> i64 {
        let resolution = self.resolution_ghz();
        if resolution <= 0.0 || self.warm_multiplier == 0 {
            return 0;
        }
        (self.freq_floog_ghz / self.warm_multiplier as f64 / resolution).round() as i64
    }
}

/// Result of solving a tuning request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningSolution {
    pub code: TuningCode,
    /// Oscillator frequency implied by the request, GHz
    pub osc_freq_ghz: f64,
    /// Reference frequency the PLL expects, GHz
    pub freq_ref_ghz: f64,
}

fn validate(low: f64, high: f64, warm: u32, cold: u32) -> LoResult<()> {
    if !(low < high) {
        return Err(LoError::InvalidTuning(format!(
            "oscillator limits {} >= {} GHz",
            low, high
        )));
    }
    if warm == 0 || cold == 0 {
        return Err(LoError::InvalidTuning(format!(
            "multipliers warm={} cold={}",
            warm, cold
        )));
    }
    Ok(())
}

/// Compute the coarse tuning code and expected reference frequency.
///
/// Fails if `osc_low_ghz >= osc_high_ghz`, `freq_lo_ghz <= 0`, or either
/// multiplier is zero. Frequencies outside the oscillator range clamp to the
/// end codes.
pub fn compute_tuning_code(
    freq_lo_ghz: f64,
    freq_floog_ghz: f64,
    sb_lock: SidebandLock,
    osc_low_ghz: f64,
    osc_high_ghz: f64,
    warm_multiplier: u32,
    cold_multiplier: u32,
) -> LoResult<TuningSolution> {
    validate(osc_low_ghz, osc_high_ghz, warm_multiplier, cold_multiplier)?;
    if !(freq_lo_ghz > 0.0) {
        return Err(LoError::InvalidTuning(format!("LO frequency {} GHz", freq_lo_ghz)));
    }

    let osc_freq_ghz = freq_lo_ghz / (warm_multiplier as f64 * cold_multiplier as f64);
    let fraction = (osc_freq_ghz - osc_low_ghz) / (osc_high_ghz - osc_low_ghz);
    let code = clamp_tuning_code((fraction * TUNING_CODE_MAX as f64).round() as i64);

    let freq_ref_ghz = match sb_lock {
        SidebandLock::BelowReference => freq_lo_ghz + freq_floog_ghz,
        SidebandLock::AboveReference => freq_lo_ghz - freq_floog_ghz,
    };

    Ok(TuningSolution {
        code,
        osc_freq_ghz,
        freq_ref_ghz,
    })
}

/// Recover the LO frequency a tuning code corresponds to, GHz.
pub fn lo_frequency_for_code(
    code: TuningCode,
    osc_low_ghz: f64,
    osc_high_ghz: f64,
    warm_multiplier: u32,
    cold_multiplier: u32,
) -> LoResult<f64> {
    validate(osc_low_ghz, osc_high_ghz, warm_multiplier, cold_multiplier)?;
    let code = code.min(TUNING_CODE_MAX);
    let osc = osc_low_ghz + (osc_high_ghz - osc_low_ghz) * code as f64 / TUNING_CODE_MAX as f64;
    Ok(osc * warm_multiplier as f64 * cold_multiplier as f64)
}
