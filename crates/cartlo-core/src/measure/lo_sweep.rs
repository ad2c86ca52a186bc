//! Fine LO sweep around the current tuning code.

use std::sync::Arc;

use cartlo_hal::{TuningCode, WarmUnit};
use tracing::debug;

use super::{dwell, percent, Measurement, MeasurementKind};
use crate::config::LoSweepConfig;
use crate::error::{LoError, LoResult};
use crate::lock::offset_code;
use crate::monitor::MonitorPause;
use crate::observe::{tab_row, Sinks};
use crate::rt::StopToken;

/// Codes `center - half ..= center + half` by `step`, clamped and deduplicated.
pub fn sweep_codes(center: TuningCode, half_window: u16, step: u16) -> Vec<TuningCode> {
    let step = step.max(1) as i64;
    let half = half_window as i64;
    let mut codes: Vec<TuningCode> = Vec::new();
    let mut offset = -half;
    while offset <= half {
        let code = offset_code(center, offset);
        if codes.last() != Some(&code) {
            codes.push(code);
        }
        offset += step;
    }
    codes
}

/// Steps the tuning code across a window, recording lock detect,
/// correction voltage and IF total power. Restores the starting code.
pub struct FineLoSweep {
    warm: Arc<dyn WarmUnit>,
    config: LoSweepConfig,
}

impl FineLoSweep {
    pub fn new(warm: Arc<dyn WarmUnit>, config: LoSweepConfig) -> LoResult<Self> {
        if config.step == 0 {
            return Err(LoError::InvalidArgument("LO sweep step 0".to_string()));
        }
        Ok(Self { warm, config })
    }
}

impl Measurement for FineLoSweep {
    fn kind(&self) -> MeasurementKind {
        MeasurementKind::FineLoSweep
    }

    fn run(&self, stop: &StopToken, sinks: &Sinks) -> LoResult<usize> {
        let warm = self.warm.as_ref();
        let _pause = MonitorPause::new(warm.monitor_gate());

        let start = warm.tuning_code()?;
        let codes = sweep_codes(start, self.config.half_window_steps, self.config.step);
        debug!(start, codes = codes.len(), "Fine LO sweep");

        for (i, &code) in codes.iter().enumerate() {
            dwell(stop, 0)?;
            warm.set_tuning_code(code)?;
            dwell(stop, self.config.settle_ms)?;
            let ld = warm.lock_detect_voltage()?;
            let cv = warm.correction_voltage()?;
            let iftp = warm.if_total_power()?;
            sinks.record(&tab_row(&[code as f64, ld, cv, iftp]));
            sinks.progress(percent(i + 1, codes.len()));
        }

        warm.set_tuning_code(start)?;
        Ok(codes.len())
    }
}
