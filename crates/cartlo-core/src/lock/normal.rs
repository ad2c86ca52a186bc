//! Expanding alternating search around the coarse tuning code.
//!
//! ```text
//! center, +s, -s, +2s, -2s, ... until |offset| > window
//! ```

use cartlo_hal::TuningCode;
use tracing::{debug, info, warn};

use super::{adjust_pll, offset_code, settle, LockContext, LockReport, LockState, LockingStrategy};
use crate::config::{LockStrategyKind, NormalLockConfig};
use crate::error::LoResult;
use crate::freq_math::TuningRequest;

/// `LOCK_Normal` strategy.
#[derive(Debug, Default, Clone, Copy)]
pub struct NormalLock;

/// Search window half-width and step in tuning steps.
pub fn search_geometry(request: &TuningRequest, config: &NormalLockConfig) -> (u16, u16) {
    let window = config
        .window_steps
        .unwrap_or_else(|| request.mhz_to_steps(config.window_mhz));
    let step = config
        .step_steps
        .unwrap_or_else(|| request.mhz_to_steps(config.step_mhz))
        .max(1);
    (window, step)
}

/// Signed offsets visited by the search, center first.
pub fn search_offsets(window: u16, step: u16) -> Vec<i64> {
    let (window, step) = (window as i64, step.max(1) as i64);
    let mut offsets = vec![0];
    let mut k = 1;
    while k * step <= window {
        offsets.push(k * step);
        offsets.push(-k * step);
        k += 1;
    }
    offsets
}

impl LockingStrategy for NormalLock {
    fn name(&self) -> &'static str {
        "LOCK_Normal"
    }

    fn kind(&self) -> LockStrategyKind {
        LockStrategyKind::Normal
    }

    fn lock_pll(&self, ctx: &LockContext<'_>) -> LoResult<LockReport> {
        let solution = ctx.request.solve()?;
        let config = &ctx.config.normal;
        let (window, step) = search_geometry(ctx.request, config);
        let warm = ctx.warm;

        let _pause = ctx.pause_monitors();
        info!(
            center = solution.code,
            window,
            step,
            freq_lo = ctx.request.freq_lo_ghz,
            "Searching for lock"
        );

        let mut last: Option<TuningCode> = None;
        for offset in search_offsets(window, step) {
            let code = offset_code(solution.code, offset);
            // Clamped offsets past either end revisit the end code.
            if last == Some(code) || (offset != 0 && code as i64 != solution.code as i64 + offset)
            {
                continue;
            }
            last = Some(code);

            warm.set_tuning_code(code)?;
            settle(config.settle_ms);
            if warm.is_locked()? {
                debug!(code, offset, "Lock detected");
                warm.clear_unlock_detect()?;
                let adjust = adjust_pll(warm, 0.0, &ctx.config.adjust)?;
                let state = if adjust.locked {
                    LockState::Locked
                } else {
                    LockState::Failed
                };
                let report = LockReport::read(warm, state)?;
                info!(code = report.tuning_code, cv = report.correction_voltage, "PLL locked");
                return Ok(report);
            }
        }

        warn!(center = solution.code, window, "No lock within search window");
        LockReport::read(warm, LockState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::lock::test_support::{request_for, warm_config};
    use crate::observe::Sinks;
    use cartlo_hal::sim::SimWarmUnit;
    use cartlo_hal::{Monitored, WarmUnit};

    fn config(window: u16, step: u16) -> LockConfig {
        let mut config = crate::config::LoConfig::without_delays().lock;
        config.normal.window_steps = Some(window);
        config.normal.step_steps = Some(step);
        config
    }

    #[test]
    fn test_offsets_alternate_and_grow() {
        assert_eq!(search_offsets(10, 5), vec![0, 5, -5, 10, -10]);
        assert_eq!(search_offsets(4, 5), vec![0]);
        assert_eq!(search_offsets(2, 0), vec![0, 1, -1, 2, -2]);
    }

    #[test]
    fn test_default_geometry_from_mhz() {
        let warm = SimWarmUnit::default();
        let request = request_for(&warm, 14.0);
        let geometry = search_geometry(&request, &NormalLockConfig::default());
        assert_eq!(geometry, (50, 3));
    }

    #[test]
    fn test_finds_offset_lock() {
        // Locks only at 2015; coarse code for 14 GHz is 2000.
        let warm = SimWarmUnit::new(warm_config(2015, 0));
        let request = request_for(&warm, 14.0);
        assert_eq!(request.solve().unwrap().code, 2000);
        let config = config(100, 5);
        let sinks = Sinks::default();
        let ctx = LockContext::new(&warm, &request, &config, &sinks);

        let report = NormalLock.lock_pll(&ctx).unwrap();

        assert_eq!(report.state, LockState::Locked);
        assert_eq!(report.tuning_code, 2015);
        assert_eq!(warm.tuning_code().unwrap(), 2015);
        assert_eq!(warm.code_history(), vec![2000, 2005, 1995, 2010, 1990, 2015]);
        assert_eq!(warm.unlock_clears(), 1);
        assert!(report.correction_voltage.abs() < 1e-9);
        assert!(!warm.monitor_paused());
    }

    #[test]
    fn test_exhausted_window_fails() {
        let warm = SimWarmUnit::new(warm_config(2200, 0));
        let request = request_for(&warm, 14.0);
        let config = config(20, 5);
        let sinks = Sinks::default();
        let ctx = LockContext::new(&warm, &request, &config, &sinks);

        let report = NormalLock.lock_pll(&ctx).unwrap();

        assert_eq!(report.state, LockState::Failed);
        assert!(!report.is_locked());
        assert_eq!(warm.code_history().len(), 9);
        assert!(warm.code_history().iter().all(|c| (1980..=2020).contains(c)));
        assert_eq!(warm.unlock_clears(), 0);
        assert!(!warm.monitor_paused());
    }

    #[test]
    fn test_window_clamped_at_range_end() {
        let warm = SimWarmUnit::new(warm_config(4095, 0));
        let request = request_for(&warm, 16.09);
        let config = config(10, 5);
        let sinks = Sinks::default();
        let ctx = LockContext::new(&warm, &request, &config, &sinks);

        let report = NormalLock.lock_pll(&ctx).unwrap();
        assert!(report.is_locked());
        assert_eq!(report.tuning_code, 4095);
        assert!(warm.code_history().iter().all(|&c| c <= 4095));
    }

    #[test]
    fn test_invalid_request_touches_nothing() {
        let warm = SimWarmUnit::new(warm_config(2000, 0));
        let mut request = request_for(&warm, 14.0);
        request.osc_high_ghz = request.osc_low_ghz;
        let config = config(10, 5);
        let sinks = Sinks::default();
        let ctx = LockContext::new(&warm, &request, &config, &sinks);

        assert!(NormalLock.lock_pll(&ctx).unwrap_err().is_configuration());
        assert!(warm.code_history().is_empty());
    }
}
