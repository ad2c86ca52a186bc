//! Correction voltage nulling.
//!
//! Once locked, the tuning code is walked one step at a time until the PLL
//! correction voltage sits at the target (normally zero), so the loop has
//! its full range left to track drift. The correction voltage falls as the
//! code rises.

use cartlo_hal::{WarmUnit, TUNING_CODE_MAX};
use tracing::{debug, warn};

use super::settle;
use crate::config::PllAdjustConfig;
use crate::error::LoResult;

/// Result of [`adjust_pll`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PllAdjustReport {
    /// Tuning steps taken
    pub steps: u32,
    pub correction_voltage: f64,
    /// Still locked at the end
    pub locked: bool,
    /// Correction voltage ended within tolerance of the target
    pub on_target: bool,
}

/// Step the tuning code until the correction voltage is within tolerance
/// of `target_cv`, lock is lost, or the step budget runs out.
pub fn adjust_pll(
    warm: &dyn WarmUnit,
    target_cv: f64,
    config: &PllAdjustConfig,
) -> LoResult<PllAdjustReport> {
    let mut steps = 0u32;
    loop {
        let locked = warm.is_locked()?;
        let cv = warm.correction_voltage()?;
        let on_target = (cv - target_cv).abs() <= config.tolerance_volts;

        if !locked || on_target || steps >= config.max_steps {
            if !locked {
                warn!(steps, cv, "Lock lost while adjusting correction voltage");
            } else if !on_target {
                warn!(steps, cv, target_cv, "Correction voltage adjust step budget exhausted");
            } else {
                debug!(steps, cv, "Correction voltage on target");
            }
            return Ok(PllAdjustReport {
                steps,
                correction_voltage: cv,
                locked,
                on_target: locked && on_target,
            });
        }

        let code = warm.tuning_code()?;
        let next = if cv > target_cv {
            if code >= TUNING_CODE_MAX {
                return Ok(PllAdjustReport {
                    steps,
                    correction_voltage: cv,
                    locked,
                    on_target: false,
                });
            }
            code + 1
        } else {
            if code == 0 {
                return Ok(PllAdjustReport {
                    steps,
                    correction_voltage: cv,
                    locked,
                    on_target: false,
                });
            }
            code - 1
        };
        warm.set_tuning_code(next)?;
        steps += 1;
        settle(config.dwell_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::test_support::warm_config;
    use cartlo_hal::sim::SimWarmUnit;

    fn config() -> PllAdjustConfig {
        PllAdjustConfig {
            tolerance_volts: 0.25,
            max_steps: 100,
            dwell_ms: 0,
        }
    }

    #[test]
    fn test_walks_to_zero() {
        let warm = SimWarmUnit::new(warm_config(2048, 12));
        warm.set_tuning_code(2040).unwrap();
        assert!(warm.correction_voltage().unwrap() > 3.0);

        let report = adjust_pll(&warm, 0.0, &config()).unwrap();
        assert!(report.locked);
        assert!(report.on_target);
        assert_eq!(report.steps, 8);
        assert_eq!(warm.tuning_code().unwrap(), 2048);
    }

    #[test]
    fn test_walks_down_from_above() {
        let warm = SimWarmUnit::new(warm_config(2048, 12));
        warm.set_tuning_code(2055).unwrap();
        let report = adjust_pll(&warm, 0.0, &config()).unwrap();
        assert!(report.on_target);
        assert_eq!(warm.tuning_code().unwrap(), 2048);
    }

    #[test]
    fn test_nonzero_target() {
        let warm = SimWarmUnit::new(warm_config(2048, 12));
        warm.set_tuning_code(2048).unwrap();
        let report = adjust_pll(&warm, -2.0, &config()).unwrap();
        assert!(report.on_target);
        assert_eq!(warm.tuning_code().unwrap(), 2053);
    }

    #[test]
    fn test_unlocked_does_nothing() {
        let warm = SimWarmUnit::new(warm_config(2048, 12));
        warm.set_tuning_code(100).unwrap();
        let report = adjust_pll(&warm, 0.0, &config()).unwrap();
        assert!(!report.locked);
        assert_eq!(report.steps, 0);
        assert_eq!(warm.code_history(), vec![100]);
    }

    #[test]
    fn test_step_budget() {
        let warm = SimWarmUnit::new(warm_config(2048, 12));
        warm.set_tuning_code(2038).unwrap();
        let mut cfg = config();
        cfg.max_steps = 3;
        let report = adjust_pll(&warm, 0.0, &cfg).unwrap();
        assert_eq!(report.steps, 3);
        assert!(!report.on_target);
        assert_eq!(warm.tuning_code().unwrap(), 2041);
    }
}
