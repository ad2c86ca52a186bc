//! Correction-voltage multipoint search.
//!
//! Samples a handful of tuning codes around the coarse code with the loop
//! integrator cycled at each, keeps the ones that show lock-detect, and
//! interpolates the code where the correction voltage crosses zero.

use cartlo_hal::{PhotonicReceiver, TuningCode, WarmUnit, LOCK_DETECT_THRESHOLD};
use tracing::{debug, info, warn};

use super::photonic::{ramp_modulation, RampDirection};
use super::{adjust_pll, offset_code, settle, LockContext, LockReport, LockState, LockingStrategy};
use crate::config::{CvPointsConfig, LockStrategyKind, PhotonicRampConfig};
use crate::error::LoResult;

/// `ICT_19283_LOCK_CV_Points` strategy.
#[derive(Debug, Default, Clone, Copy)]
pub struct CvPointsLock;

/// One probe of the search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockSearchSample {
    pub code: TuningCode,
    pub correction_voltage: f64,
    pub lock_detect: f64,
}

/// Codes sampled around `center`: `num_points` evenly spaced over
/// `center ± interval`.
pub fn sample_codes(center: TuningCode, num_points: u16, interval: u16) -> Vec<TuningCode> {
    if num_points <= 1 {
        return vec![center];
    }
    let spacing = 2.0 * interval as f64 / (num_points - 1) as f64;
    (0..num_points)
        .map(|i| {
            let offset = -(interval as f64) + i as f64 * spacing;
            offset_code(center, offset.round() as i64)
        })
        .collect()
}

/// Where to commit, given the samples that showed lock-detect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CvTarget {
    /// Exactly one sample qualified
    Single(TuningCode),
    /// Zero crossing of the fitted line
    Interpolated { code: TuningCode, slope: f64 },
    /// Slope was not negative enough; midpoint of first and last
    Midpoint { code: TuningCode, slope: f64 },
}

impl CvTarget {
    pub fn code(&self) -> TuningCode {
        match *self {
            CvTarget::Single(code) => code,
            CvTarget::Interpolated { code, .. } | CvTarget::Midpoint { code, .. } => code,
        }
    }
}

/// Choose the code to commit from the qualifying samples, `None` if none
/// qualified.
pub fn choose_target(samples: &[LockSearchSample], min_negative_slope: f64) -> Option<CvTarget> {
    match samples {
        [] => None,
        [only] => Some(CvTarget::Single(only.code)),
        [first, .., last] => {
            let dx = last.code as f64 - first.code as f64;
            let slope = if dx != 0.0 {
                (last.correction_voltage - first.correction_voltage) / dx
            } else {
                0.0
            };
            if slope < -min_negative_slope {
                let zero = first.code as f64 - first.correction_voltage / slope;
                Some(CvTarget::Interpolated {
                    code: cartlo_hal::clamp_tuning_code(zero.round() as i64),
                    slope,
                })
            } else {
                let mid = (first.code as i64 + last.code as i64) / 2;
                Some(CvTarget::Midpoint {
                    code: cartlo_hal::clamp_tuning_code(mid),
                    slope,
                })
            }
        }
    }
}

/// Nudge modulation until |IF total power| is inside `[low, high]`.
fn refine_photonic(
    warm: &dyn WarmUnit,
    photonic: &dyn PhotonicReceiver,
    ramp: &PhotonicRampConfig,
    config: &CvPointsConfig,
) -> LoResult<()> {
    let iftp = warm.if_total_power()?.abs();
    if iftp < config.iftp_low {
        ramp_modulation(photonic, ramp, RampDirection::Up, None, || {
            Ok(warm.if_total_power()?.abs() >= config.iftp_low)
        })?;
    } else if iftp > config.iftp_high {
        ramp_modulation(photonic, ramp, RampDirection::Down, None, || {
            Ok(warm.if_total_power()?.abs() <= config.iftp_high)
        })?;
    }
    Ok(())
}

fn locked_report(ctx: &LockContext<'_>) -> LoResult<LockReport> {
    let adjust = adjust_pll(ctx.warm, 0.0, &ctx.config.adjust)?;
    let state = if adjust.locked {
        LockState::Locked
    } else {
        LockState::Failed
    };
    LockReport::read(ctx.warm, state)
}

impl LockingStrategy for CvPointsLock {
    fn name(&self) -> &'static str {
        "ICT_19283_LOCK_CV_Points"
    }

    fn kind(&self) -> LockStrategyKind {
        LockStrategyKind::CvPoints
    }

    fn lock_pll(&self, ctx: &LockContext<'_>) -> LoResult<LockReport> {
        let photonic = ctx.photonic()?;
        let solution = ctx.request.solve()?;
        let config = &ctx.config.cv_points;
        let ramp = &ctx.config.photonic;
        let warm = ctx.warm;

        let _pause = ctx.pause_monitors();

        ramp_modulation(photonic, ramp, RampDirection::Up, None, || {
            Ok(warm.photomixer_current()?.abs() >= config.photomixer_target_ma)
        })?;

        if warm.is_locked()? {
            info!(code = warm.tuning_code()?, "Already locked");
            let report = locked_report(ctx)?;
            if config.refine_photonic {
                refine_photonic(warm, photonic, ramp, config)?;
            }
            return Ok(report);
        }

        let mut samples = Vec::with_capacity(config.num_points as usize);
        for code in sample_codes(solution.code, config.num_points, config.interval_steps) {
            warm.set_null_integrator(true)?;
            warm.set_tuning_code(code)?;
            settle(config.settle_ms);
            warm.set_null_integrator(false)?;
            settle(config.settle_ms);

            let sample = LockSearchSample {
                code,
                correction_voltage: warm.correction_voltage()?,
                lock_detect: warm.lock_detect_voltage()?,
            };
            debug!(?sample, "CV point");
            if sample.lock_detect > LOCK_DETECT_THRESHOLD {
                samples.push(sample);
            }
        }

        let Some(target) = choose_target(&samples, config.min_negative_slope) else {
            warn!(center = solution.code, "No sampled code showed lock-detect");
            ctx.sinks.status(false, "CV points search found no lock-detect");
            return LockReport::read(warm, LockState::Failed);
        };
        if let CvTarget::Midpoint { code, slope } = target {
            warn!(code, slope, "Correction voltage slope not negative; using midpoint");
            ctx.sinks.status(
                false,
                &format!("CV slope {:.4} V/step not negative, using midpoint {}", slope, code),
            );
        }

        warm.set_null_integrator(true)?;
        warm.set_tuning_code(target.code())?;
        settle(config.settle_ms);
        warm.set_null_integrator(false)?;
        settle(config.settle_ms);
        warm.clear_unlock_detect()?;

        let report = if warm.is_locked()? {
            info!(?target, "PLL locked");
            locked_report(ctx)?
        } else {
            warn!(?target, "No lock at chosen code");
            LockReport::read(warm, LockState::Failed)?
        };

        if config.refine_photonic {
            refine_photonic(warm, photonic, ramp, config)?;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoConfig, LockConfig};
    use crate::lock::test_support::{request_for, warm_config};
    use crate::observe::Sinks;
    use cartlo_hal::sim::{SimPhotonicReceiver, SimWarmConfig, SimWarmUnit};
    use cartlo_hal::Monitored;
    use std::sync::Arc;

    fn sample(code: TuningCode, cv: f64) -> LockSearchSample {
        LockSearchSample {
            code,
            correction_voltage: cv,
            lock_detect: 4.6,
        }
    }

    fn bench(center: TuningCode, half_width: u16) -> (SimWarmUnit, Arc<SimPhotonicReceiver>) {
        let photonic = Arc::new(SimPhotonicReceiver::default());
        let warm = SimWarmUnit::new(SimWarmConfig {
            cv_slope: -0.5,
            ..warm_config(center, half_width)
        })
        .with_photonic(photonic.clone());
        (warm, photonic)
    }

    fn config(num_points: u16, interval: u16) -> LockConfig {
        let mut config = LoConfig::without_delays().lock;
        config.cv_points.num_points = num_points;
        config.cv_points.interval_steps = interval;
        config
    }

    #[test]
    fn test_sample_codes() {
        assert_eq!(sample_codes(1000, 5, 6), vec![994, 997, 1000, 1003, 1006]);
        assert_eq!(sample_codes(1000, 1, 6), vec![1000]);
        assert_eq!(sample_codes(2, 3, 6), vec![0, 2, 8]);
    }

    #[test]
    fn test_choose_target() {
        assert_eq!(choose_target(&[], 0.001), None);
        assert_eq!(
            choose_target(&[sample(1003, 5.0)], 0.001),
            Some(CvTarget::Single(1003))
        );
        let target = choose_target(&[sample(994, 1.5), sample(997, 0.0), sample(1000, -1.5)], 0.001)
            .unwrap();
        assert_eq!(target, CvTarget::Interpolated { code: 997, slope: -0.5 });

        // Rising correction voltage: midpoint
        let target = choose_target(&[sample(994, -1.0), sample(1000, 1.0)], 0.001).unwrap();
        assert!(matches!(target, CvTarget::Midpoint { code: 997, .. }));
    }

    #[test]
    fn test_three_of_five_points_lock() {
        // Codes 994..=1000 capture; 1003 and 1006 do not.
        let (warm, photonic) = bench(997, 3);
        let request = request_for(&warm, 13.0);
        assert_eq!(request.solve().unwrap().code, 1000);
        let config = config(5, 6);
        let (sinks, memory) = Sinks::memory();
        let ctx = LockContext::new(&warm, &request, &config, &sinks)
            .with_photonic(photonic.as_ref());

        let report = CvPointsLock.lock_pll(&ctx).unwrap();

        assert_eq!(report.state, LockState::Locked);
        assert_eq!(report.tuning_code, 997);
        assert!(report.tuning_code <= 4095);
        assert_eq!(&warm.code_history()[..5], &[994, 997, 1000, 1003, 1006]);
        assert_eq!(warm.code_history()[5], 997);
        assert!(warm.null_toggles() >= 6);
        assert!(warm.unlock_clears() >= 1);
        assert!(!memory.any_failure());
        assert!(!warm.monitor_paused());
    }

    #[test]
    fn test_single_point_commits_directly() {
        let (warm, photonic) = bench(1006, 0);
        let request = request_for(&warm, 13.0);
        let config = config(5, 6);
        let sinks = Sinks::default();
        let ctx = LockContext::new(&warm, &request, &config, &sinks)
            .with_photonic(photonic.as_ref());

        let report = CvPointsLock.lock_pll(&ctx).unwrap();
        assert!(report.is_locked());
        assert_eq!(report.tuning_code, 1006);
    }

    #[test]
    fn test_no_qualifying_points_fails() {
        let (warm, photonic) = bench(1500, 3);
        let request = request_for(&warm, 13.0);
        let config = config(5, 6);
        let (sinks, memory) = Sinks::memory();
        let ctx = LockContext::new(&warm, &request, &config, &sinks)
            .with_photonic(photonic.as_ref());

        let report = CvPointsLock.lock_pll(&ctx).unwrap();
        assert_eq!(report.state, LockState::Failed);
        assert_eq!(warm.code_history().len(), 5);
        assert!(memory.any_failure());
    }

    #[test]
    fn test_already_locked_skips_search() {
        let (warm, photonic) = bench(1000, 5);
        warm.set_tuning_code(1002).unwrap();
        let request = request_for(&warm, 13.0);
        let config = config(5, 6);
        let sinks = Sinks::default();
        let ctx = LockContext::new(&warm, &request, &config, &sinks)
            .with_photonic(photonic.as_ref());

        let report = CvPointsLock.lock_pll(&ctx).unwrap();
        assert!(report.is_locked());
        assert_eq!(report.tuning_code, 1000);
        // 1002 then two adjust steps, no sampled codes
        assert_eq!(warm.code_history(), vec![1002, 1001, 1000]);
    }
}
