//! IF total power bracket search with photonic reference co-optimization.
//!
//! ```text
//! guess = code ∓ floog            (IF power peaks one FLOOG away from lock)
//! ramp modulation until |IFTP| is usable          (soft timeout)
//! bracket: compare |IFTP| at center ± span, keep the better, span /= 2
//! code = best ± floog             (back to the lock point)
//! ramp modulation to the lock target, null/release the integrator
//! back off modulation if |IFTP| is too high, zero the correction voltage
//! ```

use std::time::Duration;

use cartlo_hal::{SidebandLock, TuningCode, WarmUnit};
use tracing::{debug, info, warn};

use super::photonic::{ramp_modulation, RampDirection, RampEnd};
use super::{adjust_pll, offset_code, settle, LockContext, LockReport, LockState, LockingStrategy};
use crate::config::LockStrategyKind;
use crate::error::LoResult;

/// `LOCK_ONLINE_2021JUL_B` strategy.
#[derive(Debug, Default, Clone, Copy)]
pub struct OnlineLock;

/// Halving bracket search for the code of largest |IF total power|.
///
/// Starting at `initial`, each round samples `center - span` and
/// `center + span` and moves the center to the better of the two.
pub fn maximize_iftp(
    warm: &dyn WarmUnit,
    initial: TuningCode,
    span: u16,
    settle_ms: u64,
) -> LoResult<TuningCode> {
    let mut center = initial;
    let mut span = span as i64;
    while span > 0 {
        let low = offset_code(center, -span);
        let high = offset_code(center, span);

        warm.set_tuning_code(low)?;
        settle(settle_ms);
        let p_low = warm.if_total_power()?.abs();

        warm.set_tuning_code(high)?;
        settle(settle_ms);
        let p_high = warm.if_total_power()?.abs();

        center = if p_high > p_low { high } else { low };
        debug!(span, low, p_low, high, p_high, center, "IF power bracket");
        span /= 2;
    }
    warm.set_tuning_code(center)?;
    settle(settle_ms);
    Ok(center)
}

impl LockingStrategy for OnlineLock {
    fn name(&self) -> &'static str {
        "LOCK_ONLINE_2021JUL_B"
    }

    fn kind(&self) -> LockStrategyKind {
        LockStrategyKind::OnlineJul2021B
    }

    fn lock_pll(&self, ctx: &LockContext<'_>) -> LoResult<LockReport> {
        let photonic = ctx.photonic()?;
        let solution = ctx.request.solve()?;
        let config = &ctx.config.online;
        let ramp = &ctx.config.photonic;
        let warm = ctx.warm;

        let floog = ctx.request.floog_offset_steps();
        let floog = match ctx.request.sb_lock {
            SidebandLock::BelowReference => -floog,
            SidebandLock::AboveReference => floog,
        };

        let _pause = ctx.pause_monitors();

        let guess = offset_code(solution.code, floog);
        info!(code = solution.code, guess, floog, "Searching IF power peak");
        warm.set_tuning_code(guess)?;
        settle(config.settle_ms);

        let coarse = ramp_modulation(
            photonic,
            ramp,
            RampDirection::Up,
            Some(Duration::from_millis(config.coarse_timeout_ms)),
            || Ok(warm.if_total_power()?.abs() >= config.coarse_iftp_min),
        )?;
        if coarse != RampEnd::Reached {
            warn!(?coarse, "Coarse photonic ramp stopped short of IF power target");
        }

        let peak = maximize_iftp(warm, guess, config.iftp_span_steps, config.settle_ms)?;
        let code = offset_code(peak, -floog);
        warm.set_tuning_code(code)?;
        settle(config.settle_ms);
        debug!(peak, code, "Returned to lock point");

        ramp_modulation(photonic, ramp, RampDirection::Up, None, || {
            Ok(warm.if_total_power()?.abs() >= config.lock_iftp_target)
        })?;

        let mut locked = false;
        for attempt in 1..=config.max_toggles.max(1) {
            warm.set_null_integrator(true)?;
            settle(config.integrator_toggle_ms);
            warm.set_null_integrator(false)?;
            settle(config.integrator_toggle_ms);
            locked = warm.is_locked()?;
            debug!(attempt, locked, "Integrator toggled");
            if locked {
                break;
            }
        }

        if warm.if_total_power()?.abs() > config.final_iftp_ceiling {
            ramp_modulation(photonic, ramp, RampDirection::Down, None, || {
                Ok(warm.if_total_power()?.abs() <= config.final_iftp_ceiling)
            })?;
            locked = warm.is_locked()?;
        }

        if !locked {
            warn!(code, "No lock after integrator toggles");
            return LockReport::read(warm, LockState::Failed);
        }

        warm.clear_unlock_detect()?;
        let adjust = adjust_pll(warm, 0.0, &ctx.config.adjust)?;
        let state = if adjust.locked {
            LockState::Locked
        } else {
            LockState::Failed
        };
        let report = LockReport::read(warm, state)?;
        info!(code = report.tuning_code, cv = report.correction_voltage, "PLL locked");
        Ok(report)
    }
}
