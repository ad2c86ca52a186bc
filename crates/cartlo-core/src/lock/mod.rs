//! # Lock Acquisition
//!
//! Three interchangeable strategies for bringing the warm unit's PLL into
//! lock. Each receives a [`LockContext`] carrying every collaborator it may
//! touch; none reaches hardware any other way.
//!
//! | Strategy | Search |
//! |----------|--------|
//! | [`NormalLock`] | alternating, growing offsets around the coarse code |
//! | [`OnlineLock`] | IF total power bracket search with photonic ramping |
//! | [`CvPointsLock`] | correction-voltage slope over sampled codes |
//!
//! Monitors of the units involved are paused for the whole attempt and
//! resumed on every exit path.

pub mod adjust;
pub mod cv_points;
pub mod normal;
pub mod online;
pub mod photonic;

use std::fmt;
use std::time::Duration;

use cartlo_hal::{ColdUnit, PhotonicReceiver, TuningCode, WarmUnit};

use crate::config::{LockConfig, LockStrategyKind};
use crate::error::{LoError, LoResult, UnitKind};
use crate::freq_math::TuningRequest;
use crate::monitor::MonitorPause;
use crate::observe::Sinks;

pub use adjust::{adjust_pll, PllAdjustReport};
pub use cv_points::CvPointsLock;
pub use normal::NormalLock;
pub use online::OnlineLock;

/// Progress of a lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Searching,
    Locked,
    /// Search space exhausted without lock
    Failed,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Unlocked => write!(f, "unlocked"),
            LockState::Searching => write!(f, "searching"),
            LockState::Locked => write!(f, "locked"),
            LockState::Failed => write!(f, "failed"),
        }
    }
}

/// Final state of a lock attempt with the PLL readbacks at that point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockReport {
    pub state: LockState,
    pub tuning_code: TuningCode,
    pub lock_detect: f64,
    pub correction_voltage: f64,
}

impl LockReport {
    /// Read the PLL and tag the result with `state`.
    pub fn read(warm: &dyn WarmUnit, state: LockState) -> LoResult<Self> {
        Ok(Self {
            state,
            tuning_code: warm.tuning_code()?,
            lock_detect: warm.lock_detect_voltage()?,
            correction_voltage: warm.correction_voltage()?,
        })
    }

    pub fn is_locked(&self) -> bool {
        self.state == LockState::Locked
    }
}

/// Collaborators of one lock attempt.
#[derive(Clone, Copy)]
pub struct LockContext<'a> {
    pub warm: &'a dyn WarmUnit,
    /// Paused alongside the warm unit when present
    pub cold: Option<&'a dyn ColdUnit>,
    pub photonic: Option<&'a dyn PhotonicReceiver>,
    pub request: &'a TuningRequest,
    pub config: &'a LockConfig,
    pub sinks: &'a Sinks,
}

impl<'a> LockContext<'a> {
    pub fn new(
        warm: &'a dyn WarmUnit,
        request: &'a TuningRequest,
        config: &'a LockConfig,
        sinks: &'a Sinks,
    ) -> Self {
        Self {
            warm,
            cold: None,
            photonic: None,
            request,
            config,
            sinks,
        }
    }

    pub fn with_cold(mut self, cold: &'a dyn ColdUnit) -> Self {
        self.cold = Some(cold);
        self
    }

    pub fn with_photonic(mut self, photonic: &'a dyn PhotonicReceiver) -> Self {
        self.photonic = Some(photonic);
        self
    }

    /// The photonic receiver, required by the photonic-aware strategies.
    pub fn photonic(&self) -> LoResult<&'a dyn PhotonicReceiver> {
        self.photonic.ok_or(LoError::MissingUnit(UnitKind::Photonic))
    }

    /// Pause the warm and (if present) cold monitors until the guards drop.
    pub fn pause_monitors(&self) -> (MonitorPause<'a>, Option<MonitorPause<'a>>) {
        (
            MonitorPause::new(self.warm.monitor_gate()),
            MonitorPause::optional(self.cold.map(|c| c.monitor_gate())),
        )
    }
}

/// A PLL search algorithm.
pub trait LockingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> LockStrategyKind;

    /// Search for lock. Exhausting the search is reported as
    /// [`LockState::Failed`], not as an error.
    fn lock_pll(&self, ctx: &LockContext<'_>) -> LoResult<LockReport>;
}

/// Build the strategy for `kind`.
pub fn strategy_for(kind: LockStrategyKind) -> Box<dyn LockingStrategy> {
    match kind {
        LockStrategyKind::Normal => Box::new(NormalLock),
        LockStrategyKind::OnlineJul2021B => Box::new(OnlineLock),
        LockStrategyKind::CvPoints => Box::new(CvPointsLock),
    }
}

/// Sleep for a physical settling time.
pub(crate) fn settle(ms: u64) {
    if ms > 0 {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Apply a signed offset to a tuning code, clamped to the valid range.
pub(crate) fn offset_code(code: TuningCode, offset: i64) -> TuningCode {
    cartlo_hal::clamp_tuning_code(code as i64 + offset)
}

#[cfg(test)]
pub(crate) mod test_support {
    use cartlo_hal::sim::{SimWarmConfig, SimWarmUnit};
    use cartlo_hal::{SidebandLock, TuningCode};

    use crate::freq_math::TuningRequest;

    /// Oscillator spanning 12.0 to 16.095 GHz, 1 MHz per step.
    pub fn warm_config(center: TuningCode, half_width: u16) -> SimWarmConfig {
        SimWarmConfig {
            lock_center: center,
            capture_half_width: half_width,
            ..Default::default()
        }
    }

    pub fn request_for(warm: &SimWarmUnit, freq_lo_ghz: f64) -> TuningRequest {
        TuningRequest::new(
            freq_lo_ghz,
            0.032,
            SidebandLock::BelowReference,
            &warm.config().info,
            1,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartlo_hal::sim::SimWarmUnit;
    use cartlo_hal::Monitored;

    #[test]
    fn test_strategy_selection() {
        for kind in [
            LockStrategyKind::Normal,
            LockStrategyKind::OnlineJul2021B,
            LockStrategyKind::CvPoints,
        ] {
            assert_eq!(strategy_for(kind).kind(), kind);
        }
        assert_eq!(strategy_for(LockStrategyKind::Normal).name(), "LOCK_Normal");
    }

    #[test]
    fn test_context_requires_photonic() {
        let warm = SimWarmUnit::default();
        let request = test_support::request_for(&warm, 14.0);
        let config = LockConfig::default();
        let sinks = Sinks::default();
        let ctx = LockContext::new(&warm, &request, &config, &sinks);
        assert_eq!(
            ctx.photonic().err(),
            Some(LoError::MissingUnit(UnitKind::Photonic))
        );
    }

    #[test]
    fn test_pause_monitors_resumes() {
        let warm = SimWarmUnit::default();
        let request = test_support::request_for(&warm, 14.0);
        let config = LockConfig::default();
        let sinks = Sinks::default();
        let ctx = LockContext::new(&warm, &request, &config, &sinks);
        {
            let _pause = ctx.pause_monitors();
            assert!(warm.monitor_paused());
        }
        assert!(!warm.monitor_paused());
    }

    #[test]
    fn test_offset_code_clamps() {
        assert_eq!(offset_code(10, -32), 0);
        assert_eq!(offset_code(4090, 32), 4095);
        assert_eq!(offset_code(2000, -32), 1968);
    }
}
