//! # Cartridge Assembly
//!
//! Coordinator for one receiver cartridge: a warm unit, a cold unit or
//! both, plus the shared photonic receiver and signal router. It owns the
//! active locking strategy, the single background-operation slot and the
//! monitor loops of its units.
//!
//! ```text
//!            set_enable(true)            set_observing(true)
//!   OFF ───────────────────────► ON ───────────────────────► ON+OBSERVING
//!    ▲                            │  ◄─────────────────────       │
//!    └──── set_enable(false) ─────┴──── set_observing(false) ─────┘
//!          (clears observing)
//! ```
//!
//! Every entry point checks the units it needs exist and the cartridge is
//! on before touching hardware. Rejections are logged and reported through
//! the status sink.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cartlo_hal::{
    Band, ColdUnit, PhotonicReceiver, Polarization, Sideband, SidebandLock, SignalRouter,
    WarmUnit,
};
use tracing::{debug, info, warn};

use crate::bias_optimizer::{BiasOptimizer, OptimizeRequest, VD_RANGE};
use crate::config::{
    IvCurveConfig, LoConfig, LoSweepConfig, LockStrategyKind, MagnetSweepConfig,
};
use crate::error::{LoError, LoResult, UnitKind};
use crate::freq_math::{TuningRequest, TuningSolution};
use crate::lock::{
    adjust_pll, strategy_for, LockContext, LockReport, LockState, LockingStrategy,
    PllAdjustReport,
};
use crate::measure::{
    spawn_measurement, FineLoSweep, IvCurve, MagnetSweep, Measurement, MixerDeflux, MixerHeating,
};
use crate::monitor::{MonitorLoop, MonitorPause};
use crate::observe::Sinks;
use crate::operation::{ActiveOperation, OperationOutcome, RunningOperation};
use crate::sweep::Sweeper;

/// Effective enable/observe state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartState {
    Off,
    On,
    Observing,
}

impl fmt::Display for CartState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CartState::Off => write!(f, "off"),
            CartState::On => write!(f, "on"),
            CartState::Observing => write!(f, "on+observing"),
        }
    }
}

/// The LO frequency last set, with its solved tuning code.
#[derive(Debug, Clone, PartialEq)]
struct Tuning {
    request: TuningRequest,
    solution: TuningSolution,
}

/// One cartridge's LO and mixer coordinator.
pub struct CartAssembly {
    band: Band,
    warm: Option<Arc<dyn WarmUnit>>,
    cold: Option<Arc<dyn ColdUnit>>,
    photonic: Option<Arc<dyn PhotonicReceiver>>,
    router: Option<Arc<dyn SignalRouter>>,
    config: LoConfig,
    sinks: Sinks,
    sweeper: Sweeper,
    strategy: Box<dyn LockingStrategy>,
    enabled: bool,
    observing: bool,
    tuning: Option<Tuning>,
    operation: ActiveOperation,
    monitors: Vec<MonitorLoop>,
}

impl CartAssembly {
    /// Create a cartridge, initially off.
    ///
    /// At least one of `warm` and `cold` must be present.
    pub fn new(
        band: Band,
        warm: Option<Arc<dyn WarmUnit>>,
        cold: Option<Arc<dyn ColdUnit>>,
        config: LoConfig,
        sinks: Sinks,
    ) -> LoResult<Self> {
        if warm.is_none() && cold.is_none() {
            return Err(LoError::NoUnits);
        }
        config.validate()?;

        let strategy = strategy_for(config.lock.strategy);
        debug!(%band, strategy = strategy.name(), "Cartridge created");
        Ok(Self {
            band,
            warm,
            cold,
            photonic: None,
            router: None,
            sweeper: Sweeper::new(config.sweep.clone()),
            config,
            sinks,
            strategy,
            enabled: false,
            observing: false,
            tuning: None,
            operation: ActiveOperation::default(),
            monitors: Vec::new(),
        })
    }

    /// Attach the photonic receiver delivering this cartridge's reference.
    pub fn with_photonic(mut self, photonic: Arc<dyn PhotonicReceiver>) -> Self {
        self.photonic = Some(photonic);
        self
    }

    /// Attach the shared photonic and IF switch.
    pub fn with_router(mut self, router: Arc<dyn SignalRouter>) -> Self {
        self.router = Some(router);
        self
    }

    // ── enable / observe ──────────────────────────────────────────────

    pub fn band(&self) -> Band {
        self.band
    }

    pub fn state(&self) -> CartState {
        match (self.enabled, self.observing) {
            (false, _) => CartState::Off,
            (true, false) => CartState::On,
            (true, true) => CartState::Observing,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_observing(&self) -> bool {
        self.observing
    }

    /// Switch the cartridge on or off.
    ///
    /// On starts the monitor loops. Off clears observing, stops any
    /// background operation and waits for it, then stops the monitors.
    pub fn set_enable(&mut self, on: bool) -> LoResult<()> {
        if on == self.enabled {
            return Ok(());
        }
        if on {
            self.start_monitors()?;
            self.enabled = true;
            info!(band = %self.band, "Cartridge enabled");
        } else {
            if self.observing {
                self.observing = false;
                info!(band = %self.band, "Observing cleared by disable");
            }
            if self.operation.abort() {
                warn!(band = %self.band, "Background operation stopped by disable");
            }
            self.operation.wait();
            for monitor in self.monitors.drain(..) {
                monitor.stop();
            }
            self.enabled = false;
            info!(band = %self.band, "Cartridge disabled");
        }
        Ok(())
    }

    /// Enter or leave the observing state.
    ///
    /// Entering requires the cartridge to be on and routes the shared
    /// photonic and IF switches to this band. Only the rack calls this, so
    /// that one cartridge at most observes.
    pub(crate) fn set_observing(&mut self, on: bool) -> LoResult<()> {
        if !on {
            self.observing = false;
            return Ok(());
        }
        if !self.enabled {
            return self.reject("observe", LoError::NotEnabled(UnitKind::Cartridge));
        }
        match &self.router {
            Some(router) => {
                router.select_photonic_band(self.band)?;
                router.select_if_band(self.band)?;
            }
            None => warn!(band = %self.band, "No signal router; switches not routed"),
        }
        self.observing = true;
        info!(band = %self.band, "Cartridge observing");
        Ok(())
    }

    fn start_monitors(&mut self) -> LoResult<()> {
        let interval = Duration::from_millis(self.config.monitor.interval_ms);
        let band = self.band.number();
        if let Some(warm) = &self.warm {
            self.monitors.push(MonitorLoop::spawn(
                &format!("warm_{}", band),
                warm.clone(),
                interval,
            )?);
        }
        if let Some(cold) = &self.cold {
            self.monitors.push(MonitorLoop::spawn(
                &format!("cold_{}", band),
                cold.clone(),
                interval,
            )?);
        }
        Ok(())
    }

    // ── checks ────────────────────────────────────────────────────────

    fn reject<T>(&self, what: &str, error: LoError) -> LoResult<T> {
        warn!(band = %self.band, operation = what, error = %error, "Request rejected");
        self.sinks
            .status(false, &format!("{} {}: {}", self.band, what, error));
        Err(error)
    }

    fn checked<T>(&self, what: &str, result: LoResult<T>) -> LoResult<T> {
        result.or_else(|e| self.reject(what, e))
    }

    fn require_warm(&self, what: &str) -> LoResult<Arc<dyn WarmUnit>> {
        match &self.warm {
            None => self.reject(what, LoError::MissingUnit(UnitKind::Warm)),
            Some(_) if !self.enabled => self.reject(what, LoError::NotEnabled(UnitKind::Warm)),
            Some(warm) => Ok(warm.clone()),
        }
    }

    fn require_cold(&self, what: &str) -> LoResult<Arc<dyn ColdUnit>> {
        match &self.cold {
            None => self.reject(what, LoError::MissingUnit(UnitKind::Cold)),
            Some(_) if !self.enabled => self.reject(what, LoError::NotEnabled(UnitKind::Cold)),
            Some(cold) => Ok(cold.clone()),
        }
    }

    /// Foreground commands are refused while a background operation runs.
    fn require_quiet(&self, what: &str) -> LoResult<()> {
        if self.operation.is_busy() {
            let label = self.operation.label().unwrap_or_default();
            return self.reject(what, LoError::Busy(label));
        }
        Ok(())
    }

    fn require_idle(&mut self, what: &str) -> LoResult<()> {
        match self.operation.ensure_idle() {
            Ok(Some(previous)) => {
                debug!(succeeded = previous.succeeded(), "Reaped finished operation");
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => self.reject(what, e),
        }
    }

    // ── LO tuning and lock ────────────────────────────────────────────

    /// Set the LO frequency and commit the coarse tuning code.
    ///
    /// The frequencies and the solved code are cached for [`lock_pll`](Self::lock_pll).
    pub fn set_lo_frequency(
        &mut self,
        freq_lo_ghz: f64,
        freq_floog_ghz: f64,
        sb_lock: SidebandLock,
    ) -> LoResult<TuningSolution> {
        let what = "set LO frequency";
        let warm = self.require_warm(what)?;
        self.require_quiet(what)?;

        let cold_multiplier = self.cold.as_ref().map_or(1, |c| c.info().cold_multiplier);
        let request = TuningRequest::new(
            freq_lo_ghz,
            freq_floog_ghz,
            sb_lock,
            &warm.info(),
            cold_multiplier,
        );
        let solution = self.checked(what, request.solve())?;
        {
            let _pause = MonitorPause::new(warm.monitor_gate());
            warm.set_tuning_code(solution.code)?;
        }

        info!(
            band = %self.band,
            freq_lo = freq_lo_ghz,
            freq_ref = solution.freq_ref_ghz,
            code = solution.code,
            "LO frequency set"
        );
        self.tuning = Some(Tuning { request, solution });
        Ok(solution)
    }

    /// Search for lock at the cached LO frequency with the active strategy.
    pub fn lock_pll(&self) -> LoResult<LockReport> {
        let what = "lock PLL";
        let warm = self.require_warm(what)?;
        self.require_quiet(what)?;
        let Some(tuning) = &self.tuning else {
            return self.reject(what, LoError::InvalidArgument("no LO frequency set".into()));
        };

        let mut ctx = LockContext::new(
            warm.as_ref(),
            &tuning.request,
            &self.config.lock,
            &self.sinks,
        );
        if let Some(cold) = &self.cold {
            ctx = ctx.with_cold(cold.as_ref());
        }
        if let Some(photonic) = &self.photonic {
            ctx = ctx.with_photonic(photonic.as_ref());
        }

        let report = self.checked(what, self.strategy.lock_pll(&ctx))?;
        self.sinks.status(
            report.is_locked(),
            &format!(
                "{} {}: {} at code {} (LD {:.2} V, CV {:.2} V)",
                self.band,
                self.strategy.name(),
                report.state,
                report.tuning_code,
                report.lock_detect,
                report.correction_voltage
            ),
        );
        Ok(report)
    }

    /// Set the LO frequency, then lock.
    pub fn set_lo_frequency_and_lock(
        &mut self,
        freq_lo_ghz: f64,
        freq_floog_ghz: f64,
        sb_lock: SidebandLock,
    ) -> LoResult<LockReport> {
        self.set_lo_frequency(freq_lo_ghz, freq_floog_ghz, sb_lock)?;
        self.lock_pll()
    }

    /// Current PLL readbacks.
    pub fn lock_state(&self) -> LoResult<LockReport> {
        let warm = self.require_warm("read lock state")?;
        let state = if warm.is_locked()? {
            LockState::Locked
        } else {
            LockState::Unlocked
        };
        LockReport::read(warm.as_ref(), state)
    }

    /// Step the tuning code until the correction voltage reaches `target_cv`.
    pub fn adjust_pll(&self, target_cv: f64) -> LoResult<PllAdjustReport> {
        let what = "adjust PLL";
        let warm = self.require_warm(what)?;
        self.require_quiet(what)?;
        let _pause = MonitorPause::new(warm.monitor_gate());
        adjust_pll(warm.as_ref(), target_cv, &self.config.lock.adjust)
    }

    pub fn locking_strategy(&self) -> LockStrategyKind {
        self.strategy.kind()
    }

    pub fn set_locking_strategy(&mut self, kind: LockStrategyKind) {
        if kind != self.strategy.kind() {
            self.strategy = strategy_for(kind);
            info!(band = %self.band, strategy = self.strategy.name(), "Locking strategy selected");
        }
    }

    // ── bias setters ──────────────────────────────────────────────────

    /// Set one junction voltage, stepping there when `sweep` is set.
    pub fn set_sis_voltage(
        &self,
        pol: Polarization,
        sb: Sideband,
        millivolts: f64,
        sweep: bool,
    ) -> LoResult<()> {
        let what = "set SIS voltage";
        let cold = self.require_cold(what)?;
        self.require_quiet(what)?;
        self.sweeper
            .set_sis_voltage(cold.as_ref(), pol, sb, millivolts, sweep)
    }

    /// Set one magnet current, stepping there when `sweep` is set.
    pub fn set_sis_magnet(
        &self,
        pol: Polarization,
        sb: Sideband,
        milliamps: f64,
        sweep: bool,
    ) -> LoResult<()> {
        let what = "set SIS magnet";
        let cold = self.require_cold(what)?;
        self.require_quiet(what)?;
        self.sweeper
            .set_magnet_current(cold.as_ref(), pol, sb, milliamps, sweep)
    }

    /// Turn stepped setpoint changes on or off for every later setter.
    pub fn set_sweep_enabled(&mut self, enabled: bool) {
        self.config.sweep.enabled = enabled;
        self.sweeper = Sweeper::new(self.config.sweep.clone());
        debug!(band = %self.band, enabled, "Sweep toggled");
    }

    /// Set the LO amplifier gate and drain voltages of one polarization.
    pub fn set_lo_pa(&self, pol: Polarization, drain_volts: f64, gate_volts: f64) -> LoResult<()> {
        let what = "set LO PA";
        let warm = self.require_warm(what)?;
        self.require_quiet(what)?;
        if !(VD_RANGE.0..=VD_RANGE.1).contains(&drain_volts) {
            return self.reject(
                what,
                LoError::InvalidArgument(format!("drain voltage {} V", drain_volts)),
            );
        }
        let _pause = MonitorPause::new(warm.monitor_gate());
        warm.set_pa_gate_voltage(pol, gate_volts)?;
        warm.set_pa_drain_voltage(pol, drain_volts)?;
        Ok(())
    }

    pub fn set_lna_enable(&self, pol: Polarization, sb: Sideband, enable: bool) -> LoResult<()> {
        let what = "set LNA enable";
        let cold = self.require_cold(what)?;
        self.require_quiet(what)?;
        let _pause = MonitorPause::new(cold.monitor_gate());
        cold.set_lna_enable(pol, sb, enable)?;
        Ok(())
    }

    // ── background operations ─────────────────────────────────────────

    fn start_measurement<M: Measurement>(&mut self, what: &str, measurement: M) -> LoResult<()> {
        self.require_idle(what)?;
        let kind = measurement.kind();
        let worker = self.checked(what, spawn_measurement(measurement, self.sinks.clone()))?;
        self.operation
            .begin(RunningOperation::Measurement { kind, worker });
        Ok(())
    }

    /// Start an IV curve; `params` overrides the configured defaults.
    pub fn measure_iv_curve(
        &mut self,
        pol: Polarization,
        sb: Sideband,
        params: Option<IvCurveConfig>,
    ) -> LoResult<()> {
        let what = "measure IV curve";
        let cold = self.require_cold(what)?;
        let params = params.unwrap_or_else(|| self.config.measure.iv_curve.clone());
        let measurement =
            self.checked(what, IvCurve::new(cold, pol, sb, params, self.sweeper.clone()))?;
        self.start_measurement(what, measurement)
    }

    /// Start a fine LO sweep around the current tuning code.
    pub fn fine_lo_sweep(&mut self, params: Option<LoSweepConfig>) -> LoResult<()> {
        let what = "fine LO sweep";
        let warm = self.require_warm(what)?;
        let params = params.unwrap_or_else(|| self.config.measure.lo_sweep.clone());
        let measurement = self.checked(what, FineLoSweep::new(warm, params))?;
        self.start_measurement(what, measurement)
    }

    /// Start a junction current versus magnet current sweep.
    pub fn sis_magnet_sweep(
        &mut self,
        pol: Polarization,
        sb: Sideband,
        params: Option<MagnetSweepConfig>,
    ) -> LoResult<()> {
        let what = "SIS magnet sweep";
        let cold = self.require_cold(what)?;
        let params = params.unwrap_or_else(|| self.config.measure.magnet_sweep.clone());
        let measurement =
            self.checked(what, MagnetSweep::new(cold, pol, sb, params, self.sweeper.clone()))?;
        self.start_measurement(what, measurement)
    }

    pub fn mixer_deflux(&mut self, pol: Polarization) -> LoResult<()> {
        let what = "mixer deflux";
        let cold = self.require_cold(what)?;
        let params = self.config.measure.deflux.clone();
        let measurement = self.checked(what, MixerDeflux::new(cold, pol, params))?;
        self.start_measurement(what, measurement)
    }

    pub fn mixer_heating(&mut self, pol: Polarization) -> LoResult<()> {
        let what = "mixer heating";
        let cold = self.require_cold(what)?;
        let params = self.config.measure.heating.clone();
        let measurement = self.checked(what, MixerHeating::new(cold, pol, params))?;
        self.start_measurement(what, measurement)
    }

    /// Start maximizing IF power; readings arrive through [`set_if_power`](Self::set_if_power).
    pub fn optimize_if_power(&mut self, request: OptimizeRequest) -> LoResult<()> {
        let what = "optimize IF power";
        let warm = self.require_warm(what)?;
        let cold = self.require_cold(what)?;
        self.require_idle(what)?;

        let mut optimizer = BiasOptimizer::new(
            warm,
            cold,
            self.config.optimizer.clone(),
            self.sinks.clone(),
        );
        self.checked(what, optimizer.start(request))?;
        self.operation
            .begin(RunningOperation::BiasOptimization(optimizer));
        Ok(())
    }

    /// Deliver sideband IF power readings to the running optimization.
    pub fn set_if_power(&self, pol: Polarization, power_sb1: f64, power_sb2: f64) -> LoResult<()> {
        match self.operation.bias_optimizer() {
            Some(optimizer) => optimizer.set_if_power(pol, power_sb1, power_sb2),
            None => Err(LoError::InvalidArgument(
                "no IF power optimization in progress".to_string(),
            )),
        }
    }

    /// Signal cancellation to the running operation; false if none runs.
    pub fn abort_measurement(&self) -> bool {
        let aborted = self.operation.abort();
        if aborted {
            info!(band = %self.band, "Abort requested");
        }
        aborted
    }

    pub fn is_busy(&self) -> bool {
        self.operation.is_busy()
    }

    /// Label of the operation in the slot, if any.
    pub fn active_operation(&self) -> Option<String> {
        self.operation.label()
    }

    /// Wait for the background operation to end and take its outcome.
    pub fn wait_operation(&mut self) -> Option<OperationOutcome> {
        self.operation.wait()
    }

    // ── cached values ─────────────────────────────────────────────────

    pub fn freq_lo_ghz(&self) -> Option<f64> {
        self.tuning.as_ref().map(|t| t.request.freq_lo_ghz)
    }

    pub fn freq_floog_ghz(&self) -> Option<f64> {
        self.tuning.as_ref().map(|t| t.request.freq_floog_ghz)
    }

    pub fn freq_ref_ghz(&self) -> Option<f64> {
        self.tuning.as_ref().map(|t| t.solution.freq_ref_ghz)
    }

    pub fn tuning_request(&self) -> Option<&TuningRequest> {
        self.tuning.as_ref().map(|t| &t.request)
    }

    pub fn has_warm(&self) -> bool {
        self.warm.is_some()
    }

    pub fn has_cold(&self) -> bool {
        self.cold.is_some()
    }

    pub fn config(&self) -> &LoConfig {
        &self.config
    }
}

impl fmt::Debug for CartAssembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartAssembly")
            .field("band", &self.band)
            .field("state", &self.state())
            .field("warm", &self.warm.is_some())
            .field("cold", &self.cold.is_some())
            .field("strategy", &self.strategy.name())
            .field("operation", &self.operation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeatingConfig;
    use crate::lock::test_support::warm_config;
    use crate::measure::MeasurementKind;
    use cartlo_hal::sim::{SimBench, SimColdUnit, SimRouter, SimWarmUnit};
    use cartlo_hal::Monitored;

    fn band(n: u8) -> Band {
        Band::new(n).unwrap()
    }

    fn cold_only() -> (CartAssembly, Arc<SimColdUnit>) {
        let cold = Arc::new(SimColdUnit::default());
        let cart = CartAssembly::new(
            band(6),
            None,
            Some(cold.clone()),
            LoConfig::without_delays(),
            Sinks::default(),
        )
        .unwrap();
        (cart, cold)
    }

    #[test]
    fn test_requires_a_unit() {
        let result = CartAssembly::new(
            band(3),
            None,
            None,
            LoConfig::default(),
            Sinks::default(),
        );
        assert_eq!(result.err(), Some(LoError::NoUnits));

        let (cart, _) = cold_only();
        assert!(!cart.has_warm());
        assert_eq!(cart.state(), CartState::Off);
    }

    #[test]
    fn test_enable_observe_states() {
        let bench = SimBench::default();
        let (sinks, memory) = Sinks::memory();
        let mut cart = CartAssembly::new(
            band(7),
            Some(bench.warm.clone()),
            Some(bench.cold.clone()),
            LoConfig::without_delays(),
            sinks,
        )
        .unwrap()
        .with_router(bench.router.clone());

        assert_eq!(
            cart.set_observing(true),
            Err(LoError::NotEnabled(UnitKind::Cartridge))
        );
        assert!(memory.any_failure());
        assert!(bench.router.photonic_band().is_none());

        cart.set_enable(true).unwrap();
        cart.set_observing(true).unwrap();
        assert_eq!(cart.state(), CartState::Observing);
        assert_eq!(bench.router.photonic_band(), Some(band(7)));
        assert_eq!(bench.router.if_band(), Some(band(7)));

        cart.set_enable(false).unwrap();
        assert_eq!(cart.state(), CartState::Off);
        assert!(!cart.is_observing());
    }

    #[test]
    fn test_monitors_run_while_enabled() {
        let (mut cart, cold) = cold_only();
        cart.set_enable(true).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        cart.set_enable(false).unwrap();
        let polls = cold.monitor_gate().polls();
        assert!(polls > 0);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cold.monitor_gate().polls(), polls);
    }

    #[test]
    fn test_set_frequency_and_lock() {
        let warm = Arc::new(SimWarmUnit::new(warm_config(2015, 0)));
        let (sinks, memory) = Sinks::memory();
        let mut cart = CartAssembly::new(
            band(3),
            Some(warm.clone()),
            None,
            LoConfig::without_delays(),
            sinks,
        )
        .unwrap();
        cart.set_enable(true).unwrap();

        let solution = cart
            .set_lo_frequency(14.0, 0.032, SidebandLock::BelowReference)
            .unwrap();
        assert_eq!(solution.code, 2000);
        assert_eq!(warm.tuning_code().unwrap(), 2000);
        assert_eq!(cart.freq_lo_ghz(), Some(14.0));
        assert!((cart.freq_ref_ghz().unwrap() - 14.032).abs() < 1e-9);

        let report = cart.lock_pll().unwrap();
        assert!(report.is_locked());
        assert_eq!(report.tuning_code, 2015);
        assert!(!warm.monitor_paused());
        let (ok, message) = memory.statuses().pop().unwrap();
        assert!(ok);
        assert!(message.contains("LOCK_Normal"));
    }

    #[test]
    fn test_lock_rejections() {
        let warm = Arc::new(SimWarmUnit::default());
        let mut cart = CartAssembly::new(
            band(3),
            Some(warm.clone()),
            None,
            LoConfig::without_delays(),
            Sinks::default(),
        )
        .unwrap();

        assert_eq!(
            cart.lock_pll().err(),
            Some(LoError::NotEnabled(UnitKind::Warm))
        );
        cart.set_enable(true).unwrap();
        assert!(matches!(cart.lock_pll(), Err(LoError::InvalidArgument(_))));
        assert!(matches!(
            cart.set_lo_frequency(-1.0, 0.032, SidebandLock::AboveReference),
            Err(LoError::InvalidTuning(_))
        ));
        assert!(warm.code_history().is_empty());

        let (mut cold_cart, _) = cold_only();
        cold_cart.set_enable(true).unwrap();
        assert_eq!(
            cold_cart.lock_pll().err(),
            Some(LoError::MissingUnit(UnitKind::Warm))
        );
    }

    #[test]
    fn test_strategy_switch() {
        let (mut cart, _) = cold_only();
        assert_eq!(cart.locking_strategy(), LockStrategyKind::Normal);
        cart.set_locking_strategy(LockStrategyKind::CvPoints);
        assert_eq!(cart.locking_strategy(), LockStrategyKind::CvPoints);
    }

    #[test]
    fn test_sis_voltage_sweep_toggle() {
        let (mut cart, cold) = cold_only();
        cart.set_enable(true).unwrap();

        cart.set_sis_voltage(Polarization::Pol0, Sideband::Sb1, 2.0, true)
            .unwrap();
        assert_eq!(cold.writes().len(), 4);

        cart.set_sweep_enabled(false);
        cart.set_sis_voltage(Polarization::Pol0, Sideband::Sb1, 0.0, true)
            .unwrap();
        assert_eq!(cold.writes().len(), 5);
        assert_eq!(cold.writes_while_monitored(), 0);

        cart.set_lna_enable(Polarization::Pol1, Sideband::Sb2, true)
            .unwrap();
        assert!(cold.lna_enabled(Polarization::Pol1, Sideband::Sb2));
    }

    #[test]
    fn test_lo_pa_range_checked() {
        let bench = SimBench::default();
        let mut cart = CartAssembly::new(
            band(4),
            Some(bench.warm.clone()),
            None,
            LoConfig::without_delays(),
            Sinks::default(),
        )
        .unwrap();
        cart.set_enable(true).unwrap();
        assert!(matches!(
            cart.set_lo_pa(Polarization::Pol0, 3.0, -0.5),
            Err(LoError::InvalidArgument(_))
        ));
        cart.set_lo_pa(Polarization::Pol0, 1.2, -0.5).unwrap();
        assert_eq!(bench.warm.pa_drain_voltage(Polarization::Pol0).unwrap(), 1.2);
    }

    #[test]
    fn test_one_operation_at_a_time() {
        let mut config = LoConfig::without_delays();
        config.measure.heating = HeatingConfig {
            duration_ms: 60_000,
            sample_ms: 1,
            ..Default::default()
        };
        let cold = Arc::new(SimColdUnit::default());
        let mut cart = CartAssembly::new(
            band(8),
            None,
            Some(cold.clone()),
            config,
            Sinks::default(),
        )
        .unwrap();
        cart.set_enable(true).unwrap();

        cart.mixer_heating(Polarization::Pol0).unwrap();
        assert!(cart.is_busy());
        assert_eq!(cart.active_operation().as_deref(), Some("mixer heating"));
        assert!(matches!(
            cart.mixer_deflux(Polarization::Pol0),
            Err(LoError::Busy(_))
        ));
        assert!(matches!(
            cart.set_sis_voltage(Polarization::Pol0, Sideband::Sb1, 1.0, false),
            Err(LoError::Busy(_))
        ));

        assert!(cart.abort_measurement());
        let outcome = cart.wait_operation().unwrap();
        assert!(!outcome.succeeded());
        assert_eq!(cold.heater_current(Polarization::Pol0).unwrap(), 0.0);
        assert!(!cart.is_busy());
    }

    #[test]
    fn test_iv_curve_through_cartridge() {
        let (mut cart, cold) = cold_only();
        cart.set_enable(true).unwrap();
        let params = IvCurveConfig {
            vj_low: 0.0,
            vj_high: 2.0,
            vj_step: 0.5,
            settle_ms: 0,
        };
        cart.measure_iv_curve(Polarization::Pol1, Sideband::Sb1, Some(params))
            .unwrap();
        match cart.wait_operation() {
            Some(OperationOutcome::Measurement(report)) => {
                assert_eq!(report.kind, MeasurementKind::IvCurve);
                assert!(report.completed);
                assert_eq!(report.points, 5);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(
            cold.sis_voltage(Polarization::Pol1, Sideband::Sb1).unwrap(),
            0.0
        );
    }

    #[test]
    fn test_optimization_needs_both_units() {
        let (mut cart, _) = cold_only();
        cart.set_enable(true).unwrap();
        let request = OptimizeRequest {
            freq_lo_ghz: 100.0,
            do_pol0: true,
            do_pol1: false,
            vj1: 2.3,
            vj2: 2.3,
            vd: 1.0,
        };
        assert_eq!(
            cart.optimize_if_power(request).err(),
            Some(LoError::MissingUnit(UnitKind::Warm))
        );
        assert!(matches!(
            cart.set_if_power(Polarization::Pol0, -30.0, -30.0),
            Err(LoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_optimization_runs_in_slot() {
        let bench = SimBench::default();
        let mut cart = CartAssembly::new(
            band(5),
            Some(bench.warm.clone()),
            Some(bench.cold.clone()),
            LoConfig::without_delays(),
            Sinks::default(),
        )
        .unwrap();
        cart.set_enable(true).unwrap();
        cart.optimize_if_power(OptimizeRequest {
            freq_lo_ghz: 100.0,
            do_pol0: true,
            do_pol1: false,
            vj1: 2.3,
            vj2: 2.3,
            vd: 1.0,
        })
        .unwrap();
        assert_eq!(
            cart.active_operation().as_deref(),
            Some("IF power optimization")
        );

        // Feed a few readings, then stop before the run completes.
        for _ in 0..50 {
            if cart.set_if_power(Polarization::Pol0, -31.0, -31.0).is_ok() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(cart.abort_measurement());
        match cart.wait_operation() {
            Some(OperationOutcome::BiasOptimization(report)) => assert!(report.stopped),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
