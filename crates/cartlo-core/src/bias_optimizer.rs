//! # Bias Optimizer
//!
//! Maximizes summed sideband IF power of one or both polarizations by tuning
//! the LO amplifier drain voltage (VD) and the two SIS junction voltages
//! (VJ1, VJ2) in turn. Power readings are not read from hardware: they are
//! requested through the status sink and delivered by another thread via
//! [`BiasOptimizer::set_if_power`].
//!
//! Per polarization:
//!
//! ```text
//! commit VJ1, VJ2, VD ─► wait first reading
//!   rep 1: VD ─► VJ2 ─► VJ1
//!   rep 2: VD ─► VJ2 ─► VJ1      (smaller steps)
//!   rep 3: VD ─► VJ2 ─► VJ1      (smaller still)
//! ```
//!
//! A failed phase is recorded and the next one runs. A stop request ends
//! the current phase and skips everything after it.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cartlo_hal::{ColdUnit, Polarization, Sideband, WarmUnit};
use tracing::{info, warn};

use crate::config::OptimizerConfig;
use crate::error::{LoError, LoResult};
use crate::maximizer::{
    geometric_schedule, Dependent, Direction, MaximizeOutcome, Maximizer, MaximizerSettings,
    Objective, OscillationGuard,
};
use crate::monitor::MonitorPause;
use crate::observe::{OpEvent, Sinks};
use crate::rt::{Mailbox, StopToken, WaitError, Worker, WorkerConfig};

/// LO amplifier drain voltage limits, V
pub const VD_RANGE: (f64, f64) = (0.0, 2.5);
/// SIS junction voltage limits during optimization, mV
pub const VJ_RANGE: (f64, f64) = (0.0, 25.0);

/// Repetitions of the VD, VJ2, VJ1 cycle.
pub const REPETITIONS: usize = 3;

/// Control tuned by one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiasControl {
    Vd,
    Vj2,
    Vj1,
}

impl BiasControl {
    /// Phase order within one repetition.
    pub const CYCLE: [BiasControl; 3] = [BiasControl::Vd, BiasControl::Vj2, BiasControl::Vj1];

    fn bounds(self) -> (f64, f64) {
        match self {
            BiasControl::Vd => VD_RANGE,
            BiasControl::Vj1 | BiasControl::Vj2 => VJ_RANGE,
        }
    }
}

impl fmt::Display for BiasControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BiasControl::Vd => write!(f, "VD"),
            BiasControl::Vj2 => write!(f, "VJ2"),
            BiasControl::Vj1 => write!(f, "VJ1"),
        }
    }
}

/// Parameters of [`BiasOptimizer::start`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizeRequest {
    pub freq_lo_ghz: f64,
    pub do_pol0: bool,
    pub do_pol1: bool,
    /// Starting junction voltage, sideband 1, mV
    pub vj1: f64,
    /// Starting junction voltage, sideband 2, mV
    pub vj2: f64,
    /// Starting LO amplifier drain voltage, V
    pub vd: f64,
}

impl OptimizeRequest {
    fn polarizations(&self) -> Vec<Polarization> {
        let mut pols = Vec::with_capacity(2);
        if self.do_pol0 {
            pols.push(Polarization::Pol0);
        }
        if self.do_pol1 {
            pols.push(Polarization::Pol1);
        }
        pols
    }

    fn validate(&self) -> LoResult<()> {
        if !self.do_pol0 && !self.do_pol1 {
            return Err(LoError::InvalidArgument("no polarization selected".to_string()));
        }
        let in_range = |v: f64, (lo, hi): (f64, f64)| v >= lo && v <= hi;
        if !in_range(self.vd, VD_RANGE)
            || !in_range(self.vj1, VJ_RANGE)
            || !in_range(self.vj2, VJ_RANGE)
        {
            return Err(LoError::InvalidArgument(format!(
                "start bias VD={} VJ1={} VJ2={} outside limits",
                self.vd, self.vj1, self.vj2
            )));
        }
        Ok(())
    }
}

/// A committed bias setting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiasPoint {
    pub vd: f64,
    pub vj1: f64,
    pub vj2: f64,
}

impl BiasPoint {
    pub fn get(&self, control: BiasControl) -> f64 {
        match control {
            BiasControl::Vd => self.vd,
            BiasControl::Vj1 => self.vj1,
            BiasControl::Vj2 => self.vj2,
        }
    }

    fn set(&mut self, control: BiasControl, value: f64) {
        match control {
            BiasControl::Vd => self.vd = value,
            BiasControl::Vj1 => self.vj1 = value,
            BiasControl::Vj2 => self.vj2 = value,
        }
    }
}

/// Outcome of one of the nine phases.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseResult {
    /// 1-based phase number
    pub phase: usize,
    pub control: BiasControl,
    pub step: f64,
    pub start: f64,
    pub final_value: f64,
    pub best_power: f64,
    pub iterations: u32,
    pub outcome: MaximizeOutcome,
}

impl PhaseResult {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Results for one polarization.
#[derive(Debug, Clone, PartialEq)]
pub struct PolarizationReport {
    pub pol: Polarization,
    pub phases: Vec<PhaseResult>,
    /// First phase that did not converge
    pub first_failed_phase: Option<usize>,
    /// Bias left committed in hardware
    pub final_bias: BiasPoint,
    /// Last power reading, dB
    pub final_power: Option<f64>,
    /// Set when the polarization could not start (write failure, no first reading)
    pub error: Option<LoError>,
}

impl PolarizationReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.first_failed_phase.is_none()
    }
}

/// Results of a whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationReport {
    pub freq_lo_ghz: f64,
    pub polarizations: Vec<PolarizationReport>,
    /// A stop request cut the run short
    pub stopped: bool,
}

impl OptimizationReport {
    pub fn succeeded(&self) -> bool {
        !self.stopped && self.polarizations.iter().all(PolarizationReport::succeeded)
    }

    pub fn polarization(&self, pol: Polarization) -> Option<&PolarizationReport> {
        self.polarizations.iter().find(|r| r.pol == pol)
    }
}

/// Handoff point for power readings from the meter's thread.
#[derive(Debug, Default)]
struct PowerFeed {
    mailbox: Arc<Mailbox<f64>>,
    active: Mutex<Option<Polarization>>,
}

impl PowerFeed {
    /// Switch polarization. Readings left for the previous one are dropped
    /// under the same lock that `post` checks.
    fn set_active(&self, pol: Option<Polarization>) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        *active = pol;
        self.mailbox.clear();
    }

    /// Post a reading only if `pol` is still the active polarization.
    fn post(&self, pol: Polarization, power: f64) -> LoResult<()> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        match *active {
            Some(current) if current == pol => {
                self.mailbox.post(power);
                Ok(())
            }
            Some(current) => Err(LoError::InvalidArgument(format!(
                "IF power for {} while optimizing {}",
                pol, current
            ))),
            None => Err(LoError::InvalidArgument(
                "no IF power optimization in progress".to_string(),
            )),
        }
    }

    fn active(&self) -> Option<Polarization> {
        *self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Everything the worker thread owns.
struct Session {
    warm: Arc<dyn WarmUnit>,
    cold: Arc<dyn ColdUnit>,
    config: OptimizerConfig,
    sinks: Sinks,
    feed: Arc<PowerFeed>,
}

/// IF power maximizer over the cartridge's bias controls.
pub struct BiasOptimizer {
    warm: Arc<dyn WarmUnit>,
    cold: Arc<dyn ColdUnit>,
    config: OptimizerConfig,
    sinks: Sinks,
    feed: Arc<PowerFeed>,
    worker: Option<Worker<OptimizationReport>>,
}

impl BiasOptimizer {
    pub fn new(
        warm: Arc<dyn WarmUnit>,
        cold: Arc<dyn ColdUnit>,
        config: OptimizerConfig,
        sinks: Sinks,
    ) -> Self {
        Self {
            warm,
            cold,
            config,
            sinks,
            feed: Arc::new(PowerFeed::default()),
            worker: None,
        }
    }

    /// Begin optimizing on a background thread.
    ///
    /// Rejected while a previous run is still going.
    pub fn start(&mut self, request: OptimizeRequest) -> LoResult<()> {
        if self.is_busy() {
            return Err(LoError::Busy("bias optimization".to_string()));
        }
        request.validate()?;

        // Reap a finished run before replacing it.
        if let Some(previous) = self.worker.take() {
            previous.join();
        }

        let session = Session {
            warm: self.warm.clone(),
            cold: self.cold.clone(),
            config: self.config.clone(),
            sinks: self.sinks.clone(),
            feed: self.feed.clone(),
        };
        self.feed.mailbox.reopen();

        info!(
            freq_lo = request.freq_lo_ghz,
            pol0 = request.do_pol0,
            pol1 = request.do_pol1,
            "Starting IF power optimization"
        );
        let worker = Worker::spawn(WorkerConfig::new("optimize_if_power"), move |stop| {
            session.run(request, &stop)
        })?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Deliver the SB1 and SB2 IF power of `pol`.
    ///
    /// Rejected unless `pol` is the polarization being optimized.
    pub fn set_if_power(
        &self,
        pol: Polarization,
        power_sb1: f64,
        power_sb2: f64,
    ) -> LoResult<()> {
        self.feed.post(pol, power_sb1 + power_sb2)
    }

    /// Polarization currently waiting for readings, if any.
    pub fn active_polarization(&self) -> Option<Polarization> {
        self.feed.active()
    }

    /// Request a cooperative stop.
    pub fn abort(&self) {
        if let Some(worker) = self.worker.as_ref() {
            worker.stop();
            self.feed.mailbox.close();
        }
    }

    pub fn is_busy(&self) -> bool {
        self.worker.as_ref().map_or(false, |w| !w.is_finished())
    }

    /// Wait for the run to end and take its report.
    pub fn join(&mut self) -> Option<OptimizationReport> {
        self.worker.take().and_then(Worker::join)
    }
}

impl Drop for BiasOptimizer {
    fn drop(&mut self) {
        self.abort();
    }
}

impl fmt::Debug for BiasOptimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BiasOptimizer")
            .field("busy", &self.is_busy())
            .field("active", &self.feed.active())
            .finish()
    }
}

/// Per-phase adapter from the maximizer to the hardware.
struct BiasObjective<'a> {
    session: &'a Session,
    pol: Polarization,
    phase: usize,
    control: BiasControl,
    bias: BiasPoint,
    last_power: Option<f64>,
}

impl Objective for BiasObjective<'_> {
    fn commit(&mut self, value: f64) -> LoResult<()> {
        self.session.write(self.pol, self.control, value)?;
        self.bias.set(self.control, value);
        Ok(())
    }

    fn request(&mut self) -> LoResult<Dependent> {
        self.session.request_power(self.pol);
        Ok(Dependent::Pending)
    }

    fn observe(&mut self, _control: f64, power: f64) {
        self.last_power = Some(power);
        self.session.record_sample(self.pol, self.phase, self.control, &self.bias, power);
    }
}

impl Session {
    fn write(&self, pol: Polarization, control: BiasControl, value: f64) -> LoResult<()> {
        match control {
            BiasControl::Vd => self.warm.set_pa_drain_voltage(pol, value)?,
            BiasControl::Vj1 => self.cold.set_sis_voltage(pol, Sideband::Sb1, value)?,
            BiasControl::Vj2 => self.cold.set_sis_voltage(pol, Sideband::Sb2, value)?,
        }
        Ok(())
    }

    fn request_power(&self, pol: Polarization) {
        self.feed.mailbox.clear();
        self.sinks.event(OpEvent::RequestIfPower { pol });
    }

    fn record_sample(
        &self,
        pol: Polarization,
        phase: usize,
        control: BiasControl,
        bias: &BiasPoint,
        power: f64,
    ) {
        self.sinks.record(&format!(
            "{}\t{}\t{}\t{:.4}\t{:.4}\t{:.4}\t{:.4}",
            pol, phase, control, bias.vd, bias.vj1, bias.vj2, power
        ));
    }

    fn run(&self, request: OptimizeRequest, stop: &StopToken) -> OptimizationReport {
        let _pause = MonitorPause::new(self.cold.monitor_gate());
        let pols = request.polarizations();
        let mut report = OptimizationReport {
            freq_lo_ghz: request.freq_lo_ghz,
            polarizations: Vec::with_capacity(pols.len()),
            stopped: false,
        };

        // One history for the whole run; phases do not reset it.
        let mut guard = OscillationGuard::new();
        for (i, &pol) in pols.iter().enumerate() {
            if stop.is_stopped() {
                report.stopped = true;
                break;
            }
            let pol_report =
                self.optimize_polarization(pol, &request, stop, &mut guard, (i, pols.len()));
            report.polarizations.push(pol_report);
        }
        report.stopped |= stop.is_stopped();
        self.feed.set_active(None);

        for pol_report in &report.polarizations {
            let b = pol_report.final_bias;
            self.sinks.record(&format!(
                "{}\tfinal\t{:.4}\t{:.4}\t{:.4}\t{}\t{}",
                pol_report.pol,
                b.vd,
                b.vj1,
                b.vj2,
                pol_report
                    .final_power
                    .map_or_else(|| "nan".to_string(), |p| format!("{:.4}", p)),
                pol_report
                    .first_failed_phase
                    .map_or_else(|| "-".to_string(), |p| p.to_string()),
            ));
        }

        let message = if report.succeeded() {
            format!("IF power optimization at {} GHz complete", request.freq_lo_ghz)
        } else if report.stopped {
            "IF power optimization stopped".to_string()
        } else {
            format!(
                "IF power optimization at {} GHz finished with failures",
                request.freq_lo_ghz
            )
        };
        info!(stopped = report.stopped, success = report.succeeded(), "{}", message);
        self.sinks.status(report.succeeded(), &message);
        self.sinks.event(OpEvent::Done);
        self.sinks.event(OpEvent::RequestStopPowerReadings);
        report
    }

    fn optimize_polarization(
        &self,
        pol: Polarization,
        request: &OptimizeRequest,
        stop: &StopToken,
        guard: &mut OscillationGuard,
        (pol_index, pol_count): (usize, usize),
    ) -> PolarizationReport {
        let mut bias = BiasPoint {
            vd: request.vd,
            vj1: request.vj1,
            vj2: request.vj2,
        };
        let mut report = PolarizationReport {
            pol,
            phases: Vec::with_capacity(REPETITIONS * BiasControl::CYCLE.len()),
            first_failed_phase: None,
            final_bias: bias,
            final_power: None,
            error: None,
        };

        self.feed.set_active(Some(pol));

        let initial = [BiasControl::Vj1, BiasControl::Vj2, BiasControl::Vd]
            .into_iter()
            .try_for_each(|control| self.write(pol, control, bias.get(control)));
        if let Err(e) = initial {
            warn!(%pol, error = %e, "Failed to commit starting bias");
            report.error = Some(e);
            return report;
        }

        self.request_power(pol);
        let first = self.feed.mailbox.wait_take(
            Duration::from_millis(self.config.first_value_timeout_ms),
            Duration::from_millis(self.config.poll_interval_ms),
            stop,
        );
        match first {
            Ok(power) => {
                report.final_power = Some(power);
                self.record_sample(pol, 0, BiasControl::Vd, &bias, power);
            }
            Err(WaitError::Timeout) => {
                let e = LoError::Timeout {
                    what: format!("first IF power reading of {}", pol),
                    timeout_ms: self.config.first_value_timeout_ms,
                };
                warn!(%pol, "{}", e);
                report.error = Some(e);
                return report;
            }
            Err(WaitError::Stopped) | Err(WaitError::Closed) => {
                report.error = Some(LoError::Aborted);
                return report;
            }
        }

        let total = REPETITIONS * BiasControl::CYCLE.len();
        let mut phase = 0usize;

        'reps: for rep in 0..REPETITIONS {
            for control in BiasControl::CYCLE {
                if stop.is_stopped() {
                    break 'reps;
                }
                phase += 1;

                let step = match control {
                    BiasControl::Vd => self.config.vd_steps[rep],
                    BiasControl::Vj1 | BiasControl::Vj2 => self.config.vj_steps[rep],
                };
                let (min, max) = control.bounds();
                let settings = MaximizerSettings {
                    start: bias.get(control),
                    min,
                    max,
                    schedule: geometric_schedule(
                        step,
                        self.config.refine_factor,
                        self.config.schedule_len,
                    ),
                    direction: Direction::Up,
                    max_iterations: self.config.max_iterations,
                    tolerance: self.config.tolerance,
                    timeout: Duration::from_millis(self.config.sample_timeout_ms),
                    poll_interval: Duration::from_millis(self.config.poll_interval_ms),
                };
                let start = settings.start;

                let mut objective = BiasObjective {
                    session: self,
                    pol,
                    phase,
                    control,
                    bias,
                    last_power: None,
                };
                let result = Maximizer::new(settings)
                    .with_feed(self.feed.mailbox.clone())
                    .with_stop(stop.clone())
                    .run(&mut objective, Some(&mut *guard));

                bias = objective.bias;
                // The maximizer may have recommitted its best point.
                bias.set(control, result.final_control);
                if let Some(p) = objective.last_power {
                    report.final_power = Some(p);
                }

                if result.outcome.is_success() {
                    info!(%pol, phase, %control, value = result.final_control, "Phase converged");
                } else {
                    warn!(%pol, phase, %control, outcome = result.outcome.label(), "Phase failed");
                    if report.first_failed_phase.is_none() {
                        report.first_failed_phase = Some(phase);
                    }
                }

                let stopped = result.outcome == MaximizeOutcome::Stopped;
                report.phases.push(PhaseResult {
                    phase,
                    control,
                    step,
                    start,
                    final_value: result.final_control,
                    best_power: result.best_value,
                    iterations: result.iterations,
                    outcome: result.outcome,
                });

                let done = pol_index * total + phase;
                self.sinks
                    .progress(100.0 * done as f64 / (pol_count * total) as f64);

                if stopped {
                    break 'reps;
                }
            }
        }

        report.final_bias = bias;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoConfig;
    use crate::observe::{MemorySink, RecordSink, StatusSink};
    use cartlo_hal::sim::SimBench;
    use cartlo_hal::Monitored;
    use std::sync::mpsc;
    use std::thread;

    /// Forwards power requests to a channel and keeps everything else.
    struct RequestSink {
        requests: Mutex<mpsc::Sender<Polarization>>,
        memory: MemorySink,
    }

    impl StatusSink for RequestSink {
        fn status(&self, success: bool, message: &str) {
            self.memory.status(success, message);
        }

        fn progress(&self, percent: f64) {
            self.memory.progress(percent);
        }

        fn event(&self, event: OpEvent) {
            if let OpEvent::RequestIfPower { pol } = event {
                let _ = self.requests.lock().unwrap().send(pol);
            }
            self.memory.event(event);
        }
    }

    impl RecordSink for RequestSink {
        fn record(&self, row: &str) {
            self.memory.record(row);
        }
    }

    fn test_config() -> OptimizerConfig {
        let mut config = LoConfig::without_delays().optimizer;
        config.first_value_timeout_ms = 2_000;
        config.sample_timeout_ms = 2_000;
        config
    }

    /// Optimizer on a simulated bench whose meter answers every request
    /// through `answer`.
    fn bench_optimizer<F>(
        config: OptimizerConfig,
        answer: F,
    ) -> (SimBench, Arc<RequestSink>, Arc<Mutex<Option<BiasOptimizer>>>, thread::JoinHandle<()>)
    where
        F: Fn(&SimBench, Polarization) -> Option<(f64, f64)> + Send + 'static,
    {
        let bench = SimBench::default();
        let (tx, rx) = mpsc::channel();
        let sink = Arc::new(RequestSink {
            requests: Mutex::new(tx),
            memory: MemorySink::new(),
        });
        let optimizer = Arc::new(Mutex::new(Some(BiasOptimizer::new(
            bench.warm.clone(),
            bench.cold.clone(),
            config,
            Sinks::new(sink.clone(), sink.clone()),
        ))));

        let meter_bench = SimBench {
            warm: bench.warm.clone(),
            cold: bench.cold.clone(),
            photonic: bench.photonic.clone(),
            router: bench.router.clone(),
            meter: bench.meter.clone(),
        };
        let feed = optimizer.lock().unwrap().as_ref().unwrap().feed.clone();
        let meter = thread::spawn(move || {
            while let Ok(pol) = rx.recv_timeout(Duration::from_millis(500)) {
                if let Some((p1, p2)) = answer(&meter_bench, pol) {
                    let _ = feed.post(pol, p1 + p2);
                }
            }
        });
        (bench, sink, optimizer, meter)
    }

    fn request(do_pol0: bool, do_pol1: bool) -> OptimizeRequest {
        OptimizeRequest {
            freq_lo_ghz: 100.0,
            do_pol0,
            do_pol1,
            vj1: 2.3,
            vj2: 2.3,
            vd: 1.0,
        }
    }

    fn run_to_end(
        optimizer: &Arc<Mutex<Option<BiasOptimizer>>>,
        req: OptimizeRequest,
    ) -> OptimizationReport {
        let mut guard = optimizer.lock().unwrap();
        let opt = guard.as_mut().unwrap();
        opt.start(req).unwrap();
        opt.join().unwrap()
    }

    #[test]
    fn test_converges_to_drain_voltage_peak() {
        let (bench, sink, optimizer, meter) =
            bench_optimizer(test_config(), |bench, pol| bench.if_power(pol).ok());

        let report = run_to_end(&optimizer, request(true, false));
        optimizer.lock().unwrap().take();
        meter.join().unwrap();

        assert!(report.succeeded(), "{:?}", report);
        let pol0 = report.polarization(Polarization::Pol0).unwrap();
        assert_eq!(pol0.phases.len(), 9);
        assert_eq!(pol0.first_failed_phase, None);

        let first_vd_step = test_config().vd_steps[0];
        for phase in pol0.phases.iter().filter(|p| p.control == BiasControl::Vd) {
            assert!((phase.final_value - 1.4).abs() <= first_vd_step, "{:?}", phase);
        }
        let vd = bench.warm.pa_drain_voltage(Polarization::Pol0).unwrap();
        assert!((vd - 1.4).abs() <= first_vd_step);
        assert!(report.polarization(Polarization::Pol1).is_none());

        let events = sink.memory.events();
        let n = events.len();
        assert_eq!(events[n - 2], OpEvent::Done);
        assert_eq!(events[n - 1], OpEvent::RequestStopPowerReadings);
        assert!(sink.memory.rows().iter().all(|r| r.contains('\t')));
        assert!(!bench.cold.monitor_paused());
    }

    #[test]
    fn test_monitor_paused_during_run() {
        let (bench, _sink, optimizer, meter) = bench_optimizer(test_config(), |bench, pol| {
            assert!(bench.cold.monitor_paused());
            bench.if_power(pol).ok()
        });
        let report = run_to_end(&optimizer, request(false, true));
        optimizer.lock().unwrap().take();
        meter.join().unwrap();

        assert!(report.succeeded());
        assert_eq!(bench.cold.monitor_gate().depth(), 0);
    }

    #[test]
    fn test_oscillating_phase_fails_and_run_continues() {
        let mut config = test_config();
        config.vd_steps = [0.2, 0.1, 0.05];
        config.schedule_len = 5;
        config.refine_factor = 1.0;

        // Every reading lower than the one before: each move looks worse.
        let counter = Arc::new(Mutex::new(0.0f64));
        let (_bench, _sink, optimizer, meter) = bench_optimizer(config, move |_, _| {
            let mut c = counter.lock().unwrap();
            *c -= 1.0;
            Some((*c, 0.0))
        });
        let report = run_to_end(&optimizer, request(true, false));
        optimizer.lock().unwrap().take();
        meter.join().unwrap();

        let pol0 = report.polarization(Polarization::Pol0).unwrap();
        assert_eq!(pol0.phases.len(), 9);
        assert_eq!(pol0.phases[0].outcome, MaximizeOutcome::Oscillation);
        assert_eq!(pol0.first_failed_phase, Some(1));
        assert_eq!(pol0.phases[0].final_value, 1.0);
        assert!(!report.succeeded());
    }

    #[test]
    fn test_oscillation_history_spans_phases() {
        let mut config = test_config();
        config.vd_steps = [0.2; 3];
        config.vj_steps = [0.2; 3];
        config.schedule_len = 1;

        // Falling readings: every phase commits its start, one step up, then stops.
        let counter = Arc::new(Mutex::new(0.0f64));
        let (_bench, _sink, optimizer, meter) = bench_optimizer(config, move |_, _| {
            let mut c = counter.lock().unwrap();
            *c -= 1.0;
            Some((*c, 0.0))
        });
        let mut req = request(true, false);
        req.vd = 2.0;
        req.vj1 = 2.0;
        req.vj2 = 2.0;
        let report = run_to_end(&optimizer, req);
        optimizer.lock().unwrap().take();
        meter.join().unwrap();

        // VD and VJ2 each commit 2.0 then 2.2; VJ1's first commit of 2.0
        // completes 2.0, 2.2, 2.0, 2.2, 2.0 across the three phases.
        let pol0 = report.polarization(Polarization::Pol0).unwrap();
        assert_eq!(pol0.phases.len(), 9);
        assert_eq!(pol0.phases[0].outcome, MaximizeOutcome::Converged);
        assert_eq!(pol0.phases[1].outcome, MaximizeOutcome::Converged);
        assert_eq!(pol0.phases[2].control, BiasControl::Vj1);
        assert_eq!(pol0.phases[2].outcome, MaximizeOutcome::Oscillation);
        assert_eq!(pol0.first_failed_phase, Some(3));
    }

    #[test]
    fn test_first_reading_timeout() {
        let mut config = test_config();
        config.first_value_timeout_ms = 30;
        let (bench, sink, optimizer, meter) = bench_optimizer(config, |_, _| None);

        let report = run_to_end(&optimizer, request(true, true));
        optimizer.lock().unwrap().take();
        meter.join().unwrap();

        assert_eq!(report.polarizations.len(), 2);
        for pol_report in &report.polarizations {
            assert!(matches!(pol_report.error, Some(LoError::Timeout { .. })));
            assert!(pol_report.phases.is_empty());
        }
        // Starting bias stays committed
        assert_eq!(bench.warm.pa_drain_voltage(Polarization::Pol0).unwrap(), 1.0);
        assert!(sink.memory.any_failure());
        assert!(sink.memory.events().contains(&OpEvent::Done));
    }

    #[test]
    fn test_set_if_power_checks_polarization() {
        let bench = SimBench::default();
        let (sinks, _memory) = Sinks::memory();
        let optimizer =
            BiasOptimizer::new(bench.warm.clone(), bench.cold.clone(), test_config(), sinks);

        assert!(optimizer.set_if_power(Polarization::Pol0, -30.0, -30.0).is_err());

        optimizer.feed.set_active(Some(Polarization::Pol1));
        assert!(matches!(
            optimizer.set_if_power(Polarization::Pol0, -30.0, -30.0),
            Err(LoError::InvalidArgument(_))
        ));
        assert!(optimizer.set_if_power(Polarization::Pol1, -30.0, -31.0).is_ok());
        assert_eq!(optimizer.feed.mailbox.try_take(), Some(-61.0));
    }

    #[test]
    fn test_no_reading_crosses_polarization_switch() {
        let feed = Arc::new(PowerFeed::default());
        feed.set_active(Some(Polarization::Pol0));

        let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let poster = {
            let (feed, running) = (feed.clone(), running.clone());
            thread::spawn(move || {
                while running.load(std::sync::atomic::Ordering::Relaxed) {
                    let _ = feed.post(Polarization::Pol0, -60.0);
                }
            })
        };

        for _ in 0..200 {
            feed.set_active(Some(Polarization::Pol1));
            // Pol0 readings are rejected from the moment the switch returns.
            for _ in 0..20 {
                assert_eq!(feed.mailbox.try_take(), None);
            }
            feed.set_active(Some(Polarization::Pol0));
        }
        running.store(false, std::sync::atomic::Ordering::Relaxed);
        poster.join().unwrap();
    }

    #[test]
    fn test_abort_skips_remaining_work() {
        let (_bench, _sink, optimizer, meter) = bench_optimizer(test_config(), |bench, pol| {
            thread::sleep(Duration::from_millis(2));
            bench.if_power(pol).ok()
        });
        {
            let mut guard = optimizer.lock().unwrap();
            let opt = guard.as_mut().unwrap();
            opt.start(request(true, true)).unwrap();
            assert!(opt.is_busy());
            assert!(matches!(opt.start(request(true, true)), Err(LoError::Busy(_))));
            thread::sleep(Duration::from_millis(20));
            opt.abort();
            let report = opt.join().unwrap();
            assert!(report.stopped);
            assert!(!report.succeeded());
            let phases: usize = report.polarizations.iter().map(|p| p.phases.len()).sum();
            assert!(phases < 18);
        }
        optimizer.lock().unwrap().take();
        meter.join().unwrap();
    }

    #[test]
    fn test_rejects_bad_request() {
        let bench = SimBench::default();
        let mut optimizer = BiasOptimizer::new(
            bench.warm.clone(),
            bench.cold.clone(),
            test_config(),
            Sinks::default(),
        );
        assert!(optimizer.start(request(false, false)).is_err());
        let mut req = request(true, false);
        req.vd = 3.0;
        assert!(optimizer.start(req).is_err());
        assert!(!optimizer.is_busy());
    }
}
