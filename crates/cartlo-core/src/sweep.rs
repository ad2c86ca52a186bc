//! Stepped approach to SIS bias and magnet setpoints.
//!
//! Large jumps in junction voltage or magnet current trap flux and heat the
//! mixer, so setpoints are approached in `ceil(|Δ| / step)` evenly spaced
//! writes with a dwell between them. The cold unit's monitor is paused
//! for the duration of a sweep.

use cartlo_hal::{ColdUnit, Polarization, Sideband};
use tracing::debug;

use crate::config::SweepConfig;
use crate::error::{LoError, LoResult};
use crate::monitor::MonitorPause;
use crate::rt::StopToken;

/// Number of writes needed to move `from` to `to` in steps of at most `step`.
pub fn step_count(from: f64, to: f64, step: f64) -> usize {
    let delta = (to - from).abs();
    if delta == 0.0 || !(step > 0.0) {
        return 1;
    }
    (delta / step).ceil().max(1.0) as usize
}

/// Intermediate setpoints from `from` (exclusive) to `to` (inclusive).
pub fn sweep_points(from: f64, to: f64, step: f64) -> Vec<f64> {
    let n = step_count(from, to, step);
    (1..=n)
        .map(|i| {
            if i == n {
                to
            } else {
                from + (to - from) * i as f64 / n as f64
            }
        })
        .collect()
}

/// Applies [`SweepConfig`] to cold-unit setpoint changes.
#[derive(Debug, Clone)]
pub struct Sweeper {
    config: SweepConfig,
}

impl Sweeper {
    pub fn new(config: SweepConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Walk through `sweep_points(from, to, step)`, calling `write` for each.
    ///
    /// A single write when `sweep` is false or sweeping is disabled in the
    /// configuration. A stop request ends the walk after the current write.
    pub fn run<F>(
        &self,
        from: f64,
        to: f64,
        step: f64,
        sweep: bool,
        stop: Option<&StopToken>,
        mut write: F,
    ) -> LoResult<()>
    where
        F: FnMut(f64) -> LoResult<()>,
    {
        if !(sweep && self.config.enabled) {
            return write(to);
        }

        let points = sweep_points(from, to, step);
        let last = points.len() - 1;
        for (i, value) in points.into_iter().enumerate() {
            write(value)?;
            if i < last {
                match stop {
                    Some(stop) => {
                        if !stop.sleep(self.config.dwell()) {
                            return Err(LoError::Aborted);
                        }
                    }
                    None => std::thread::sleep(self.config.dwell()),
                }
            }
        }
        Ok(())
    }

    /// Move one junction voltage to `millivolts`.
    pub fn set_sis_voltage(
        &self,
        cold: &dyn ColdUnit,
        pol: Polarization,
        sb: Sideband,
        millivolts: f64,
        sweep: bool,
    ) -> LoResult<()> {
        let _pause = MonitorPause::new(cold.monitor_gate());
        let from = cold.sis_voltage(pol, sb)?;
        debug!(%pol, %sb, from, to = millivolts, sweep, "Setting SIS voltage");
        self.run(from, millivolts, self.config.sis_step_mv, sweep, None, |v| {
            Ok(cold.set_sis_voltage(pol, sb, v)?)
        })
    }

    /// Move one magnet current to `milliamps`.
    pub fn set_magnet_current(
        &self,
        cold: &dyn ColdUnit,
        pol: Polarization,
        sb: Sideband,
        milliamps: f64,
        sweep: bool,
    ) -> LoResult<()> {
        let _pause = MonitorPause::new(cold.monitor_gate());
        let from = cold.sis_magnet_current(pol, sb)?;
        debug!(%pol, %sb, from, to = milliamps, sweep, "Setting SIS magnet current");
        self.run(from, milliamps, self.config.magnet_step_ma, sweep, None, |i| {
            Ok(cold.set_sis_magnet_current(pol, sb, i)?)
        })
    }
}

impl Default for Sweeper {
    fn default() -> Self {
        Self::new(SweepConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartlo_hal::sim::{ColdWrite, SimColdUnit};

    fn sweeper(enabled: bool) -> Sweeper {
        Sweeper::new(SweepConfig {
            enabled,
            sis_step_mv: 0.5,
            magnet_step_ma: 2.0,
            dwell_ms: 0,
        })
    }

    #[test]
    fn test_step_count() {
        assert_eq!(step_count(0.0, 2.0, 0.5), 4);
        assert_eq!(step_count(0.0, 2.1, 0.5), 5);
        assert_eq!(step_count(3.0, 1.0, 0.5), 4);
        assert_eq!(step_count(1.0, 1.0, 0.5), 1);
    }

    #[test]
    fn test_points_bounded_by_step() {
        let points = sweep_points(0.0, 2.1, 0.5);
        assert_eq!(points.len(), 5);
        assert_eq!(*points.last().unwrap(), 2.1);
        let mut prev = 0.0;
        for p in points {
            assert!((p - prev).abs() <= 0.5 + 1e-12);
            prev = p;
        }
    }

    #[test]
    fn test_sis_voltage_swept() {
        let cold = SimColdUnit::default();
        sweeper(true)
            .set_sis_voltage(&cold, Polarization::Pol0, Sideband::Sb1, 2.0, true)
            .unwrap();
        let writes = cold.writes();
        assert_eq!(writes.len(), 4);
        assert_eq!(
            writes[3],
            ColdWrite::SisVoltage(Polarization::Pol0, Sideband::Sb1, 2.0)
        );
        assert_eq!(cold.writes_while_monitored(), 0);
    }

    #[test]
    fn test_single_write_when_disabled() {
        let cold = SimColdUnit::default();
        sweeper(false)
            .set_sis_voltage(&cold, Polarization::Pol1, Sideband::Sb2, 2.0, true)
            .unwrap();
        assert_eq!(cold.writes().len(), 1);

        sweeper(true)
            .set_sis_voltage(&cold, Polarization::Pol1, Sideband::Sb2, 0.0, false)
            .unwrap();
        assert_eq!(cold.writes().len(), 2);
    }

    #[test]
    fn test_magnet_swept_down() {
        let cold = SimColdUnit::default();
        let s = sweeper(true);
        s.set_magnet_current(&cold, Polarization::Pol0, Sideband::Sb2, 10.0, false)
            .unwrap();
        s.set_magnet_current(&cold, Polarization::Pol0, Sideband::Sb2, 4.0, true)
            .unwrap();
        let writes = cold.writes();
        assert_eq!(writes.len(), 4);
        assert_eq!(
            writes[3],
            ColdWrite::MagnetCurrent(Polarization::Pol0, Sideband::Sb2, 4.0)
        );
    }

    #[test]
    fn test_stop_ends_sweep() {
        let stop = StopToken::new();
        stop.stop();
        let mut written = Vec::new();
        let result = sweeper(true).run(0.0, 2.0, 0.5, true, Some(&stop), |v| {
            written.push(v);
            Ok(())
        });
        assert_eq!(result, Err(LoError::Aborted));
        assert_eq!(written, vec![0.5]);
    }
}
