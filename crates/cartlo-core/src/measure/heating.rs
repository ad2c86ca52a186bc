//! Mixer heating cycle.

use std::sync::Arc;

use cartlo_hal::{ColdUnit, Polarization};
use tracing::{info, warn};

use super::{dwell, Measurement, MeasurementKind};
use crate::config::HeatingConfig;
use crate::error::{LoError, LoResult};
use crate::monitor::MonitorPause;
use crate::observe::{tab_row, Sinks};
use crate::rt::StopToken;

/// Switches one polarization's heater on for the configured time, then
/// waits for the mixer to cool back below the recovery temperature.
///
/// Each record is `elapsed_ms  temperature_K  heater_current_mA`. The
/// heater is switched off on every exit path once it was switched on.
pub struct MixerHeating {
    cold: Arc<dyn ColdUnit>,
    pol: Polarization,
    config: HeatingConfig,
}

impl MixerHeating {
    pub fn new(
        cold: Arc<dyn ColdUnit>,
        pol: Polarization,
        config: HeatingConfig,
    ) -> LoResult<Self> {
        if !cold.info().has_heater {
            return Err(LoError::InvalidArgument(format!(
                "cold cartridge {} has no mixer heater",
                cold.info().serial
            )));
        }
        Ok(Self { cold, pol, config })
    }

    fn sample_count(&self, span_ms: u64) -> usize {
        (span_ms / self.config.sample_ms.max(1)).max(1) as usize
    }

    fn sample(&self, index: usize, sinks: &Sinks) -> LoResult<f64> {
        let temperature = self.cold.mixer_temperature()?;
        let current = self.cold.heater_current(self.pol)?;
        let elapsed = (index as u64 * self.config.sample_ms) as f64;
        sinks.record(&tab_row(&[elapsed, temperature, current]));
        Ok(temperature)
    }

    fn heat(&self, stop: &StopToken, sinks: &Sinks) -> LoResult<usize> {
        let samples = self.sample_count(self.config.duration_ms);
        for i in 0..samples {
            dwell(stop, self.config.sample_ms)?;
            self.sample(i, sinks)?;
            sinks.progress(50.0 * (i + 1) as f64 / samples as f64);
        }
        Ok(samples)
    }

    fn recover(&self, first_index: usize, stop: &StopToken, sinks: &Sinks) -> LoResult<usize> {
        let limit = self.sample_count(self.config.recovery_timeout_ms);
        for i in 0..limit {
            dwell(stop, self.config.sample_ms)?;
            let temperature = self.sample(first_index + i, sinks)?;
            if temperature < self.config.recovery_temperature_k {
                sinks.progress(100.0);
                return Ok(i + 1);
            }
        }
        warn!(
            target_k = self.config.recovery_temperature_k,
            "Mixer did not recover after heating"
        );
        Err(LoError::Timeout {
            what: "mixer temperature recovery".to_string(),
            timeout_ms: self.config.recovery_timeout_ms,
        })
    }
}

impl Measurement for MixerHeating {
    fn kind(&self) -> MeasurementKind {
        MeasurementKind::MixerHeating
    }

    fn run(&self, stop: &StopToken, sinks: &Sinks) -> LoResult<usize> {
        let cold = self.cold.as_ref();
        let pol = self.pol;
        let _pause = MonitorPause::new(cold.monitor_gate());

        info!(%pol, duration_ms = self.config.duration_ms, "Mixer heating");
        cold.set_sis_heater(pol, true)?;
        let heated = self.heat(stop, sinks);
        cold.set_sis_heater(pol, false)?;
        let heated = heated?;

        let recovered = self.recover(heated, stop, sinks)?;
        Ok(heated + recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartlo_hal::sim::{ColdWrite, SimColdUnit};

    fn config() -> HeatingConfig {
        HeatingConfig {
            duration_ms: 5,
            sample_ms: 1,
            recovery_temperature_k: 4.5,
            recovery_timeout_ms: 50,
        }
    }

    #[test]
    fn test_heats_then_recovers() {
        let cold = Arc::new(SimColdUnit::default());
        let (sinks, memory) = Sinks::memory();
        let heating = MixerHeating::new(cold.clone(), Polarization::Pol1, config()).unwrap();

        // Five heated reads (5..9 K) then 7, 5, 4 K while cooling
        assert_eq!(heating.run(&StopToken::new(), &sinks).unwrap(), 8);
        let rows = memory.rows();
        assert_eq!(rows[0], "0\t5\t20");
        assert_eq!(rows[4], "4\t9\t20");
        assert_eq!(rows[7], "7\t4\t0");
        assert_eq!(cold.heater_current(Polarization::Pol1).unwrap(), 0.0);
    }

    #[test]
    fn test_recovery_timeout() {
        let cold = Arc::new(SimColdUnit::default());
        let (sinks, _memory) = Sinks::memory();
        let heating = MixerHeating::new(
            cold,
            Polarization::Pol0,
            HeatingConfig {
                recovery_temperature_k: 3.0,
                recovery_timeout_ms: 5,
                ..config()
            },
        )
        .unwrap();
        assert!(matches!(
            heating.run(&StopToken::new(), &sinks),
            Err(LoError::Timeout { .. })
        ));
    }

    #[test]
    fn test_stop_switches_heater_off() {
        let cold = Arc::new(SimColdUnit::default());
        let (sinks, _memory) = Sinks::memory();
        let stop = StopToken::new();
        stop.stop();
        let heating = MixerHeating::new(cold.clone(), Polarization::Pol0, config()).unwrap();

        assert_eq!(heating.run(&stop, &sinks), Err(LoError::Aborted));
        assert_eq!(
            cold.writes(),
            vec![
                ColdWrite::Heater(Polarization::Pol0, true),
                ColdWrite::Heater(Polarization::Pol0, false),
            ]
        );
    }
}
