//! Simulated cold cartridge

use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::error::{HalError, HalResult};
use crate::gate::MonitorGate;
use crate::traits::{ColdUnit, Monitored};
use crate::types::{ColdUnitInfo, Polarization, Sideband};

const SIS_VOLTAGE_LIMIT: f64 = 25.0;
const MAGNET_CURRENT_LIMIT: f64 = 50.0;
const BASE_TEMPERATURE: f64 = 4.0;
const HEATED_TEMPERATURE: f64 = 12.0;
const HEATER_CURRENT: f64 = 20.0;

/// One write to a cold-unit control point, kept for inspection in tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColdWrite {
    SisVoltage(Polarization, Sideband, f64),
    MagnetCurrent(Polarization, Sideband, f64),
    Heater(Polarization, bool),
}

#[derive(Debug)]
struct ColdState {
    sis_voltage: [[f64; 2]; 2],
    magnet: [[f64; 2]; 2],
    lna: [[bool; 2]; 2],
    heater: [bool; 2],
    temperature: f64,
    writes: Vec<ColdWrite>,
    writes_while_monitored: u32,
}

/// Simulated cold cartridge for development and testing.
///
/// Junction current is ohmic in the bias voltage and suppressed by the
/// magnet. The mixer warms by one kelvin per temperature read while a
/// heater is on and cools by two per read when both are off.
pub struct SimColdUnit {
    info: ColdUnitInfo,
    /// Junction conductance, uA per mV
    conductance: f64,
    state: Mutex<ColdState>,
    gate: MonitorGate,
}

impl SimColdUnit {
    pub fn new(info: ColdUnitInfo) -> Self {
        Self {
            info,
            conductance: 10.0,
            state: Mutex::new(ColdState {
                sis_voltage: [[0.0; 2]; 2],
                magnet: [[0.0; 2]; 2],
                lna: [[false; 2]; 2],
                heater: [false; 2],
                temperature: BASE_TEMPERATURE,
                writes: Vec::new(),
                writes_while_monitored: 0,
            }),
            gate: MonitorGate::new(),
        }
    }

    /// All control writes so far, in order.
    pub fn writes(&self) -> Vec<ColdWrite> {
        self.lock_state().writes.clone()
    }

    /// Number of control writes issued while the monitor was not paused.
    pub fn writes_while_monitored(&self) -> u32 {
        self.lock_state().writes_while_monitored
    }

    pub fn lna_enabled(&self, pol: Polarization, sb: Sideband) -> bool {
        self.lock_state().lna[pol.index()][sb.index()]
    }

    fn lock_state(&self) -> MutexGuard<'_, ColdState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, state: &mut ColdState, write: ColdWrite) {
        if !self.gate.is_paused() {
            state.writes_while_monitored += 1;
        }
        state.writes.push(write);
    }
}

impl Default for SimColdUnit {
    fn default() -> Self {
        Self::new(ColdUnitInfo {
            serial: "SIM-CCA".to_string(),
            cold_multiplier: 1,
            has_magnet: true,
            has_heater: true,
        })
    }
}

impl Monitored for SimColdUnit {
    fn monitor_gate(&self) -> &MonitorGate {
        &self.gate
    }

    fn poll_monitor(&self) -> HalResult<()> {
        self.gate.record_poll();
        Ok(())
    }
}

impl ColdUnit for SimColdUnit {
    fn info(&self) -> ColdUnitInfo {
        self.info.clone()
    }

    fn set_sis_voltage(&self, pol: Polarization, sb: Sideband, millivolts: f64) -> HalResult<()> {
        if millivolts.abs() > SIS_VOLTAGE_LIMIT {
            return Err(HalError::out_of_range(
                "SIS voltage",
                millivolts,
                -SIS_VOLTAGE_LIMIT,
                SIS_VOLTAGE_LIMIT,
            ));
        }
        let mut state = self.lock_state();
        state.sis_voltage[pol.index()][sb.index()] = millivolts;
        self.record(&mut state, ColdWrite::SisVoltage(pol, sb, millivolts));
        debug!(%pol, %sb, millivolts, "Simulated SIS voltage set");
        Ok(())
    }

    fn sis_voltage(&self, pol: Polarization, sb: Sideband) -> HalResult<f64> {
        Ok(self.lock_state().sis_voltage[pol.index()][sb.index()])
    }

    fn sis_current(&self, pol: Polarization, sb: Sideband) -> HalResult<f64> {
        let state = self.lock_state();
        let vj = state.sis_voltage[pol.index()][sb.index()];
        let im = state.magnet[pol.index()][sb.index()];
        let suppression = 1.0 + (im / 30.0).powi(2);
        Ok(self.conductance * vj / suppression)
    }

    fn set_sis_magnet_current(
        &self,
        pol: Polarization,
        sb: Sideband,
        milliamps: f64,
    ) -> HalResult<()> {
        if !self.info.has_magnet {
            return Err(HalError::NotSupported("SIS magnet".to_string()));
        }
        if milliamps.abs() > MAGNET_CURRENT_LIMIT {
            return Err(HalError::out_of_range(
                "SIS magnet current",
                milliamps,
                -MAGNET_CURRENT_LIMIT,
                MAGNET_CURRENT_LIMIT,
            ));
        }
        let mut state = self.lock_state();
        state.magnet[pol.index()][sb.index()] = milliamps;
        self.record(&mut state, ColdWrite::MagnetCurrent(pol, sb, milliamps));
        Ok(())
    }

    fn sis_magnet_current(&self, pol: Polarization, sb: Sideband) -> HalResult<f64> {
        Ok(self.lock_state().magnet[pol.index()][sb.index()])
    }

    fn set_sis_heater(&self, pol: Polarization, on: bool) -> HalResult<()> {
        if !self.info.has_heater {
            return Err(HalError::NotSupported("SIS heater".to_string()));
        }
        let mut state = self.lock_state();
        state.heater[pol.index()] = on;
        self.record(&mut state, ColdWrite::Heater(pol, on));
        Ok(())
    }

    fn heater_current(&self, pol: Polarization) -> HalResult<f64> {
        let on = self.lock_state().heater[pol.index()];
        Ok(if on { HEATER_CURRENT } else { 0.0 })
    }

    fn mixer_temperature(&self) -> HalResult<f64> {
        let mut state = self.lock_state();
        if state.heater.iter().any(|&on| on) {
            state.temperature = (state.temperature + 1.0).min(HEATED_TEMPERATURE);
        } else {
            state.temperature = (state.temperature - 2.0).max(BASE_TEMPERATURE);
        }
        Ok(state.temperature)
    }

    fn set_lna_enable(&self, pol: Polarization, sb: Sideband, enable: bool) -> HalResult<()> {
        self.lock_state().lna[pol.index()][sb.index()] = enable;
        Ok(())
    }
}
