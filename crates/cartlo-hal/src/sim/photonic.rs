//! Simulated photonic receiver

use std::sync::Mutex;

use crate::error::{HalError, HalResult};
use crate::traits::PhotonicReceiver;

/// Simulated optical amplifier with a linear detector response.
pub struct SimPhotonicReceiver {
    modulation: Mutex<f64>,
    min_volts: f64,
    max_volts: f64,
    /// Photodetector power per volt of modulation, mW
    power_per_volt: f64,
    /// Photodetector current per volt of modulation, mA
    current_per_volt: f64,
    writes: Mutex<u32>,
}

impl SimPhotonicReceiver {
    pub fn new(min_volts: f64, max_volts: f64, power_per_volt: f64) -> Self {
        Self {
            modulation: Mutex::new(min_volts.max(0.0)),
            min_volts,
            max_volts,
            power_per_volt,
            current_per_volt: 0.9,
            writes: Mutex::new(0),
        }
    }

    /// Number of modulation voltage writes accepted.
    pub fn writes(&self) -> u32 {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SimPhotonicReceiver {
    fn default() -> Self {
        Self::new(0.0, 5.0, 1.6)
    }
}

impl PhotonicReceiver for SimPhotonicReceiver {
    fn modulation_voltage(&self) -> HalResult<f64> {
        Ok(*self.modulation.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn set_modulation_voltage(&self, volts: f64) -> HalResult<()> {
        if volts < self.min_volts || volts > self.max_volts {
            return Err(HalError::out_of_range(
                "photonic modulation voltage",
                volts,
                self.min_volts,
                self.max_volts,
            ));
        }
        *self.modulation.lock().unwrap_or_else(|e| e.into_inner()) = volts;
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    fn photodetect_power(&self) -> HalResult<f64> {
        Ok(self.power_per_volt * self.modulation_voltage()?)
    }

    fn photodetect_current(&self) -> HalResult<f64> {
        Ok(self.current_per_volt * self.modulation_voltage()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_tracks_modulation() {
        let photonic = SimPhotonicReceiver::default();
        photonic.set_modulation_voltage(2.5).unwrap();
        assert!((photonic.photodetect_power().unwrap() - 4.0).abs() < 1e-12);
        assert_eq!(photonic.writes(), 1);
    }

    #[test]
    fn test_modulation_range() {
        let photonic = SimPhotonicReceiver::default();
        assert!(photonic.set_modulation_voltage(-0.1).is_err());
        assert!(photonic.set_modulation_voltage(5.1).is_err());
        assert_eq!(photonic.modulation_voltage().unwrap(), 0.0);
    }
}
