//! Shared value types for cartridge hardware

use serde::{Deserialize, Serialize};

use crate::error::HalError;

/// Largest value accepted by the oscillator's coarse-tune DAC.
pub const TUNING_CODE_MAX: u16 = 4095;

/// Lock-detect voltage above which the PLL is considered locked.
pub const LOCK_DETECT_THRESHOLD: f64 = 3.0;

/// Correction voltage magnitude beyond which the PLL is at its rail.
pub const CORRECTION_VOLTAGE_RAIL: f64 = 10.0;

/// Coarse-tune command for the oscillator, always within `0..=TUNING_CODE_MAX`.
pub type TuningCode = u16;

/// Clamp an arbitrary signed code into the valid tuning range.
#[inline]
pub fn clamp_tuning_code(code: i64) -> TuningCode {
    code.clamp(0, TUNING_CODE_MAX as i64) as TuningCode
}

/// Receiver band number (1-10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Band(u8);

impl Band {
    /// Create a band, rejecting numbers outside 1-10.
    pub fn new(number: u8) -> Result<Self, HalError> {
        if (1..=10).contains(&number) {
            Ok(Self(number))
        } else {
            Err(HalError::InvalidArgument(format!("band {}", number)))
        }
    }

    pub fn number(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "band {}", self.0)
    }
}

/// Receiver polarization channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    Pol0,
    Pol1,
}

impl Polarization {
    pub const ALL: [Polarization; 2] = [Polarization::Pol0, Polarization::Pol1];

    pub fn index(self) -> usize {
        match self {
            Polarization::Pol0 => 0,
            Polarization::Pol1 => 1,
        }
    }
}

impl TryFrom<u8> for Polarization {
    type Error = HalError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Polarization::Pol0),
            1 => Ok(Polarization::Pol1),
            other => Err(HalError::InvalidArgument(format!("polarization {}", other))),
        }
    }
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pol{}", self.index())
    }
}

/// Mixer sideband (SIS junction 1 or 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sideband {
    Sb1,
    Sb2,
}

impl Sideband {
    pub const ALL: [Sideband; 2] = [Sideband::Sb1, Sideband::Sb2];

    pub fn index(self) -> usize {
        match self {
            Sideband::Sb1 => 0,
            Sideband::Sb2 => 1,
        }
    }
}

impl TryFrom<u8> for Sideband {
    type Error = HalError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Sideband::Sb1),
            2 => Ok(Sideband::Sb2),
            other => Err(HalError::InvalidArgument(format!("sideband {}", other))),
        }
    }
}

impl std::fmt::Display for Sideband {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sb{}", self.index() + 1)
    }
}

/// Which side of the reference the LO is locked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidebandLock {
    /// LO below the reference (sbLock = 0)
    #[default]
    BelowReference,
    /// LO above the reference (sbLock = 1)
    AboveReference,
}

impl TryFrom<u8> for SidebandLock {
    type Error = HalError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SidebandLock::BelowReference),
            1 => Ok(SidebandLock::AboveReference),
            other => Err(HalError::InvalidArgument(format!("sideband lock {}", other))),
        }
    }
}

/// Static description of a warm cartridge assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmUnitInfo {
    /// Serial number or other identifier
    pub serial: String,
    /// Oscillator frequency at tuning code 0, GHz
    pub osc_low_ghz: f64,
    /// Oscillator frequency at tuning code 4095, GHz
    pub osc_high_ghz: f64,
    /// Frequency multiplication between oscillator and warm output
    pub warm_multiplier: u32,
}

/// Static description of a cold cartridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColdUnitInfo {
    /// Serial number or other identifier
    pub serial: String,
    /// Frequency multiplication inside the cold cartridge
    pub cold_multiplier: u32,
    /// Whether the mixer has a tunable SIS magnet
    pub has_magnet: bool,
    /// Whether the mixer has a defluxing heater
    pub has_heater: bool,
}
