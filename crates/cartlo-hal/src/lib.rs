//! Cartridge Hardware Abstraction Layer
//!
//! This crate defines the facade through which the LO control engines reach
//! receiver cartridge hardware. The fieldbus encoding lives behind these
//! traits and is not part of this crate.
//!
//! - **WarmUnit**: oscillator coarse tune, PLL readbacks, LO amplifier
//! - **ColdUnit**: SIS junction bias, magnets, heaters, LNAs
//! - **PhotonicReceiver**: reference modulation and photodetector readbacks
//! - **SignalRouter**: photonic and IF band switches
//! - **Monitored**: pausable periodic monitor polling
//!
//! # Feature Flags
//!
//! - `sim` (default): simulated units for development without hardware
//!
//! # Example
//!
//! ```rust,no_run
//! use cartlo_hal::sim::SimBench;
//! use cartlo_hal::WarmUnit;
//!
//! let bench = SimBench::default();
//! bench.warm.set_tuning_code(2048).unwrap();
//! println!("locked: {}", bench.warm.is_locked().unwrap());
//! ```

pub mod error;
pub mod gate;
pub mod traits;
pub mod types;

#[cfg(feature = "sim")]
pub mod sim;

pub use error::{HalError, HalResult};
pub use gate::MonitorGate;
pub use traits::{ColdUnit, Monitored, PhotonicReceiver, SignalRouter, WarmUnit};
pub use types::{
    clamp_tuning_code, Band, ColdUnitInfo, Polarization, Sideband, SidebandLock, TuningCode,
    WarmUnitInfo, CORRECTION_VOLTAGE_RAIL, LOCK_DETECT_THRESHOLD, TUNING_CODE_MAX,
};
