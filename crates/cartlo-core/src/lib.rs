//! # Cartridge LO Control Engines
//!
//! Phase-lock acquisition, bias optimization and coordination for the
//! local oscillators of a millimetre-wave receiver's cartridges. Hardware
//! is reached only through the `cartlo-hal` facade traits.
//!
//! ## Overview
//!
//! - **Frequency math**: LO frequency to 12-bit coarse-tune code and back
//! - **Lock acquisition**: three selectable PLL search strategies
//! - **Maximizer**: single-variable hill climb with an asynchronous feed
//! - **Bias optimizer**: nine-phase VD/VJ2/VJ1 IF power maximization
//! - **Measurements**: IV curve, fine LO sweep, magnet sweep, deflux, heating
//! - **Cartridge assembly**: enable/observe state, one background operation
//!   at a time, monitor pause discipline
//!
//! ## Control Flow
//!
//! ```text
//! set_lo_frequency ─► TuningRequest ─► LockingStrategy::lock_pll ─► LockReport
//!                                                 │
//! optimize_if_power ─► BiasOptimizer ◄── set_if_power (power meter thread)
//!                          │
//!                    Maximizer × 9 phases ─► RecordSink rows, StatusSink events
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cartlo_core::{CartAssembly, LoConfig, Sinks};
//! use cartlo_hal::sim::SimBench;
//! use cartlo_hal::{Band, SidebandLock};
//!
//! let bench = SimBench::default();
//! let mut cart = CartAssembly::new(
//!     Band::new(6).unwrap(),
//!     Some(bench.warm.clone()),
//!     Some(bench.cold.clone()),
//!     LoConfig::default(),
//!     Sinks::default(),
//! )
//! .unwrap()
//! .with_photonic(bench.photonic.clone());
//!
//! cart.set_enable(true).unwrap();
//! let report = cart
//!     .set_lo_frequency_and_lock(14.048, 0.0315, SidebandLock::BelowReference)
//!     .unwrap();
//! println!("{} at code {}", report.state, report.tuning_code);
//! ```

pub mod bias_optimizer;
pub mod cart_assembly;
pub mod config;
pub mod error;
pub mod freq_math;
pub mod lock;
pub mod maximizer;
pub mod measure;
pub mod monitor;
pub mod observe;
pub mod operation;
pub mod rack;
pub mod rt;
pub mod sweep;

pub use bias_optimizer::{
    BiasControl, BiasOptimizer, BiasPoint, OptimizationReport, OptimizeRequest, PhaseResult,
    PolarizationReport,
};
pub use cart_assembly::{CartAssembly, CartState};
pub use config::{LoConfig, LockStrategyKind};
pub use error::{LoError, LoResult, UnitKind};
pub use freq_math::{compute_tuning_code, lo_frequency_for_code, TuningRequest, TuningSolution};
pub use lock::{
    strategy_for, CvPointsLock, LockContext, LockReport, LockState, LockingStrategy, NormalLock,
    OnlineLock,
};
pub use maximizer::{
    Dependent, MaximizeOutcome, MaximizeResult, Maximizer, MaximizerSettings, Objective,
    OscillationGuard,
};
pub use measure::{MeasurementKind, MeasurementReport};
pub use monitor::{MonitorLoop, MonitorPause};
pub use observe::{init_logging, LogConfig, MemorySink, OpEvent, Sinks};
pub use operation::{ActiveOperation, OperationOutcome};
pub use rack::CartridgeRack;
pub use sweep::Sweeper;
