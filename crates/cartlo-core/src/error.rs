//! Error types for the LO control engines

use cartlo_hal::HalError;
use thiserror::Error;

/// Result type for control-engine operations
pub type LoResult<T> = Result<T, LoError>;

/// Which sub-unit an operation needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Warm,
    Cold,
    Photonic,
    Router,
    /// The cartridge as a whole
    Cartridge,
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UnitKind::Warm => "warm cartridge assembly",
            UnitKind::Cold => "cold cartridge",
            UnitKind::Photonic => "photonic receiver",
            UnitKind::Router => "signal router",
            UnitKind::Cartridge => "cartridge",
        };
        f.write_str(name)
    }
}

/// Errors raised by the lock, bias and coordination engines
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoError {
    /// Required sub-unit is not installed
    #[error("{0} not present")]
    MissingUnit(UnitKind),

    /// Sub-unit exists but is not enabled
    #[error("{0} not enabled")]
    NotEnabled(UnitKind),

    /// A cartridge needs at least one of the warm or cold units
    #[error("cartridge needs a warm or a cold unit")]
    NoUnits,

    /// Frequency or limit inputs cannot produce a tuning code
    #[error("invalid tuning request: {0}")]
    InvalidTuning(String),

    /// Argument rejected before touching hardware
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Another background operation holds the cartridge
    #[error("operation already running: {0}")]
    Busy(String),

    /// Facade call failed
    #[error("hardware error: {0}")]
    Hardware(#[from] HalError),

    /// Wait for a value or a settling condition expired
    #[error("timeout waiting for {what} after {timeout_ms}ms")]
    Timeout { what: String, timeout_ms: u64 },

    /// Cooperative stop was requested
    #[error("aborted by request")]
    Aborted,

    /// Worker thread could not be started
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    /// Configuration rejected by validation
    #[error("invalid config: {0}")]
    Config(String),
}

impl LoError {
    /// Configuration errors are raised before any hardware mutation.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LoError::MissingUnit(_)
                | LoError::NotEnabled(_)
                | LoError::NoUnits
                | LoError::InvalidTuning(_)
                | LoError::InvalidArgument(_)
                | LoError::Busy(_)
                | LoError::Config(_)
        )
    }
}
