//! Hardware facade error types

use thiserror::Error;

/// Result type for hardware facade operations
pub type HalResult<T> = Result<T, HalError>;

/// Errors that can occur while talking to cartridge hardware
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HalError {
    /// Sub-unit is not installed or did not answer its presence check
    #[error("Unit not present: {0}")]
    NotPresent(String),

    /// Fieldbus transaction failed
    #[error("Bus error on {point}: {reason}")]
    Bus { point: String, reason: String },

    /// Commanded value outside the unit's accepted range
    #[error("{name} = {value} outside [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Readback did not arrive in time
    #[error("Timeout reading {point} after {timeout_ms}ms")]
    Timeout { point: String, timeout_ms: u32 },

    /// Invalid argument (polarization, sideband, port)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not supported by this unit
    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl HalError {
    /// Check if retrying the same transaction may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HalError::Timeout { .. } | HalError::Bus { .. })
    }

    /// Build an out-of-range error for a named control point
    pub fn out_of_range(name: &str, value: f64, min: f64, max: f64) -> Self {
        HalError::OutOfRange {
            name: name.to_string(),
            value,
            min,
            max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable() {
        let timeout = HalError::Timeout {
            point: "LO PLL lock detect".to_string(),
            timeout_ms: 50,
        };
        assert!(timeout.is_recoverable());
        assert!(!HalError::NotPresent("cold cartridge".to_string()).is_recoverable());
    }

    #[test]
    fn test_out_of_range_display() {
        let err = HalError::out_of_range("SIS voltage", 30.0, 0.0, 25.0);
        assert_eq!(err.to_string(), "SIS voltage = 30 outside [0, 25]");
    }
}
