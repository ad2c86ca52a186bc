//! Photonic modulation ramps shared by the photonic-aware strategies.

use std::time::{Duration, Instant};

use cartlo_hal::PhotonicReceiver;
use tracing::debug;

use super::settle;
use crate::config::PhotonicRampConfig;
use crate::error::LoResult;

/// Which way the modulation voltage moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampDirection {
    Up,
    Down,
}

/// Why a ramp stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampEnd {
    /// The caller's condition was met
    Reached,
    /// Photodetector power reached its ceiling while ramping up
    PowerCeiling,
    /// Modulation voltage reached its limit
    Limit,
    /// Soft timeout expired
    Timeout,
}

/// Step the modulation voltage until `reached` returns true.
///
/// `reached` is evaluated before every step, so a ramp whose condition
/// already holds writes nothing.
pub fn ramp_modulation<F>(
    photonic: &dyn PhotonicReceiver,
    config: &PhotonicRampConfig,
    direction: RampDirection,
    timeout: Option<Duration>,
    mut reached: F,
) -> LoResult<RampEnd>
where
    F: FnMut() -> LoResult<bool>,
{
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut steps = 0u32;

    let end = loop {
        if reached()? {
            break RampEnd::Reached;
        }
        if direction == RampDirection::Up
            && photonic.photodetect_power()? >= config.pd_power_ceiling_mw
        {
            break RampEnd::PowerCeiling;
        }
        if deadline.map_or(false, |d| Instant::now() >= d) {
            break RampEnd::Timeout;
        }

        let vm = photonic.modulation_voltage()?;
        let delta = match direction {
            RampDirection::Up => config.vm_step,
            RampDirection::Down => -config.vm_step,
        };
        let next = (vm + delta).clamp(config.vm_min, config.vm_max);
        if next == vm {
            break RampEnd::Limit;
        }
        photonic.set_modulation_voltage(next)?;
        steps += 1;
        settle(config.settle_ms);
    };

    debug!(?direction, ?end, steps, "Photonic ramp finished");
    Ok(end)
}
