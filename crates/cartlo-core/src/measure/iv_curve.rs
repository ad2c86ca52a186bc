//! Junction current versus junction voltage.

use std::sync::Arc;

use cartlo_hal::{ColdUnit, Polarization, Sideband};
use tracing::debug;

use super::{dwell, linear_points, percent, Measurement, MeasurementKind};
use crate::config::IvCurveConfig;
use crate::error::{LoError, LoResult};
use crate::monitor::MonitorPause;
use crate::observe::{tab_row, Sinks};
use crate::rt::StopToken;
use crate::sweep::Sweeper;

/// IV curve of one junction.
///
/// The bias is walked to `vj_low` with the stepped sweeper, stepped to
/// `vj_high` point by point, then swept back to where it started.
pub struct IvCurve {
    cold: Arc<dyn ColdUnit>,
    pol: Polarization,
    sb: Sideband,
    config: IvCurveConfig,
    sweeper: Sweeper,
}

impl IvCurve {
    pub fn new(
        cold: Arc<dyn ColdUnit>,
        pol: Polarization,
        sb: Sideband,
        config: IvCurveConfig,
        sweeper: Sweeper,
    ) -> LoResult<Self> {
        if !(config.vj_step > 0.0) {
            return Err(LoError::InvalidArgument(format!(
                "IV curve step {}",
                config.vj_step
            )));
        }
        Ok(Self {
            cold,
            pol,
            sb,
            config,
            sweeper,
        })
    }
}

impl Measurement for IvCurve {
    fn kind(&self) -> MeasurementKind {
        MeasurementKind::IvCurve
    }

    fn run(&self, stop: &StopToken, sinks: &Sinks) -> LoResult<usize> {
        let cold = self.cold.as_ref();
        let (pol, sb) = (self.pol, self.sb);
        let _pause = MonitorPause::new(cold.monitor_gate());

        let start = cold.sis_voltage(pol, sb)?;
        let points = linear_points(self.config.vj_low, self.config.vj_high, self.config.vj_step);
        debug!(%pol, %sb, start, points = points.len(), "IV curve");

        self.sweeper
            .set_sis_voltage(cold, pol, sb, self.config.vj_low, true)?;

        for (i, &vj) in points.iter().enumerate() {
            dwell(stop, 0)?;
            cold.set_sis_voltage(pol, sb, vj)?;
            dwell(stop, self.config.settle_ms)?;
            let ij = cold.sis_current(pol, sb)?;
            sinks.record(&tab_row(&[vj, ij]));
            sinks.progress(percent(i + 1, points.len()));
        }

        self.sweeper.set_sis_voltage(cold, pol, sb, start, true)?;
        Ok(points.len())
    }
}
