//! Junction current versus magnet current.

use std::sync::Arc;

use cartlo_hal::{ColdUnit, Polarization, Sideband};
use tracing::debug;

use super::{dwell, linear_points, percent, Measurement, MeasurementKind};
use crate::config::MagnetSweepConfig;
use crate::error::{LoError, LoResult};
use crate::monitor::MonitorPause;
use crate::observe::{tab_row, Sinks};
use crate::rt::StopToken;
use crate::sweep::Sweeper;

pub struct MagnetSweep {
    cold: Arc<dyn ColdUnit>,
    pol: Polarization,
    sb: Sideband,
    config: MagnetSweepConfig,
    sweeper: Sweeper,
}

impl MagnetSweep {
    pub fn new(
        cold: Arc<dyn ColdUnit>,
        pol: Polarization,
        sb: Sideband,
        config: MagnetSweepConfig,
        sweeper: Sweeper,
    ) -> LoResult<Self> {
        if !cold.info().has_magnet {
            return Err(LoError::InvalidArgument(format!(
                "cold cartridge {} has no SIS magnet",
                cold.info().serial
            )));
        }
        if !(config.im_step > 0.0) {
            return Err(LoError::InvalidArgument(format!(
                "magnet sweep step {}",
                config.im_step
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

impl Measurement for MagnetSweep {
    fn kind(&self) -> MeasurementKind {
        MeasurementKind::MagnetSweep
    }

    fn run(&self, stop: &StopToken, sinks: &Sinks) -> LoResult<usize> {
        let cold = self.cold.as_ref();
        let (pol, sb) = (self.pol, self.sb);
        let _pause = MonitorPause::new(cold.monitor_gate());

        let start = cold.sis_magnet_current(pol, sb)?;
        let points = linear_points(self.config.im_low, self.config.im_high, self.config.im_step);
        debug!(%pol, %sb, start, points = points.len(), "SIS current vs magnet sweep");

        self.sweeper
            .set_magnet_current(cold, pol, sb, self.config.im_low, true)?;

        for (i, &im) in points.iter().enumerate() {
            dwell(stop, 0)?;
            cold.set_sis_magnet_current(pol, sb, im)?;
            dwell(stop, self.config.settle_ms)?;
            let ij = cold.sis_current(pol, sb)?;
            sinks.record(&tab_row(&[im, ij]));
            sinks.progress(percent(i + 1, points.len()));
        }

        self.sweeper.set_magnet_current(cold, pol, sb, start, true)?;
        Ok(points.len())
    }
}
