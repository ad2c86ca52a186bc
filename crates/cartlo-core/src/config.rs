//! # Configuration
//!
//! YAML configuration for the LO control engines. Every tunable the engines
//! read is here and is threaded through construction; nothing is global.
//!
//! ## Example Configuration
//!
//! ```yaml
//! sweep:
//!   enabled: true
//!   sis_step_mv: 0.5
//!   dwell_ms: 20
//!
//! lock:
//!   strategy: cv_points
//!   cv_points:
//!     num_points: 7
//!     interval_steps: 9
//!
//! optimizer:
//!   first_value_timeout_ms: 15000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LoError, LoResult};
use crate::observe::LogConfig;

/// Stepped approach of SIS voltage and magnet current.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Sweep setters by default; false writes in one step (debugging only)
    pub enabled: bool,
    /// Largest SIS voltage change per write, mV
    pub sis_step_mv: f64,
    /// Largest magnet current change per write, mA
    pub magnet_step_ma: f64,
    /// Pause between writes, ms
    pub dwell_ms: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sis_step_mv: 0.5,
            magnet_step_ma: 0.5,
            dwell_ms: 20,
        }
    }
}

impl SweepConfig {
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }
}

/// Which locking strategy a cartridge starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStrategyKind {
    /// Expanding alternating search around the coarse code
    #[default]
    Normal,
    /// IF total power bracket search with photonic co-optimization
    OnlineJul2021B,
    /// Correction-voltage slope interpolation over sampled codes
    CvPoints,
}

/// Search window and step of the expanding search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalLockConfig {
    /// Half-width of the search window, MHz at the oscillator
    pub window_mhz: f64,
    /// Search step, MHz at the oscillator
    pub step_mhz: f64,
    /// Explicit half-width in tuning steps, overriding `window_mhz`
    pub window_steps: Option<u16>,
    /// Explicit step in tuning steps, overriding `step_mhz`
    pub step_steps: Option<u16>,
    /// Wait after each tuning write before the lock test, ms
    pub settle_ms: u64,
}

impl Default for NormalLockConfig {
    fn default() -> Self {
        Self {
            window_mhz: 50.0,
            step_mhz: 3.0,
            window_steps: None,
            step_steps: None,
            settle_ms: 20,
        }
    }
}

/// Photonic modulation ramp limits shared by the photonic-aware strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotonicRampConfig {
    /// Modulation voltage change per ramp step, V
    pub vm_step: f64,
    pub vm_min: f64,
    pub vm_max: f64,
    /// Photodetector power that must not be exceeded, mW
    pub pd_power_ceiling_mw: f64,
    /// Wait after each ramp step, ms
    pub settle_ms: u64,
}

impl Default for PhotonicRampConfig {
    fn default() -> Self {
        Self {
            vm_step: 0.05,
            vm_min: 0.0,
            vm_max: 5.0,
            pd_power_ceiling_mw: 7.0,
            settle_ms: 10,
        }
    }
}

/// Parameters of the IF total power bracket strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnlineLockConfig {
    /// |IF total power| the coarse ramp aims for, V
    pub coarse_iftp_min: f64,
    /// Soft timeout of the coarse ramp, ms
    pub coarse_timeout_ms: u64,
    /// Initial half-span of the bracket search, tuning steps
    pub iftp_span_steps: u16,
    /// |IF total power| the ramp before locking aims for, V
    pub lock_iftp_target: f64,
    /// |IF total power| above which the ramp is backed off after locking, V
    pub final_iftp_ceiling: f64,
    /// Hold time of each integrator null/release, ms
    pub integrator_toggle_ms: u64,
    /// Integrator toggles attempted before giving up
    pub max_toggles: u32,
    /// Wait after each tuning write, ms
    pub settle_ms: u64,
}

impl Default for OnlineLockConfig {
    fn default() -> Self {
        Self {
            coarse_iftp_min: 0.5,
            coarse_timeout_ms: 1500,
            iftp_span_steps: 32,
            lock_iftp_target: 1.2,
            final_iftp_ceiling: 3.0,
            integrator_toggle_ms: 50,
            max_toggles: 2,
            settle_ms: 10,
        }
    }
}

/// Parameters of the correction-voltage multipoint strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvPointsConfig {
    /// Number of tuning codes sampled
    pub num_points: u16,
    /// Half-span of the sampled codes around the first guess, steps
    pub interval_steps: u16,
    /// |Photomixer current| the initial ramp aims for, mA
    pub photomixer_target_ma: f64,
    /// Slope (V per step) must be below minus this to interpolate
    pub min_negative_slope: f64,
    /// Refine modulation toward the IF total power window after locking
    pub refine_photonic: bool,
    /// Lower edge of the |IF total power| window, V
    pub iftp_low: f64,
    /// Upper edge of the |IF total power| window, V
    pub iftp_high: f64,
    /// Wait after each tuning or integrator write, ms
    pub settle_ms: u64,
}

impl Default for CvPointsConfig {
    fn default() -> Self {
        Self {
            num_points: 5,
            interval_steps: 6,
            photomixer_target_ma: 1.0,
            min_negative_slope: 0.001,
            refine_photonic: true,
            iftp_low: 0.8,
            iftp_high: 2.0,
            settle_ms: 10,
        }
    }
}

/// Correction-voltage nulling after lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PllAdjustConfig {
    /// Acceptable distance from the target correction voltage, V
    pub tolerance_volts: f64,
    /// Most tuning steps taken in one adjustment
    pub max_steps: u32,
    /// Wait after each step, ms
    pub dwell_ms: u64,
}

impl Default for PllAdjustConfig {
    fn default() -> Self {
        Self {
            tolerance_volts: 0.25,
            max_steps: 400,
            dwell_ms: 5,
        }
    }
}

/// Lock acquisition settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub strategy: LockStrategyKind,
    pub normal: NormalLockConfig,
    pub online: OnlineLockConfig,
    pub cv_points: CvPointsConfig,
    pub photonic: PhotonicRampConfig,
    pub adjust: PllAdjustConfig,
}

/// Bias optimization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Wait for the first power reading of a polarization, ms
    pub first_value_timeout_ms: u64,
    /// Wait for each subsequent reading, ms
    pub sample_timeout_ms: u64,
    /// Granularity of reading waits, ms
    pub poll_interval_ms: u64,
    /// Iteration cap of each phase
    pub max_iterations: u32,
    /// Least power increase counted as an improvement, dB
    pub tolerance: f64,
    /// Initial LO drain voltage step for each of the three passes, V
    pub vd_steps: [f64; 3],
    /// Initial junction voltage step for each of the three passes, mV
    pub vj_steps: [f64; 3],
    /// Step sizes in each phase's refinement schedule
    pub schedule_len: usize,
    /// Step reduction applied at each direction reversal
    pub refine_factor: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            first_value_timeout_ms: 10_000,
            sample_timeout_ms: 5_000,
            poll_interval_ms: 20,
            max_iterations: 60,
            tolerance: 0.001,
            vd_steps: [0.1, 0.05, 0.02],
            vj_steps: [0.4, 0.2, 0.1],
            schedule_len: 3,
            refine_factor: 0.5,
        }
    }
}

/// IV curve sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IvCurveConfig {
    pub vj_low: f64,
    pub vj_high: f64,
    pub vj_step: f64,
    pub settle_ms: u64,
}

impl Default for IvCurveConfig {
    fn default() -> Self {
        Self {
            vj_low: 0.0,
            vj_high: 10.0,
            vj_step: 0.1,
            settle_ms: 5,
        }
    }
}

/// Fine LO sweep around the current tuning code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoSweepConfig {
    pub half_window_steps: u16,
    pub step: u16,
    pub settle_ms: u64,
}

impl Default for LoSweepConfig {
    fn default() -> Self {
        Self {
            half_window_steps: 50,
            step: 1,
            settle_ms: 10,
        }
    }
}

/// Junction current versus magnet current sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MagnetSweepConfig {
    pub im_low: f64,
    pub im_high: f64,
    pub im_step: f64,
    pub settle_ms: u64,
}

impl Default for MagnetSweepConfig {
    fn default() -> Self {
        Self {
            im_low: 0.0,
            im_high: 40.0,
            im_step: 0.5,
            settle_ms: 20,
        }
    }
}

/// Decaying alternating magnet sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefluxConfig {
    /// First amplitude, mA
    pub start_ma: f64,
    /// Amplitude multiplier per half cycle
    pub decay: f64,
    /// Amplitude below which the sequence ends at zero, mA
    pub min_ma: f64,
    pub dwell_ms: u64,
}

impl Default for DefluxConfig {
    fn default() -> Self {
        Self {
            start_ma: 40.0,
            decay: 0.8,
            min_ma: 0.5,
            dwell_ms: 50,
        }
    }
}

/// Mixer heating cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatingConfig {
    /// Heater on-time, ms
    pub duration_ms: u64,
    /// Sampling period while heating and recovering, ms
    pub sample_ms: u64,
    /// Temperature the mixer must return below, K
    pub recovery_temperature_k: f64,
    pub recovery_timeout_ms: u64,
}

impl Default for HeatingConfig {
    fn default() -> Self {
        Self {
            duration_ms: 2_000,
            sample_ms: 100,
            recovery_temperature_k: 4.5,
            recovery_timeout_ms: 60_000,
        }
    }
}

/// Background measurement defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureConfig {
    pub iv_curve: IvCurveConfig,
    pub lo_sweep: LoSweepConfig,
    pub magnet_sweep: MagnetSweepConfig,
    pub deflux: DefluxConfig,
    pub heating: HeatingConfig,
}

/// Periodic monitor polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { interval_ms: 500 }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoConfig {
    pub version: String,
    pub sweep: SweepConfig,
    pub lock: LockConfig,
    pub optimizer: OptimizerConfig,
    pub measure: MeasureConfig,
    pub monitor: MonitorConfig,
    pub logging: LogConfig,
}

impl Default for LoConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            sweep: SweepConfig::default(),
            lock: LockConfig::default(),
            optimizer: OptimizerConfig::default(),
            measure: MeasureConfig::default(),
            monitor: MonitorConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl LoConfig {
    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> LoResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LoError::Config(format!("{}: {}", path.display(), e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> LoResult<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| LoError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> LoResult<()> {
        let content = serde_yaml::to_string(self).map_err(|e| LoError::Config(e.to_string()))?;

        std::fs::write(path, content)
            .map_err(|e| LoError::Config(format!("{}: {}", path.display(), e)))
    }

    /// A configuration with every settling delay set to zero.
    pub fn without_delays() -> Self {
        let mut config = Self::default();
        config.sweep.dwell_ms = 0;
        config.lock.normal.settle_ms = 0;
        config.lock.online.settle_ms = 0;
        config.lock.online.integrator_toggle_ms = 0;
        config.lock.cv_points.settle_ms = 0;
        config.lock.photonic.settle_ms = 0;
        config.lock.adjust.dwell_ms = 0;
        config.optimizer.poll_interval_ms = 1;
        config.measure.iv_curve.settle_ms = 0;
        config.measure.lo_sweep.settle_ms = 0;
        config.measure.magnet_sweep.settle_ms = 0;
        config.measure.deflux.dwell_ms = 0;
        config.measure.heating.sample_ms = 0;
        config.monitor.interval_ms = 1;
        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LoResult<()> {
        let invalid = |msg: &str| Err(LoError::Config(msg.to_string()));

        if self.sweep.sis_step_mv <= 0.0 || self.sweep.magnet_step_ma <= 0.0 {
            return invalid("sweep steps must be positive");
        }
        if self.lock.normal.step_mhz <= 0.0 || self.lock.normal.window_mhz <= 0.0 {
            return invalid("normal lock window and step must be positive");
        }
        if self.lock.cv_points.num_points == 0 {
            return invalid("cv_points.num_points must be > 0");
        }
        let ramp = &self.lock.photonic;
        if ramp.vm_min >= ramp.vm_max || ramp.vm_step <= 0.0 {
            return invalid("photonic ramp range or step invalid");
        }
        if self.optimizer.schedule_len == 0 {
            return invalid("optimizer.schedule_len must be > 0");
        }
        if !(self.optimizer.refine_factor > 0.0 && self.optimizer.refine_factor <= 1.0) {
            return invalid("optimizer.refine_factor must be in (0, 1]");
        }
        if self
            .optimizer
            .vd_steps
            .iter()
            .chain(self.optimizer.vj_steps.iter())
            .any(|&s| s <= 0.0)
        {
            return invalid("optimizer steps must be positive");
        }
        if self.measure.iv_curve.vj_step <= 0.0 || self.measure.magnet_sweep.im_step <= 0.0 {
            return invalid("measurement steps must be positive");
        }
        if !(self.measure.deflux.decay > 0.0 && self.measure.deflux.decay < 1.0) {
            return invalid("deflux.decay must be in (0, 1)");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoConfig::default();
        assert!(config.sweep.enabled);
        assert_eq!(config.lock.strategy, LockStrategyKind::Normal);
        assert_eq!(config.lock.normal.window_mhz, 50.0);
        assert_eq!(config.lock.normal.step_mhz, 3.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
sweep:
  enabled: false
  sis_step_mv: 0.2

lock:
  strategy: cv_points
  cv_points:
    num_points: 7
    interval_steps: 9

optimizer:
  first_value_timeout_ms: 15000
  vd_steps: [0.2, 0.1, 0.05]
"#;

        let config = LoConfig::parse(yaml).unwrap();
        assert!(!config.sweep.enabled);
        assert_eq!(config.sweep.sis_step_mv, 0.2);
        assert_eq!(config.lock.strategy, LockStrategyKind::CvPoints);
        assert_eq!(config.lock.cv_points.num_points, 7);
        assert_eq!(config.lock.cv_points.interval_steps, 9);
        assert_eq!(config.optimizer.first_value_timeout_ms, 15_000);
        assert_eq!(config.optimizer.vd_steps, [0.2, 0.1, 0.05]);
        // Defaults should be applied
        assert_eq!(config.sweep.magnet_step_ma, 0.5);
        assert_eq!(config.lock.normal.window_mhz, 50.0);
    }

    #[test]
    fn test_strategy_names() {
        let kind: LockStrategyKind = serde_yaml::from_str("online_jul2021_b").unwrap();
        assert_eq!(kind, LockStrategyKind::OnlineJul2021B);
    }

    #[test]
    fn test_validation() {
        let mut config = LoConfig::default();
        config.optimizer.refine_factor = 0.0;
        assert!(config.validate().is_err());

        config.optimizer.refine_factor = 1.0;
        assert!(config.validate().is_ok());

        config.lock.cv_points.num_points = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_rejects_invalid() {
        let yaml = "sweep:\n  sis_step_mv: -1.0\n";
        assert!(matches!(LoConfig::parse(yaml), Err(LoError::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cartlo.yaml");

        let mut config = LoConfig::default();
        config.lock.strategy = LockStrategyKind::OnlineJul2021B;
        config.sweep.dwell_ms = 7;
        config.save(&path).unwrap();

        let loaded = LoConfig::load_from(&path).unwrap();
        assert_eq!(loaded.lock.strategy, LockStrategyKind::OnlineJul2021B);
        assert_eq!(loaded.sweep.dwell_ms, 7);
    }

    #[test]
    fn test_without_delays() {
        let config = LoConfig::without_delays();
        assert_eq!(config.sweep.dwell(), Duration::ZERO);
        assert!(config.validate().is_ok());
    }
}
