//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the tide-align.toml file.
//! It collects every tunable the alignment core recognises: resampling interval,
//! snap tolerance, max gap, hysteresis thresholds, extremum prominence and
//! separation, and the phase-bin count used for aggregation.

use crate::error::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "tide-align.toml";

/// Application configuration loaded from tide-align.toml
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Timeline alignment settings
    pub alignment: AlignmentConfig,
    /// Hysteresis thresholds for tidal state
    pub tidal_state: TidalStateConfig,
    /// Turning-point detection settings
    pub cycles: CycleConfig,
    /// Phase aggregation settings
    pub phase: PhaseConfig,
    /// Artifact output settings
    pub output: OutputConfig,
}

/// How the aligned axis is built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisMode {
    /// Fixed interval from the first sensor reading to the last
    #[default]
    Uniform,
    /// Union of sensor and detection timestamps
    EventAnchored,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Resampling interval in minutes
    pub interval_minutes: i64,
    /// A reading this close to an axis point is used as-is
    pub snap_tolerance_minutes: i64,
    /// Bracketing readings further apart than this are not interpolated
    pub max_gap_minutes: i64,
    /// A detection this close to an axis point is attached to it
    pub event_tolerance_minutes: i64,
    pub axis: AxisMode,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 30,
            snap_tolerance_minutes: 5,
            max_gap_minutes: 120,
            event_tolerance_minutes: 15,
            axis: AxisMode::Uniform,
        }
    }
}

impl AlignmentConfig {
    pub fn interval(&self) -> Duration {
        Duration::minutes(self.interval_minutes)
    }

    pub fn snap_tolerance(&self) -> Duration {
        Duration::minutes(self.snap_tolerance_minutes)
    }

    pub fn max_gap(&self) -> Duration {
        Duration::minutes(self.max_gap_minutes)
    }

    pub fn event_tolerance(&self) -> Duration {
        Duration::minutes(self.event_tolerance_minutes)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_minutes <= 0 {
            return Err(Error::Config(format!(
                "alignment.interval_minutes must be positive, got {}",
                self.interval_minutes
            )));
        }
        for (name, value) in [
            ("alignment.snap_tolerance_minutes", self.snap_tolerance_minutes),
            ("alignment.max_gap_minutes", self.max_gap_minutes),
            ("alignment.event_tolerance_minutes", self.event_tolerance_minutes),
        ] {
            if value < 0 {
                return Err(Error::Config(format!("{name} must not be negative, got {value}")));
            }
        }
        Ok(())
    }
}

/// Hysteresis band. Leaving slack needs |rate| above `outer`; returning to
/// slack needs the rate to drop back inside `inner`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TidalStateConfig {
    pub outer_threshold_m_per_hr: f64,
    pub inner_threshold_m_per_hr: f64,
}

impl Default for TidalStateConfig {
    fn default() -> Self {
        Self {
            outer_threshold_m_per_hr: 0.05,
            inner_threshold_m_per_hr: 0.02,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Minimum height a turning point must stand above/below its neighbours
    pub prominence_m: f64,
    /// Half-width of the neighbourhood used for the prominence check
    pub window_minutes: i64,
    /// Minimum time between accepted turning points
    pub min_separation_minutes: i64,
    /// Longer stretches between turning points are left unsegmented
    pub max_cycle_minutes: i64,
    /// Allow the first/last defined sample to be a turning point (one-sided window)
    pub endpoint_extrema: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            prominence_m: 0.10,
            window_minutes: 180,
            min_separation_minutes: 180,
            max_cycle_minutes: 840,
            endpoint_extrema: false,
        }
    }
}

impl CycleConfig {
    pub fn window(&self) -> Duration {
        Duration::minutes(self.window_minutes)
    }

    pub fn min_separation(&self) -> Duration {
        Duration::minutes(self.min_separation_minutes)
    }

    pub fn max_cycle(&self) -> Duration {
        Duration::minutes(self.max_cycle_minutes)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PhaseConfig {
    /// Number of equal-width phase bins for aggregation
    pub bins: usize,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self { bins: 12 }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory the binary writes artifacts into
    pub directory: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: "output".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from tide-align.toml
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    log::info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Invalid config file format in {}: {}", path.display(), e);
                    log::warn!("Using default configuration");
                    Self::default()
                }
            },
            Err(_) => {
                log::info!(
                    "No config file at {}, using default configuration",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// Save current configuration to tide-align.toml
    pub fn save(&self) -> Result<()> {
        self.save_to_path(CONFIG_FILE)
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        log::info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    /// Reject values that parse but cannot drive the pipeline.
    pub fn validate(&self) -> Result<()> {
        self.alignment.validate()?;
        for (name, value) in [
            ("cycles.window_minutes", self.cycles.window_minutes),
            ("cycles.min_separation_minutes", self.cycles.min_separation_minutes),
        ] {
            if value < 0 {
                return Err(Error::Config(format!("{name} must not be negative, got {value}")));
            }
        }

        let t = &self.tidal_state;
        if !(t.inner_threshold_m_per_hr >= 0.0
            && t.inner_threshold_m_per_hr < t.outer_threshold_m_per_hr)
        {
            return Err(Error::Config(format!(
                "tidal_state thresholds need 0 <= inner < outer, got inner {} outer {}",
                t.inner_threshold_m_per_hr, t.outer_threshold_m_per_hr
            )));
        }

        if !(self.cycles.prominence_m >= 0.0) {
            return Err(Error::Config("cycles.prominence_m must not be negative".into()));
        }
        if self.cycles.max_cycle_minutes <= 0 {
            return Err(Error::Config("cycles.max_cycle_minutes must be positive".into()));
        }
        if self.phase.bins == 0 {
            return Err(Error::Config("phase.bins must be at least 1".into()));
        }
        Ok(())
    }
}
