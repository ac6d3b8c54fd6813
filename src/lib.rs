//! # Tide Alignment Core Library
//!
//! This library reconciles two asynchronous time series from a tide-gate monitoring
//! site into one aligned dataset:
//! - discrete wildlife detections from camera traps
//! - continuous water-level (and tide-gate opening) sensor readings
//!
//! On top of the aligned timeline it derives the tidal signals the downstream
//! analyses need: a rising/falling/slack state, tidal cycle boundaries, a
//! continuous phase coordinate within each cycle, and per-camera exposure.
//!
//! ## Data Flow
//! 1. **Input**: raw rows → validated [`SensorReading`], [`DetectionEvent`],
//!    [`CameraStatusInterval`] ([`input`])
//! 2. **Align**: readings → uniform or event-anchored axis, events attached ([`timeline`])
//! 3. **Derive**: tidal state ([`tidal_state`]), cycles ([`cycles`]), phase ([`phase`])
//! 4. **Expose**: camera status intervals → per-record `camera_active` ([`exposure`])
//! 5. **Normalize**: activity counts and exposure-corrected rates ([`normalize`])
//!
//! Every stage consumes the complete output of its predecessor. The result,
//! [`pipeline::AlignedDataset`], is immutable once built.
//!
//! ## Bias Separation
//! `camera_active` comes only from camera status intervals. A detection never
//! marks a camera as active, and unknown coverage counts as inactive.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// Module declarations
pub mod config;
pub mod cycles;
pub mod error;
pub mod export;
pub mod exposure;
pub mod gates;
pub mod input;
pub mod normalize;
pub mod phase;
pub mod pipeline;
pub mod synthetic;
pub mod tidal_state;
pub mod timeline;

#[cfg(test)]
mod tests;

pub use error::{Error, Exclusion, InputError};
pub use pipeline::{AlignedDataset, Pipeline, RunSummary};

/// Site-local wall-clock time. Field loggers and camera traps record local
/// time without an offset, so the whole pipeline stays naive.
pub type Timestamp = NaiveDateTime;

/// Tide-gate opening angles in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GateOpening {
    /// Muted tidal regulator gate angle
    pub mtr_deg: Option<f64>,
    /// Top-hinge gate angle
    pub top_hinge_deg: Option<f64>,
}

/// A single water-level reading from the tide sensor.
///
/// `water_level` is `None` when the logger recorded nothing usable for that
/// row. `synthetic` marks readings that came out of a previous alignment
/// (interpolated, or marked missing) rather than off the logger. The aligner
/// takes such a reading at face value at its exact timestamp, so running it
/// on its own output changes nothing.
///
/// # Example
/// ```
/// use tide_align_lib::SensorReading;
///
/// let ts = chrono::NaiveDate::from_ymd_opt(2024, 6, 16)
///     .unwrap()
///     .and_hms_opt(12, 0, 0)
///     .unwrap();
/// let reading = SensorReading::new(ts, 1.42);
/// assert_eq!(reading.water_level, Some(1.42));
/// assert!(!reading.synthetic);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub timestamp: Timestamp,
    /// Water level outside the tide gate in metres
    pub water_level: Option<f64>,
    #[serde(default)]
    pub gate: Option<GateOpening>,
    /// Air temperature at the sensor in °C
    #[serde(default)]
    pub air_temp_c: Option<f64>,
    #[serde(default)]
    pub synthetic: bool,
}

impl SensorReading {
    pub fn new(timestamp: Timestamp, water_level: f64) -> Self {
        Self {
            timestamp,
            water_level: Some(water_level),
            gate: None,
            air_temp_c: None,
            synthetic: false,
        }
    }

    pub fn with_gate(mut self, gate: GateOpening) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_air_temp(mut self, celsius: f64) -> Self {
        self.air_temp_c = Some(celsius);
        self
    }
}

impl From<&AlignedRecord> for SensorReading {
    fn from(record: &AlignedRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            water_level: record.water_level,
            gate: record.gate,
            air_temp_c: record.air_temp_c,
            synthetic: record.level_source != LevelSource::Observed,
        }
    }
}

/// One wildlife detection from a camera trap.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub timestamp: Timestamp,
    pub species: String,
    pub camera_id: String,
    /// Number of individuals in the frame
    #[serde(default = "default_count")]
    pub count: u32,
    /// Free-form columns carried through untouched (notes, image id, ...)
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_count() -> u32 {
    1
}

impl DetectionEvent {
    pub fn new(timestamp: Timestamp, species: &str, camera_id: &str) -> Self {
        Self {
            timestamp,
            species: species.to_string(),
            camera_id: camera_id.to_string(),
            count: 1,
            metadata: BTreeMap::new(),
        }
    }
}

/// Operational status of one camera over `[start, end)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraStatusInterval {
    pub camera_id: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub active: bool,
}

/// Where an aligned water level came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelSource {
    /// A sensor reading within the snap tolerance
    Observed,
    /// Linear interpolation between bracketing readings
    Interpolated,
    /// Inside a gap wider than the configured maximum, or outside the sensor span
    Missing,
}

impl LevelSource {
    pub fn as_str(self) -> &'static str {
        match self {
            LevelSource::Observed => "observed",
            LevelSource::Interpolated => "interpolated",
            LevelSource::Missing => "missing",
        }
    }
}

/// Direction of the tide at a moment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TidalState {
    Rising,
    Falling,
    Slack,
}

impl TidalState {
    pub const ALL: [TidalState; 3] = [TidalState::Rising, TidalState::Falling, TidalState::Slack];

    pub fn as_str(self) -> &'static str {
        match self {
            TidalState::Rising => "rising",
            TidalState::Falling => "falling",
            TidalState::Slack => "slack",
        }
    }
}

impl fmt::Display for TidalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a slack record sits above or below the run's median water level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlackLevel {
    High,
    Low,
}

/// High or low water turning point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtremumKind {
    High,
    Low,
}

impl ExtremumKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtremumKind::High => "high",
            ExtremumKind::Low => "low",
        }
    }
}

/// An accepted tidal turning point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Extremum {
    pub kind: ExtremumKind,
    pub timestamp: Timestamp,
    pub value: f64,
    /// Position of the turning point in the aligned record sequence
    pub index: usize,
}

/// Flood runs low → high, ebb runs high → low.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    Flood,
    Ebb,
}

/// The stretch between two consecutive turning points of opposite kind.
///
/// Consecutive cycles share their boundary extremum. Durations vary with
/// semidiurnal inequality, so nothing here assumes a fixed period.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TidalCycle {
    pub cycle_id: u32,
    pub start: Extremum,
    pub end: Extremum,
}

impl TidalCycle {
    pub fn kind(&self) -> CycleKind {
        match self.start.kind {
            ExtremumKind::Low => CycleKind::Flood,
            ExtremumKind::High => CycleKind::Ebb,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end.timestamp - self.start.timestamp
    }

    /// Half-open containment: the end extremum belongs to the next cycle.
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start.timestamp <= ts && ts < self.end.timestamp
    }
}

/// One point on the aligned timeline with every derived signal attached.
///
/// Fields left as `None` are explicitly undefined (missing water level,
/// unresolved cycle) and are excluded from the aggregations that need them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignedRecord {
    pub timestamp: Timestamp,
    pub water_level: Option<f64>,
    pub level_source: LevelSource,
    /// When the level was measured. A snapped level keeps its reading's time,
    /// which can differ from `timestamp` by up to the snap tolerance.
    pub level_time: Option<Timestamp>,
    /// Axis point inserted to carry a detection that had no grid point nearby
    pub synthetic: bool,
    pub gate: Option<GateOpening>,
    pub air_temp_c: Option<f64>,
    /// Seconds this record stands for (until the next axis point)
    pub dwell_secs: i64,
    /// Rate of change in metres per hour
    pub rate_m_per_hr: Option<f64>,
    pub tidal_state: Option<TidalState>,
    pub slack_level: Option<SlackLevel>,
    pub cycle_id: Option<u32>,
    /// Position within the enclosing cycle, in [0, 1)
    pub phase: Option<f64>,
    /// Low-referenced position over a full flood + ebb, in [0, 1)
    pub tidal_angle: Option<f64>,
    /// Per-camera exposure, keyed by camera id
    pub camera_active: BTreeMap<String, bool>,
    /// Per-camera active seconds within `[timestamp, timestamp + dwell)`
    pub active_secs: BTreeMap<String, i64>,
    pub detections: Vec<DetectionEvent>,
}

impl AlignedRecord {
    /// A record carrying only the alignment fields; derived signals start undefined.
    pub fn new(
        timestamp: Timestamp,
        water_level: Option<f64>,
        level_source: LevelSource,
        gate: Option<GateOpening>,
    ) -> Self {
        Self {
            timestamp,
            water_level,
            level_source,
            level_time: water_level.map(|_| timestamp),
            synthetic: false,
            gate,
            air_temp_c: None,
            dwell_secs: 0,
            rate_m_per_hr: None,
            tidal_state: None,
            slack_level: None,
            cycle_id: None,
            phase: None,
            tidal_angle: None,
            camera_active: BTreeMap::new(),
            active_secs: BTreeMap::new(),
            detections: Vec::new(),
        }
    }

    /// Record one camera's status at `timestamp` and its active time over the dwell.
    pub fn set_exposure(&mut self, camera_id: &str, active: bool, active_secs: i64) {
        self.camera_active.insert(camera_id.to_string(), active);
        self.active_secs.insert(camera_id.to_string(), active_secs);
    }

    pub fn is_camera_active(&self, camera_id: &str) -> bool {
        self.camera_active.get(camera_id).copied().unwrap_or(false)
    }

    pub fn active_camera_count(&self) -> usize {
        self.camera_active.values().filter(|active| **active).count()
    }

    /// Hours `camera_id` was active during this record's dwell.
    pub fn active_hours(&self, camera_id: &str) -> f64 {
        self.active_secs.get(camera_id).copied().unwrap_or(0) as f64 / 3600.0
    }

    pub fn dwell_hours(&self) -> f64 {
        self.dwell_secs as f64 / 3600.0
    }
}
