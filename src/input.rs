//! # Raw Input Validation
//!
//! Reading files is someone else's job; this module receives rows that are
//! already tokenised (strings and numbers) and turns them into the typed
//! inputs of the alignment core. It owns the rules that decide what counts as
//! a usable row:
//!
//! - timestamps must parse in one of the formats field exports use
//! - a water level of exactly zero is a logger drop-out, not a reading
//! - duplicate sensor timestamps keep the first row
//! - a blank species with a positive count becomes `Unknown`
//! - a blank species with no count is a camera observation without animals,
//!   not a detection
//!
//! Any unparseable timestamp or invalid interval is fatal and names the row.

use crate::error::{DataSource, InputError};
use crate::{CameraStatusInterval, DetectionEvent, GateOpening, SensorReading, Timestamp};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Formats accepted for naive local timestamps, tried in order.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %I:%M %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M %p",
];

const UNKNOWN_SPECIES: &str = "Unknown";

/// One tokenised row from the tide sensor export.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSensorRow {
    pub timestamp: String,
    #[serde(default)]
    pub water_level: Option<f64>,
    #[serde(default)]
    pub gate_mtr_deg: Option<f64>,
    #[serde(default)]
    pub gate_top_hinge_deg: Option<f64>,
    #[serde(default)]
    pub air_temp_c: Option<f64>,
}

/// One tokenised row from the camera-trap export.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDetectionRow {
    pub timestamp: String,
    #[serde(default)]
    pub species: Option<String>,
    pub camera_id: String,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// One tokenised camera status row.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStatusRow {
    pub camera_id: String,
    pub start: String,
    pub end: String,
    pub active: bool,
}

/// Everything one run needs, as raw rows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBundle {
    #[serde(default)]
    pub sensor: Vec<RawSensorRow>,
    #[serde(default)]
    pub detections: Vec<RawDetectionRow>,
    #[serde(default)]
    pub camera_status: Vec<RawStatusRow>,
}

/// Validated, typed inputs. Immutable for the rest of the run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InputBundle {
    /// Sorted by timestamp, duplicates removed
    pub readings: Vec<SensorReading>,
    /// Sorted by timestamp
    pub detections: Vec<DetectionEvent>,
    pub camera_status: Vec<CameraStatusInterval>,
}

/// Parse a naive local timestamp. RFC 3339 strings keep their wall-clock time
/// and drop the offset.
pub fn parse_timestamp(value: &str) -> Option<Timestamp> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.naive_local())
        })
}

fn require_timestamp(value: &str, origin: DataSource, row: usize) -> Result<Timestamp, InputError> {
    parse_timestamp(value).ok_or_else(|| InputError::Timestamp {
        origin,
        row,
        value: value.to_string(),
    })
}

impl RawBundle {
    /// Validate every row and produce typed inputs.
    pub fn into_inputs(self) -> Result<InputBundle, InputError> {
        Ok(InputBundle {
            readings: sensor_readings(&self.sensor)?,
            detections: detection_events(&self.detections)?,
            camera_status: status_intervals(&self.camera_status)?,
        })
    }
}

/// Convert sensor rows, sort them and drop duplicate timestamps.
pub fn sensor_readings(rows: &[RawSensorRow]) -> Result<Vec<SensorReading>, InputError> {
    let mut readings = Vec::with_capacity(rows.len());
    for (row, raw) in rows.iter().enumerate() {
        let timestamp = require_timestamp(&raw.timestamp, DataSource::Sensor, row)?;

        // Zero depth is what the logger writes when the probe is dry or offline
        let water_level = raw.water_level.filter(|v| v.is_finite() && *v != 0.0);

        let gate = match (raw.gate_mtr_deg, raw.gate_top_hinge_deg) {
            (None, None) => None,
            (mtr_deg, top_hinge_deg) => Some(GateOpening {
                mtr_deg: mtr_deg.filter(|v| v.is_finite()),
                top_hinge_deg: top_hinge_deg.filter(|v| v.is_finite()),
            }),
        };

        readings.push(SensorReading {
            timestamp,
            water_level,
            gate,
            air_temp_c: raw.air_temp_c.filter(|v| v.is_finite()),
            synthetic: false,
        });
    }

    // Stable sort keeps file order among equal timestamps, so "first wins" holds
    readings.sort_by_key(|r| r.timestamp);
    let before = readings.len();
    readings.dedup_by_key(|r| r.timestamp);
    let dropped = before - readings.len();
    if dropped > 0 {
        log::warn!("Dropped {dropped} sensor rows with duplicate timestamps");
    }

    Ok(readings)
}

/// Convert camera rows into detections. Rows without an animal are skipped.
pub fn detection_events(rows: &[RawDetectionRow]) -> Result<Vec<DetectionEvent>, InputError> {
    let mut events = Vec::with_capacity(rows.len());
    let mut unknown_filled = 0usize;
    for (row, raw) in rows.iter().enumerate() {
        let timestamp = require_timestamp(&raw.timestamp, DataSource::Detection, row)?;

        if raw.camera_id.trim().is_empty() {
            return Err(InputError::InvalidValue {
                origin: DataSource::Detection,
                row,
                field: "camera_id",
                reason: "empty".to_string(),
            });
        }

        let species = raw
            .species
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("nan"));

        let species = match (species, raw.count) {
            (Some(name), _) => name.to_string(),
            (None, Some(count)) if count > 0 => {
                unknown_filled += 1;
                UNKNOWN_SPECIES.to_string()
            }
            // Camera fired but nothing was identified
            (None, _) => continue,
        };

        events.push(DetectionEvent {
            timestamp,
            species,
            camera_id: raw.camera_id.trim().to_string(),
            count: raw.count.unwrap_or(1),
            metadata: raw.metadata.clone(),
        });
    }

    if unknown_filled > 0 {
        log::info!("Labelled {unknown_filled} detections with blank species as {UNKNOWN_SPECIES}");
    }
    events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(events)
}

/// Convert status rows. Overlap checks happen in the exposure builder.
pub fn status_intervals(rows: &[RawStatusRow]) -> Result<Vec<CameraStatusInterval>, InputError> {
    rows.iter()
        .enumerate()
        .map(|(row, raw)| {
            let start = require_timestamp(&raw.start, DataSource::CameraStatus, row)?;
            let end = require_timestamp(&raw.end, DataSource::CameraStatus, row)?;
            Ok(CameraStatusInterval {
                camera_id: raw.camera_id.trim().to_string(),
                start,
                end,
                active: raw.active,
            })
        })
        .collect()
}
