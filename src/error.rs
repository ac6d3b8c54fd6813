//! # Error Taxonomy
//!
//! Two kinds of failure flow through the pipeline:
//!
//! - **Fatal**: malformed or insufficient top-level input ([`InputError`]).
//!   The run aborts and [`Error::Stage`] names the stage and the offending row.
//! - **Recoverable**: a sensor gap too wide to interpolate, or a stretch of
//!   water level where no tidal cycle can be resolved ([`Exclusion`]). These are
//!   recorded as values in the run summary and as undefined per-record fields;
//!   they never abort the run.

use crate::Timestamp;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Which raw input a row came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Sensor,
    Detection,
    CameraStatus,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataSource::Sensor => "sensor",
            DataSource::Detection => "detection",
            DataSource::CameraStatus => "camera_status",
        })
    }
}

/// Malformed or insufficient raw data. Always fatal for the run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    /// A timestamp string matched none of the accepted formats
    #[error("{origin} row {row}: unparseable timestamp {value:?}")]
    Timestamp {
        origin: DataSource,
        row: usize,
        value: String,
    },

    /// Interpolation needs at least two readings with a defined level
    #[error("sensor series has {found} usable readings, need at least 2")]
    InsufficientReadings { found: usize },

    /// A numeric field outside its valid domain
    #[error("{origin} row {row}: invalid {field}: {reason}")]
    InvalidValue {
        origin: DataSource,
        row: usize,
        field: &'static str,
        reason: String,
    },

    /// A camera status interval that ends before it starts or overlaps another
    #[error("camera_status row {row}: camera {camera_id}: {reason}")]
    InvalidInterval {
        row: usize,
        camera_id: String,
        reason: String,
    },
}

impl InputError {
    /// Offending row, when the error is tied to one.
    pub fn row(&self) -> Option<usize> {
        match self {
            InputError::Timestamp { row, .. }
            | InputError::InvalidValue { row, .. }
            | InputError::InvalidInterval { row, .. } => Some(*row),
            InputError::InsufficientReadings { .. } => None,
        }
    }
}

/// Pipeline stage that can reject its input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Input,
    Alignment,
    Exposure,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Input => "input",
            Stage::Alignment => "alignment",
            Stage::Exposure => "exposure",
        })
    }
}

/// Crate-level error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: InputError,
    },

    /// Semantically invalid configuration (parses, but cannot be used)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),
}

impl Error {
    pub fn at(stage: Stage) -> impl FnOnce(InputError) -> Error {
        move |source| Error::Stage { stage, source }
    }
}

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, Error>;

/// A recoverable condition. The affected range keeps explicitly undefined
/// fields and the run continues.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Exclusion {
    /// Bracketing readings further apart than the max gap; points inside are missing
    InterpolationGap { from: Timestamp, to: Timestamp },
    /// No tidal cycle could be resolved for this range; cycle and phase stay undefined
    UnsegmentableWindow {
        from: Timestamp,
        to: Timestamp,
        reason: String,
    },
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exclusion::InterpolationGap { from, to } => {
                write!(f, "interpolation gap {from} .. {to}")
            }
            Exclusion::UnsegmentableWindow { from, to, reason } => {
                write!(f, "unsegmentable window {from} .. {to}: {reason}")
            }
        }
    }
}
