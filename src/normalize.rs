//! # Detection Normalization
//!
//! Aggregates the aligned records into two complementary views over any
//! combination of grouping dimensions:
//!
//! - **Activity**: raw detection counts over every record, whether or not a
//!   camera was running.
//! - **Efficiency**: detections made while the detecting camera was active,
//!   divided by active camera-hours in the group.
//!
//! Both views come from one pass over the same record set, so they can never
//! disagree on tidal state, phase or exposure.
//!
//! ## Exposure accounting
//! Exposure is measured in camera-hours: each record contributes its dwell
//! time once per camera (or once for the grouped camera when grouping by
//! camera), and its active time is the part of that dwell the camera's
//! status intervals cover. Species never changes exposure; every species in the run is
//! exposed for the group's full camera time, so a species absent from a group
//! gets a true zero rate. A group with no active time has an undefined rate,
//! kept distinct from zero.

use crate::gates::{self, GateCategory};
use crate::phase::{bin_label, phase_bin};
use crate::{AlignedRecord, SlackLevel, TidalState};
use chrono::{Datelike, Timelike};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A grouping dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupBy {
    TidalState,
    /// Rising, falling, high slack, low slack
    DetailedFlow,
    PhaseBin,
    TideLevel,
    GateConfiguration,
    MtrGate,
    HingeGate,
    Species,
    Camera,
    /// Equal-width air temperature bin over the run's range
    Temperature,
    /// Hour of day, `00`-`23`
    Hour,
    DayOfWeek,
    /// Month, `01`-`12`
    Month,
}

impl GroupBy {
    pub fn column(self) -> &'static str {
        match self {
            GroupBy::TidalState => "tidal_state",
            GroupBy::DetailedFlow => "detailed_flow",
            GroupBy::PhaseBin => "phase_bin",
            GroupBy::TideLevel => "tide_level",
            GroupBy::GateConfiguration => "gate_configuration",
            GroupBy::MtrGate => "mtr_gate",
            GroupBy::HingeGate => "hinge_gate",
            GroupBy::Species => "species",
            GroupBy::Camera => "camera_id",
            GroupBy::Temperature => "temperature_bin",
            GroupBy::Hour => "hour",
            GroupBy::DayOfWeek => "day_of_week",
            GroupBy::Month => "month",
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Water level relative to the run's quartiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TideLevel {
    Low,
    Mid,
    High,
}

impl TideLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            TideLevel::Low => "low",
            TideLevel::Mid => "mid",
            TideLevel::High => "high",
        }
    }
}

/// One row of a grouped summary.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupSummary {
    /// One value per grouping dimension, in the requested order
    pub key: Vec<String>,
    pub records: usize,
    /// Camera-hours covered by the group, active or not
    pub camera_hours: f64,
    pub active_hours: f64,
    /// Activity view: every detection in the group
    pub detections: usize,
    pub individuals: u64,
    /// Efficiency view: detections made by an active camera
    pub active_detections: usize,
    /// Active detections per active camera-hour; `None` without active time
    pub detection_rate: Option<f64>,
    /// Share of camera-hours with the camera active; `None` without cameras
    pub active_fraction: Option<f64>,
}

/// Grouped summaries plus the records left out for an undefined dimension.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Grouping {
    pub dimensions: Vec<&'static str>,
    pub groups: Vec<GroupSummary>,
    pub excluded_records: usize,
}

/// Run-wide totals.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Overview {
    pub records: usize,
    pub cameras: usize,
    pub camera_hours: f64,
    pub active_camera_hours: f64,
    pub detections: usize,
    pub active_detections: usize,
    pub individuals: u64,
    /// Share of camera-hours with the camera active
    pub camera_activity_rate: Option<f64>,
    /// Active detections per active camera-hour
    pub detection_rate: Option<f64>,
}

/// Tidal-state preference of one species.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpeciesPreference {
    pub species: String,
    pub tidal_state: String,
    pub active_detections: usize,
    /// Percentage of the species' active detections in this state
    pub share_pct: Option<f64>,
    /// Active detections per active camera-hour in this state
    pub detection_rate: Option<f64>,
}

#[derive(Default)]
struct Accumulator {
    records: usize,
    camera_hours: f64,
    active_hours: f64,
    detections: usize,
    individuals: u64,
    active_detections: usize,
}

impl Accumulator {
    fn finish(self, key: Vec<String>) -> GroupSummary {
        GroupSummary {
            key,
            records: self.records,
            camera_hours: self.camera_hours,
            active_hours: self.active_hours,
            detections: self.detections,
            individuals: self.individuals,
            active_detections: self.active_detections,
            detection_rate: ratio(self.active_detections as f64, self.active_hours),
            active_fraction: ratio(self.active_hours, self.camera_hours),
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    (denominator > 0.0).then(|| numerator / denominator)
}

/// Key part of one record for one dimension.
enum Part {
    Value(String),
    PerCamera,
    PerSpecies,
}

/// Number of equal-width air temperature bins.
pub const TEMPERATURE_BINS: usize = 5;

/// Joins detections with exposure over the aligned records.
pub struct DetectionNormalizer {
    bins: usize,
    /// 25th and 75th percentile of defined water level
    quartiles: Option<(f64, f64)>,
    /// Lowest and highest air temperature
    temperature_range: Option<(f64, f64)>,
    cameras: Vec<String>,
    species: Vec<String>,
}

impl DetectionNormalizer {
    pub fn new(records: &[AlignedRecord], bins: usize) -> Self {
        let mut levels: Vec<f64> = records.iter().filter_map(|r| r.water_level).collect();
        levels.sort_by(|a, b| a.total_cmp(b));
        let quartiles = quantile(&levels, 0.25).zip(quantile(&levels, 0.75));

        let temperature_range = records
            .iter()
            .filter_map(|r| r.air_temp_c)
            .fold(None, |range: Option<(f64, f64)>, t| match range {
                Some((lo, hi)) => Some((lo.min(t), hi.max(t))),
                None => Some((t, t)),
            });

        let mut cameras = BTreeSet::new();
        let mut species = BTreeSet::new();
        for record in records {
            cameras.extend(record.camera_active.keys().cloned());
            for detection in &record.detections {
                cameras.insert(detection.camera_id.clone());
                species.insert(detection.species.clone());
            }
        }

        Self {
            bins: bins.max(1),
            quartiles,
            temperature_range,
            cameras: cameras.into_iter().collect(),
            species: species.into_iter().collect(),
        }
    }

    pub fn tide_level(&self, level: f64) -> Option<TideLevel> {
        let (q25, q75) = self.quartiles?;
        Some(if level <= q25 {
            TideLevel::Low
        } else if level <= q75 {
            TideLevel::Mid
        } else {
            TideLevel::High
        })
    }

    /// Label of the temperature bin holding `celsius`, e.g. `12.0-14.5`.
    pub fn temperature_bin(&self, celsius: f64) -> Option<String> {
        let (lo, hi) = self.temperature_range?;
        let width = (hi - lo) / TEMPERATURE_BINS as f64;
        if width <= 0.0 {
            return Some(format!("{lo:.1}-{hi:.1}"));
        }
        let bin = (((celsius - lo) / width).floor().max(0.0) as usize).min(TEMPERATURE_BINS - 1);
        let from = lo + width * bin as f64;
        Some(format!("{:.1}-{:.1}", from, from + width))
    }

    fn part(&self, record: &AlignedRecord, dim: GroupBy) -> Option<Part> {
        let value = match dim {
            GroupBy::TidalState => record.tidal_state?.as_str().to_string(),
            GroupBy::DetailedFlow => match (record.tidal_state?, record.slack_level) {
                (TidalState::Slack, Some(SlackLevel::High)) => "high_slack".to_string(),
                (TidalState::Slack, Some(SlackLevel::Low)) => "low_slack".to_string(),
                (TidalState::Slack, None) => return None,
                (state, _) => state.as_str().to_string(),
            },
            GroupBy::PhaseBin => bin_label(phase_bin(record.phase?, self.bins), self.bins),
            GroupBy::TideLevel => self.tide_level(record.water_level?)?.as_str().to_string(),
            GroupBy::GateConfiguration => gates::combined(record.gate.as_ref()).as_str().to_string(),
            GroupBy::MtrGate => category(record.gate.and_then(|g| g.mtr_deg).and_then(gates::mtr_category)),
            GroupBy::HingeGate => category(
                record
                    .gate
                    .and_then(|g| g.top_hinge_deg)
                    .and_then(gates::hinge_category),
            ),
            GroupBy::Temperature => self.temperature_bin(record.air_temp_c?)?,
            GroupBy::Hour => format!("{:02}", record.timestamp.hour()),
            GroupBy::DayOfWeek => record.timestamp.weekday().to_string(),
            GroupBy::Month => format!("{:02}", record.timestamp.month()),
            GroupBy::Camera => return Some(Part::PerCamera),
            GroupBy::Species => return Some(Part::PerSpecies),
        };
        Some(Part::Value(value))
    }

    /// Aggregate `records` by `dims`, in that key order.
    pub fn summarize(&self, records: &[AlignedRecord], dims: &[GroupBy]) -> Grouping {
        let cameras: Vec<Option<&str>> = if dims.contains(&GroupBy::Camera) {
            self.cameras.iter().map(|c| Some(c.as_str())).collect()
        } else {
            vec![None]
        };
        let species: Vec<Option<&str>> = if dims.contains(&GroupBy::Species) {
            self.species.iter().map(|s| Some(s.as_str())).collect()
        } else {
            vec![None]
        };

        let mut groups: BTreeMap<Vec<String>, Accumulator> = BTreeMap::new();
        let mut excluded = 0usize;

        for record in records {
            let Some(parts) = dims
                .iter()
                .map(|d| self.part(record, *d))
                .collect::<Option<Vec<Part>>>()
            else {
                excluded += 1;
                continue;
            };

            let dwell = record.dwell_hours();
            for &camera in &cameras {
                let (camera_hours, active_hours) = match camera {
                    Some(c) => (dwell, record.active_hours(c)),
                    None => (
                        dwell * self.cameras.len() as f64,
                        self.cameras.iter().map(|c| record.active_hours(c)).sum(),
                    ),
                };

                for &taxon in &species {
                    let key: Vec<String> = parts
                        .iter()
                        .map(|p| match p {
                            Part::Value(v) => v.clone(),
                            Part::PerCamera => camera.unwrap_or_default().to_string(),
                            Part::PerSpecies => taxon.unwrap_or_default().to_string(),
                        })
                        .collect();

                    let acc = groups.entry(key).or_default();
                    acc.records += 1;
                    acc.camera_hours += camera_hours;
                    acc.active_hours += active_hours;

                    let matching = record.detections.iter().filter(|d| {
                        camera.map_or(true, |c| d.camera_id == c)
                            && taxon.map_or(true, |s| d.species == s)
                    });
                    for detection in matching {
                        acc.detections += 1;
                        acc.individuals += u64::from(detection.count);
                        if record.is_camera_active(&detection.camera_id) {
                            acc.active_detections += 1;
                        }
                    }
                }
            }
        }

        let dimensions: Vec<&'static str> = dims.iter().map(|d| d.column()).collect();
        if excluded > 0 {
            log::debug!(
                "Grouping by {:?}: {} records with an undefined dimension excluded",
                dimensions,
                excluded
            );
        }
        log::info!("Grouped by {:?} into {} groups", dimensions, groups.len());

        Grouping {
            dimensions,
            groups: groups.into_iter().map(|(key, acc)| acc.finish(key)).collect(),
            excluded_records: excluded,
        }
    }

    /// Run-wide totals for both views.
    pub fn overview(&self, records: &[AlignedRecord]) -> Overview {
        let all = self.summarize(records, &[]);
        let totals = all.groups.into_iter().next();
        let (camera_hours, active_hours, detections, active_detections, individuals) = totals
            .map(|g| (g.camera_hours, g.active_hours, g.detections, g.active_detections, g.individuals))
            .unwrap_or_default();

        Overview {
            records: records.len(),
            cameras: self.cameras.len(),
            camera_hours,
            active_camera_hours: active_hours,
            detections,
            active_detections,
            individuals,
            camera_activity_rate: ratio(active_hours, camera_hours),
            detection_rate: ratio(active_detections as f64, active_hours),
        }
    }

    /// Tidal-state preferences of the `top_n` species with the most active
    /// detections. One row per species and state.
    pub fn species_preferences(&self, records: &[AlignedRecord], top_n: usize) -> Vec<SpeciesPreference> {
        let grouping = self.summarize(records, &[GroupBy::Species, GroupBy::TidalState]);

        let mut totals: BTreeMap<&str, usize> = BTreeMap::new();
        for group in &grouping.groups {
            *totals.entry(group.key[0].as_str()).or_default() += group.active_detections;
        }
        let mut ranked: Vec<(&str, usize)> = totals.into_iter().filter(|(_, n)| *n > 0).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        ranked.truncate(top_n);

        ranked
            .iter()
            .flat_map(|(species, total)| {
                grouping
                    .groups
                    .iter()
                    .filter(move |g| g.key[0] == *species)
                    .map(move |g| SpeciesPreference {
                        species: species.to_string(),
                        tidal_state: g.key[1].clone(),
                        active_detections: g.active_detections,
                        share_pct: ratio(100.0 * g.active_detections as f64, *total as f64),
                        detection_rate: g.detection_rate,
                    })
            })
            .collect()
    }
}

fn category(value: Option<GateCategory>) -> String {
    value.unwrap_or(GateCategory::Other).as_str().to_string()
}

/// Linear-interpolated quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let (lo, hi) = (pos.floor() as usize, pos.ceil() as usize);
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}
