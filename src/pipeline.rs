//! # Pipeline
//!
//! Runs the stages in order, each on the complete output of the one before:
//!
//! ```text
//! inputs → align → classify → segment → phase → exposure → AlignedDataset
//! ```
//!
//! Only malformed or insufficient input stops a run; the error names the
//! stage and row. Everything recoverable ends up in the [`RunSummary`].

use crate::config::Config;
use crate::cycles;
use crate::error::{Error, Exclusion, Result, Stage};
use crate::exposure::{self, ExposureIndex};
use crate::input::{InputBundle, RawBundle};
use crate::normalize::{DetectionNormalizer, GroupBy, Grouping};
use crate::phase;
use crate::tidal_state;
use crate::timeline::TimelineAligner;
use crate::{AlignedRecord, Extremum, LevelSource, TidalCycle, Timestamp};
use serde::Serialize;

/// Why records were left without a phase.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PhaseExclusions {
    /// Before the first or after the last turning point
    pub edge: usize,
    /// Inside a window no cycle could be resolved for
    pub unsegmentable: usize,
    /// No water level at the record
    pub missing_level: usize,
}

impl PhaseExclusions {
    pub fn total(&self) -> usize {
        self.edge + self.unsegmentable + self.missing_level
    }
}

/// What a run produced and what it had to leave out.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub records: usize,
    pub observed: usize,
    pub interpolated: usize,
    pub missing: usize,
    pub synthetic_points: usize,
    pub detections: usize,
    pub detections_attached: usize,
    pub cameras: usize,
    pub extrema_accepted: usize,
    pub extrema_rejected: usize,
    pub cycles: usize,
    pub phase_excluded: PhaseExclusions,
    pub exclusions: Vec<Exclusion>,
}

impl RunSummary {
    pub fn log(&self) {
        log::info!(
            "Run: {} records ({} observed, {} interpolated, {} missing, {} synthetic)",
            self.records,
            self.observed,
            self.interpolated,
            self.missing,
            self.synthetic_points
        );
        log::info!(
            "Run: {}/{} detections attached, {} cameras, {} cycles from {} turning points",
            self.detections_attached,
            self.detections,
            self.cameras,
            self.cycles,
            self.extrema_accepted
        );
        if self.phase_excluded.total() > 0 {
            log::warn!(
                "{} records without phase: {} edge, {} unsegmentable, {} missing level",
                self.phase_excluded.total(),
                self.phase_excluded.edge,
                self.phase_excluded.unsegmentable,
                self.phase_excluded.missing_level
            );
        }
    }
}

/// The aligned, annotated dataset. Immutable once built.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AlignedDataset {
    pub records: Vec<AlignedRecord>,
    pub cycles: Vec<TidalCycle>,
    pub extrema: Vec<Extremum>,
    pub cameras: Vec<String>,
    pub summary: RunSummary,
}

impl AlignedDataset {
    pub fn normalizer(&self, bins: usize) -> DetectionNormalizer {
        DetectionNormalizer::new(&self.records, bins)
    }
}

pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    /// # Errors
    /// [`Error::Config`] when the configuration cannot drive a run.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate raw rows, then run.
    pub fn run_raw(&self, raw: RawBundle) -> Result<AlignedDataset> {
        let inputs = raw.into_inputs().map_err(Error::at(Stage::Input))?;
        self.run(&inputs)
    }

    pub fn run(&self, inputs: &InputBundle) -> Result<AlignedDataset> {
        let timeline = TimelineAligner::new(&self.config.alignment)?
            .align(&inputs.readings, &inputs.detections)
            .map_err(Error::at(Stage::Alignment))?;
        let mut records = timeline.records;

        tidal_state::classify(&mut records, &self.config.tidal_state);

        let segmentation = cycles::segment(&records, &self.config.cycles);
        cycles::assign(&mut records, &segmentation.cycles);
        phase::map(&mut records, &segmentation.cycles);

        let index =
            ExposureIndex::build(&inputs.camera_status).map_err(Error::at(Stage::Exposure))?;
        let cameras = exposure::camera_ids(&index, &inputs.detections);
        exposure::apply(&mut records, &index, &cameras);

        let mut exclusions = timeline.gaps;
        exclusions.extend(segmentation.exclusions.iter().cloned());

        let summary = RunSummary {
            records: records.len(),
            observed: count_source(&records, LevelSource::Observed),
            interpolated: count_source(&records, LevelSource::Interpolated),
            missing: count_source(&records, LevelSource::Missing),
            synthetic_points: timeline.synthetic_points,
            detections: inputs.detections.len(),
            detections_attached: records.iter().map(|r| r.detections.len()).sum(),
            cameras: cameras.len(),
            extrema_accepted: segmentation.extrema.len(),
            extrema_rejected: segmentation.rejected_candidates,
            cycles: segmentation.cycles.len(),
            phase_excluded: phase_exclusions(&records, &segmentation.exclusions),
            exclusions,
        };
        summary.log();

        Ok(AlignedDataset {
            records,
            cycles: segmentation.cycles,
            extrema: segmentation.extrema,
            cameras,
            summary,
        })
    }

    /// Group the dataset with the configured phase bins.
    pub fn summarize(&self, dataset: &AlignedDataset, dims: &[GroupBy]) -> Grouping {
        dataset
            .normalizer(self.config.phase.bins)
            .summarize(&dataset.records, dims)
    }
}

fn count_source(records: &[AlignedRecord], source: LevelSource) -> usize {
    records.iter().filter(|r| r.level_source == source).count()
}

fn in_window(ts: Timestamp, exclusions: &[Exclusion]) -> bool {
    exclusions.iter().any(|e| match e {
        Exclusion::UnsegmentableWindow { from, to, .. } => *from <= ts && ts <= *to,
        Exclusion::InterpolationGap { .. } => false,
    })
}

fn phase_exclusions(records: &[AlignedRecord], unsegmentable: &[Exclusion]) -> PhaseExclusions {
    let mut excluded = PhaseExclusions::default();
    for record in records.iter().filter(|r| r.phase.is_none()) {
        if record.water_level.is_none() {
            excluded.missing_level += 1;
        } else if in_window(record.timestamp, unsegmentable) {
            excluded.unsegmentable += 1;
        } else {
            excluded.edge += 1;
        }
    }
    excluded
}
