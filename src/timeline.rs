//! # Timeline Alignment
//!
//! Puts irregular sensor readings and camera detections on one monotonic axis.
//!
//! ## Axis
//! - **Uniform**: every `interval` from the first sensor reading to the last
//! - **Event-anchored**: the union of sensor and detection timestamps
//!
//! ## Water Level per Axis Point
//! 1. A reading at exactly this time is used as-is (this is what makes the
//!    aligner idempotent on its own output)
//! 2. Otherwise the nearest reading within the snap tolerance is used as observed
//! 3. Otherwise linear interpolation between the bracketing readings:
//!    ```text
//!    level = l0 + (l1 - l0) * (t - t0) / (t1 - t0)
//!    ```
//! 4. If the bracketing readings are further apart than the max gap, or the
//!    point lies outside the sensor span, the level is marked missing instead
//!    of fabricated across the outage
//!
//! ## Detections
//! Each detection attaches to the nearest axis point within the event
//! tolerance. Detections with no point in reach get a synthetic axis point at
//! their own timestamp; they are never dropped.

use crate::config::{AlignmentConfig, AxisMode};
use crate::error::{Exclusion, InputError, Result};
use crate::{AlignedRecord, DetectionEvent, GateOpening, LevelSource, SensorReading, Timestamp};
use chrono::Duration;

/// Output of the aligner: the axis with levels and detections attached.
#[derive(Clone, Debug, Default)]
pub struct AlignedTimeline {
    /// Strictly increasing timestamps
    pub records: Vec<AlignedRecord>,
    /// Sensor gaps too wide to interpolate across
    pub gaps: Vec<Exclusion>,
    /// Axis points inserted for out-of-reach detections
    pub synthetic_points: usize,
}

/// Level, provenance and gate angles at one instant.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Sample {
    level: Option<f64>,
    source: LevelSource,
    /// Time the level was measured at
    measured: Option<Timestamp>,
    gate: Option<GateOpening>,
    air_temp: Option<f64>,
    /// Bracketing readings of an over-wide gap
    gap: Option<(Timestamp, Timestamp)>,
}

/// Sorted sensor readings plus the subset with a defined level.
struct SensorIndex {
    readings: Vec<SensorReading>,
    /// Indices into `readings` with `water_level.is_some()`
    defined: Vec<usize>,
}

impl SensorIndex {
    fn new(readings: &[SensorReading]) -> Self {
        let mut readings = readings.to_vec();
        readings.sort_by_key(|r| r.timestamp);
        readings.dedup_by_key(|r| r.timestamp);
        let defined = readings
            .iter()
            .enumerate()
            .filter(|(_, r)| r.water_level.is_some())
            .map(|(i, _)| i)
            .collect();
        Self { readings, defined }
    }

    fn defined_at(&self, pos: usize) -> &SensorReading {
        &self.readings[self.defined[pos]]
    }

    fn sample(&self, ts: Timestamp, snap: Duration, max_gap: Duration) -> Sample {
        // 1. Exact reading. Synthetic readings are authoritative even when missing.
        if let Ok(i) = self.readings.binary_search_by_key(&ts, |r| r.timestamp) {
            let r = &self.readings[i];
            match r.water_level {
                Some(level) => {
                    return Sample {
                        level: Some(level),
                        source: provenance(r),
                        measured: Some(ts),
                        gate: r.gate,
                        air_temp: r.air_temp_c,
                        gap: None,
                    }
                }
                None if r.synthetic => {
                    return Sample {
                        level: None,
                        source: LevelSource::Missing,
                        measured: None,
                        gate: r.gate,
                        air_temp: r.air_temp_c,
                        gap: None,
                    }
                }
                None => {}
            }
        }

        // Position of the first defined reading after `ts`
        let next_pos = self
            .defined
            .partition_point(|&i| self.readings[i].timestamp <= ts);
        let prev = next_pos.checked_sub(1).map(|p| self.defined_at(p));
        let next = (next_pos < self.defined.len()).then(|| self.defined_at(next_pos));

        // 2. Snap to the nearest defined reading
        let nearest = match (prev, next) {
            (Some(p), Some(n)) => {
                if ts - p.timestamp <= n.timestamp - ts {
                    Some(p)
                } else {
                    Some(n)
                }
            }
            (p, n) => p.or(n),
        };
        if let Some(r) = nearest {
            if (r.timestamp - ts).abs() <= snap {
                return Sample {
                    level: r.water_level,
                    source: provenance(r),
                    measured: Some(r.timestamp),
                    gate: r.gate,
                    air_temp: r.air_temp_c,
                    gap: None,
                };
            }
        }

        // 3./4. Interpolate inside the span, unless the gap is too wide
        match (prev, next) {
            (Some(p0), Some(p1)) => {
                let span = p1.timestamp - p0.timestamp;
                if span > max_gap {
                    return Sample {
                        level: None,
                        source: LevelSource::Missing,
                        measured: None,
                        gate: None,
                        air_temp: None,
                        gap: Some((p0.timestamp, p1.timestamp)),
                    };
                }
                // Linear interpolation: alpha = 0.0 at p0, 1.0 at p1
                let alpha = (ts - p0.timestamp).num_milliseconds() as f64
                    / span.num_milliseconds() as f64;
                let level = lerp(p0.water_level, p1.water_level, alpha);
                Sample {
                    level,
                    source: LevelSource::Interpolated,
                    measured: level.map(|_| ts),
                    gate: lerp_gate(p0.gate, p1.gate, alpha),
                    air_temp: lerp(p0.air_temp_c, p1.air_temp_c, alpha),
                    gap: None,
                }
            }
            // Outside the sensor span
            _ => Sample {
                level: None,
                source: LevelSource::Missing,
                measured: None,
                gate: None,
                air_temp: None,
                gap: None,
            },
        }
    }
}

fn provenance(reading: &SensorReading) -> LevelSource {
    if reading.synthetic {
        LevelSource::Interpolated
    } else {
        LevelSource::Observed
    }
}

fn lerp(a: Option<f64>, b: Option<f64>, alpha: f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + alpha * (b - a)),
        _ => None,
    }
}

fn lerp_gate(a: Option<GateOpening>, b: Option<GateOpening>, alpha: f64) -> Option<GateOpening> {
    let (a, b) = (a?, b?);
    let gate = GateOpening {
        mtr_deg: lerp(a.mtr_deg, b.mtr_deg, alpha),
        top_hinge_deg: lerp(a.top_hinge_deg, b.top_hinge_deg, alpha),
    };
    (gate.mtr_deg.is_some() || gate.top_hinge_deg.is_some()).then_some(gate)
}

/// Builds the aligned timeline from sensor readings and detections.
pub struct TimelineAligner<'a> {
    config: &'a AlignmentConfig,
}

impl<'a> TimelineAligner<'a> {
    /// # Errors
    /// [`crate::Error::Config`] when the alignment settings cannot build an axis.
    pub fn new(config: &'a AlignmentConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Align readings and detections onto one axis.
    ///
    /// # Errors
    /// [`InputError::InsufficientReadings`] when fewer than two readings carry a
    /// water level, since interpolation is undefined.
    pub fn align(
        &self,
        readings: &[SensorReading],
        events: &[DetectionEvent],
    ) -> std::result::Result<AlignedTimeline, InputError> {
        let index = SensorIndex::new(readings);
        if index.defined.len() < 2 {
            return Err(InputError::InsufficientReadings {
                found: index.defined.len(),
            });
        }

        let axis = self.build_axis(&index, events);
        let snap = self.config.snap_tolerance();
        let max_gap = self.config.max_gap();

        let mut timeline = AlignedTimeline::default();
        let mut records: Vec<AlignedRecord> = axis
            .into_iter()
            .map(|ts| self.record_at(&index, ts, snap, max_gap, &mut timeline.gaps))
            .collect();

        // Attach detections, collecting those with no axis point in reach
        let tolerance = self.config.event_tolerance();
        let mut sorted_events: Vec<&DetectionEvent> = events.iter().collect();
        sorted_events.sort_by_key(|e| e.timestamp);

        let mut stranded: Vec<&DetectionEvent> = Vec::new();
        for event in sorted_events {
            match nearest_index(&records, event.timestamp) {
                Some(i) if (records[i].timestamp - event.timestamp).abs() <= tolerance => {
                    records[i].detections.push(event.clone())
                }
                _ => stranded.push(event),
            }
        }

        // One synthetic point per cluster of stranded detections
        let mut synthetic: Vec<AlignedRecord> = Vec::new();
        for event in stranded {
            match synthetic.last_mut() {
                Some(last) if event.timestamp - last.timestamp <= tolerance => {
                    last.detections.push(event.clone())
                }
                _ => {
                    let mut record =
                        self.record_at(&index, event.timestamp, snap, max_gap, &mut timeline.gaps);
                    record.synthetic = true;
                    record.detections.push(event.clone());
                    log::debug!("Synthetic axis point at {} for detection", event.timestamp);
                    synthetic.push(record);
                }
            }
        }
        timeline.synthetic_points = synthetic.len();
        if !synthetic.is_empty() {
            records.extend(synthetic);
            records.sort_by_key(|r| r.timestamp);
        }

        self.finish(&mut records);

        log::info!(
            "Aligned {} readings onto {} axis points ({} synthetic, {} gaps)",
            index.readings.len(),
            records.len(),
            timeline.synthetic_points,
            timeline.gaps.len()
        );
        for gap in &timeline.gaps {
            log::warn!("Marked missing: {gap}");
        }

        timeline.records = records;
        Ok(timeline)
    }

    fn build_axis(&self, index: &SensorIndex, events: &[DetectionEvent]) -> Vec<Timestamp> {
        let first = index.readings[0].timestamp;
        let last = index.readings[index.readings.len() - 1].timestamp;
        match self.config.axis {
            AxisMode::Uniform => {
                let interval = self.config.interval();
                let mut axis = Vec::new();
                let mut ts = first;
                while ts <= last {
                    axis.push(ts);
                    ts += interval;
                }
                axis
            }
            AxisMode::EventAnchored => {
                let mut axis: Vec<Timestamp> = index
                    .readings
                    .iter()
                    .map(|r| r.timestamp)
                    .chain(events.iter().map(|e| e.timestamp))
                    .collect();
                axis.sort();
                axis.dedup();
                axis
            }
        }
    }

    fn record_at(
        &self,
        index: &SensorIndex,
        ts: Timestamp,
        snap: Duration,
        max_gap: Duration,
        gaps: &mut Vec<Exclusion>,
    ) -> AlignedRecord {
        let sample = index.sample(ts, snap, max_gap);
        if let Some((from, to)) = sample.gap {
            let gap = Exclusion::InterpolationGap { from, to };
            if !gaps.contains(&gap) {
                gaps.push(gap);
            }
        }
        let mut record = AlignedRecord::new(ts, sample.level, sample.source, sample.gate);
        record.level_time = sample.measured;
        record.air_temp_c = sample.air_temp;
        record
    }

    /// Dwell times and a deterministic detection order.
    ///
    /// The last grid point stands for one interval. The last event-anchored
    /// point closes the observation span and dwells for nothing.
    fn finish(&self, records: &mut [AlignedRecord]) {
        let fallback = match self.config.axis {
            AxisMode::Uniform => self.config.interval().num_seconds(),
            AxisMode::EventAnchored => 0,
        };
        let next_times: Vec<Option<Timestamp>> = records
            .iter()
            .skip(1)
            .map(|r| Some(r.timestamp))
            .chain(std::iter::once(None))
            .collect();
        for (record, next) in records.iter_mut().zip(next_times) {
            record.dwell_secs = next
                .map(|n| (n - record.timestamp).num_seconds())
                .unwrap_or(fallback);
            record.detections.sort_by(|a, b| {
                (a.timestamp, &a.camera_id, &a.species).cmp(&(b.timestamp, &b.camera_id, &b.species))
            });
        }
    }
}

/// Index of the axis point closest to `ts`; ties go to the earlier point.
fn nearest_index(records: &[AlignedRecord], ts: Timestamp) -> Option<usize> {
    if records.is_empty() {
        return None;
    }
    let pos = records.partition_point(|r| r.timestamp < ts);
    if pos == 0 {
        return Some(0);
    }
    if pos == records.len() {
        return Some(records.len() - 1);
    }
    let before = ts - records[pos - 1].timestamp;
    let after = records[pos].timestamp - ts;
    Some(if before <= after { pos - 1 } else { pos })
}

/// Convert aligned records back into readings so the aligner can run again.
pub fn readings_from(records: &[AlignedRecord]) -> Vec<SensorReading> {
    records
        .iter()
        .filter(|r| !r.synthetic)
        .map(SensorReading::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 6, 16)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn config() -> AlignmentConfig {
        AlignmentConfig {
            interval_minutes: 30,
            snap_tolerance_minutes: 5,
            max_gap_minutes: 120,
            event_tolerance_minutes: 10,
            axis: AxisMode::Uniform,
        }
    }

    #[test]
    fn fewer_than_two_readings_is_an_input_error() {
        let cfg = config();
        let aligner = TimelineAligner::new(&cfg).unwrap();
        let err = aligner
            .align(&[SensorReading::new(at(0, 0), 1.0)], &[])
            .unwrap_err();
        assert_eq!(err, InputError::InsufficientReadings { found: 1 });

        let mut dropout = SensorReading::new(at(1, 0), 1.0);
        dropout.water_level = None;
        let err = aligner
            .align(&[SensorReading::new(at(0, 0), 1.0), dropout], &[])
            .unwrap_err();
        assert_eq!(err, InputError::InsufficientReadings { found: 1 });
    }

    #[test]
    fn uniform_axis_interpolates_between_readings() {
        let cfg = config();
        let readings = vec![
            SensorReading::new(at(0, 0), 1.0),
            SensorReading::new(at(1, 0), 2.0),
        ];
        let timeline = TimelineAligner::new(&cfg).unwrap().align(&readings, &[]).unwrap();

        let times: Vec<_> = timeline.records.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![at(0, 0), at(0, 30), at(1, 0)]);

        let mid = &timeline.records[1];
        assert_eq!(mid.level_source, LevelSource::Interpolated);
        assert!((mid.water_level.unwrap() - 1.5).abs() < 1e-9);
        assert_eq!(timeline.records[0].level_source, LevelSource::Observed);
        assert_eq!(timeline.records[0].dwell_secs, 1800);
        assert_eq!(timeline.records[2].dwell_secs, 1800);
    }

    #[test]
    fn readings_within_snap_tolerance_are_observed() {
        let cfg = config();
        let readings = vec![
            SensorReading::new(at(0, 0), 1.0),
            SensorReading::new(at(0, 27), 1.9),
            SensorReading::new(at(1, 0), 2.0),
        ];
        let timeline = TimelineAligner::new(&cfg).unwrap().align(&readings, &[]).unwrap();
        let mid = &timeline.records[1];
        assert_eq!(mid.timestamp, at(0, 30));
        assert_eq!(mid.level_source, LevelSource::Observed);
        assert_eq!(mid.water_level, Some(1.9));
    }

    #[test]
    fn wide_gaps_are_missing_not_interpolated() {
        let cfg = config();
        let readings = vec![
            SensorReading::new(at(0, 0), 1.0),
            SensorReading::new(at(4, 0), 2.0),
            SensorReading::new(at(4, 30), 2.1),
        ];
        let timeline = TimelineAligner::new(&cfg).unwrap().align(&readings, &[]).unwrap();
        let missing = timeline
            .records
            .iter()
            .filter(|r| r.level_source == LevelSource::Missing)
            .count();
        // 00:30 .. 03:30 inclusive
        assert_eq!(missing, 7);
        assert!(timeline
            .records
            .iter()
            .filter(|r| r.level_source == LevelSource::Missing)
            .all(|r| r.water_level.is_none()));
        assert_eq!(
            timeline.gaps,
            vec![Exclusion::InterpolationGap {
                from: at(0, 0),
                to: at(4, 0)
            }]
        );
    }

    #[test]
    fn raw_dropouts_are_interpolated_across() {
        let cfg = config();
        let mut dropout = SensorReading::new(at(0, 30), 0.0);
        dropout.water_level = None;
        let readings = vec![
            SensorReading::new(at(0, 0), 1.0),
            dropout,
            SensorReading::new(at(1, 0), 2.0),
        ];
        let timeline = TimelineAligner::new(&cfg).unwrap().align(&readings, &[]).unwrap();
        assert_eq!(timeline.records[1].level_source, LevelSource::Interpolated);
        assert!((timeline.records[1].water_level.unwrap() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn detections_attach_to_nearest_point() {
        let cfg = config();
        let readings = vec![
            SensorReading::new(at(0, 0), 1.0),
            SensorReading::new(at(1, 0), 2.0),
        ];
        let events = vec![
            DetectionEvent::new(at(0, 38), "Ardea herodias", "CAM1"),
            DetectionEvent::new(at(0, 22), "Mallard", "CAM1"),
        ];
        let timeline = TimelineAligner::new(&cfg).unwrap().align(&readings, &events).unwrap();
        assert_eq!(timeline.synthetic_points, 0);
        let mid = &timeline.records[1];
        assert_eq!(mid.detections.len(), 2);
        // Ordered by timestamp
        assert_eq!(mid.detections[0].species, "Mallard");
    }

    #[test]
    fn out_of_reach_detections_get_a_synthetic_point() {
        let cfg = config();
        let readings = vec![
            SensorReading::new(at(0, 0), 1.0),
            SensorReading::new(at(1, 0), 2.0),
        ];
        let events = vec![
            DetectionEvent::new(at(0, 15), "Mallard", "CAM1"),
            DetectionEvent::new(at(0, 16), "Mallard", "CAM2"),
            DetectionEvent::new(at(3, 0), "Lontra canadensis", "CAM1"),
        ];
        let timeline = TimelineAligner::new(&cfg).unwrap().align(&readings, &events).unwrap();
        assert_eq!(timeline.synthetic_points, 2);
        assert_eq!(timeline.records.len(), 5);

        let times: Vec<_> = timeline.records.iter().map(|r| r.timestamp).collect();
        assert!(times.windows(2).all(|w| w[0] < w[1]));

        let inside = &timeline.records[1];
        assert!(inside.synthetic);
        assert_eq!(inside.timestamp, at(0, 15));
        assert_eq!(inside.detections.len(), 2);
        assert_eq!(inside.level_source, LevelSource::Interpolated);
        assert!((inside.water_level.unwrap() - 1.25).abs() < 1e-9);
        // Grid point before it now dwells only until the synthetic point
        assert_eq!(timeline.records[0].dwell_secs, 900);

        let outside = timeline.records.last().unwrap();
        assert!(outside.synthetic);
        assert_eq!(outside.level_source, LevelSource::Missing);

        let attached: usize = timeline.records.iter().map(|r| r.detections.len()).sum();
        assert_eq!(attached, events.len());
    }

    #[test]
    fn event_anchored_axis_is_union_of_timestamps() {
        let mut cfg = config();
        cfg.axis = AxisMode::EventAnchored;
        let readings = vec![
            SensorReading::new(at(0, 0), 1.0),
            SensorReading::new(at(1, 0), 2.0),
        ];
        let events = vec![DetectionEvent::new(at(0, 45), "Mallard", "CAM1")];
        let timeline = TimelineAligner::new(&cfg).unwrap().align(&readings, &events).unwrap();
        let times: Vec<_> = timeline.records.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![at(0, 0), at(0, 45), at(1, 0)]);
        assert_eq!(timeline.records[1].detections.len(), 1);
        assert!(!timeline.records[1].synthetic);
        assert!((timeline.records[1].water_level.unwrap() - 1.75).abs() < 1e-9);
    }

    #[test]
    fn non_positive_interval_is_rejected_up_front() {
        let mut cfg = config();
        cfg.interval_minutes = 0;
        assert!(matches!(
            TimelineAligner::new(&cfg),
            Err(crate::Error::Config(_))
        ));
        cfg.interval_minutes = -30;
        assert!(TimelineAligner::new(&cfg).is_err());
    }

    #[test]
    fn snapped_levels_keep_their_measurement_time() {
        let mut cfg = config();
        cfg.axis = AxisMode::EventAnchored;
        let readings = vec![
            SensorReading::new(at(0, 0), 1.0).with_air_temp(12.0),
            SensorReading::new(at(0, 30), 1.3).with_air_temp(14.0),
            SensorReading::new(at(1, 0), 1.6).with_air_temp(16.0),
        ];
        let events = vec![
            DetectionEvent::new(at(0, 32), "Mallard", "CAM1"),
            DetectionEvent::new(at(0, 45), "Mallard", "CAM1"),
        ];
        let timeline = TimelineAligner::new(&cfg).unwrap().align(&readings, &events).unwrap();
        let times: Vec<_> = timeline.records.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![at(0, 0), at(0, 30), at(0, 32), at(0, 45), at(1, 0)]);

        let snapped = &timeline.records[2];
        assert_eq!(snapped.level_source, LevelSource::Observed);
        assert_eq!(snapped.water_level, Some(1.3));
        assert_eq!(snapped.level_time, Some(at(0, 30)));
        assert_eq!(snapped.air_temp_c, Some(14.0));

        let between = &timeline.records[3];
        assert_eq!(between.level_time, Some(at(0, 45)));
        assert!((between.air_temp_c.unwrap() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn last_event_anchored_point_has_no_dwell() {
        let mut cfg = config();
        cfg.axis = AxisMode::EventAnchored;
        let readings = vec![
            SensorReading::new(at(0, 0), 1.0),
            SensorReading::new(at(1, 0), 2.0),
        ];
        let events = vec![DetectionEvent::new(at(0, 45), "Mallard", "CAM1")];
        let timeline = TimelineAligner::new(&cfg).unwrap().align(&readings, &events).unwrap();
        let dwell: Vec<i64> = timeline.records.iter().map(|r| r.dwell_secs).collect();
        assert_eq!(dwell, vec![2700, 900, 0]);
        let span: i64 = dwell.iter().sum();
        assert_eq!(span, (at(1, 0) - at(0, 0)).num_seconds());
    }

    #[test]
    fn realigning_output_is_idempotent() {
        let cfg = config();
        let readings = vec![
            SensorReading::new(at(0, 3), 1.0),
            SensorReading::new(at(0, 50), 1.6),
            SensorReading::new(at(1, 40), 2.0),
            SensorReading::new(at(5, 0), 1.1),
            SensorReading::new(at(5, 20), 0.9),
        ];
        let aligner = TimelineAligner::new(&cfg).unwrap();
        let first = aligner.align(&readings, &[]).unwrap();
        let second = aligner.align(&readings_from(&first.records), &[]).unwrap();

        assert_eq!(first.records.len(), second.records.len());
        for (a, b) in first.records.iter().zip(&second.records) {
            assert_eq!(a.timestamp, b.timestamp);
            assert_eq!(a.water_level, b.water_level);
            assert_eq!(a.level_source, b.level_source);
        }
    }
}
