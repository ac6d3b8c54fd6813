//! # Tidal Cycle Segmentation
//!
//! Finds high and low water turning points and cuts the series into cycles.
//!
//! Segmentation runs in two passes over the defined water levels:
//! 1. **Candidates**: a forward scan marks every sample that is the extreme of
//!    its neighbourhood (`window` either side) and stands at least `prominence`
//!    above (high) or below (low) the far side of that neighbourhood on both
//!    sides. Sub-cycle wiggles fail the prominence check.
//! 2. **Filter**: candidates are accepted in time order when they are at least
//!    `min_separation` after the last accepted turning point and of the
//!    opposite kind. An accepted turning point is never revisited.
//!
//! Consecutive accepted turning points bound a cycle. A pair further apart
//! than `max_cycle`, or with a sensor outage between them, cannot be trusted
//! to hide no turning point and is reported as an unsegmentable window.

use crate::config::CycleConfig;
use crate::error::Exclusion;
use crate::{AlignedRecord, Extremum, ExtremumKind, LevelSource, TidalCycle, Timestamp};

/// Result of segmentation.
#[derive(Clone, Debug, Default)]
pub struct Segmentation {
    /// Accepted turning points, alternating high/low
    pub extrema: Vec<Extremum>,
    /// Resolved cycles, in time order
    pub cycles: Vec<TidalCycle>,
    /// Ranges that could not be segmented
    pub exclusions: Vec<Exclusion>,
    /// Candidates dropped by the separation/alternation filter
    pub rejected_candidates: usize,
}

impl Segmentation {
    /// Fewer than two turning points in the whole series.
    pub fn is_unsegmentable(&self) -> bool {
        self.extrema.len() < 2
    }
}

#[derive(Clone, Copy, Debug)]
struct Point {
    index: usize,
    ts: Timestamp,
    level: f64,
}

fn defined_points(records: &[AlignedRecord]) -> Vec<Point> {
    records
        .iter()
        .enumerate()
        .filter_map(|(index, r)| {
            r.water_level.map(|level| Point {
                index,
                ts: r.timestamp,
                level,
            })
        })
        .collect()
}

/// Does `point` stand out from `side` as a turning point of `kind`?
/// `strict` applies to the leading side so plateaus yield one candidate.
fn dominates(kind: ExtremumKind, point: &Point, side: &[Point], strict: bool, prominence: f64) -> bool {
    let (beyond, far) = match kind {
        ExtremumKind::High => (
            side.iter().all(|p| if strict { p.level < point.level } else { p.level <= point.level }),
            side.iter().map(|p| point.level - p.level).fold(f64::NEG_INFINITY, f64::max),
        ),
        ExtremumKind::Low => (
            side.iter().all(|p| if strict { p.level > point.level } else { p.level >= point.level }),
            side.iter().map(|p| p.level - point.level).fold(f64::NEG_INFINITY, f64::max),
        ),
    };
    beyond && far >= prominence
}

/// First pass: every sample that qualifies as a turning point on its own.
pub fn find_candidates(records: &[AlignedRecord], config: &CycleConfig) -> Vec<Extremum> {
    let points = defined_points(records);
    let window = config.window();
    let mut candidates = Vec::new();

    for (k, point) in points.iter().enumerate() {
        let lo = points.partition_point(|p| p.ts < point.ts - window);
        let hi = points.partition_point(|p| p.ts <= point.ts + window);
        let left = &points[lo..k];
        let right = &points[k + 1..hi];

        let is_endpoint = k == 0 || k + 1 == points.len();
        let usable = match (left.is_empty(), right.is_empty()) {
            (false, false) => true,
            (true, true) => false,
            // One-sided neighbourhood: only at the true ends, and only if allowed
            _ => is_endpoint && config.endpoint_extrema,
        };
        if !usable {
            continue;
        }

        for kind in [ExtremumKind::High, ExtremumKind::Low] {
            let left_ok = left.is_empty() || dominates(kind, point, left, true, config.prominence_m);
            let right_ok =
                right.is_empty() || dominates(kind, point, right, false, config.prominence_m);
            if left_ok && right_ok {
                candidates.push(Extremum {
                    kind,
                    timestamp: point.ts,
                    value: point.level,
                    index: point.index,
                });
            }
        }
    }
    candidates
}

/// Second pass: enforce separation and alternation, first come first served.
pub fn filter_candidates(candidates: &[Extremum], config: &CycleConfig) -> (Vec<Extremum>, usize) {
    let min_separation = config.min_separation();
    let mut accepted: Vec<Extremum> = Vec::new();
    let mut rejected = 0usize;

    for candidate in candidates {
        let keep = match accepted.last() {
            None => true,
            Some(last) => {
                candidate.kind != last.kind && candidate.timestamp - last.timestamp >= min_separation
            }
        };
        if keep {
            accepted.push(*candidate);
        } else {
            rejected += 1;
            log::debug!(
                "Rejected {} water candidate at {} ({:.3} m)",
                candidate.kind.as_str(),
                candidate.timestamp,
                candidate.value
            );
        }
    }
    (accepted, rejected)
}

/// Find turning points and resolve the cycles between them.
pub fn segment(records: &[AlignedRecord], config: &CycleConfig) -> Segmentation {
    let candidates = find_candidates(records, config);
    let (extrema, rejected_candidates) = filter_candidates(&candidates, config);
    let mut segmentation = Segmentation {
        extrema,
        rejected_candidates,
        ..Default::default()
    };

    if segmentation.is_unsegmentable() {
        if let (Some(first), Some(last)) = (records.first(), records.last()) {
            let exclusion = Exclusion::UnsegmentableWindow {
                from: first.timestamp,
                to: last.timestamp,
                reason: format!(
                    "found {} turning point(s), need at least 2",
                    segmentation.extrema.len()
                ),
            };
            log::warn!("{exclusion}");
            segmentation.exclusions.push(exclusion);
        }
        return segmentation;
    }

    let max_cycle = config.max_cycle();
    for (k, pair) in segmentation.extrema.windows(2).enumerate() {
        let (start, end) = (pair[0], pair[1]);
        let outage = records[start.index..end.index]
            .iter()
            .any(|r| r.level_source == LevelSource::Missing);

        let reason = if end.timestamp - start.timestamp > max_cycle {
            Some(format!(
                "{} minutes between turning points exceeds {}",
                (end.timestamp - start.timestamp).num_minutes(),
                config.max_cycle_minutes
            ))
        } else if outage {
            Some("sensor outage between turning points".to_string())
        } else {
            None
        };

        match reason {
            Some(reason) => {
                let exclusion = Exclusion::UnsegmentableWindow {
                    from: start.timestamp,
                    to: end.timestamp,
                    reason,
                };
                log::warn!("{exclusion}");
                segmentation.exclusions.push(exclusion);
            }
            None => segmentation.cycles.push(TidalCycle {
                cycle_id: k as u32,
                start,
                end,
            }),
        }
    }

    log::info!(
        "Segmented {} turning points into {} cycles ({} candidates rejected, {} windows excluded)",
        segmentation.extrema.len(),
        segmentation.cycles.len(),
        segmentation.rejected_candidates,
        segmentation.exclusions.len()
    );
    segmentation
}

/// Stamp `cycle_id` on every record inside a resolved cycle.
pub fn assign(records: &mut [AlignedRecord], cycles: &[TidalCycle]) {
    for cycle in cycles {
        for record in &mut records[cycle.start.index..cycle.end.index] {
            record.cycle_id = Some(cycle.cycle_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use std::f64::consts::PI;

    fn origin() -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 6, 16)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    /// Records every `step` minutes from `from_min` to `to_min` following `f(minutes)`.
    fn series(from_min: i64, to_min: i64, step: i64, f: impl Fn(f64) -> f64) -> Vec<AlignedRecord> {
        (0..)
            .map(|i| from_min + i * step)
            .take_while(|m| *m <= to_min)
            .map(|m| {
                AlignedRecord::new(
                    origin() + Duration::minutes(m),
                    Some(f(m as f64)),
                    LevelSource::Observed,
                    None,
                )
            })
            .collect()
    }

    /// Low at t=0 (0 m), high at t=6h (2 m).
    fn half_cycle(minutes: f64) -> f64 {
        1.0 - (PI * minutes / 360.0).cos()
    }

    #[test]
    fn two_extremum_series_gives_one_six_hour_cycle() {
        let records = series(-60, 420, 10, half_cycle);
        let seg = segment(&records, &CycleConfig::default());

        assert_eq!(seg.extrema.len(), 2);
        assert_eq!(seg.extrema[0].kind, ExtremumKind::Low);
        assert_eq!(seg.extrema[0].timestamp, origin());
        assert_eq!(seg.extrema[1].kind, ExtremumKind::High);
        assert_eq!(seg.cycles.len(), 1);
        assert_eq!(seg.cycles[0].duration(), Duration::hours(6));
        assert!(seg.exclusions.is_empty());
    }

    #[test]
    fn endpoints_need_opt_in() {
        let records = series(0, 360, 10, half_cycle);
        let seg = segment(&records, &CycleConfig::default());
        assert!(seg.is_unsegmentable());
        assert_eq!(seg.exclusions.len(), 1);

        let config = CycleConfig {
            endpoint_extrema: true,
            ..Default::default()
        };
        let seg = segment(&records, &config);
        assert_eq!(seg.cycles.len(), 1);
        assert_eq!(seg.cycles[0].duration(), Duration::hours(6));
    }

    #[test]
    fn small_wiggles_are_not_turning_points() {
        // Semidiurnal tide plus a 3 cm, 1-hour ripple
        let records = series(0, 25 * 60, 10, |m| {
            1.5 * (2.0 * PI * m / 745.0).sin() + 0.03 * (2.0 * PI * m / 60.0).sin()
        });
        let seg = segment(&records, &CycleConfig::default());

        // Turning points every ~6.2 h, alternating
        assert!(seg.extrema.len() >= 3);
        for pair in seg.extrema.windows(2) {
            assert_ne!(pair[0].kind, pair[1].kind);
            let gap = pair[1].timestamp - pair[0].timestamp;
            assert!(gap >= Duration::hours(5) && gap <= Duration::hours(7), "gap {gap}");
        }
        assert_eq!(seg.cycles.len(), seg.extrema.len() - 1);
    }

    #[test]
    fn flat_series_is_unsegmentable() {
        let records = series(0, 600, 30, |_| 1.0);
        let seg = segment(&records, &CycleConfig::default());
        assert!(seg.extrema.is_empty());
        assert!(seg.cycles.is_empty());
        assert!(matches!(
            seg.exclusions.as_slice(),
            [Exclusion::UnsegmentableWindow { .. }]
        ));
    }

    #[test]
    fn filter_keeps_first_and_enforces_alternation() {
        let at = |h: i64, kind, value| Extremum {
            kind,
            timestamp: origin() + Duration::hours(h),
            value,
            index: h as usize,
        };
        let candidates = vec![
            at(0, ExtremumKind::Low, 0.0),
            at(1, ExtremumKind::High, 0.5), // too close
            at(5, ExtremumKind::Low, -0.1), // same kind as last accepted
            at(6, ExtremumKind::High, 2.0),
            at(12, ExtremumKind::Low, 0.1),
        ];
        let (accepted, rejected) = filter_candidates(&candidates, &CycleConfig::default());
        assert_eq!(rejected, 2);
        let hours: Vec<i64> = accepted
            .iter()
            .map(|e| (e.timestamp - origin()).num_hours())
            .collect();
        assert_eq!(hours, vec![0, 6, 12]);
    }

    #[test]
    fn overlong_and_outage_cycles_are_excluded() {
        let mut records = series(0, 36 * 60, 30, |m| (2.0 * PI * m / 745.0).sin());
        // Knock out two hours in the middle of the second half-cycle
        for r in records.iter_mut().filter(|r| {
            let m = (r.timestamp - origin()).num_minutes();
            (480..=600).contains(&m)
        }) {
            r.water_level = None;
            r.level_source = LevelSource::Missing;
        }
        let seg = segment(&records, &CycleConfig::default());
        assert!(seg
            .exclusions
            .iter()
            .any(|e| matches!(e, Exclusion::UnsegmentableWindow { reason, .. } if reason.contains("outage"))));
        assert!(seg.cycles.iter().all(|c| {
            records[c.start.index..c.end.index]
                .iter()
                .all(|r| r.level_source != LevelSource::Missing)
        }));

        let config = CycleConfig {
            max_cycle_minutes: 240,
            ..Default::default()
        };
        let seg = segment(&records, &config);
        assert!(seg.cycles.is_empty());
        assert!(!seg.exclusions.is_empty());
    }

    #[test]
    fn assign_stamps_half_open_ranges() {
        let mut records = series(-60, 420, 10, half_cycle);
        let seg = segment(&records, &CycleConfig::default());
        assign(&mut records, &seg.cycles);

        let start = seg.cycles[0].start.index;
        let end = seg.cycles[0].end.index;
        assert_eq!(records[start].cycle_id, Some(0));
        assert_eq!(records[end - 1].cycle_id, Some(0));
        assert_eq!(records[end].cycle_id, None);
        assert_eq!(records[0].cycle_id, None);
    }
}
