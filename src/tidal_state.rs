//! # Tidal State Classification
//!
//! Labels every record with a defined water level as rising, falling or slack.
//!
//! The rate of change is the level difference against the previous defined
//! sample divided by the hours between the two measurements. A level snapped
//! from a nearby reading counts as measured at that reading's time, so two
//! records sharing one reading never produce a spurious zero rate. A single threshold around zero would
//! flap between states on sensor noise near each turning point, so the
//! classifier uses a hysteresis band instead:
//!
//! ```text
//!   rate  >  +outer           slack   -> rising
//!   rate  <  -outer           slack   -> falling
//!   rate  <  +inner           rising  -> slack
//!   rate  >  -inner           falling -> slack
//! ```
//!
//! The classification is a fold over the ordered records carrying the current
//! regime; each step is a pure function of (previous regime, rate, thresholds).
//! A missing sample breaks the run: the next contiguous run starts fresh.

use crate::config::TidalStateConfig;
use crate::{AlignedRecord, SlackLevel, TidalState};

/// Hysteresis thresholds in metres per hour.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hysteresis {
    pub outer: f64,
    pub inner: f64,
}

impl From<&TidalStateConfig> for Hysteresis {
    fn from(config: &TidalStateConfig) -> Self {
        Self {
            outer: config.outer_threshold_m_per_hr,
            inner: config.inner_threshold_m_per_hr,
        }
    }
}

/// One step of the regime fold.
pub fn step(previous: TidalState, rate: f64, band: Hysteresis) -> TidalState {
    match previous {
        TidalState::Slack => {
            if rate > band.outer {
                TidalState::Rising
            } else if rate < -band.outer {
                TidalState::Falling
            } else {
                TidalState::Slack
            }
        }
        TidalState::Rising => {
            if rate < -band.outer {
                TidalState::Falling
            } else if rate < band.inner {
                TidalState::Slack
            } else {
                TidalState::Rising
            }
        }
        TidalState::Falling => {
            if rate > band.outer {
                TidalState::Rising
            } else if rate > -band.inner {
                TidalState::Slack
            } else {
                TidalState::Falling
            }
        }
    }
}

/// Classify a rate sequence starting from slack.
pub fn classify_rates(rates: &[f64], band: Hysteresis) -> Vec<TidalState> {
    rates
        .iter()
        .scan(TidalState::Slack, |regime, &rate| {
            *regime = step(*regime, rate, band);
            Some(*regime)
        })
        .collect()
}

/// Rate from `a` to `b` over the time between their measurements. `None`
/// when both levels come from the same reading.
fn rate_between(a: &AlignedRecord, b: &AlignedRecord) -> Option<f64> {
    let seconds = (b.level_time? - a.level_time?).num_seconds();
    match (a.water_level, b.water_level) {
        (Some(la), Some(lb)) if seconds > 0 => Some((lb - la) * 3600.0 / seconds as f64),
        _ => None,
    }
}

/// Per-record rates in m/hr, against the closest earlier record measured at a
/// different time. Records before any such record look ahead instead; an
/// isolated sample gets zero.
fn run_rates(records: &[AlignedRecord], run: &[usize]) -> Vec<f64> {
    run.iter()
        .enumerate()
        .map(|(k, &i)| {
            let here = &records[i];
            run[..k]
                .iter()
                .rev()
                .find_map(|&j| rate_between(&records[j], here))
                .or_else(|| {
                    run[k + 1..]
                        .iter()
                        .find_map(|&j| rate_between(here, &records[j]))
                })
                .unwrap_or(0.0)
        })
        .collect()
}

/// Contiguous runs of records with a defined level.
fn defined_runs(records: &[AlignedRecord]) -> Vec<Vec<usize>> {
    let mut runs: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    for (i, record) in records.iter().enumerate() {
        if record.water_level.is_some() {
            current.push(i);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

/// Fill `rate_m_per_hr`, `tidal_state` and `slack_level` on every record with
/// a defined water level. Records without one keep all three undefined.
pub fn classify(records: &mut [AlignedRecord], config: &TidalStateConfig) {
    let band = Hysteresis::from(config);

    for run in defined_runs(records) {
        let rates = run_rates(records, &run);
        let states = classify_rates(&rates, band);
        for ((&i, rate), state) in run.iter().zip(rates).zip(states) {
            records[i].rate_m_per_hr = Some(rate);
            records[i].tidal_state = Some(state);
        }
    }

    if let Some(median) = median_level(records) {
        for record in records.iter_mut() {
            record.slack_level = match (record.tidal_state, record.water_level) {
                (Some(TidalState::Slack), Some(level)) if level >= median => Some(SlackLevel::High),
                (Some(TidalState::Slack), Some(_)) => Some(SlackLevel::Low),
                _ => None,
            };
        }
    }

    let count = |s: TidalState| {
        records
            .iter()
            .filter(|r| r.tidal_state == Some(s))
            .count()
    };
    log::info!(
        "Tidal state: {} rising, {} falling, {} slack",
        count(TidalState::Rising),
        count(TidalState::Falling),
        count(TidalState::Slack)
    );
}

/// Median of defined water levels.
pub fn median_level(records: &[AlignedRecord]) -> Option<f64> {
    let mut levels: Vec<f64> = records.iter().filter_map(|r| r.water_level).collect();
    if levels.is_empty() {
        return None;
    }
    levels.sort_by(|a, b| a.total_cmp(b));
    let mid = levels.len() / 2;
    Some(if levels.len() % 2 == 0 {
        (levels[mid - 1] + levels[mid]) / 2.0
    } else {
        levels[mid]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LevelSource, Timestamp};
    use chrono::{Duration, NaiveDate};

    const BAND: Hysteresis = Hysteresis {
        outer: 0.05,
        inner: 0.02,
    };

    fn start() -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 6, 16)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    /// Records every 30 minutes with the given levels.
    fn records(levels: &[Option<f64>]) -> Vec<AlignedRecord> {
        levels
            .iter()
            .enumerate()
            .map(|(i, level)| {
                let source = if level.is_some() {
                    LevelSource::Observed
                } else {
                    LevelSource::Missing
                };
                AlignedRecord::new(start() + Duration::minutes(30 * i as i64), *level, source, None)
            })
            .collect()
    }

    fn config() -> TidalStateConfig {
        TidalStateConfig {
            outer_threshold_m_per_hr: BAND.outer,
            inner_threshold_m_per_hr: BAND.inner,
        }
    }

    #[test]
    fn chatter_inside_inner_band_stays_slack() {
        // +/- 0.015 m/hr alternating, all inside the inner band
        let rates: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 0.015 } else { -0.015 }).collect();
        let states = classify_rates(&rates, BAND);
        assert!(states.iter().all(|s| *s == TidalState::Slack));
    }

    #[test]
    fn chatter_between_bands_does_not_leave_slack() {
        // Between inner and outer: never enough to leave slack
        let rates = vec![0.04, -0.04, 0.045, -0.03, 0.049];
        let states = classify_rates(&rates, BAND);
        assert!(states.iter().all(|s| *s == TidalState::Slack));
    }

    #[test]
    fn leaving_slack_needs_outer_returning_needs_inner() {
        let rates = vec![0.01, 0.06, 0.04, 0.03, 0.021, 0.019, 0.04, 0.06];
        let states = classify_rates(&rates, BAND);
        use TidalState::*;
        assert_eq!(
            states,
            vec![Slack, Rising, Rising, Rising, Rising, Slack, Slack, Rising]
        );
    }

    #[test]
    fn falling_mirrors_rising() {
        let rates = vec![-0.06, -0.03, -0.01, -0.04, -0.051];
        use TidalState::*;
        assert_eq!(
            classify_rates(&rates, BAND),
            vec![Falling, Falling, Slack, Slack, Falling]
        );
    }

    #[test]
    fn direct_reversal_skips_slack() {
        let rates = vec![0.1, -0.1];
        assert_eq!(
            classify_rates(&rates, BAND),
            vec![TidalState::Rising, TidalState::Falling]
        );
    }

    #[test]
    fn first_record_uses_look_ahead_rate() {
        // 0.1 m per 30 minutes = 0.2 m/hr
        let mut recs = records(&[Some(1.0), Some(1.1), Some(1.2)]);
        classify(&mut recs, &config());
        assert_eq!(recs[0].tidal_state, Some(TidalState::Rising));
        assert!((recs[0].rate_m_per_hr.unwrap() - 0.2).abs() < 1e-9);
        assert!(recs.iter().all(|r| r.tidal_state == Some(TidalState::Rising)));
    }

    #[test]
    fn shared_reading_keeps_the_flow_rate() {
        // 00:30 copies the 00:30 reading into a point at 00:32
        let mut recs = records(&[Some(1.0), Some(1.3), Some(1.6)]);
        let mut snapped = recs[1].clone();
        snapped.timestamp = start() + Duration::minutes(32);
        recs.insert(2, snapped);
        classify(&mut recs, &config());

        for r in &recs {
            assert_eq!(r.tidal_state, Some(TidalState::Rising));
            assert!((r.rate_m_per_hr.unwrap() - 0.6).abs() < 1e-9);
        }
    }

    #[test]
    fn missing_levels_stay_unclassified_and_split_runs() {
        let mut recs = records(&[Some(1.0), Some(1.2), None, None, Some(0.9), Some(0.6)]);
        classify(&mut recs, &config());
        assert_eq!(recs[2].tidal_state, None);
        assert_eq!(recs[3].rate_m_per_hr, None);
        // The run after the gap starts fresh with look-ahead
        assert_eq!(recs[4].tidal_state, Some(TidalState::Falling));
        assert!((recs[4].rate_m_per_hr.unwrap() + 0.6).abs() < 1e-9);
    }

    #[test]
    fn slack_split_by_median_level() {
        let mut recs = records(&[Some(2.0), Some(2.0), Some(2.0), Some(0.5), Some(0.5), Some(0.5)]);
        classify(&mut recs, &config());
        assert_eq!(recs[0].tidal_state, Some(TidalState::Slack));
        assert_eq!(recs[0].slack_level, Some(SlackLevel::High));
        assert_eq!(recs[5].tidal_state, Some(TidalState::Slack));
        assert_eq!(recs[5].slack_level, Some(SlackLevel::Low));
        // The drop itself is falling, not slack
        assert_eq!(recs[3].tidal_state, Some(TidalState::Falling));
        assert_eq!(recs[3].slack_level, None);
    }

    #[test]
    fn median_of_even_count() {
        let recs = records(&[Some(1.0), Some(3.0), None, Some(2.0), Some(4.0)]);
        assert_eq!(median_level(&recs), Some(2.5));
    }
}
