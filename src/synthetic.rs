//! # Synthetic Tide Model
//!
//! A two-constituent harmonic water level used for demo runs and tests when no
//! field data is at hand.
//!
//! ## Model Characteristics
//! - **M2** (principal lunar): 12.42 h period, 1.20 m amplitude
//! - **S2** (principal solar): 12.00 h period, 0.20 m amplitude
//! - **Mean level**: 2.0 m above the sensor datum
//!
//! The two constituents beat against each other over a spring-neap period of
//! about 14.8 days, so successive cycles differ slightly in length and range.
//! The series starts at low water.
//!
//! The demo bundle adds a diurnal air temperature and tide-gate angles that
//! open as the water drops. It has two cameras, one with a failure interval
//! and one whose status log stops halfway, and detections that lean toward
//! particular tidal states.

use crate::input::InputBundle;
use crate::{CameraStatusInterval, DetectionEvent, GateOpening, SensorReading, Timestamp};
use chrono::Duration;
use std::f64::consts::TAU;

pub const P_M2_HRS: f64 = 12.42;
pub const P_S2_HRS: f64 = 12.00;

const A_M2_M: f64 = 1.20;
const A_S2_M: f64 = 0.20;
const MEAN_LEVEL_M: f64 = 2.0;

const MEAN_AIR_TEMP_C: f64 = 14.0;
const AIR_TEMP_SWING_C: f64 = 5.0;

/// Water level `hours` after the start of the series.
pub fn level_at(hours: f64) -> f64 {
    MEAN_LEVEL_M - A_M2_M * (TAU * hours / P_M2_HRS).cos() - A_S2_M * (TAU * hours / P_S2_HRS).cos()
}

/// Rate of change in m/hr, analytic derivative of [`level_at`].
pub fn rate_at(hours: f64) -> f64 {
    A_M2_M * TAU / P_M2_HRS * (TAU * hours / P_M2_HRS).sin()
        + A_S2_M * TAU / P_S2_HRS * (TAU * hours / P_S2_HRS).sin()
}

/// Diurnal air temperature, warmest mid-afternoon when the series starts at midnight.
pub fn air_temp_at(hours: f64) -> f64 {
    MEAN_AIR_TEMP_C + AIR_TEMP_SWING_C * (TAU * (hours - 9.0) / 24.0).sin()
}

/// Readings every `step_minutes` over `hours`, both ends included.
pub fn harmonic_series(start: Timestamp, hours: i64, step_minutes: i64) -> Vec<SensorReading> {
    let step = step_minutes.max(1);
    let mut readings = Vec::with_capacity((hours * 60 / step + 1) as usize);
    for m in (0..=hours * 60).step_by(step as usize) {
        let h = m as f64 / 60.0;
        readings.push(SensorReading::new(start + Duration::minutes(m), level_at(h)));
    }
    readings
}

/// Gate angles for a level: both gates close at high water and open as it drops.
fn gate_for(level: f64) -> GateOpening {
    let drawdown = ((MEAN_LEVEL_M + A_M2_M - level) / (2.0 * A_M2_M)).clamp(0.0, 1.0);
    GateOpening {
        mtr_deg: Some(80.0 * drawdown),
        top_hinge_deg: Some(40.0 * drawdown),
    }
}

/// A deterministic demo bundle covering `days` days from `start`.
pub fn demo_bundle(start: Timestamp, days: i64) -> InputBundle {
    let hours = days.max(1) * 24;
    let end = start + Duration::hours(hours);

    let readings: Vec<SensorReading> = harmonic_series(start, hours, 10)
        .into_iter()
        .map(|r| {
            let hours = (r.timestamp - start).num_seconds() as f64 / 3600.0;
            let r = r.with_air_temp(air_temp_at(hours));
            let gate = r.water_level.map(gate_for);
            match gate {
                Some(gate) => r.with_gate(gate),
                None => r,
            }
        })
        .collect();

    // CAM1 fails for six hours from hour 30; CAM2 logs status for the first half only
    let failure_start = (start + Duration::hours(30)).min(end);
    let failure_end = (start + Duration::hours(36)).min(end);
    let mut camera_status = Vec::new();
    for (from, to, active) in [
        (start, failure_start, true),
        (failure_start, failure_end, false),
        (failure_end, end, true),
    ] {
        if from < to {
            camera_status.push(CameraStatusInterval {
                camera_id: "CAM1".to_string(),
                start: from,
                end: to,
                active,
            });
        }
    }
    camera_status.push(CameraStatusInterval {
        camera_id: "CAM2".to_string(),
        start,
        end: start + Duration::hours(hours / 2),
        active: true,
    });

    let mut detections = Vec::new();
    for k in 0..(hours * 60 / 45) {
        // Off the resampling grid on purpose
        let minutes = 45 * k + 7;
        let ts = start + Duration::minutes(minutes);
        let rate = rate_at(minutes as f64 / 60.0);
        if rate < -0.1 && k % 2 == 0 {
            detections.push(DetectionEvent::new(ts, "Ardea herodias", "CAM1"));
        } else if rate > 0.1 && k % 3 == 0 {
            let mut event = DetectionEvent::new(ts, "Anas platyrhynchos", "CAM2");
            event.count = 2;
            detections.push(event);
        } else if k % 11 == 0 {
            detections.push(DetectionEvent::new(ts, "Procyon lotor", "CAM1"));
        }
    }

    log::info!(
        "Synthetic bundle: {} readings, {} detections, {} status intervals over {} days",
        readings.len(),
        detections.len(),
        camera_status.len(),
        days.max(1)
    );

    InputBundle {
        readings,
        detections,
        camera_status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposure::ExposureIndex;
    use chrono::NaiveDate;

    fn start() -> Timestamp {
        NaiveDate::from_ymd_opt(2024, 6, 16)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn series_starts_at_low_water_and_stays_in_range() {
        let series = harmonic_series(start(), 48, 10);
        assert_eq!(series.len(), 48 * 6 + 1);
        assert_eq!(series[0].timestamp, start());
        assert!((series[0].water_level.unwrap() - (MEAN_LEVEL_M - A_M2_M - A_S2_M)).abs() < 1e-9);

        let low = MEAN_LEVEL_M - A_M2_M - A_S2_M - 1e-9;
        let high = MEAN_LEVEL_M + A_M2_M + A_S2_M + 1e-9;
        assert!(series
            .iter()
            .all(|r| (low..=high).contains(&r.water_level.unwrap())));
    }

    #[test]
    fn level_changes_over_half_a_period() {
        let diff = (level_at(P_M2_HRS / 2.0) - level_at(0.0)).abs();
        assert!(diff > 2.0, "half-period swing was {diff}");
        assert!(rate_at(3.0) > 0.0);
        assert!(rate_at(9.0) < 0.0);
    }

    #[test]
    fn demo_bundle_is_valid_input() {
        let bundle = demo_bundle(start(), 3);
        assert!(!bundle.detections.is_empty());
        assert!(bundle.readings.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(bundle.readings.iter().all(|r| r.gate.is_some()));
        let warmest = bundle
            .readings
            .iter()
            .filter_map(|r| r.air_temp_c)
            .fold(f64::MIN, f64::max);
        assert!((warmest - (MEAN_AIR_TEMP_C + AIR_TEMP_SWING_C)).abs() < 1e-9);
        assert!(ExposureIndex::build(&bundle.camera_status).is_ok());

        let inactive: Vec<_> = bundle.camera_status.iter().filter(|i| !i.active).collect();
        assert_eq!(inactive.len(), 1);
        assert_eq!(inactive[0].start, start() + Duration::hours(30));
    }

    #[test]
    fn short_demo_clips_the_failure_interval() {
        let bundle = demo_bundle(start(), 1);
        assert!(bundle.camera_status.iter().all(|i| i.start < i.end));
        assert!(bundle.camera_status.iter().all(|i| i.active));
    }
}
