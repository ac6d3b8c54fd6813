//! # Camera Exposure Windows
//!
//! Turns camera status intervals into a per-camera `camera_active` flag on
//! every axis point. A camera is active at `t` iff an interval marked active
//! for that camera covers `t` (intervals are half-open, `[start, end)`).
//! Exposure time is measured separately: each record gets the seconds its
//! camera was active within `[t, t + dwell)`, so a short interval between two
//! grid points still counts.
//!
//! Coverage gaps resolve to inactive: unknown coverage is treated as
//! non-exposure, never as a detection opportunity. Detections play no part
//! here. A camera that appears only in detections is listed with every flag
//! false, so its detections count toward activity but never toward efficiency.

use crate::error::InputError;
use crate::{AlignedRecord, CameraStatusInterval, DetectionEvent, Timestamp};
use chrono::Duration;
use std::collections::{BTreeMap, BTreeSet};

/// Status intervals indexed per camera, sorted by start.
#[derive(Clone, Debug, Default)]
pub struct ExposureIndex {
    cameras: BTreeMap<String, Vec<CameraStatusInterval>>,
}

impl ExposureIndex {
    /// Validate and index status intervals.
    ///
    /// # Errors
    /// [`InputError::InvalidInterval`] when an interval does not end after it
    /// starts, or overlaps another interval of the same camera.
    pub fn build(intervals: &[CameraStatusInterval]) -> Result<Self, InputError> {
        let mut cameras: BTreeMap<String, Vec<(usize, CameraStatusInterval)>> = BTreeMap::new();
        for (row, interval) in intervals.iter().enumerate() {
            if interval.end <= interval.start {
                return Err(InputError::InvalidInterval {
                    row,
                    camera_id: interval.camera_id.clone(),
                    reason: format!("end {} is not after start {}", interval.end, interval.start),
                });
            }
            cameras
                .entry(interval.camera_id.clone())
                .or_default()
                .push((row, interval.clone()));
        }

        let mut index = ExposureIndex::default();
        for (camera_id, mut list) in cameras {
            list.sort_by_key(|(_, i)| i.start);
            for pair in list.windows(2) {
                let ((_, a), (row, b)) = (&pair[0], &pair[1]);
                if b.start < a.end {
                    return Err(InputError::InvalidInterval {
                        row: *row,
                        camera_id: camera_id.clone(),
                        reason: format!("overlaps interval {} .. {}", a.start, a.end),
                    });
                }
            }
            index
                .cameras
                .insert(camera_id, list.into_iter().map(|(_, i)| i).collect());
        }
        Ok(index)
    }

    /// Cameras with status data.
    pub fn cameras(&self) -> impl Iterator<Item = &str> {
        self.cameras.keys().map(String::as_str)
    }

    /// Is `camera_id` known to be active at `ts`? Unknown coverage is `false`.
    pub fn is_active(&self, camera_id: &str, ts: Timestamp) -> bool {
        let Some(list) = self.cameras.get(camera_id) else {
            return false;
        };
        let pos = list.partition_point(|i| i.start <= ts);
        pos > 0 && {
            let interval = &list[pos - 1];
            ts < interval.end && interval.active
        }
    }

    /// Seconds `camera_id` was active within `[from, to)`.
    pub fn active_secs(&self, camera_id: &str, from: Timestamp, to: Timestamp) -> i64 {
        let Some(list) = self.cameras.get(camera_id) else {
            return 0;
        };
        // Non-overlapping and sorted by start, so ends are sorted too
        let first = list.partition_point(|i| i.end <= from);
        list[first..]
            .iter()
            .take_while(|i| i.start < to)
            .filter(|i| i.active)
            .map(|i| (i.end.min(to) - i.start.max(from)).num_seconds())
            .sum()
    }
}

/// Every camera id seen in status data or detections, sorted.
pub fn camera_ids(index: &ExposureIndex, events: &[DetectionEvent]) -> Vec<String> {
    let mut ids: BTreeSet<String> = index.cameras().map(str::to_string).collect();
    ids.extend(events.iter().map(|e| e.camera_id.clone()));
    ids.into_iter().collect()
}

/// Stamp per-camera status at each record and the active time over its dwell.
pub fn apply(records: &mut [AlignedRecord], index: &ExposureIndex, cameras: &[String]) {
    for record in records.iter_mut() {
        let from = record.timestamp;
        let to = from + Duration::seconds(record.dwell_secs);
        for camera in cameras {
            let active = index.is_active(camera, from);
            record.set_exposure(camera, active, index.active_secs(camera, from, to));
        }
    }

    let active_hours: f64 = records
        .iter()
        .flat_map(|r| cameras.iter().map(move |c| r.active_hours(c)))
        .sum();
    log::info!(
        "Exposure: {} cameras, {:.1} active camera-hours",
        cameras.len(),
        active_hours
    );
}
