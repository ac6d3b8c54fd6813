//! # Continuous Tidal Phase
//!
//! Maps each record inside a resolved cycle to its position in that cycle:
//!
//! ```text
//! phase = (t - cycle.start) / (cycle.end - cycle.start)      in [0, 1)
//! ```
//!
//! Each cycle is its own unit, so a 5.8 h flood and a 6.9 h flood on another
//! day line up on the same axis. Records outside every resolved cycle (series
//! edges, unsegmentable windows) keep an undefined phase; they are never
//! defaulted to zero, which would pile edge records into a false
//! "start of cycle" peak.
//!
//! The tidal angle folds flood and ebb into one low-referenced coordinate:
//! flood maps to [0, 0.5), ebb to [0.5, 1), so 0 is low water and 0.5 high.

use crate::{AlignedRecord, CycleKind, TidalCycle, Timestamp};
use std::collections::HashMap;

/// Position of `ts` in `cycle`, or `None` outside it.
pub fn phase_in(cycle: &TidalCycle, ts: Timestamp) -> Option<f64> {
    if !cycle.contains(ts) {
        return None;
    }
    let span = cycle.duration().num_milliseconds() as f64;
    let offset = (ts - cycle.start.timestamp).num_milliseconds() as f64;
    // Containment is half-open, so this stays below 1.0
    Some((offset / span).clamp(0.0, 1.0 - f64::EPSILON))
}

/// Low-referenced position over a flood + ebb pair.
pub fn tidal_angle(kind: CycleKind, phase: f64) -> f64 {
    match kind {
        CycleKind::Flood => phase / 2.0,
        CycleKind::Ebb => 0.5 + phase / 2.0,
    }
}

/// Phase in radians, for circular statistics downstream.
pub fn to_radians(phase: f64) -> f64 {
    phase * std::f64::consts::TAU
}

/// Equal-width bin index for a phase in [0, 1).
pub fn phase_bin(phase: f64, bins: usize) -> usize {
    let bins = bins.max(1);
    ((phase * bins as f64).floor() as usize).min(bins - 1)
}

/// Human-readable bin label, e.g. `0.25-0.33`.
pub fn bin_label(bin: usize, bins: usize) -> String {
    let bins = bins.max(1) as f64;
    format!("{:.2}-{:.2}", bin as f64 / bins, (bin + 1) as f64 / bins)
}

/// Fill `phase` and `tidal_angle` for every record carrying a cycle id.
/// Returns the number of records left without a phase.
pub fn map(records: &mut [AlignedRecord], cycles: &[TidalCycle]) -> usize {
    let by_id: HashMap<u32, &TidalCycle> = cycles.iter().map(|c| (c.cycle_id, c)).collect();

    let mut undefined = 0usize;
    for record in records.iter_mut() {
        let cycle = record.cycle_id.and_then(|id| by_id.get(&id));
        let phase = cycle.and_then(|c| phase_in(c, record.timestamp));
        record.phase = phase;
        record.tidal_angle = match (cycle, phase) {
            (Some(c), Some(p)) => Some(tidal_angle(c.kind(), p)),
            _ => None,
        };
        if phase.is_none() {
            undefined += 1;
        }
    }

    log::info!(
        "Mapped phase for {} records, {} left undefined",
        records.len() - undefined,
        undefined
    );
    undefined
}
