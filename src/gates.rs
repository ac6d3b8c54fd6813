//! Tide-gate opening categories.
//!
//! Both gates are binned on right-closed intervals of their opening angle.
//! The combined configuration is the most open of the two gates.

use crate::GateOpening;
use serde::{Deserialize, Serialize};
use std::fmt;

/// (upper bound, category) pairs for the muted tidal regulator, lower bound -1.
const MTR_BINS: (f64, [(f64, GateCategory); 4]) = (
    -1.0,
    [
        (5.0, GateCategory::Closed),
        (39.0, GateCategory::PartiallyOpen),
        (63.0, GateCategory::Open),
        (88.0, GateCategory::WideOpen),
    ],
);

/// Same for the top-hinge gate, lower bound -2.
const HINGE_BINS: (f64, [(f64, GateCategory); 4]) = (
    -2.0,
    [
        (4.0, GateCategory::Closed),
        (20.0, GateCategory::PartiallyOpen),
        (35.0, GateCategory::Open),
        (42.0, GateCategory::WideOpen),
    ],
);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCategory {
    Closed,
    PartiallyOpen,
    Open,
    WideOpen,
    /// At least one gate angle unknown or out of range
    Other,
}

impl GateCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            GateCategory::Closed => "closed",
            GateCategory::PartiallyOpen => "partially_open",
            GateCategory::Open => "open",
            GateCategory::WideOpen => "wide_open",
            GateCategory::Other => "other",
        }
    }
}

impl fmt::Display for GateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn bin(angle: f64, bins: &(f64, [(f64, GateCategory); 4])) -> Option<GateCategory> {
    let (lower, uppers) = bins;
    if !angle.is_finite() || angle <= *lower {
        return None;
    }
    uppers
        .iter()
        .find(|(upper, _)| angle <= *upper)
        .map(|(_, category)| *category)
}

pub fn mtr_category(angle_deg: f64) -> Option<GateCategory> {
    bin(angle_deg, &MTR_BINS)
}

pub fn hinge_category(angle_deg: f64) -> Option<GateCategory> {
    bin(angle_deg, &HINGE_BINS)
}

/// Combined configuration of both gates. `Other` when either angle is
/// unknown or outside its bins.
pub fn combined(gate: Option<&GateOpening>) -> GateCategory {
    let Some(gate) = gate else {
        return GateCategory::Other;
    };
    match (
        gate.mtr_deg.and_then(mtr_category),
        gate.top_hinge_deg.and_then(hinge_category),
    ) {
        (Some(mtr), Some(hinge)) => mtr.max(hinge),
        _ => GateCategory::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(mtr: f64, hinge: f64) -> GateOpening {
        GateOpening {
            mtr_deg: Some(mtr),
            top_hinge_deg: Some(hinge),
        }
    }

    #[test]
    fn mtr_bins_are_right_closed() {
        assert_eq!(mtr_category(-1.0), None);
        assert_eq!(mtr_category(0.0), Some(GateCategory::Closed));
        assert_eq!(mtr_category(5.0), Some(GateCategory::Closed));
        assert_eq!(mtr_category(5.1), Some(GateCategory::PartiallyOpen));
        assert_eq!(mtr_category(39.0), Some(GateCategory::PartiallyOpen));
        assert_eq!(mtr_category(63.0), Some(GateCategory::Open));
        assert_eq!(mtr_category(88.0), Some(GateCategory::WideOpen));
        assert_eq!(mtr_category(88.5), None);
    }

    #[test]
    fn hinge_bins() {
        assert_eq!(hinge_category(-1.5), Some(GateCategory::Closed));
        assert_eq!(hinge_category(4.5), Some(GateCategory::PartiallyOpen));
        assert_eq!(hinge_category(35.0), Some(GateCategory::Open));
        assert_eq!(hinge_category(40.0), Some(GateCategory::WideOpen));
        assert_eq!(hinge_category(f64::NAN), None);
    }

    #[test]
    fn combined_takes_the_most_open_gate() {
        assert_eq!(combined(Some(&gate(0.0, 0.0))), GateCategory::Closed);
        assert_eq!(combined(Some(&gate(10.0, 0.0))), GateCategory::PartiallyOpen);
        assert_eq!(combined(Some(&gate(0.0, 25.0))), GateCategory::Open);
        assert_eq!(combined(Some(&gate(70.0, 25.0))), GateCategory::WideOpen);
    }

    #[test]
    fn unknown_angles_are_other() {
        assert_eq!(combined(None), GateCategory::Other);
        let partial = GateOpening {
            mtr_deg: Some(10.0),
            top_hinge_deg: None,
        };
        assert_eq!(combined(Some(&partial)), GateCategory::Other);
        assert_eq!(combined(Some(&gate(120.0, 0.0))), GateCategory::Other);
    }
}
