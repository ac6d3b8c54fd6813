//! Tabular and JSON artifacts.
//!
//! Undefined values are written as empty cells, never as zero.

use crate::error::Result;
use crate::normalize::{GroupBy, Grouping, SpeciesPreference};
use crate::pipeline::AlignedDataset;
use crate::{AlignedRecord, Timestamp};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Species listed in the preference table.
pub const TOP_SPECIES: usize = 5;

/// Summary tables written next to the aligned dataset.
pub const SUMMARY_TABLES: [(&str, &[GroupBy]); 6] = [
    ("by_tidal_state.csv", &[GroupBy::TidalState]),
    ("by_phase_bin.csv", &[GroupBy::PhaseBin]),
    ("by_gate.csv", &[GroupBy::GateConfiguration]),
    ("by_temperature.csv", &[GroupBy::Temperature]),
    ("by_hour.csv", &[GroupBy::Hour]),
    ("by_species_tidal_state.csv", &[GroupBy::Species, GroupBy::TidalState]),
];

fn timestamp(ts: Timestamp) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn number(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.4}")).unwrap_or_default()
}

fn text<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// One row per aligned record, one `active_<camera>` column per camera.
pub fn write_records<W: Write>(writer: W, records: &[AlignedRecord], cameras: &[String]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header: Vec<String> = [
        "timestamp",
        "water_level",
        "level_source",
        "synthetic",
        "mtr_deg",
        "top_hinge_deg",
        "air_temp_c",
        "rate_m_per_hr",
        "tidal_state",
        "slack_level",
        "cycle_id",
        "phase",
        "tidal_angle",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    header.extend(cameras.iter().map(|c| format!("active_{c}")));
    header.extend(["detections", "individuals", "species"].map(String::from));
    wtr.write_record(&header)?;

    for r in records {
        let mut row = vec![
            timestamp(r.timestamp),
            number(r.water_level),
            r.level_source.as_str().to_string(),
            r.synthetic.to_string(),
            number(r.gate.and_then(|g| g.mtr_deg)),
            number(r.gate.and_then(|g| g.top_hinge_deg)),
            number(r.air_temp_c),
            number(r.rate_m_per_hr),
            text(r.tidal_state),
            text(r.slack_level.map(|s| match s {
                crate::SlackLevel::High => "high",
                crate::SlackLevel::Low => "low",
            })),
            text(r.cycle_id),
            number(r.phase),
            number(r.tidal_angle),
        ];
        row.extend(cameras.iter().map(|c| r.is_camera_active(c).to_string()));
        let individuals: u64 = r.detections.iter().map(|d| u64::from(d.count)).sum();
        let species: Vec<&str> = r.detections.iter().map(|d| d.species.as_str()).collect();
        row.push(r.detections.len().to_string());
        row.push(individuals.to_string());
        row.push(species.join(";"));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn write_grouping<W: Write>(writer: W, grouping: &Grouping) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header: Vec<&str> = grouping.dimensions.clone();
    header.extend([
        "records",
        "camera_hours",
        "active_hours",
        "detections",
        "individuals",
        "active_detections",
        "detection_rate",
        "active_fraction",
    ]);
    wtr.write_record(&header)?;

    for g in &grouping.groups {
        let mut row = g.key.clone();
        row.extend([
            g.records.to_string(),
            format!("{:.4}", g.camera_hours),
            format!("{:.4}", g.active_hours),
            g.detections.to_string(),
            g.individuals.to_string(),
            g.active_detections.to_string(),
            number(g.detection_rate),
            number(g.active_fraction),
        ]);
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn write_preferences<W: Write>(writer: W, preferences: &[SpeciesPreference]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "species",
        "tidal_state",
        "active_detections",
        "share_pct",
        "detection_rate",
    ])?;
    for p in preferences {
        wtr.write_record([
            p.species.clone(),
            p.tidal_state.clone(),
            p.active_detections.to_string(),
            number(p.share_pct),
            number(p.detection_rate),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<W: Write>(writer: W, dataset: &AlignedDataset) -> Result<()> {
    serde_json::to_writer_pretty(writer, dataset)?;
    Ok(())
}

/// Write every artifact into `dir`, creating it if needed. Returns the paths written.
pub fn write_artifacts(dir: &Path, dataset: &AlignedDataset, bins: usize) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    let path = dir.join("aligned.csv");
    write_records(File::create(&path)?, &dataset.records, &dataset.cameras)?;
    written.push(path);

    let path = dir.join("aligned.json");
    write_json(File::create(&path)?, dataset)?;
    written.push(path);

    let normalizer = dataset.normalizer(bins);
    for (name, dims) in SUMMARY_TABLES {
        let path = dir.join(name);
        write_grouping(File::create(&path)?, &normalizer.summarize(&dataset.records, dims))?;
        written.push(path);
    }

    let path = dir.join("species_preferences.csv");
    write_preferences(
        File::create(&path)?,
        &normalizer.species_preferences(&dataset.records, TOP_SPECIES),
    )?;
    written.push(path);

    log::info!("Wrote {} artifacts to {}", written.len(), dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DetectionEvent, LevelSource, TidalState};
    use chrono::NaiveDate;

    fn record() -> AlignedRecord {
        let ts = NaiveDate::from_ymd_opt(2024, 6, 16)
            .unwrap()
            .and_hms_opt(6, 30, 0)
            .unwrap();
        let mut r = AlignedRecord::new(ts, Some(1.25), LevelSource::Interpolated, None);
        r.tidal_state = Some(TidalState::Rising);
        r.dwell_secs = 1800;
        r.set_exposure("CAM1", true, 1800);
        r.detections.push(DetectionEvent::new(ts, "Mallard", "CAM1"));
        r
    }

    #[test]
    fn undefined_fields_are_empty_cells() {
        let mut buf = Vec::new();
        write_records(&mut buf, &[record()], &["CAM1".to_string()]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("timestamp,water_level,level_source"));
        assert!(header.contains("active_CAM1"));
        assert_eq!(
            lines.next().unwrap(),
            "2024-06-16 06:30:00,1.2500,interpolated,false,,,,,rising,,,,,true,1,1,Mallard"
        );
    }

    #[test]
    fn undefined_rate_is_blank_in_grouping() {
        let mut r = record();
        r.set_exposure("CAM1", false, 0);
        let records = vec![r];
        let normalizer = crate::normalize::DetectionNormalizer::new(&records, 12);
        let grouping = normalizer.summarize(&records, &[GroupBy::TidalState]);

        let mut buf = Vec::new();
        write_grouping(&mut buf, &grouping).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert_eq!(row, "rising,1,0.5000,0.0000,1,1,0,,0.0000");
    }

    #[test]
    fn artifacts_land_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");
        let dataset = AlignedDataset {
            records: vec![record()],
            cameras: vec!["CAM1".to_string()],
            ..Default::default()
        };
        let written = write_artifacts(&out, &dataset, 12).unwrap();
        assert_eq!(written.len(), 9);
        assert!(written.iter().all(|p| p.exists()));

        let json = std::fs::read_to_string(out.join("aligned.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["records"][0]["tidal_state"], "rising");
        assert_eq!(value["records"][0]["level_source"], "interpolated");
    }
}
