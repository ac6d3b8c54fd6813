//! # Tide Alignment Entry Point
//!
//! Loads configuration and a JSON bundle of raw rows, runs the alignment
//! pipeline and writes the aligned dataset plus grouped summaries.
//! Without `--input` it runs on the synthetic demo bundle instead.
//!
//! ```bash
//! tide-align --input site.json --output out/
//! RUST_LOG=debug tide-align --synthetic-days 7
//! ```

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tide_align_lib::config::Config;
use tide_align_lib::input::RawBundle;
use tide_align_lib::{export, synthetic, Pipeline};

#[derive(Parser)]
#[command(name = "tide-align")]
#[command(about = "Align camera-trap detections with tide sensor readings", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, default_value = tide_align_lib::config::CONFIG_FILE)]
    config: PathBuf,

    /// JSON bundle with `sensor`, `detections` and `camera_status` rows
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output directory, overrides `[output] directory`
    #[arg(long)]
    output: Option<PathBuf>,

    /// Days of synthetic data when no input is given
    #[arg(long, default_value_t = 7)]
    synthetic_days: i64,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::load_from_path(&cli.config);
    let output = cli
        .output
        .unwrap_or_else(|| PathBuf::from(&config.output.directory));
    let bins = config.phase.bins;

    let pipeline = Pipeline::new(config).context("invalid configuration")?;

    let dataset = match &cli.input {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("reading input bundle {}", path.display()))?;
            let raw: RawBundle = serde_json::from_str(&contents)
                .with_context(|| format!("parsing input bundle {}", path.display()))?;
            pipeline.run_raw(raw)?
        }
        None => {
            log::info!("No input bundle given, using the synthetic demo");
            let start = NaiveDate::from_ymd_opt(2024, 6, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .context("demo start date")?;
            pipeline.run(&synthetic::demo_bundle(start, cli.synthetic_days))?
        }
    };

    let overview = dataset.normalizer(bins).overview(&dataset.records);
    log::info!(
        "Overview: {} detections ({} while active) over {:.1} camera-hours, {:.1} active",
        overview.detections,
        overview.active_detections,
        overview.camera_hours,
        overview.active_camera_hours
    );
    match overview.detection_rate {
        Some(rate) => log::info!("Detection rate: {rate:.3} per active camera-hour"),
        None => log::warn!("No active camera time, detection rate undefined"),
    }

    let written = export::write_artifacts(&output, &dataset, bins)
        .with_context(|| format!("writing artifacts to {}", output.display()))?;
    for path in written {
        println!("{}", path.display());
    }
    Ok(())
}
