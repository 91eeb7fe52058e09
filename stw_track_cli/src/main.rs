use std::env;
use std::fs;
use std::fs::File;
use std::io;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use clap::{ArgAction, Parser, ValueHint};
use stw_track::{hourly, report, track, Params, Wgrib2Source};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Reconstruct speed-through-water and surface current from a GPS track",
    long_about = None
)]
struct Cli {
    /// Track CSV (semicolon-delimited, Date;Latitude(Degree);Longitude(Degree);SOG(Knot);COG(Degree))
    #[arg(value_hint = ValueHint::FilePath)]
    track: PathBuf,

    /// GRIB2 file holding UOGRD/VOGRD current fields (lon 0-360)
    #[arg(long, default_value = "data/grib_currents/current.grb2", value_hint = ValueHint::FilePath)]
    grib: PathBuf,

    /// Output directory
    #[arg(long = "out", default_value = "data/derived/stw", value_hint = ValueHint::DirPath)]
    out_dir: PathBuf,

    /// Also write the per-slice CSV
    #[arg(long, action = ArgAction::SetTrue)]
    slices: bool,

    /// Shift the track so the first fix starts at this UTC time (YYYY-MM-DDTHH:MMZ)
    #[arg(long)]
    start: Option<String>,

    /// wgrib2 executable (otherwise $WGRIB2, then `wgrib2` on PATH)
    #[arg(long, value_hint = ValueHint::FilePath)]
    wgrib2: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    run(cli)
}

fn run(args: Cli) -> Result<()> {
    let mut fixes = track::load_track(&args.track)?;
    info!("Loaded {} fixes from {}", fixes.len(), args.track.display());

    if let Some(start) = args.start.as_deref() {
        let start = parse_start(start)?;
        track::shift_start(&mut fixes, start);
        info!("Shifted track start to {}", start);
    }

    let params = Params::default();
    let source = Wgrib2Source::new(resolve_wgrib2(args.wgrib2.clone()), args.grib.clone());

    let points = track::resample(&fixes, &params);
    if points.len() != fixes.len() {
        info!("Resampled {} fixes into {} points", fixes.len(), points.len());
    }

    let slices = hourly::build_slices(&points, &source, &params)?;
    if slices.len() < points.len() {
        warn!(
            "Dropped {} of {} points with no resolvable current",
            points.len() - slices.len(),
            points.len()
        );
    }
    let records = hourly::aggregate_hourly(&slices, &params);
    info!("Aggregated {} slices into {} hourly rows", slices.len(), records.len());

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;
    let stem = args
        .track
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("track");
    let hourly_path = args.out_dir.join(format!("{stem}-hourly.csv"));
    let slice_path = args.out_dir.join(format!("{stem}-slices.csv"));
    let summary_path = args.out_dir.join(format!("{stem}-summary.txt"));

    let file = File::create(&hourly_path)
        .with_context(|| format!("failed to create {}", hourly_path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    report::write_hourly_rows(&records, &mut writer)?;

    if args.slices {
        let file = File::create(&slice_path)
            .with_context(|| format!("failed to create {}", slice_path.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        report::write_slice_rows(&slices, &mut writer)?;
    }

    fs::write(&summary_path, report::render_summary(&args.track, &args.grib, &records))
        .with_context(|| format!("failed to write {}", summary_path.display()))?;

    println!("OK");
    println!("Hourly : {}", hourly_path.display());
    if args.slices {
        println!("Slices : {}", slice_path.display());
    }
    println!("Summary: {}", summary_path.display());
    Ok(())
}

fn resolve_wgrib2(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| env::var_os("WGRIB2").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("wgrib2"))
}

fn parse_start(s: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%MZ")
        .map_err(|_| anyhow!("--start must be YYYY-MM-DDTHH:MMZ (UTC), got {s:?}"))?;
    Ok(Utc.from_utc_datetime(&naive))
}
