//! Speed-through-water reconstruction from GPS tracks and gridded
//! ocean-current forecasts.
//!
//! The pipeline takes a timestamped GPS track (position, SOG, COG),
//! resamples it onto a uniform time grid, samples a gridded current
//! forecast at each point (with a bounded neighbor fallback for masked
//! coastal cells), subtracts the current vector from the over-ground
//! vector to obtain water-referenced speed and heading, and aggregates
//! the result into hourly records with a confidence classification.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod current;
pub mod geo;
pub mod hourly;
pub mod report;
pub mod track;

pub use current::{CurrentSample, CurrentSource, CurrentUv, Wgrib2Source};

#[derive(Error, Debug)]
pub enum StwError {
    #[error("failed to read track {path}: {source}")]
    TrackRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("track CSV has no data rows")]
    EmptyTrack,
    #[error("track CSV missing column: {0}")]
    MissingColumn(String),
    #[error("bad date {value:?} on line {line}")]
    BadDate { line: usize, value: String },
    #[error("non-numeric {field} {value:?} on line {line}")]
    BadNumber {
        line: usize,
        field: &'static str,
        value: String,
    },
    #[error("timestamps not strictly increasing at line {line}")]
    NonMonotonic { line: usize },
    #[error("malformed track CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("current query failed: {0}")]
    CurrentQuery(String),
}

/// One raw track sample, as loaded from the track CSV.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub time: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub sog_kn: f64,
    pub cog_deg: f64,
}

/// A (possibly interpolated) track point enriched with the sampled
/// current and the derived water-referenced vector.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Slice {
    pub time: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub sog_kn: f64,
    pub cog_deg: f64,
    pub current_kn: f64,
    pub current_dir_deg: f64,
    pub stw_kn: f64,
    pub stw_dir_deg: f64,
    /// Distance to the grid cell that supplied the current value,
    /// zero when the exact cell had data.
    pub neighbor_offset_nm: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
    Gap,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::High => write!(f, "HIGH"),
            Confidence::Medium => write!(f, "MEDIUM"),
            Confidence::Gap => write!(f, "GAP"),
        }
    }
}

/// Averaged metrics of one hour bucket. Position, SOG and COG come from
/// the last slice of the hour; current and STW are vector averages.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HourlyMetrics {
    pub lat: f64,
    pub lon: f64,
    pub sog_kn: f64,
    pub cog_deg: f64,
    pub current_kn: f64,
    pub current_dir_deg: f64,
    pub stw_kn: f64,
    pub stw_dir_deg: f64,
    pub max_neighbor_offset_nm: f64,
}

/// One row per UTC hour that had at least one slice. `metrics` is `None`
/// exactly when the hour's slice coverage was too short (`Gap`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HourlyRecord {
    pub hour: DateTime<Utc>,
    pub confidence: Confidence,
    pub metrics: Option<HourlyMetrics>,
}

/// Pipeline tuning knobs, defaulting to the operational constants.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Params {
    /// Synthetic slice spacing (minutes) when resampling kicks in.
    pub resample_step_min: f64,
    /// Median native fix spacing (minutes) at or below which the track
    /// is used as-is.
    pub native_ok_max_min: f64,
    /// Minimum slice coverage (minutes) within an hour for a non-gap row.
    pub min_coverage_min: f64,
    /// Neighbor search radius in grid steps for masked cells.
    pub max_neighbor_steps: i32,
    /// Neighbor offset (nm) beyond which an hour is demoted to MEDIUM.
    pub confidence_offset_nm: f64,
    pub grid_lat_step_deg: f64,
    pub grid_lon_step_deg: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            resample_step_min: 10.0,
            native_ok_max_min: 15.0,
            min_coverage_min: 20.0,
            max_neighbor_steps: 2,
            confidence_offset_nm: 3.0,
            grid_lat_step_deg: 0.027779,
            grid_lon_step_deg: 0.027779,
        }
    }
}

/// Full pipeline output: the surviving slices and the hourly aggregate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StwReport {
    pub slices: Vec<Slice>,
    pub hourly: Vec<HourlyRecord>,
}

/// Run the whole pipeline over an already-loaded track.
pub fn compute_hourly<S: CurrentSource + ?Sized>(
    fixes: &[Fix],
    source: &S,
    params: &Params,
) -> Result<StwReport, StwError> {
    let points = track::resample(fixes, params);
    let slices = hourly::build_slices(&points, source, params)?;
    let hourly = hourly::aggregate_hourly(&slices, params);
    Ok(StwReport { slices, hourly })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct UniformCurrent {
        u_ms: f64,
        v_ms: f64,
    }

    impl CurrentSource for UniformCurrent {
        fn sample(
            &self,
            _time: DateTime<Utc>,
            _lat: f64,
            _lon360: f64,
        ) -> Result<Option<CurrentUv>, StwError> {
            Ok(Some(CurrentUv {
                u_ms: self.u_ms,
                v_ms: self.v_ms,
            }))
        }
    }

    struct NoCurrent;

    impl CurrentSource for NoCurrent {
        fn sample(
            &self,
            _time: DateTime<Utc>,
            _lat: f64,
            _lon360: f64,
        ) -> Result<Option<CurrentUv>, StwError> {
            Ok(None)
        }
    }

    fn fix(h: u32, m: u32, lat: f64, lon: f64, sog: f64, cog: f64) -> Fix {
        Fix {
            time: Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap(),
            lat,
            lon,
            sog_kn: sog,
            cog_deg: cog,
        }
    }

    #[test]
    fn still_water_track_yields_one_high_hour() {
        let fixes = vec![
            fix(0, 0, 50.0, -4.0, 5.0, 90.0),
            fix(0, 30, 50.0, -3.95, 5.0, 90.0),
            fix(0, 59, 50.0, -3.90, 5.0, 90.0),
        ];
        let source = UniformCurrent { u_ms: 0.0, v_ms: 0.0 };
        let report = compute_hourly(&fixes, &source, &Params::default()).unwrap();

        assert_eq!(report.hourly.len(), 1);
        let record = &report.hourly[0];
        assert_eq!(record.hour, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(record.confidence, Confidence::High);
        let metrics = record.metrics.expect("non-gap hour has metrics");
        assert!((metrics.stw_kn - 5.0).abs() < 0.01);
        assert!((metrics.stw_dir_deg - 90.0).abs() < 0.01);
        assert_eq!(metrics.max_neighbor_offset_nm, 0.0);
    }

    #[test]
    fn unresolvable_current_drops_every_slice_and_hour() {
        let fixes = vec![
            fix(0, 0, 50.0, -4.0, 5.0, 90.0),
            fix(0, 30, 50.0, -3.95, 5.0, 90.0),
        ];
        let report = compute_hourly(&fixes, &NoCurrent, &Params::default()).unwrap();
        assert!(report.slices.is_empty());
        assert!(report.hourly.is_empty());
    }

    #[test]
    fn gap_records_never_carry_metrics() {
        let fixes = vec![
            fix(0, 0, 50.0, -4.0, 5.0, 90.0),
            fix(0, 10, 50.0, -3.99, 5.0, 90.0),
        ];
        let source = UniformCurrent { u_ms: 0.0, v_ms: 0.0 };
        let report = compute_hourly(&fixes, &source, &Params::default()).unwrap();
        assert_eq!(report.hourly.len(), 1);
        assert_eq!(report.hourly[0].confidence, Confidence::Gap);
        assert!(report.hourly[0].metrics.is_none());
    }
}
