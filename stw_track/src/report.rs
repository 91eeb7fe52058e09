//! CSV and QA-summary serialization of pipeline results.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Confidence, HourlyRecord, Slice};

const HOURLY_COLUMNS: [&str; 11] = [
    "timestamp_utc",
    "lat",
    "lon",
    "sog_kn",
    "cog_deg",
    "current_kn",
    "current_dir_deg",
    "stw_kn",
    "stw_dir_deg",
    "confidence",
    "max_neighbor_offset_nm",
];

const SLICE_COLUMNS: [&str; 10] = [
    "timestamp_utc",
    "lat",
    "lon",
    "sog_kn",
    "cog_deg",
    "current_kn",
    "current_dir_deg",
    "stw_kn",
    "stw_dir_deg",
    "neighbor_offset_nm",
];

fn fmt(value: f64, decimals: usize) -> String {
    if value.is_finite() {
        format!("{value:.decimals$}")
    } else {
        String::new()
    }
}

fn hour_stamp(hour: DateTime<Utc>) -> String {
    hour.format("%Y-%m-%dT%H:00Z").to_string()
}

/// Write the hourly records in the fixed export column order. `GAP` rows
/// render every metric column as an empty string.
pub fn write_hourly_rows<W: Write>(
    records: &[HourlyRecord],
    writer: &mut csv::Writer<W>,
) -> Result<(), csv::Error> {
    writer.write_record(HOURLY_COLUMNS)?;
    for record in records {
        match record.metrics.as_ref() {
            Some(m) => writer.write_record([
                hour_stamp(record.hour),
                fmt(m.lat, 5),
                fmt(m.lon, 5),
                fmt(m.sog_kn, 2),
                fmt(m.cog_deg, 0),
                fmt(m.current_kn, 2),
                fmt(m.current_dir_deg, 0),
                fmt(m.stw_kn, 2),
                fmt(m.stw_dir_deg, 0),
                record.confidence.to_string(),
                fmt(m.max_neighbor_offset_nm, 2),
            ])?,
            None => writer.write_record([
                hour_stamp(record.hour),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
                record.confidence.to_string(),
                String::new(),
            ])?,
        }
    }
    writer.flush()?;
    Ok(())
}

/// Write the full per-slice sequence (verbose output).
pub fn write_slice_rows<W: Write>(
    slices: &[Slice],
    writer: &mut csv::Writer<W>,
) -> Result<(), csv::Error> {
    writer.write_record(SLICE_COLUMNS)?;
    for slice in slices {
        writer.write_record([
            slice.time.to_rfc3339_opts(SecondsFormat::Millis, true),
            fmt(slice.lat, 5),
            fmt(slice.lon, 5),
            fmt(slice.sog_kn, 2),
            fmt(slice.cog_deg, 0),
            fmt(slice.current_kn, 2),
            fmt(slice.current_dir_deg, 0),
            fmt(slice.stw_kn, 2),
            fmt(slice.stw_dir_deg, 0),
            fmt(slice.neighbor_offset_nm, 2),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn median(values: &mut Vec<f64>) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

/// Render the plain-text QA summary: sources, hour totals, gap count,
/// median current across non-gap hours, and the largest neighbor offset.
pub fn render_summary(track: &Path, grib: &Path, records: &[HourlyRecord]) -> String {
    let gap_count = records
        .iter()
        .filter(|r| r.confidence == Confidence::Gap)
        .count();
    let mut currents: Vec<f64> = records
        .iter()
        .filter_map(|r| r.metrics.map(|m| m.current_kn))
        .collect();
    let median_current = median(&mut currents);
    let max_offset = records
        .iter()
        .filter_map(|r| r.metrics.map(|m| m.max_neighbor_offset_nm))
        .fold(0.0_f64, f64::max);

    format!(
        "STW reconstruction summary\n\
         Source CSV: {}\n\
         GRIB: {}\n\
         \n\
         Hours total: {}\n\
         Hours GAP:   {}\n\
         Median current (kn): {}\n\
         Max neighbor offset (nm): {}\n",
        track.display(),
        grib.display(),
        records.len(),
        gap_count,
        fmt(median_current, 2),
        fmt(max_offset, 2),
    )
}
