//! Track CSV loading and resampling onto a uniform time grid.

use std::cmp::Ordering;
use std::path::Path;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};

use crate::geo;
use crate::{Fix, Params, StwError};

const REQUIRED_COLUMNS: [&str; 5] = [
    "Date",
    "Latitude(Degree)",
    "Longitude(Degree)",
    "SOG(Knot)",
    "COG(Degree)",
];

const DATE_FORMATS: [&str; 2] = ["%d/%m/%Y %H:%M:%S", "%d/%m/%Y %H:%M"];

/// Load and validate a semicolon-delimited track file.
pub fn load_track(path: &Path) -> Result<Vec<Fix>, StwError> {
    let raw = std::fs::read_to_string(path).map_err(|source| StwError::TrackRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_track(&raw)
}

/// Parse track CSV text into a strictly time-ordered fix sequence.
///
/// The header must contain `Date`, `Latitude(Degree)`, `Longitude(Degree)`,
/// `SOG(Knot)` and `COG(Degree)` in any order. Dates are `DD/MM/YYYY HH:MM[:SS]`
/// UTC. Rows with fewer fields than the header are skipped; any other
/// malformed field is fatal.
pub fn parse_track(input: &str) -> Result<Vec<Fix>, StwError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input.as_bytes());

    let headers = reader.headers()?.clone();
    let mut idx = [0usize; 5];
    for (slot, name) in idx.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| StwError::MissingColumn(name.to_string()))?;
    }
    let [date_idx, lat_idx, lon_idx, sog_idx, cog_idx] = idx;

    let mut fixes: Vec<Fix> = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let line = i + 2;
        if record.len() < headers.len() {
            continue;
        }

        let date_field = record.get(date_idx).unwrap_or_default();
        let time = parse_date_utc(date_field).ok_or_else(|| StwError::BadDate {
            line,
            value: date_field.to_string(),
        })?;

        let fix = Fix {
            time,
            lat: parse_number(&record, lat_idx, "latitude", line)?,
            lon: parse_number(&record, lon_idx, "longitude", line)?,
            sog_kn: parse_number(&record, sog_idx, "SOG", line)?,
            cog_deg: parse_number(&record, cog_idx, "COG", line)?,
        };

        if let Some(prev) = fixes.last() {
            if fix.time <= prev.time {
                return Err(StwError::NonMonotonic { line });
            }
        }
        fixes.push(fix);
    }

    if fixes.is_empty() {
        return Err(StwError::EmptyTrack);
    }
    Ok(fixes)
}

fn parse_date_utc(s: &str) -> Option<DateTime<Utc>> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn parse_number(
    record: &csv::StringRecord,
    idx: usize,
    field: &'static str,
    line: usize,
) -> Result<f64, StwError> {
    let raw = record.get(idx).unwrap_or_default();
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| StwError::BadNumber {
            line,
            field,
            value: raw.to_string(),
        })
}

/// Shift the whole track by a constant offset so the first fix lands on `start`.
pub fn shift_start(fixes: &mut [Fix], start: DateTime<Utc>) {
    let Some(first) = fixes.first() else {
        return;
    };
    let delta = start - first.time;
    for fix in fixes.iter_mut() {
        fix.time = fix.time + delta;
    }
}

fn minutes_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (b - a).num_milliseconds().abs() as f64 / 60_000.0
}

/// Resample a track onto an even grid when the native spacing is coarse.
///
/// If the median inter-fix gap is at most `native_ok_max_min` minutes the
/// fixes pass through unchanged. Otherwise each consecutive pair is filled
/// with synthetic points every `resample_step_min` minutes along the
/// great-circle path, with SOG/COG interpolated linearly in time. The first
/// and last original fixes are always preserved verbatim.
pub fn resample(fixes: &[Fix], params: &Params) -> Vec<Fix> {
    if fixes.len() < 2 {
        return fixes.to_vec();
    }

    let mut gaps: Vec<f64> = fixes
        .windows(2)
        .map(|w| minutes_between(w[0].time, w[1].time))
        .collect();
    gaps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let median_gap = gaps[gaps.len() / 2];
    if median_gap <= params.native_ok_max_min {
        return fixes.to_vec();
    }

    let mut out = Vec::new();
    for pair in fixes.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let total_min = minutes_between(a.time, b.time);
        let steps = ((total_min / params.resample_step_min).floor() as i64).max(1);
        let gc = geo::distance_bearing(a.lat, a.lon, b.lat, b.lon);
        let km_step = gc.km / steps as f64;

        for s in 0..steps {
            let elapsed_min = s as f64 * params.resample_step_min;
            let (lat, lon) = geo::destination_point(a.lat, a.lon, gc.bearing_deg, km_step * s as f64);
            let frac = elapsed_min / total_min;
            out.push(Fix {
                time: a.time + Duration::milliseconds((elapsed_min * 60_000.0) as i64),
                lat,
                lon,
                sog_kn: a.sog_kn + (b.sog_kn - a.sog_kn) * frac,
                cog_deg: a.cog_deg + (b.cog_deg - a.cog_deg) * frac,
            });
        }
    }
    out.push(fixes[fixes.len() - 1]);
    out
}
