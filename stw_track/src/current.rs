//! Gridded current-forecast sampling with a bounded coastal fallback.
//!
//! Current grids mask land cells with a reserved sentinel, so a lookup
//! right on the coast often lands on an undefined cell. The sampler
//! probes expanding rings of neighboring cells up to a bounded radius
//! and reports how far the winning cell was from the requested point.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::geo;
use crate::{Params, StwError};

/// Sentinel the grid encoding uses for masked (land) cells.
pub const UNDEFINED_SENTINEL: f64 = 9.999e20;

const U_PARAM: &str = ":UOGRD:";
const V_PARAM: &str = ":VOGRD:";

/// East/north current components in m/s at one grid cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurrentUv {
    pub u_ms: f64,
    pub v_ms: f64,
}

/// A resolved current lookup: components plus the distance to the cell
/// that actually supplied them (zero for an exact hit).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurrentSample {
    pub u_ms: f64,
    pub v_ms: f64,
    pub offset_nm: f64,
}

/// A queryable gridded current forecast.
///
/// `lon360` uses the 0–360 longitude convention of the grid. `Ok(None)`
/// means the cell is masked/undefined; `Err` means the source itself
/// failed and the whole run must stop.
pub trait CurrentSource {
    fn sample(
        &self,
        time: DateTime<Utc>,
        lat: f64,
        lon360: f64,
    ) -> Result<Option<CurrentUv>, StwError>;
}

/// Sample the current at `(lat, lon)`, falling back to neighbor cells in
/// expanding rings when the exact cell is undefined. Returns `None` when
/// the bounded search exhausts without data.
pub fn sample_with_fallback<S: CurrentSource + ?Sized>(
    source: &S,
    time: DateTime<Utc>,
    lat: f64,
    lon: f64,
    params: &Params,
) -> Result<Option<CurrentSample>, StwError> {
    let lon360 = geo::lon_to_360(lon);
    if let Some(uv) = source.sample(time, lat, lon360)? {
        return Ok(Some(CurrentSample {
            u_ms: uv.u_ms,
            v_ms: uv.v_ms,
            offset_nm: 0.0,
        }));
    }

    for ring in 1..=params.max_neighbor_steps {
        for dy in -ring..=ring {
            for dx in -ring..=ring {
                if dx.abs().max(dy.abs()) < ring {
                    continue;
                }
                let probe_lat = lat + dy as f64 * params.grid_lat_step_deg;
                let probe_lon = lon360 + dx as f64 * params.grid_lon_step_deg;
                if let Some(uv) = source.sample(time, probe_lat, probe_lon)? {
                    let gc = geo::distance_bearing(
                        lat,
                        geo::lon_to_180(lon360),
                        probe_lat,
                        geo::lon_to_180(probe_lon),
                    );
                    return Ok(Some(CurrentSample {
                        u_ms: uv.u_ms,
                        v_ms: uv.v_ms,
                        offset_nm: geo::km_to_nm(gc.km),
                    }));
                }
            }
        }
    }
    Ok(None)
}

type CellKey = (u64, u64, u64);

/// Current source backed by a GRIB2 file queried through the `wgrib2`
/// tool. Lookups are memoized per (validity hour, cell) for the lifetime
/// of the source, since neighboring slices hit the same cells repeatedly.
pub struct Wgrib2Source {
    wgrib2: PathBuf,
    grib: PathBuf,
    cache: RefCell<HashMap<CellKey, Option<CurrentUv>>>,
}

impl Wgrib2Source {
    pub fn new(wgrib2: PathBuf, grib: PathBuf) -> Self {
        Self {
            wgrib2,
            grib,
            cache: RefCell::new(HashMap::new()),
        }
    }

    fn query(&self, vt: &str, lat: f64, lon360: f64, param: &str) -> Result<f64, StwError> {
        let output = Command::new(&self.wgrib2)
            .arg(&self.grib)
            .arg("-match")
            .arg(format!("vt={vt}"))
            .arg("-match")
            .arg(param)
            .arg("-lon")
            .arg(lon360.to_string())
            .arg(lat.to_string())
            .output()
            .map_err(|e| {
                StwError::CurrentQuery(format!(
                    "failed to run {}: {e}",
                    self.wgrib2.display()
                ))
            })?;
        if !output.status.success() {
            return Err(StwError::CurrentQuery(format!(
                "{} exited with {}: {}",
                self.wgrib2.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_val(&stdout).unwrap_or(UNDEFINED_SENTINEL))
    }
}

impl CurrentSource for Wgrib2Source {
    fn sample(
        &self,
        time: DateTime<Utc>,
        lat: f64,
        lon360: f64,
    ) -> Result<Option<CurrentUv>, StwError> {
        let key = (vt_numeric(time), lat.to_bits(), lon360.to_bits());
        if let Some(hit) = self.cache.borrow().get(&key) {
            return Ok(*hit);
        }

        let vt = vt_token(time);
        let u = self.query(&vt, lat, lon360, U_PARAM)?;
        let v = self.query(&vt, lat, lon360, V_PARAM)?;
        let value = if u == UNDEFINED_SENTINEL || v == UNDEFINED_SENTINEL {
            None
        } else {
            Some(CurrentUv { u_ms: u, v_ms: v })
        };
        self.cache.borrow_mut().insert(key, value);
        Ok(value)
    }
}

/// Validity-time token of the forecast hour covering `time` (hour-truncated).
fn vt_token(time: DateTime<Utc>) -> String {
    format!(
        "{:04}{:02}{:02}{:02}",
        time.year(),
        time.month(),
        time.day(),
        time.hour()
    )
}

fn vt_numeric(time: DateTime<Utc>) -> u64 {
    time.year() as u64 * 1_000_000
        + time.month() as u64 * 10_000
        + time.day() as u64 * 100
        + time.hour() as u64
}

fn parse_val(out: &str) -> Option<f64> {
    let idx = out.find("val=")?;
    let rest = &out[idx + 4..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')))
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct GridSource {
        cells: HashMap<(i64, i64), CurrentUv>,
        lat_step: f64,
        lon_step: f64,
    }

    impl GridSource {
        fn empty(params: &Params) -> Self {
            Self {
                cells: HashMap::new(),
                lat_step: params.grid_lat_step_deg,
                lon_step: params.grid_lon_step_deg,
            }
        }

        fn cell_of(&self, lat: f64, lon360: f64) -> (i64, i64) {
            (
                (lat / self.lat_step).round() as i64,
                (lon360 / self.lon_step).round() as i64,
            )
        }
    }

    impl CurrentSource for GridSource {
        fn sample(
            &self,
            _time: DateTime<Utc>,
            lat: f64,
            lon360: f64,
        ) -> Result<Option<CurrentUv>, StwError> {
            Ok(self.cells.get(&self.cell_of(lat, lon360)).copied())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn exact_cell_hit_has_zero_offset() {
        let params = Params::default();
        let mut grid = GridSource::empty(&params);
        let (lat, lon) = (50.0, -4.0);
        let key = grid.cell_of(lat, geo::lon_to_360(lon));
        grid.cells.insert(key, CurrentUv { u_ms: 0.4, v_ms: -0.2 });

        let sample = sample_with_fallback(&grid, t0(), lat, lon, &params)
            .unwrap()
            .unwrap();
        assert_eq!(sample.u_ms, 0.4);
        assert_eq!(sample.v_ms, -0.2);
        assert_eq!(sample.offset_nm, 0.0);
    }

    #[test]
    fn one_step_neighbor_is_found_with_its_distance() {
        let params = Params::default();
        let mut grid = GridSource::empty(&params);
        let (lat, lon) = (50.0, -4.0);
        let lon360 = geo::lon_to_360(lon);
        // Only the cell one lat-step north has data.
        let neighbor_lat = lat + params.grid_lat_step_deg;
        let key = grid.cell_of(neighbor_lat, lon360);
        grid.cells.insert(key, CurrentUv { u_ms: 0.1, v_ms: 0.1 });

        let sample = sample_with_fallback(&grid, t0(), lat, lon, &params)
            .unwrap()
            .unwrap();
        assert_eq!(sample.u_ms, 0.1);

        let gc = geo::distance_bearing(lat, lon, neighbor_lat, lon);
        let expected_nm = geo::km_to_nm(gc.km);
        assert!((sample.offset_nm - expected_nm).abs() < 1e-9);
        assert!(sample.offset_nm > 0.0);
    }

    #[test]
    fn second_ring_is_reached_when_first_is_masked() {
        let params = Params::default();
        let mut grid = GridSource::empty(&params);
        let (lat, lon) = (50.0, -4.0);
        let lon360 = geo::lon_to_360(lon);
        let far_lat = lat + 2.0 * params.grid_lat_step_deg;
        let key = grid.cell_of(far_lat, lon360);
        grid.cells.insert(key, CurrentUv { u_ms: 0.2, v_ms: 0.0 });

        let sample = sample_with_fallback(&grid, t0(), lat, lon, &params)
            .unwrap()
            .unwrap();
        assert_eq!(sample.u_ms, 0.2);
        assert!(sample.offset_nm > params.grid_lat_step_deg * 60.0 * 0.9);
    }

    #[test]
    fn exhausted_search_reports_not_found() {
        let params = Params::default();
        let grid = GridSource::empty(&params);
        let result = sample_with_fallback(&grid, t0(), 50.0, -4.0, &params).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn data_beyond_the_search_radius_is_not_used() {
        let params = Params::default();
        let mut grid = GridSource::empty(&params);
        let (lat, lon) = (50.0, -4.0);
        let lon360 = geo::lon_to_360(lon);
        let far_lat = lat + 3.0 * params.grid_lat_step_deg;
        let key = grid.cell_of(far_lat, lon360);
        grid.cells.insert(key, CurrentUv { u_ms: 0.2, v_ms: 0.0 });

        assert!(sample_with_fallback(&grid, t0(), lat, lon, &params)
            .unwrap()
            .is_none());
    }

    #[test]
    fn vt_token_truncates_to_the_hour() {
        let t = Utc.with_ymd_and_hms(2024, 3, 7, 9, 47, 12).unwrap();
        assert_eq!(vt_token(t), "2024030709");
        assert_eq!(vt_numeric(t), 2024_03_07_09);
    }

    #[test]
    fn wgrib2_val_output_is_parsed() {
        assert_eq!(parse_val("1:0:lon=356,lat=50,val=0.123"), Some(0.123));
        assert_eq!(parse_val("1:0:val=9.999e+20\n"), Some(9.999e20));
        assert_eq!(parse_val("no value here"), None);
        assert_eq!(parse_val("val=-1.5e-2,rest"), Some(-0.015));
    }
}
