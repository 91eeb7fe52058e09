//! STW resolution per slice and aggregation into UTC hour buckets.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::current::{sample_with_fallback, CurrentSample, CurrentSource};
use crate::geo;
use crate::{Confidence, Fix, HourlyMetrics, HourlyRecord, Params, Slice, StwError};

/// Water-referenced solution for one slice.
#[derive(Clone, Copy, Debug)]
pub struct StwSolution {
    pub current_kn: f64,
    pub current_dir_deg: f64,
    pub stw_kn: f64,
    pub stw_dir_deg: f64,
}

/// Solve velocity-over-ground = velocity-through-water + current for the
/// water-referenced component: stw = sog − current, as vectors.
pub fn resolve_stw(sog_kn: f64, cog_deg: f64, sample: &CurrentSample) -> StwSolution {
    let current_kn = geo::ms_to_kn(sample.u_ms.hypot(sample.v_ms));
    let current_dir_deg = geo::normalize_deg(sample.u_ms.atan2(sample.v_ms).to_degrees());

    let (sog_e, sog_n) = geo::vector_from_speed_dir(sog_kn, cog_deg);
    let (cur_e, cur_n) = geo::vector_from_speed_dir(current_kn, current_dir_deg);
    let (stw_kn, stw_dir_deg) = geo::speed_dir_from_vector(sog_e - cur_e, sog_n - cur_n);

    StwSolution {
        current_kn,
        current_dir_deg,
        stw_kn,
        stw_dir_deg,
    }
}

/// Sample the current for every track point and resolve its STW vector.
/// Points whose bounded neighbor search finds no data are dropped.
pub fn build_slices<S: CurrentSource + ?Sized>(
    points: &[Fix],
    source: &S,
    params: &Params,
) -> Result<Vec<Slice>, StwError> {
    let mut slices = Vec::with_capacity(points.len());
    for point in points {
        let Some(sample) = sample_with_fallback(source, point.time, point.lat, point.lon, params)?
        else {
            continue;
        };
        let solved = resolve_stw(point.sog_kn, point.cog_deg, &sample);
        slices.push(Slice {
            time: point.time,
            lat: point.lat,
            lon: point.lon,
            sog_kn: point.sog_kn,
            cog_deg: point.cog_deg,
            current_kn: solved.current_kn,
            current_dir_deg: solved.current_dir_deg,
            stw_kn: solved.stw_kn,
            stw_dir_deg: solved.stw_dir_deg,
            neighbor_offset_nm: sample.offset_nm,
        });
    }
    Ok(slices)
}

fn hour_bucket(time: DateTime<Utc>) -> DateTime<Utc> {
    let secs = time.timestamp() - time.timestamp().rem_euclid(3600);
    DateTime::from_timestamp(secs, 0).unwrap_or(time)
}

/// Aggregate slices into one record per UTC hour, ascending.
///
/// Hours whose slices span less than `min_coverage_min` minutes become
/// `Gap` records with no metrics. Otherwise current/STW/SOG vectors are
/// averaged with equal weight, position comes from the last slice of the
/// hour, and confidence drops to `Medium` when any slice's current value
/// came from a neighbor cell farther than `confidence_offset_nm`.
pub fn aggregate_hourly(slices: &[Slice], params: &Params) -> Vec<HourlyRecord> {
    let mut buckets: BTreeMap<DateTime<Utc>, Vec<&Slice>> = BTreeMap::new();
    for slice in slices {
        buckets.entry(hour_bucket(slice.time)).or_default().push(slice);
    }

    let mut out = Vec::with_capacity(buckets.len());
    for (hour, bucket) in buckets {
        let (Some(oldest), Some(newest)) = (
            bucket.iter().map(|s| s.time).min(),
            bucket.iter().map(|s| s.time).max(),
        ) else {
            continue;
        };
        let coverage_min = (newest - oldest).num_milliseconds() as f64 / 60_000.0;
        if coverage_min < params.min_coverage_min {
            out.push(HourlyRecord {
                hour,
                confidence: Confidence::Gap,
                metrics: None,
            });
            continue;
        }

        let mut cur = (0.0, 0.0);
        let mut stw = (0.0, 0.0);
        let mut sog = (0.0, 0.0);
        let mut max_offset = 0.0_f64;
        for slice in &bucket {
            let c = geo::vector_from_speed_dir(slice.current_kn, slice.current_dir_deg);
            let w = geo::vector_from_speed_dir(slice.stw_kn, slice.stw_dir_deg);
            let g = geo::vector_from_speed_dir(slice.sog_kn, slice.cog_deg);
            cur = (cur.0 + c.0, cur.1 + c.1);
            stw = (stw.0 + w.0, stw.1 + w.1);
            sog = (sog.0 + g.0, sog.1 + g.1);
            max_offset = max_offset.max(slice.neighbor_offset_nm);
        }
        let n = bucket.len() as f64;
        let (current_kn, current_dir_deg) = geo::speed_dir_from_vector(cur.0 / n, cur.1 / n);
        let (stw_kn, stw_dir_deg) = geo::speed_dir_from_vector(stw.0 / n, stw.1 / n);
        let (sog_kn, cog_deg) = geo::speed_dir_from_vector(sog.0 / n, sog.1 / n);

        let Some(last) = bucket.last() else {
            continue;
        };
        let confidence = if max_offset > params.confidence_offset_nm {
            Confidence::Medium
        } else {
            Confidence::High
        };
        out.push(HourlyRecord {
            hour,
            confidence,
            metrics: Some(HourlyMetrics {
                lat: last.lat,
                lon: last.lon,
                sog_kn,
                cog_deg,
                current_kn,
                current_dir_deg,
                stw_kn,
                stw_dir_deg,
                max_neighbor_offset_nm: max_offset,
            }),
        });
    }
    out
}
