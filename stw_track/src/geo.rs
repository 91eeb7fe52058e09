//! Spherical geodesy and speed/direction vector helpers.
//!
//! All angles are degrees at the public boundary; radians stay internal.
//! Directions follow the navigation convention: 0° = north, clockwise
//! positive, so east = speed·sin(dir) and north = speed·cos(dir).

const EARTH_RADIUS_KM: f64 = 6371.0;

pub const MS_TO_KNOTS: f64 = 1.943844;
pub const KM_TO_NM: f64 = 0.539956803;

/// Great-circle distance and initial bearing between two points.
#[derive(Clone, Copy, Debug)]
pub struct DistanceBearing {
    pub km: f64,
    pub bearing_deg: f64,
}

/// Normalize an angle in degrees to [0, 360).
pub fn normalize_deg(deg: f64) -> f64 {
    let d = deg % 360.0;
    if d < 0.0 {
        d + 360.0
    } else {
        d
    }
}

/// Map a longitude in [-180, 180] to the 0–360 convention used by current grids.
pub fn lon_to_360(lon: f64) -> f64 {
    if lon < 0.0 {
        lon + 360.0
    } else {
        lon
    }
}

/// Map a 0–360 longitude back to [-180, 180].
pub fn lon_to_180(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

pub fn ms_to_kn(ms: f64) -> f64 {
    ms * MS_TO_KNOTS
}

pub fn km_to_nm(km: f64) -> f64 {
    km * KM_TO_NM
}

/// Haversine distance (km) and initial bearing (degrees) from point 1 to point 2.
pub fn distance_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> DistanceBearing {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();

    DistanceBearing {
        km: EARTH_RADIUS_KM * c,
        bearing_deg: normalize_deg(y.atan2(x).to_degrees()),
    }
}

/// Direct geodesic problem on the sphere: point reached from `(lat, lon)`
/// after `distance_km` along `bearing_deg`.
pub fn destination_point(lat: f64, lon: f64, bearing_deg: f64, distance_km: f64) -> (f64, f64) {
    let delta = distance_km / EARTH_RADIUS_KM;
    let theta = bearing_deg.to_radians();
    let phi1 = lat.to_radians();
    let lambda1 = lon.to_radians();

    let (sin_phi1, cos_phi1) = phi1.sin_cos();
    let (sin_delta, cos_delta) = delta.sin_cos();

    let sin_phi2 = sin_phi1 * cos_delta + cos_phi1 * sin_delta * theta.cos();
    let phi2 = sin_phi2.asin();
    let y = theta.sin() * sin_delta * cos_phi1;
    let x = cos_delta - sin_phi1 * sin_phi2;
    let lambda2 = lambda1 + y.atan2(x);

    (phi2.to_degrees(), lambda2.to_degrees())
}

/// Decompose a speed/direction pair into (east, north) components.
pub fn vector_from_speed_dir(speed: f64, dir_deg: f64) -> (f64, f64) {
    let theta = dir_deg.to_radians();
    (speed * theta.sin(), speed * theta.cos())
}

/// Recompose (east, north) components into a speed/direction pair.
/// Direction is normalized to [0, 360); it is meaningless when speed is zero.
pub fn speed_dir_from_vector(east: f64, north: f64) -> (f64, f64) {
    let speed = east.hypot(north);
    (speed, normalize_deg(east.atan2(north).to_degrees()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_degree_of_longitude_at_equator() {
        let gc = distance_bearing(0.0, 0.0, 0.0, 1.0);
        assert!((gc.km - 111.195).abs() < 0.2);
        assert!((gc.bearing_deg - 90.0).abs() < 1e-9);
    }

    #[test]
    fn destination_round_trip() {
        let cases = [
            (50.0, -4.0, 45.0, 10.0),
            (-33.9, 18.4, 200.0, 40.0),
            (60.0, 5.0, 0.0, 1.0),
            (10.0, 179.5, 90.0, 80.0),
        ];
        for (lat, lon, bearing, dist) in cases {
            let (lat2, lon2) = destination_point(lat, lon, bearing, dist);
            let back = distance_bearing(lat2, lon2, lat, lon);
            assert!(
                (back.km - dist).abs() / dist < 1e-6,
                "distance mismatch for {lat},{lon}: {} vs {dist}",
                back.km
            );
            let reverse = normalize_deg(bearing + 180.0);
            let diff = (back.bearing_deg - reverse + 540.0) % 360.0 - 180.0;
            assert!(diff.abs() < 0.2, "bearing mismatch: {} vs {reverse}", back.bearing_deg);
        }
    }

    #[test]
    fn vector_polar_round_trip() {
        for (speed, dir) in [(5.0, 90.0), (0.3, 0.0), (12.5, 278.4), (1.0, 359.9)] {
            let (e, n) = vector_from_speed_dir(speed, dir);
            let (speed2, dir2) = speed_dir_from_vector(e, n);
            assert!((speed2 - speed).abs() < 1e-9);
            assert!((dir2 - dir).abs() < 1e-9 || (dir2 - dir).abs() > 359.999);
        }
    }

    #[test]
    fn zero_vector_has_zero_speed() {
        let (speed, _) = speed_dir_from_vector(0.0, 0.0);
        assert_eq!(speed, 0.0);
    }

    #[test]
    fn normalize_wraps_negatives() {
        assert_eq!(normalize_deg(-90.0), 270.0);
        assert_eq!(normalize_deg(720.0), 0.0);
        assert_eq!(lon_to_360(-4.0), 356.0);
        assert_eq!(lon_to_180(356.0), -4.0);
    }
}
