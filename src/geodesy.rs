//! Geodesy primitives shared by the matcher and predictor.
//!
//! All angles on the public surface are degrees; headings normalize to
//! [0, 360). Planar work happens in a local equirectangular frame with
//! latitude-dependent meter scales, which is accurate to well under a
//! meter at the search radii the matcher uses.

/// Mean earth radius for haversine distances, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Geographic point in WGS-84 degrees.
///
/// Equality is bit-exact on the raw doubles; two points that differ by
/// rounding noise are different points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        LatLon { lat, lon }
    }
}

/// Normalize a heading into [0, 360).
pub fn normalize_heading(deg: f64) -> f64 {
    ((deg % 360.0) + 360.0) % 360.0
}

/// Smallest angular separation between two headings, in [0, 180].
///
/// Symmetric in its arguments; both inputs are normalized first.
pub fn angular_difference(a: f64, b: f64) -> f64 {
    let d = (normalize_heading(a) - normalize_heading(b)).abs();
    d.min(360.0 - d)
}

/// Great-circle distance between two points, in meters.
pub fn haversine_m(a: LatLon, b: LatLon) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Meters spanned by one degree of latitude at the given latitude.
pub fn meters_per_degree_lat(lat: f64) -> f64 {
    let phi = lat.to_radians();
    111_132.954 - 559.822 * (2.0 * phi).cos() + 1.175 * (4.0 * phi).cos()
}

/// Meters spanned by one degree of longitude at the given latitude.
pub fn meters_per_degree_lon(lat: f64) -> f64 {
    111_132.954 * lat.to_radians().cos()
}

/// Project `point` into local (east, north) meters around `origin`.
pub fn to_local_meters(origin: LatLon, point: LatLon) -> (f64, f64) {
    let east = (point.lon - origin.lon) * meters_per_degree_lon(origin.lat);
    let north = (point.lat - origin.lat) * meters_per_degree_lat(origin.lat);
    (east, north)
}

/// Inverse of [`to_local_meters`] at the same origin.
pub fn from_local_meters(origin: LatLon, east: f64, north: f64) -> LatLon {
    LatLon {
        lat: origin.lat + north / meters_per_degree_lat(origin.lat),
        lon: origin.lon + east / meters_per_degree_lon(origin.lat),
    }
}

/// Offset `origin` by `distance_m` meters along `heading_deg`.
///
/// Heading 0 is north, 90 is east.
pub fn point_along_heading(origin: LatLon, heading_deg: f64, distance_m: f64) -> LatLon {
    let h = normalize_heading(heading_deg).to_radians();
    LatLon {
        lat: origin.lat + h.cos() * distance_m / meters_per_degree_lat(origin.lat),
        lon: origin.lon + h.sin() * distance_m / meters_per_degree_lon(origin.lat),
    }
}

/// Initial great-circle bearing from one point toward another, degrees in [0, 360).
pub fn bearing_degrees(from: LatLon, to: LatLon) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let dlon = (to.lon - from.lon).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();

    normalize_heading(y.atan2(x).to_degrees())
}
