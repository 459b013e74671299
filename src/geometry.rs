//! Snapping a point onto segment polylines.

use geo::LineString;

use crate::geodesy::{self, LatLon};

/// Result of snapping a point onto a polyline.
#[derive(Clone, Copy, Debug)]
pub struct PolylineHit {
    /// Closest point on the polyline.
    pub snapped: LatLon,
    /// Planar distance from the query point to `snapped`, in meters.
    pub distance_m: f64,
    /// Bearing of the winning edge (a -> b), not of the snapped point.
    pub bearing_deg: f64,
}

/// Closest point on a polyline to a query point.
///
/// Each consecutive coordinate pair is projected into local meters at the
/// query point; the per-edge minimizer is `t* = clamp((p-a)·(b-a) / |b-a|², 0, 1)`.
/// Zero-length edges are skipped. The minimum-distance hit wins, ties going
/// to the first-encountered edge. Polylines with fewer than two points have
/// no hit.
pub fn closest_point_on_polyline(point: LatLon, line: &LineString<f64>) -> Option<PolylineHit> {
    if line.0.len() < 2 {
        return None;
    }

    let mut best: Option<PolylineHit> = None;
    for pair in line.0.windows(2) {
        let a = LatLon::new(pair[0].y, pair[0].x);
        let b = LatLon::new(pair[1].y, pair[1].x);
        let Some(hit) = closest_point_on_edge(point, a, b) else {
            continue;
        };
        if best.as_ref().map_or(true, |cur| hit.distance_m < cur.distance_m) {
            best = Some(hit);
        }
    }
    best
}

/// Closest point on a single edge, or None for a zero-length edge.
fn closest_point_on_edge(point: LatLon, a: LatLon, b: LatLon) -> Option<PolylineHit> {
    // The query point is the origin of the local frame, so (p - a) = -a.
    let (ax, ay) = geodesy::to_local_meters(point, a);
    let (bx, by) = geodesy::to_local_meters(point, b);
    let dx = bx - ax;
    let dy = by - ay;

    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return None;
    }

    let t = ((-ax) * dx + (-ay) * dy) / len_sq;
    let t = t.clamp(0.0, 1.0);

    let qx = ax + t * dx;
    let qy = ay + t * dy;

    Some(PolylineHit {
        snapped: geodesy::from_local_meters(point, qx, qy),
        distance_m: (qx * qx + qy * qy).sqrt(),
        bearing_deg: geodesy::bearing_degrees(a, b),
    })
}
