//! Geometric matcher and next-road predictor over decoded chunks.
//!
//! Both operations are pure: they read a set of chunks and return owned
//! results that do not borrow the chunk arenas. Stability across updates
//! (hysteresis, rate limiting) lives in the engine, not here.

use crate::chunk::{cell_id, Chunk};
use crate::geodesy::{self, LatLon};
use crate::geometry;

/// Matcher and predictor tuning.
#[derive(Clone, Copy, Debug)]
pub struct MatcherConfig {
    /// Candidates farther than this from the receiver are dropped, meters.
    pub search_radius_m: f64,
    /// Score weight per degree of bearing difference.
    pub bearing_weight: f64,
    /// Candidates whose edge bearing differs more than this from the
    /// receiver heading are dropped, degrees.
    pub max_bearing_difference: f64,
    /// Forward nodes farther than this from the snap point produce no
    /// next-road, meters.
    pub next_distance_m: f64,
    /// Heading tolerance for the next-road candidate bearings, degrees.
    pub next_heading_tolerance: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig {
            search_radius_m: 70.0,
            bearing_weight: 1.4,
            max_bearing_difference: 60.0,
            next_distance_m: 160.0,
            next_heading_tolerance: 50.0,
        }
    }
}

/// Assignment of the receiver's position to one road segment.
///
/// `chunk_index` and `segment_index` are valid for the chunk set of the
/// update that produced the match; retained copies should rely on the
/// name and coordinates only.
#[derive(Clone, Debug)]
pub struct RoadIndexMatch {
    pub chunk_index: usize,
    pub segment_index: usize,
    pub name: String,
    pub distance_m: f64,
    pub bearing_deg: f64,
    pub snapped: LatLon,
    pub score: f64,
}

/// The most plausible next segment past the forward node.
///
/// `distance_m` carries the predictor score, not a plain distance.
#[derive(Clone, Debug)]
pub struct RoadIndexNext {
    pub name: String,
    pub segment_index: usize,
    pub distance_m: f64,
    pub confidence: f64,
}

/// Scores nearby segments by snap distance and bearing agreement.
pub struct RoadMatcher {
    config: MatcherConfig,
}

impl RoadMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        RoadMatcher { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Best match for a location over every chunk's 3x3 cell neighborhood.
    ///
    /// A segment listed in several scanned cells is scored identically each
    /// time, so duplicates are tolerated. Cells off the grid edge are
    /// skipped. Returns the minimum-score candidate, ties going to the
    /// first one encountered.
    pub fn match_on(
        &self,
        location: LatLon,
        heading: Option<f64>,
        chunks: &[Chunk],
    ) -> Option<RoadIndexMatch> {
        let mut best: Option<RoadIndexMatch> = None;

        for (chunk_index, chunk) in chunks.iter().enumerate() {
            let (cx, cy) = chunk.cell_at(location);
            for dx in -1i32..=1 {
                for dy in -1i32..=1 {
                    let ncx = cx as i32 + dx;
                    let ncy = cy as i32 + dy;
                    if ncx < 0
                        || ncy < 0
                        || ncx >= chunk.grid_width as i32
                        || ncy >= chunk.grid_height as i32
                    {
                        continue;
                    }

                    let Some((start, count)) = chunk.cell_lookup(cell_id(ncx as u16, ncy as u16))
                    else {
                        continue;
                    };

                    for &seg_index in chunk.cell_segment_ids(start, count) {
                        let Some(candidate) =
                            self.score_segment(location, heading, chunk, chunk_index, seg_index as usize)
                        else {
                            continue;
                        };
                        if best.as_ref().map_or(true, |b| candidate.score < b.score) {
                            best = Some(candidate);
                        }
                    }
                }
            }
        }

        best
    }

    fn score_segment(
        &self,
        location: LatLon,
        heading: Option<f64>,
        chunk: &Chunk,
        chunk_index: usize,
        segment_index: usize,
    ) -> Option<RoadIndexMatch> {
        let line = chunk.segment_polyline(segment_index);
        let hit = geometry::closest_point_on_polyline(location, &line)?;
        if hit.distance_m > self.config.search_radius_m {
            return None;
        }

        let bearing_diff = match heading {
            Some(h) => {
                let d = geodesy::angular_difference(h, hit.bearing_deg);
                if d > self.config.max_bearing_difference {
                    return None;
                }
                d
            }
            None => 0.0,
        };

        let seg = &chunk.segments[segment_index];
        Some(RoadIndexMatch {
            chunk_index,
            segment_index,
            name: chunk.name(seg.name_idx).to_string(),
            distance_m: hit.distance_m,
            bearing_deg: hit.bearing_deg,
            snapped: hit.snapped,
            score: hit.distance_m + self.config.bearing_weight * bearing_diff,
        })
    }

    /// Next road past the forward node of the current match.
    ///
    /// The forward node is whichever endpoint's reference bearing sits
    /// closer to the heading, ties going to node B. Outgoing segments that
    /// are the current segment or share its name (continuations of the same
    /// road) are skipped; the rest are scored by node distance, bearing
    /// divergence, and a flat penalty for link segments.
    pub fn match_next(
        &self,
        current: &RoadIndexMatch,
        heading: Option<f64>,
        chunk: &Chunk,
    ) -> Option<RoadIndexNext> {
        let heading = heading?;
        let seg = chunk.segments.get(current.segment_index)?;

        let toward_b = geodesy::angular_difference(heading, seg.bearing_ab as f64);
        let toward_a = geodesy::angular_difference(heading, seg.bearing_ba as f64);
        let forward_index = if toward_b <= toward_a { seg.node_b } else { seg.node_a };
        let forward = &chunk.nodes[forward_index as usize];
        let node_pos = forward.position();

        let d_node = geodesy::haversine_m(current.snapped, node_pos);
        if d_node > self.config.next_distance_m {
            return None;
        }
        let node_bearing = geodesy::bearing_degrees(current.snapped, node_pos);
        if geodesy::angular_difference(heading, node_bearing) > self.config.next_heading_tolerance {
            return None;
        }

        // The node must lie ahead: a 20 m probe along the heading and the
        // node vector must agree in the local frame at the snap point.
        let probe = geodesy::point_along_heading(current.snapped, heading, 20.0);
        let (px, py) = geodesy::to_local_meters(current.snapped, probe);
        let (nx, ny) = geodesy::to_local_meters(current.snapped, node_pos);
        if px * nx + py * ny <= 0.0 {
            return None;
        }

        let mut best: Option<RoadIndexNext> = None;
        for &edge in chunk.outgoing_edges(forward) {
            let cand_index = edge as usize;
            if cand_index == current.segment_index {
                continue;
            }
            let cand = &chunk.segments[cand_index];
            let cand_name = chunk.name(cand.name_idx);
            if cand_name == current.name {
                continue;
            }

            // Bearing away from the forward node along the candidate
            let away = if cand.node_a == forward_index { cand.bearing_ab } else { cand.bearing_ba };
            let diff = geodesy::angular_difference(heading, away as f64);
            if diff > self.config.next_heading_tolerance {
                continue;
            }

            let link_penalty = if cand.is_link() { 12.0 } else { 0.0 };
            let score = d_node + 0.8 * diff + link_penalty;
            if best.as_ref().map_or(true, |b| score < b.distance_m) {
                best = Some(RoadIndexNext {
                    name: cand_name.to_string(),
                    segment_index: cand_index,
                    distance_m: score,
                    confidence: (1.0 - diff / self.config.next_heading_tolerance).max(0.0),
                });
            }
        }
        best
    }
}
