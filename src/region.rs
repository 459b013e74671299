//! Region directory: which chunk origin serves a geographic point.

use crate::geodesy::{self, LatLon};
use crate::tile::TileId;

/// Geographic region served by one chunk origin.
#[derive(Clone, Debug)]
pub struct Region {
    /// Stable identifier, used in cache keys and paths.
    pub id: String,
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
    /// Base URL of the region's chunk origin.
    pub base_url: String,
    /// Zoom level at which the region is subdivided into chunks.
    pub chunk_zoom: u8,
}

impl Region {
    /// Whether the point lies inside the region; inclusive on all four sides.
    pub fn contains(&self, p: LatLon) -> bool {
        p.lat >= self.min_lat && p.lat <= self.max_lat && p.lon >= self.min_lon && p.lon <= self.max_lon
    }
}

/// Ordered list of regions; the first region containing a point wins.
#[derive(Clone, Debug, Default)]
pub struct RegionDirectory {
    regions: Vec<Region>,
}

impl RegionDirectory {
    pub fn new(regions: Vec<Region>) -> Self {
        RegionDirectory { regions }
    }

    pub fn region_for(&self, p: LatLon) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(p))
    }
}

/// Tile ids at `zoom` covering `radius_m` meters around `center`, sorted.
///
/// The neighborhood is the tile range spanned by the bounding box
/// `center ± radius` in local meters. Near the antimeridian the range
/// inverts; that folds down to just the center tile.
pub fn tile_neighborhood(center: LatLon, zoom: u8, radius_m: f64) -> Vec<TileId> {
    let dlat = radius_m / geodesy::meters_per_degree_lat(center.lat);
    let dlon = radius_m / geodesy::meters_per_degree_lon(center.lat);

    // Tile y grows southward, so the north-west corner carries both minima
    let lo = TileId::from_lat_lon(LatLon::new(center.lat + dlat, center.lon - dlon), zoom);
    let hi = TileId::from_lat_lon(LatLon::new(center.lat - dlat, center.lon + dlon), zoom);
    if lo.x > hi.x || lo.y > hi.y {
        return vec![TileId::from_lat_lon(center, zoom)];
    }

    let mut tiles = Vec::with_capacity(((hi.x - lo.x + 1) * (hi.y - lo.y + 1)) as usize);
    for x in lo.x..=hi.x {
        for y in lo.y..=hi.y {
            tiles.push(TileId { z: zoom, x, y });
        }
    }
    tiles
}
