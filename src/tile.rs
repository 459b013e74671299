use std::fmt::{Display, Formatter};

use crate::geodesy::LatLon;

/// Tile identifier in the standard web-mercator tiling (slippy map tilenames).
///
/// For zoom `z`, `x` and `y` are in `[0, 2^z - 1]`.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct TileId {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileId {
    /// Converts a WGS84 point to tile coordinates at the given zoom level.
    ///
    /// Formula:
    ///   n = 2^z
    ///   x = floor((lon + 180) / 360 * n)
    ///   y = floor((1 - ln(tan(lat_rad) + sec(lat_rad)) / π) / 2 * n)
    pub fn from_lat_lon(point: LatLon, z: u8) -> Self {
        // Clamp lat to the web-mercator valid range (tan singularity at poles)
        let lat = point.lat.clamp(-85.05112878, 85.05112878);

        // Wrap lon to [-180, 180]
        let lon = ((point.lon + 180.0) % 360.0 + 360.0) % 360.0 - 180.0;

        let n = 2u32.pow(z as u32) as f64;

        let x = ((lon + 180.0) / 360.0 * n).floor() as u32;

        let lat_rad = lat.to_radians();
        let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0
            * n)
            .floor() as u32;

        // Clamp to valid tile range
        let max_tile = 2u32.pow(z as u32) - 1;
        TileId {
            z,
            x: x.min(max_tile),
            y: y.min(max_tile),
        }
    }
}

impl Display for TileId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}
