//! Chunk byte transport from region origins.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{Result, RoadIndexError};
use crate::region::Region;
use crate::tile::TileId;

/// Capability boundary for fetching chunk bytes.
///
/// `Ok(None)` means the tile is not present at the origin; the engine
/// skips it and matches on the rest of the neighborhood. Transport and
/// status failures are fatal to the in-flight update only. A fetcher is
/// expected to enforce its own deadline; the engine imposes none, and
/// neither retries nor rate-limits beyond its update interval.
#[async_trait]
pub trait ChunkFetcher: Send + Sync {
    async fn fetch(&self, region: &Region, tile: TileId) -> Result<Option<Vec<u8>>>;
}

/// HTTP fetcher for chunk origins.
///
/// Requests `{base_url}/{z}/{x}/{y}.iarc` and returns the body bytes;
/// HTTP 404 maps to "not present at origin".
pub struct HttpChunkFetcher {
    client: reqwest::Client,
}

impl HttpChunkFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("road_index_rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        HttpChunkFetcher { client }
    }

    fn chunk_url(region: &Region, tile: TileId) -> String {
        format!("{}/{}/{}/{}.iarc", region.base_url.trim_end_matches('/'), tile.z, tile.x, tile.y)
    }
}

impl Default for HttpChunkFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkFetcher for HttpChunkFetcher {
    async fn fetch(&self, region: &Region, tile: TileId) -> Result<Option<Vec<u8>>> {
        let url = Self::chunk_url(region, tile);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RoadIndexError::FetchFailed(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RoadIndexError::FetchFailed(format!("HTTP {} for {}", status.as_u16(), url)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RoadIndexError::FetchFailed(e.to_string()))?;
        Ok(Some(bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_url_layout() {
        let region = Region {
            id: "nyc".to_string(),
            min_lat: 40.0,
            min_lon: -74.5,
            max_lat: 41.0,
            max_lon: -73.0,
            base_url: "https://chunks.example.com/nyc/".to_string(),
            chunk_zoom: 14,
        };
        let url = HttpChunkFetcher::chunk_url(&region, TileId { z: 14, x: 4869, y: 6202 });
        assert_eq!(url, "https://chunks.example.com/nyc/14/4869/6202.iarc");
    }
}
