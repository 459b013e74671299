//! Update controller: rate limiting, chunk residency, and match stability.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::ChunkStore;
use crate::codec;
use crate::error::Result;
use crate::fetcher::ChunkFetcher;
use crate::geodesy::LatLon;
use crate::matcher::{MatcherConfig, RoadIndexMatch, RoadIndexNext, RoadMatcher};
use crate::region::{self, RegionDirectory};

/// Engine tuning.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Updates arriving closer together than this return the previous
    /// match without touching disk or network.
    pub min_update_interval: Duration,
    /// Radius around the receiver whose chunk tiles are kept resident, meters.
    pub chunk_radius_m: f64,
    /// A challenger whose score beats the held match by more than this
    /// switches immediately.
    pub switch_score_delta: f64,
    /// Consecutive non-confirming observations required before a
    /// challenger wins without a score break.
    pub stable_count: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            min_update_interval: Duration::from_millis(700),
            chunk_radius_m: 1200.0,
            switch_score_delta: 6.0,
            stable_count: 2,
        }
    }
}

/// Mutable controller state; one instance per receiver.
#[derive(Debug, Default)]
struct ControllerState {
    last_update: Option<Instant>,
    last_match: Option<RoadIndexMatch>,
    stability_counter: u32,
}

impl ControllerState {
    /// Hysteresis against the previously accepted match.
    ///
    /// Re-confirming the held segment resets the counter, so a challenger
    /// has to outlast a fresh observation window; a kept challenger bumps
    /// the counter until it reaches the stable count, unless it breaks
    /// through early on score delta. Returns the accepted match and stores
    /// it as the new held state.
    fn accept(&mut self, best: RoadIndexMatch, config: &EngineConfig) -> RoadIndexMatch {
        let accepted = match &self.last_match {
            None => {
                self.stability_counter = 1;
                best
            }
            Some(prev)
                if prev.chunk_index == best.chunk_index
                    && prev.segment_index == best.segment_index =>
            {
                self.stability_counter = 0;
                best
            }
            Some(prev) if best.score + config.switch_score_delta < prev.score => {
                self.stability_counter = 1;
                best
            }
            Some(_) if self.stability_counter >= config.stable_count => {
                self.stability_counter = 1;
                best
            }
            Some(prev) => {
                self.stability_counter += 1;
                prev.clone()
            }
        };
        self.last_match = Some(accepted.clone());
        accepted
    }

    fn clear_match(&mut self) {
        self.last_match = None;
        self.stability_counter = 0;
    }
}

/// Road index engine over the binary chunk format.
///
/// # Architecture
/// Each `update` selects the region for the location, makes the chunk-tile
/// neighborhood resident (cache hit, or fetch + save + decode), matches,
/// filters the match through stability hysteresis, and predicts the next
/// road on the accepted match's chunk.
///
/// # Concurrency
/// One engine serves one receiver: `update` takes `&mut self` and is not
/// reentrant. The chunk store carries its own lock and may be shared
/// between engines. The neighborhood chunk set is transient per update;
/// retained state keeps only owned match data.
pub struct RoadIndexEngine {
    regions: RegionDirectory,
    store: Arc<ChunkStore>,
    fetcher: Arc<dyn ChunkFetcher>,
    matcher: RoadMatcher,
    config: EngineConfig,
    state: ControllerState,
}

impl RoadIndexEngine {
    pub fn new(
        regions: RegionDirectory,
        store: Arc<ChunkStore>,
        fetcher: Arc<dyn ChunkFetcher>,
        matcher_config: MatcherConfig,
        config: EngineConfig,
    ) -> Self {
        RoadIndexEngine {
            regions,
            store,
            fetcher,
            matcher: RoadMatcher::new(matcher_config),
            config,
            state: ControllerState::default(),
        }
    }

    /// One position update.
    ///
    /// May suspend on cache or fetch I/O; codec, fetch, and filesystem
    /// errors propagate and leave the held state untouched, so the next
    /// call retries the same tiles. A `(None, None)` return means the
    /// location is outside every region or nothing matched within radius;
    /// a rate-limited call returns the held match with no next-road.
    pub async fn update(
        &mut self,
        location: LatLon,
        heading: Option<f64>,
    ) -> Result<(Option<RoadIndexMatch>, Option<RoadIndexNext>)> {
        if let Some(last) = self.state.last_update {
            if last.elapsed() < self.config.min_update_interval {
                return Ok((self.state.last_match.clone(), None));
            }
        }
        self.state.last_update = Some(Instant::now());

        let Some(region) = self.regions.region_for(location) else {
            return Ok((None, None));
        };

        let tiles = region::tile_neighborhood(location, region.chunk_zoom, self.config.chunk_radius_m);
        let mut chunks = Vec::with_capacity(tiles.len());
        for tile in tiles {
            if let Some(chunk) = self.store.load(region, tile).await? {
                chunks.push(chunk);
                continue;
            }
            match self.fetcher.fetch(region, tile).await? {
                Some(bytes) => {
                    self.store.save(region, tile, &bytes).await?;
                    chunks.push(codec::decode_chunk(&bytes)?);
                }
                None => {
                    log::debug!("chunk tile {} absent at origin for region {}", tile, region.id);
                }
            }
        }

        let Some(best) = self.matcher.match_on(location, heading, &chunks) else {
            self.state.clear_match();
            return Ok((None, None));
        };

        let accepted = self.state.accept(best, &self.config);
        let next = chunks
            .get(accepted.chunk_index)
            .and_then(|chunk| self.matcher.match_next(&accepted, heading, chunk));
        Ok((Some(accepted), next))
    }

    /// The currently held match, if any.
    pub fn last_match(&self) -> Option<&RoadIndexMatch> {
        self.state.last_match.as_ref()
    }

    /// Current hysteresis counter, for state inspection.
    pub fn stability_counter(&self) -> u32 {
        self.state.stability_counter
    }
}
