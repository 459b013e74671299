//! On-device road index engine.
//!
//! Answers two questions about a moving receiver in near-real-time: which
//! road segment is it on, and which road will it meet next along its
//! heading. Road networks arrive as precompiled, compressed binary chunks
//! addressed by web-mercator tile; chunks are cached on disk under a byte
//! budget and fetched from a region origin when missing.

pub mod cache;
pub mod chunk;
pub mod codec;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod geodesy;
pub mod geometry;
pub mod matcher;
pub mod region;
pub mod tile;

pub use cache::ChunkStore;
pub use chunk::Chunk;
pub use engine::{EngineConfig, RoadIndexEngine};
pub use error::{Result, RoadIndexError};
pub use fetcher::{ChunkFetcher, HttpChunkFetcher};
pub use geodesy::LatLon;
pub use matcher::{MatcherConfig, RoadIndexMatch, RoadIndexNext, RoadMatcher};
pub use region::{Region, RegionDirectory};
pub use tile::TileId;
