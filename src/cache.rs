//! Disk-backed chunk store with a JSON manifest and byte-budget LRU eviction.
//!
//! # Layout
//! ```text
//! {root}/manifest.json
//! {root}/{regionId}/{z}/{x}/{y}.iarc
//! ```
//!
//! Chunk files hold the raw container bytes, unmodified. The manifest maps
//! `"{regionId}_{z}_{x}_{y}"` to size and last-access time; the sum of the
//! recorded sizes never exceeds the configured budget after a save.
//!
//! # Concurrency
//! One `tokio::sync::Mutex` guards the manifest and every file operation,
//! so concurrent callers never observe a partially applied load, save, or
//! eviction. File and manifest writes go through a temp-then-rename step.
//! A store must not be shared across processes; there is no file locking.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

use crate::chunk::Chunk;
use crate::codec;
use crate::error::Result;
use crate::region::Region;
use crate::tile::TileId;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct ManifestEntry {
    size: u64,
    #[serde(rename = "lastAccess")]
    last_access: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    entries: HashMap<String, ManifestEntry>,
}

impl Manifest {
    fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }
}

/// Content-addressed disk store for chunk container bytes.
pub struct ChunkStore {
    root: PathBuf,
    max_bytes: u64,
    manifest: Mutex<Manifest>,
}

impl ChunkStore {
    /// Open a store rooted at `root`, creating the directory if needed and
    /// loading an existing manifest.
    pub async fn open(root: impl Into<PathBuf>, max_bytes: u64) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let manifest_path = root.join("manifest.json");
        let manifest = match tokio::fs::read(&manifest_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Manifest::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(ChunkStore { root, max_bytes, manifest: Mutex::new(manifest) })
    }

    fn key(region: &Region, tile: TileId) -> String {
        format!("{}_{}_{}_{}", region.id, tile.z, tile.x, tile.y)
    }

    fn chunk_path(&self, region: &Region, tile: TileId) -> PathBuf {
        self.root
            .join(&region.id)
            .join(tile.z.to_string())
            .join(tile.x.to_string())
            .join(format!("{}.iarc", tile.y))
    }

    /// Load and decode a cached chunk; `None` when the tile is not cached.
    ///
    /// A hit refreshes the entry's last-access time and persists the
    /// manifest before returning.
    pub async fn load(&self, region: &Region, tile: TileId) -> Result<Option<Chunk>> {
        let mut manifest = self.manifest.lock().await;

        let path = self.chunk_path(region, tile);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let chunk = codec::decode_chunk(&bytes)?;

        let entry = manifest
            .entries
            .entry(Self::key(region, tile))
            .or_insert(ManifestEntry { size: bytes.len() as u64, last_access: 0.0 });
        entry.last_access = now_seconds();
        self.persist(&manifest).await?;

        Ok(Some(chunk))
    }

    /// Write container bytes for a tile, enforce the byte budget, persist
    /// the manifest.
    pub async fn save(&self, region: &Region, tile: TileId, bytes: &[u8]) -> Result<()> {
        let mut manifest = self.manifest.lock().await;

        let path = self.chunk_path(region, tile);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("iarc.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        manifest.entries.insert(
            Self::key(region, tile),
            ManifestEntry { size: bytes.len() as u64, last_access: now_seconds() },
        );
        self.evict_over_budget(&mut manifest).await?;
        self.persist(&manifest).await?;
        Ok(())
    }

    /// Total bytes currently accounted in the manifest.
    pub async fn total_bytes(&self) -> u64 {
        self.manifest.lock().await.total_bytes()
    }

    /// Keys currently present, for state inspection.
    pub async fn cached_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.manifest.lock().await.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop least-recently-accessed entries until the budget holds.
    async fn evict_over_budget(&self, manifest: &mut Manifest) -> Result<()> {
        let mut total = manifest.total_bytes();
        if total <= self.max_bytes {
            return Ok(());
        }

        let mut by_age: Vec<(String, ManifestEntry)> =
            manifest.entries.iter().map(|(k, v)| (k.clone(), *v)).collect();
        by_age.sort_by(|a, b| {
            a.1.last_access.partial_cmp(&b.1.last_access).unwrap_or(std::cmp::Ordering::Equal)
        });

        for (key, entry) in by_age {
            if total <= self.max_bytes {
                break;
            }
            if let Some(path) = self.path_for_key(&key) {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            manifest.entries.remove(&key);
            total -= entry.size;
            log::debug!("evicted cached chunk {}", key);
        }
        Ok(())
    }

    /// Reconstruct the file path for a manifest key.
    ///
    /// Keys end with `_{z}_{x}_{y}`; region ids may themselves contain
    /// underscores, so the split runs from the right.
    fn path_for_key(&self, key: &str) -> Option<PathBuf> {
        let mut parts = key.rsplitn(4, '_');
        let y = parts.next()?;
        let x = parts.next()?;
        let z = parts.next()?;
        let region = parts.next()?;
        Some(self.root.join(region).join(z).join(x).join(format!("{}.iarc", y)))
    }

    async fn persist(&self, manifest: &Manifest) -> Result<()> {
        let body = serde_json::to_vec_pretty(manifest)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
        let tmp = self.root.join("manifest.json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, self.root.join("manifest.json")).await?;
        Ok(())
    }
}

fn now_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{CellEntry, Chunk};
    use std::env;
    use std::fs;
    use tokio::time::{sleep, Duration};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("road_index_cache_{}", name));
        if dir.exists() {
            fs::remove_dir_all(&dir).unwrap();
        }
        dir
    }

    fn test_region() -> Region {
        Region {
            id: "nyc".to_string(),
            min_lat: 40.0,
            min_lon: -74.5,
            max_lat: 41.0,
            max_lon: -73.0,
            base_url: "https://chunks.example.com/nyc".to_string(),
            chunk_zoom: 14,
        }
    }

    fn minimal_chunk() -> Chunk {
        Chunk {
            origin_lat: 40.0,
            origin_lon: -74.0,
            cell_size_m: 100.0,
            grid_width: 1,
            grid_height: 1,
            strings: Vec::new(),
            nodes: Vec::new(),
            segments: Vec::new(),
            shapes: Vec::new(),
            node_edges: Vec::new(),
            cell_entries: vec![CellEntry { cell_id: 0, seg_start: 0, seg_count: 0 }],
            cell_segments: Vec::new(),
        }
    }

    /// Container bytes for a decodable chunk, zero-padded to a fixed size
    /// so eviction math is exact. Trailing container bytes are ignored by
    /// the decoder.
    fn padded_chunk_bytes(size: usize) -> Vec<u8> {
        let mut bytes = codec::encode_chunk(&minimal_chunk(), codec::COMPRESSION_RAW).unwrap();
        assert!(bytes.len() <= size, "padding target too small: {}", bytes.len());
        bytes.resize(size, 0);
        bytes
    }

    fn tile(x: u32, y: u32) -> TileId {
        TileId { z: 14, x, y }
    }

    #[tokio::test]
    async fn test_load_missing_tile_is_none() {
        let dir = scratch_dir("missing");
        let store = ChunkStore::open(&dir, 10_000).await.unwrap();
        let loaded = store.load(&test_region(), tile(1, 1)).await.unwrap();
        assert!(loaded.is_none());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = scratch_dir("roundtrip");
        let store = ChunkStore::open(&dir, 10_000).await.unwrap();
        let region = test_region();

        let bytes = codec::encode_chunk(&minimal_chunk(), codec::COMPRESSION_RAW).unwrap();
        store.save(&region, tile(2, 3), &bytes).await.unwrap();

        // The chunk file holds the raw container bytes, unmodified
        let on_disk = fs::read(dir.join("nyc/14/2/3.iarc")).unwrap();
        assert_eq!(on_disk, bytes);

        let loaded = store.load(&region, tile(2, 3)).await.unwrap().expect("cached");
        assert_eq!(loaded, minimal_chunk());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_manifest_survives_reopen() {
        let dir = scratch_dir("reopen");
        let region = test_region();
        {
            let store = ChunkStore::open(&dir, 10_000).await.unwrap();
            store.save(&region, tile(2, 3), &padded_chunk_bytes(500)).await.unwrap();
        }
        let store = ChunkStore::open(&dir, 10_000).await.unwrap();
        assert_eq!(store.total_bytes().await, 500);
        assert_eq!(store.cached_keys().await, vec!["nyc_14_2_3".to_string()]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_budget_holds_after_any_save_sequence() {
        let dir = scratch_dir("budget");
        let store = ChunkStore::open(&dir, 3000).await.unwrap();
        let region = test_region();

        for i in 0..8u32 {
            store.save(&region, tile(i, 0), &padded_chunk_bytes(1000)).await.unwrap();
            assert!(store.total_bytes().await <= 3000, "budget exceeded after save {}", i);
            sleep(Duration::from_millis(5)).await;
        }
        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_lru_eviction_order() {
        let dir = scratch_dir("lru");
        let store = ChunkStore::open(&dir, 3000).await.unwrap();
        let region = test_region();
        let bytes = padded_chunk_bytes(1000);

        // T1..T3 fill the budget exactly
        for (i, t) in [tile(1, 0), tile(2, 0), tile(3, 0)].iter().enumerate() {
            store.save(&region, *t, &bytes).await.unwrap();
            assert_eq!(store.total_bytes().await, 1000 * (i as u64 + 1));
            sleep(Duration::from_millis(5)).await;
        }

        // T4 pushes T1 out
        store.save(&region, tile(4, 0), &bytes).await.unwrap();
        let keys = store.cached_keys().await;
        assert!(!keys.contains(&"nyc_14_1_0".to_string()), "oldest tile must go first");
        assert!(keys.contains(&"nyc_14_2_0".to_string()));
        assert!(!dir.join("nyc/14/1/0.iarc").exists(), "evicted file must be deleted");
        sleep(Duration::from_millis(5)).await;

        // Re-accessing T2 promotes it, so T5 evicts T3 next
        store.load(&region, tile(2, 0)).await.unwrap().expect("T2 still cached");
        sleep(Duration::from_millis(5)).await;
        store.save(&region, tile(5, 0), &bytes).await.unwrap();

        let keys = store.cached_keys().await;
        assert!(keys.contains(&"nyc_14_2_0".to_string()), "recently accessed tile survives");
        assert!(!keys.contains(&"nyc_14_3_0".to_string()), "stale tile is evicted next");
        assert_eq!(store.total_bytes().await, 3000);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_path_for_key_with_underscored_region() {
        let store = ChunkStore {
            root: PathBuf::from("/cache"),
            max_bytes: 0,
            manifest: Mutex::new(Manifest::default()),
        };
        let path = store.path_for_key("new_york_metro_14_2620_6332").unwrap();
        assert_eq!(path, PathBuf::from("/cache/new_york_metro/14/2620/6332.iarc"));
    }

    #[test]
    fn test_manifest_json_shape() {
        let mut manifest = Manifest::default();
        manifest
            .entries
            .insert("nyc_14_2_3".to_string(), ManifestEntry { size: 512, last_access: 1234.5 });
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["entries"]["nyc_14_2_3"]["size"], 512);
        assert_eq!(json["entries"]["nyc_14_2_3"]["lastAccess"], 1234.5);
    }
}
