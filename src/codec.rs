//! Binary codec for the chunk container format.
//!
//! Two nested frames, all integers little-endian, floats IEEE-754 LE:
//!
//! ```text
//! container:  magic "IARC" | version u16 | compression u16 | uncompSize u32 | payload
//! payload:    magic "IAR1" | version u16 | padding u16
//!             originLat f64 | originLon f64 | cellSize f32 | gridW u16 | gridH u16
//!             strings_n nodes_n segments_n shapes_n nodeEdges_n cellEntries_n cellSegments_n  (u32 each)
//!             stringBytes u32
//!             stringOffsets u32 x (strings_n + 1)
//!             stringData   u8  x stringBytes
//!             nodes        { latE7 i32, lonE7 i32, edgeStart u32, edgeCount u16, pad u16 }
//!             segments     { nameIdx u32, nodeA u32, nodeB u32, shapeStart u32,
//!                            shapeCount u16, flags u16, bAB i16, bBA i16 }
//!             shapes       { latE7 i32, lonE7 i32 }
//!             nodeEdges    u32 x nodeEdges_n
//!             cellEntries  { cellId u32, segStart u32, segCount u16, pad u16 }   (sorted by cellId)
//!             cellSegments u32 x cellSegments_n
//! ```
//!
//! Compression codepoint 0 is raw, 1 is LZFSE; codepoint 1 is never
//! reinterpreted as anything else. Unknown segment flag bits round-trip
//! unchanged.

use crate::chunk::{CellEntry, Chunk, ChunkNode, ChunkSegment, ShapePoint};
use crate::error::{Result, RoadIndexError};

const CONTAINER_MAGIC: [u8; 4] = *b"IARC";
const PAYLOAD_MAGIC: [u8; 4] = *b"IAR1";
const FORMAT_VERSION: u16 = 1;

/// Compression codepoint: payload stored as-is.
pub const COMPRESSION_RAW: u16 = 0;
/// Compression codepoint: payload is an LZFSE stream of `uncompSize` bytes.
pub const COMPRESSION_LZFSE: u16 = 1;

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(RoadIndexError::InvalidHeader("truncated frame"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

/// Decode a chunk from raw container bytes.
pub fn decode_chunk(bytes: &[u8]) -> Result<Chunk> {
    let mut r = Reader::new(bytes);

    if r.take(4)? != CONTAINER_MAGIC {
        return Err(RoadIndexError::InvalidHeader("bad container magic"));
    }
    let version = r.u16()?;
    if version != FORMAT_VERSION {
        return Err(RoadIndexError::UnsupportedVersion(version));
    }
    let compression = r.u16()?;
    let uncomp_size = r.u32()?;
    let payload = &bytes[r.pos..];

    match compression {
        COMPRESSION_RAW => parse_payload(payload),
        COMPRESSION_LZFSE => {
            let mut decompressed = Vec::with_capacity(uncomp_size as usize);
            let n = lzfse_rust::LzfseDecoder::default()
                .decode_bytes(payload, &mut decompressed)
                .map_err(|_| RoadIndexError::DecompressionFailed)?;
            if n == 0 || decompressed.len() != uncomp_size as usize {
                return Err(RoadIndexError::DecompressionFailed);
            }
            parse_payload(&decompressed)
        }
        other => Err(RoadIndexError::UnsupportedVersion(other)),
    }
}

fn parse_payload(payload: &[u8]) -> Result<Chunk> {
    let mut r = Reader::new(payload);

    if r.take(4)? != PAYLOAD_MAGIC {
        return Err(RoadIndexError::InvalidHeader("bad payload magic"));
    }
    let version = r.u16()?;
    if version != FORMAT_VERSION {
        return Err(RoadIndexError::UnsupportedVersion(version));
    }
    r.u16()?; // padding

    let origin_lat = r.f64()?;
    let origin_lon = r.f64()?;
    let cell_size_m = r.f32()?;
    let grid_width = r.u16()?;
    let grid_height = r.u16()?;
    if !(cell_size_m > 0.0) || grid_width == 0 || grid_height == 0 {
        return Err(RoadIndexError::InvalidHeader("bad grid dimensions"));
    }

    let strings_n = r.u32()? as usize;
    let nodes_n = r.u32()? as usize;
    let segments_n = r.u32()? as usize;
    let shapes_n = r.u32()? as usize;
    let node_edges_n = r.u32()? as usize;
    let cell_entries_n = r.u32()? as usize;
    let cell_segments_n = r.u32()? as usize;
    let string_bytes = r.u32()?;

    // String table: offsets are monotonic byte positions into stringData,
    // with a trailing sentinel equal to stringBytes.
    let mut offsets = Vec::with_capacity(strings_n + 1);
    for _ in 0..strings_n + 1 {
        offsets.push(r.u32()?);
    }
    let monotonic = offsets.windows(2).all(|w| w[0] <= w[1]);
    if !monotonic || offsets[strings_n] != string_bytes {
        return Err(RoadIndexError::InvalidHeader("bad string offsets"));
    }
    let string_data = r.take(string_bytes as usize)?;
    let mut strings = Vec::with_capacity(strings_n);
    for w in offsets.windows(2) {
        let s = std::str::from_utf8(&string_data[w[0] as usize..w[1] as usize])
            .map_err(|_| RoadIndexError::InvalidHeader("string data not UTF-8"))?;
        strings.push(s.to_string());
    }

    let mut nodes = Vec::with_capacity(nodes_n);
    for _ in 0..nodes_n {
        let node = ChunkNode {
            lat_e7: r.i32()?,
            lon_e7: r.i32()?,
            edge_start: r.u32()?,
            edge_count: r.u16()?,
        };
        r.u16()?; // padding
        if node.edge_start as u64 + node.edge_count as u64 > node_edges_n as u64 {
            return Err(RoadIndexError::InvalidHeader("node edge window out of range"));
        }
        nodes.push(node);
    }

    let mut segments = Vec::with_capacity(segments_n);
    for _ in 0..segments_n {
        let seg = ChunkSegment {
            name_idx: r.u32()?,
            node_a: r.u32()?,
            node_b: r.u32()?,
            shape_start: r.u32()?,
            shape_count: r.u16()?,
            flags: r.u16()?,
            bearing_ab: r.i16()?,
            bearing_ba: r.i16()?,
        };
        if seg.node_a as usize >= nodes_n || seg.node_b as usize >= nodes_n {
            return Err(RoadIndexError::InvalidHeader("segment node index out of range"));
        }
        if seg.shape_count > 0 && seg.shape_start as u64 + seg.shape_count as u64 > shapes_n as u64 {
            return Err(RoadIndexError::InvalidHeader("segment shape window out of range"));
        }
        segments.push(seg);
    }

    let mut shapes = Vec::with_capacity(shapes_n);
    for _ in 0..shapes_n {
        shapes.push(ShapePoint { lat_e7: r.i32()?, lon_e7: r.i32()? });
    }

    let mut node_edges = Vec::with_capacity(node_edges_n);
    for _ in 0..node_edges_n {
        let seg_index = r.u32()?;
        if seg_index as usize >= segments_n {
            return Err(RoadIndexError::InvalidHeader("node edge segment index out of range"));
        }
        node_edges.push(seg_index);
    }

    let mut cell_entries: Vec<CellEntry> = Vec::with_capacity(cell_entries_n);
    for _ in 0..cell_entries_n {
        let entry = CellEntry { cell_id: r.u32()?, seg_start: r.u32()?, seg_count: r.u16()? };
        r.u16()?; // padding
        if entry.seg_start as u64 + entry.seg_count as u64 > cell_segments_n as u64 {
            return Err(RoadIndexError::InvalidHeader("cell segment window out of range"));
        }
        // lookup is a binary search; duplicates would make windows ambiguous
        if let Some(prev) = cell_entries.last() {
            if prev.cell_id >= entry.cell_id {
                return Err(RoadIndexError::InvalidHeader("cell entries not sorted"));
            }
        }
        cell_entries.push(entry);
    }

    let mut cell_segments = Vec::with_capacity(cell_segments_n);
    for _ in 0..cell_segments_n {
        let seg_index = r.u32()?;
        if seg_index as usize >= segments_n {
            return Err(RoadIndexError::InvalidHeader("cell segment index out of range"));
        }
        cell_segments.push(seg_index);
    }

    Ok(Chunk {
        origin_lat,
        origin_lon,
        cell_size_m,
        grid_width,
        grid_height,
        strings,
        nodes,
        segments,
        shapes,
        node_edges,
        cell_entries,
        cell_segments,
    })
}

/// Encode a chunk into container bytes with the given compression codepoint.
pub fn encode_chunk(chunk: &Chunk, compression: u16) -> Result<Vec<u8>> {
    let payload = encode_payload(chunk)?;
    if payload.len() > u32::MAX as usize {
        return Err(RoadIndexError::InvalidHeader("payload exceeds container size field"));
    }

    let body = match compression {
        COMPRESSION_RAW => payload.clone(),
        COMPRESSION_LZFSE => {
            let mut compressed = Vec::new();
            lzfse_rust::LzfseEncoder::default().encode_bytes(&payload, &mut compressed)?;
            compressed
        }
        other => return Err(RoadIndexError::UnsupportedVersion(other)),
    };

    let mut out = Vec::with_capacity(12 + body.len());
    out.extend_from_slice(&CONTAINER_MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&compression.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

fn encode_payload(chunk: &Chunk) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&PAYLOAD_MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // padding

    out.extend_from_slice(&chunk.origin_lat.to_le_bytes());
    out.extend_from_slice(&chunk.origin_lon.to_le_bytes());
    out.extend_from_slice(&chunk.cell_size_m.to_le_bytes());
    out.extend_from_slice(&chunk.grid_width.to_le_bytes());
    out.extend_from_slice(&chunk.grid_height.to_le_bytes());

    let string_bytes: usize = chunk.strings.iter().map(String::len).sum();
    out.extend_from_slice(&(chunk.strings.len() as u32).to_le_bytes());
    out.extend_from_slice(&(chunk.nodes.len() as u32).to_le_bytes());
    out.extend_from_slice(&(chunk.segments.len() as u32).to_le_bytes());
    out.extend_from_slice(&(chunk.shapes.len() as u32).to_le_bytes());
    out.extend_from_slice(&(chunk.node_edges.len() as u32).to_le_bytes());
    out.extend_from_slice(&(chunk.cell_entries.len() as u32).to_le_bytes());
    out.extend_from_slice(&(chunk.cell_segments.len() as u32).to_le_bytes());
    out.extend_from_slice(&(string_bytes as u32).to_le_bytes());

    let mut offset = 0u32;
    for s in &chunk.strings {
        out.extend_from_slice(&offset.to_le_bytes());
        offset += s.len() as u32;
    }
    out.extend_from_slice(&offset.to_le_bytes());
    for s in &chunk.strings {
        out.extend_from_slice(s.as_bytes());
    }

    for node in &chunk.nodes {
        out.extend_from_slice(&node.lat_e7.to_le_bytes());
        out.extend_from_slice(&node.lon_e7.to_le_bytes());
        out.extend_from_slice(&node.edge_start.to_le_bytes());
        out.extend_from_slice(&node.edge_count.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // padding
    }

    for seg in &chunk.segments {
        out.extend_from_slice(&seg.name_idx.to_le_bytes());
        out.extend_from_slice(&seg.node_a.to_le_bytes());
        out.extend_from_slice(&seg.node_b.to_le_bytes());
        out.extend_from_slice(&seg.shape_start.to_le_bytes());
        out.extend_from_slice(&seg.shape_count.to_le_bytes());
        out.extend_from_slice(&seg.flags.to_le_bytes());
        out.extend_from_slice(&seg.bearing_ab.to_le_bytes());
        out.extend_from_slice(&seg.bearing_ba.to_le_bytes());
    }

    for shape in &chunk.shapes {
        out.extend_from_slice(&shape.lat_e7.to_le_bytes());
        out.extend_from_slice(&shape.lon_e7.to_le_bytes());
    }

    for &edge in &chunk.node_edges {
        out.extend_from_slice(&edge.to_le_bytes());
    }

    for entry in &chunk.cell_entries {
        out.extend_from_slice(&entry.cell_id.to_le_bytes());
        out.extend_from_slice(&entry.seg_start.to_le_bytes());
        out.extend_from_slice(&entry.seg_count.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // padding
    }

    for &seg_index in &chunk.cell_segments {
        out.extend_from_slice(&seg_index.to_le_bytes());
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{cell_id, SEG_FLAG_LINK, SEG_FLAG_ONEWAY};

    fn sample_chunk() -> Chunk {
        Chunk {
            origin_lat: 40.0,
            origin_lon: -73.01,
            cell_size_m: 150.0,
            grid_width: 12,
            grid_height: 10,
            strings: vec!["".to_string(), "Main St".to_string(), "Cross St".to_string()],
            nodes: vec![
                ChunkNode { lat_e7: 400_000_000, lon_e7: -730_006_000, edge_start: 0, edge_count: 1 },
                ChunkNode { lat_e7: 400_000_000, lon_e7: -730_000_000, edge_start: 1, edge_count: 2 },
                ChunkNode { lat_e7: 399_994_000, lon_e7: -730_000_000, edge_start: 3, edge_count: 1 },
            ],
            segments: vec![
                ChunkSegment {
                    name_idx: 1,
                    node_a: 0,
                    node_b: 1,
                    shape_start: 0,
                    shape_count: 3,
                    flags: SEG_FLAG_ONEWAY | 0x8000, // reserved high bit must survive
                    bearing_ab: 90,
                    bearing_ba: 270,
                },
                ChunkSegment {
                    name_idx: 2,
                    node_a: 1,
                    node_b: 2,
                    shape_start: 0,
                    shape_count: 0,
                    flags: SEG_FLAG_LINK,
                    bearing_ab: 175,
                    bearing_ba: 355,
                },
            ],
            shapes: vec![
                ShapePoint { lat_e7: 400_000_000, lon_e7: -730_006_000 },
                ShapePoint { lat_e7: 400_000_200, lon_e7: -730_003_000 },
                ShapePoint { lat_e7: 400_000_000, lon_e7: -730_000_000 },
            ],
            node_edges: vec![0, 0, 1, 1],
            cell_entries: vec![
                CellEntry { cell_id: cell_id(2, 3), seg_start: 0, seg_count: 2 },
                CellEntry { cell_id: cell_id(4, 1), seg_start: 2, seg_count: 1 },
            ],
            cell_segments: vec![0, 1, 1],
        }
    }

    #[test]
    fn test_roundtrip_raw() {
        let chunk = sample_chunk();
        let bytes = encode_chunk(&chunk, COMPRESSION_RAW).unwrap();
        let decoded = decode_chunk(&bytes).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn test_roundtrip_lzfse() {
        let chunk = sample_chunk();
        let bytes = encode_chunk(&chunk, COMPRESSION_LZFSE).unwrap();
        let decoded = decode_chunk(&bytes).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn test_reserved_flag_bits_survive() {
        let chunk = sample_chunk();
        let bytes = encode_chunk(&chunk, COMPRESSION_RAW).unwrap();
        let decoded = decode_chunk(&bytes).unwrap();
        assert_eq!(decoded.segments[0].flags & 0x8000, 0x8000);
    }

    #[test]
    fn test_bad_container_magic() {
        let mut bytes = encode_chunk(&sample_chunk(), COMPRESSION_RAW).unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode_chunk(&bytes), Err(RoadIndexError::InvalidHeader(_))));
    }

    #[test]
    fn test_unsupported_container_version() {
        let mut bytes = encode_chunk(&sample_chunk(), COMPRESSION_RAW).unwrap();
        bytes[4] = 2;
        assert!(matches!(decode_chunk(&bytes), Err(RoadIndexError::UnsupportedVersion(2))));
    }

    #[test]
    fn test_unsupported_compression_code() {
        let mut bytes = encode_chunk(&sample_chunk(), COMPRESSION_RAW).unwrap();
        bytes[6] = 3;
        assert!(matches!(decode_chunk(&bytes), Err(RoadIndexError::UnsupportedVersion(3))));
    }

    #[test]
    fn test_garbage_lzfse_stream_fails() {
        // A raw payload relabeled as LZFSE must not decode
        let mut bytes = encode_chunk(&sample_chunk(), COMPRESSION_RAW).unwrap();
        bytes[6] = COMPRESSION_LZFSE as u8;
        assert!(matches!(decode_chunk(&bytes), Err(RoadIndexError::DecompressionFailed)));
    }

    #[test]
    fn test_truncated_container() {
        let bytes = encode_chunk(&sample_chunk(), COMPRESSION_RAW).unwrap();
        assert!(matches!(decode_chunk(&bytes[..3]), Err(RoadIndexError::InvalidHeader(_))));
        assert!(matches!(decode_chunk(&bytes[..10]), Err(RoadIndexError::InvalidHeader(_))));
    }

    #[test]
    fn test_truncated_payload_arrays() {
        let bytes = encode_chunk(&sample_chunk(), COMPRESSION_RAW).unwrap();
        let cut = bytes.len() - 5;
        assert!(matches!(decode_chunk(&bytes[..cut]), Err(RoadIndexError::InvalidHeader(_))));
    }

    #[test]
    fn test_bad_string_offsets() {
        let mut bytes = encode_chunk(&sample_chunk(), COMPRESSION_RAW).unwrap();
        // container header is 12 bytes, payload fixed header is 64; bumping
        // the first offset above the second breaks monotonicity
        bytes[12 + 64] = 7;
        assert!(matches!(decode_chunk(&bytes), Err(RoadIndexError::InvalidHeader(_))));
    }

    #[test]
    fn test_out_of_range_segment_node() {
        let mut chunk = sample_chunk();
        chunk.segments[1].node_b = 99;
        let bytes = encode_chunk(&chunk, COMPRESSION_RAW).unwrap();
        assert!(matches!(decode_chunk(&bytes), Err(RoadIndexError::InvalidHeader(_))));
    }

    #[test]
    fn test_unsorted_cell_entries_rejected() {
        let mut chunk = sample_chunk();
        chunk.cell_entries.swap(0, 1);
        let bytes = encode_chunk(&chunk, COMPRESSION_RAW).unwrap();
        assert!(matches!(decode_chunk(&bytes), Err(RoadIndexError::InvalidHeader(_))));
    }

    #[test]
    fn test_empty_name_index_out_of_range_tolerated() {
        // A name index past the string table decodes fine and reads as ""
        let mut chunk = sample_chunk();
        chunk.segments[0].name_idx = 42;
        let bytes = encode_chunk(&chunk, COMPRESSION_RAW).unwrap();
        let decoded = decode_chunk(&bytes).unwrap();
        assert_eq!(decoded.name(decoded.segments[0].name_idx), "");
    }
}
