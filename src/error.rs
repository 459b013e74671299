use thiserror::Error;

/// Road index error types
///
/// Codec and I/O errors propagate out of `update` to the caller; the engine
/// does not attempt recovery, but a subsequent call retries the same tiles.
/// "No match" and "no next road" are expressed as `None`, never as errors.
#[derive(Error, Debug)]
pub enum RoadIndexError {
    /// Framing truncation, wrong magic, out-of-range internal indices,
    /// or a malformed string offset table.
    #[error("invalid chunk header: {0}")]
    InvalidHeader(&'static str),

    /// Unknown container or payload version, or unknown compression code.
    #[error("unsupported chunk version or compression code {0}")]
    UnsupportedVersion(u16),

    /// The decompressor produced no bytes or disagreed with the declared
    /// uncompressed size.
    #[error("chunk payload decompression failed")]
    DecompressionFailed,

    /// Transport or status failure from the chunk fetcher.
    #[error("chunk fetch failed: {0}")]
    FetchFailed(String),

    /// Filesystem failure from the chunk store.
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RoadIndexError>;
