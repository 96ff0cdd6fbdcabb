use thiserror::Error;

/// Raised when a `FrameSource` cannot deliver the requested frames.
///
/// Short reads are handled by the chunk driver (converted to silence plus a
/// logged warning); hard failures propagate through this type.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("read past end of source: requested frames {start}..{end}, have {available}")]
    OutOfRange { start: u64, end: u64, available: u64 },

    #[error("decoder failure: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raised when input audio has a shape the pipeline cannot process.
#[derive(Error, Debug)]
pub enum ShapeError {
    #[error("unsupported channel count: {0}")]
    ChannelCount(usize),

    #[error("interleaved buffer of {len} samples is not a multiple of {channels} channels")]
    RaggedFrames { len: usize, channels: usize },
}

/// Raised when a user-supplied chunk cache reports a storage failure on `put`.
///
/// The rendered audio for that call is still returned to the caller; only the
/// caching side effect is lost.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache storage failure: {0}")]
    Storage(String),
}
