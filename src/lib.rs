/// Auralis Mastering - Adaptive audio mastering core
///
/// Given a target recording, produces a mastered rendering whose loudness,
/// spectral balance, dynamics, and stereo image match an adaptive target
/// derived from content analysis. Components:
/// - ContentAnalyzer: per-window features (peak, RMS, crest, LUFS, spectrum, tempo, stereo)
/// - SpectrumMapper: feature vector -> spectrum position -> processing parameters
/// - PsychoacousticEQ: 26-band overlapped-FFT equalizer
/// - DynamicsEngine: soft-knee compressor / peak-enhancing expander
/// - StereoWidthAdjuster: M/S width control with loudness safety rules
/// - LoudnessStage: RMS boost, peak normalization, safety soft-clip
/// - ChunkDriver: overlapping 30s chunks with preserved state and crossfades
/// - ChunkCache / ProcessorFactory: bounded caches shared across requests

// Core DSP modules
pub mod analysis;
pub mod biquad;
pub mod buffer;
pub mod dynamics;
pub mod eq;
pub mod level;
pub mod loudness;
pub mod presets;
pub mod spectrum;
pub mod stereo;

// Pipeline and streaming driver
pub mod cache;
pub mod driver;
pub mod error;
pub mod factory;
pub mod pipeline;
pub mod source;

// Re-export main types for convenience
pub use analysis::{ContentAnalyzer, ContentProfile, GenreHint, InputLevelInfo, TrackFingerprint};
pub use buffer::AudioBuffer;
pub use cache::{CachedChunk, ChunkCache, ChunkKey, MemoryChunkCache};
pub use driver::{
    ChunkDriver, SharedChunkCache, CHUNK_DURATION_SECS, CONTEXT_DURATION_SECS,
    MAX_LEVEL_CHANGE_DB, OVERLAP_DURATION_SECS,
};
pub use error::{CacheError, ShapeError, SourceError};
pub use factory::{ProcessorFactory, PROCESSOR_CACHE_MAX_SIZE};
pub use pipeline::{ChunkMetrics, Pipeline, ProcessingState, ProfileMap, INTERNAL_SAMPLE_RATE};
pub use presets::{Preset, PresetProfile};
pub use source::{FrameSource, MemorySource, SourceIdentity};
pub use spectrum::{
    analyze_to_spectrum_position, calculate_processing_parameters, ProcessingParameters,
    SpectrumPosition,
};
