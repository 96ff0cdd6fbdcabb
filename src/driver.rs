/// Chunk Driver
///
/// Partitions a recording into overlapping chunks, drives the mastering
/// pipeline across them with preserved state, smooths inter-chunk level
/// deltas, and stitches outputs with crossfades so no audio is lost and no
/// volume jump exceeds the bounded threshold.
///
/// Chunk layout: chunk 0 covers [0, 30s); later chunks start
/// `OVERLAP_DURATION` early so their heads can be crossfaded or discarded.
/// Every load is extended by `CONTEXT_DURATION` on both sides (clamped to
/// the file) for better spectral and envelope estimates, then trimmed.
/// The constants are fixed for a session; the cross-chunk state machine
/// relies on them not changing between chunks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::analysis::TrackFingerprint;
use crate::buffer::AudioBuffer;
use crate::cache::{file_signature, CachedChunk, ChunkCache, ChunkKey, MemoryChunkCache};
use crate::error::SourceError;
use crate::level::{amplify_in_place, from_db, Measurement};
use crate::loudness::{soft_clip, SAFETY_THRESHOLD_DB, SOFT_CLIP_CEILING, SOFT_CLIP_THRESHOLD};
use crate::pipeline::{ChunkMetrics, Pipeline};
use crate::presets::Preset;
use crate::source::FrameSource;

/// Target output chunk length.
pub const CHUNK_DURATION_SECS: u64 = 30;
/// How much chunks overlap for crossfading.
pub const OVERLAP_DURATION_SECS: u64 = 3;
/// Pre/post context loaded for processing quality, then trimmed.
pub const CONTEXT_DURATION_SECS: u64 = 5;
/// Maximum RMS change between consecutive output chunks.
pub const MAX_LEVEL_CHANGE_DB: f32 = 1.5;

const SILENCE_CHANNELS: usize = 2;

/// Shared, host-substitutable chunk cache handle.
pub type SharedChunkCache = Arc<Mutex<Box<dyn ChunkCache>>>;

pub struct ChunkDriver<S: FrameSource> {
    track_id: u64,
    source: S,
    preset: Preset,
    intensity: f32,
    sample_rate: u32,
    total_frames: u64,
    total_chunks: u32,
    file_signature: String,
    pipeline: Pipeline,
    cache: SharedChunkCache,
    cancel: Arc<AtomicBool>,
    fast_start: bool,
    yield_hook: Option<Box<dyn FnMut() + Send>>,
}

impl<S: FrameSource> ChunkDriver<S> {
    /// Open a driver with its own in-memory chunk cache.
    ///
    /// A fresh pipeline (and therefore a fresh `ProcessingState`) is created
    /// per `(track, preset, intensity)`; reusing state across distinct
    /// tracks is forbidden because envelope followers would leak artifacts.
    ///
    /// Panics if `intensity` is negative (programmer error).
    pub fn open(track_id: u64, source: S, preset: &str, intensity: f32) -> Self {
        let cache: SharedChunkCache = Arc::new(Mutex::new(Box::new(MemoryChunkCache::new())));
        Self::open_with_cache(track_id, source, preset, intensity, cache)
    }

    /// Open a driver against a shared (possibly host-supplied) chunk cache.
    pub fn open_with_cache(
        track_id: u64,
        source: S,
        preset: &str,
        intensity: f32,
        cache: SharedChunkCache,
    ) -> Self {
        assert!(intensity >= 0.0, "intensity must be non-negative");

        let sample_rate = source.sample_rate();
        let total_frames = source.total_frames();
        let chunk_frames = CHUNK_DURATION_SECS * sample_rate as u64;
        let total_chunks = if total_frames == 0 {
            0
        } else {
            total_frames.div_ceil(chunk_frames) as u32
        };
        let signature = file_signature(&source.identity());
        let pipeline = Pipeline::with_rate(preset, intensity, sample_rate);

        tracing::info!(
            "chunk driver opened: track {} duration {:.1}s chunks {} preset {} intensity {}",
            track_id,
            total_frames as f64 / sample_rate as f64,
            total_chunks,
            pipeline.preset().name(),
            intensity
        );

        Self {
            track_id,
            source,
            preset: pipeline.preset(),
            intensity: intensity.min(1.0),
            sample_rate,
            total_frames,
            total_chunks,
            file_signature: signature,
            pipeline,
            cache,
            cancel: Arc::new(AtomicBool::new(false)),
            fast_start: true,
            yield_hook: None,
        }
    }

    pub fn chunk_count(&self) -> u32 {
        self.total_chunks
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Flag polled between chunks; setting it stops multi-chunk renders.
    /// A cancelled job leaves no partially written cache entry.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Disable or re-enable the fast-start path for chunk 0 (tempo
    /// estimation skipped so playback can begin within seconds).
    pub fn set_fast_start(&mut self, fast_start: bool) {
        self.fast_start = fast_start;
    }

    /// Supply the pre-extracted track fingerprint, shared across all chunks.
    pub fn set_fingerprint(&mut self, fingerprint: TrackFingerprint) {
        self.pipeline.set_fingerprint(Some(fingerprint));
    }

    /// Install a callback invoked between chunks during multi-chunk renders
    /// so a hosting runtime can interleave other work.
    pub fn set_yield_hook(&mut self, hook: Box<dyn FnMut() + Send>) {
        self.yield_hook = Some(hook);
    }

    fn chunk_frames(&self) -> u64 {
        CHUNK_DURATION_SECS * self.sample_rate as u64
    }

    fn overlap_frames(&self) -> u64 {
        OVERLAP_DURATION_SECS * self.sample_rate as u64
    }

    fn context_frames(&self) -> u64 {
        CONTEXT_DURATION_SECS * self.sample_rate as u64
    }

    fn chunk_key(&self, index: u32) -> ChunkKey {
        ChunkKey::new(
            self.track_id,
            self.file_signature.clone(),
            self.preset,
            self.intensity,
            index,
        )
    }

    /// Render one output chunk. Idempotent: repeated requests are served
    /// from the cache and even a cache-bypassing rerun on a fresh driver
    /// produces identical samples.
    pub fn render_chunk(&mut self, index: u32) -> Result<(AudioBuffer, ChunkMetrics), SourceError> {
        if index >= self.total_chunks {
            tracing::warn!(
                "chunk {} requested past end of track ({} chunks), emitting silence",
                index,
                self.total_chunks
            );
            let silence =
                AudioBuffer::silence(self.sample_rate as usize / 10, SILENCE_CHANNELS);
            return Ok((silence, ChunkMetrics::empty()));
        }

        let (full, metrics) = self.render_overlapped(index)?;
        Ok((self.extract_exact(index, &full), metrics))
    }

    /// Render every chunk in order and assemble the whole file with
    /// overlap-add crossfades at the chunk boundaries. Total duration is
    /// preserved.
    pub fn render_all(&mut self) -> Result<AudioBuffer, SourceError> {
        if self.total_chunks == 0 {
            return Ok(AudioBuffer::silence(0, SILENCE_CHANNELS));
        }

        let mut assembled = self.render_overlapped_or_silence(0);
        for index in 1..self.total_chunks {
            if self.cancel.load(Ordering::Relaxed) {
                tracing::info!("render cancelled after chunk {}", index - 1);
                break;
            }
            if let Some(hook) = self.yield_hook.as_mut() {
                hook();
            }
            let chunk = self.render_overlapped_or_silence(index);
            assembled = crossfade_concat(assembled, &chunk, self.overlap_frames() as usize);
        }
        Ok(assembled)
    }

    /// Background-style pass over the remaining chunks, polling the
    /// cancellation flag between chunks. Individual chunk failures are
    /// logged and skipped; they do not abort the pass.
    pub fn render_remaining(&mut self) {
        tracing::info!(
            "processing {} remaining chunk(s)",
            self.total_chunks.saturating_sub(1)
        );
        for index in 1..self.total_chunks {
            if self.cancel.load(Ordering::Relaxed) {
                tracing::info!("background rendering cancelled at chunk {}", index);
                return;
            }
            {
                let key = self.chunk_key(index);
                if self.cache.lock().get(&key).is_some() {
                    continue;
                }
            }
            if let Err(error) = self.render_overlapped(index) {
                tracing::error!("failed to process chunk {}: {}", index, error);
            }
            if let Some(hook) = self.yield_hook.as_mut() {
                hook();
            }
        }
        tracing::info!("background chunk processing complete");
    }

    fn render_overlapped_or_silence(&mut self, index: u32) -> AudioBuffer {
        match self.render_overlapped(index) {
            Ok((chunk, _)) => chunk,
            Err(error) => {
                tracing::error!("chunk {} failed, substituting silence: {}", index, error);
                let frames = self.overlapped_frames(index) as usize;
                AudioBuffer::silence(frames, SILENCE_CHANNELS)
            }
        }
    }

    /// Length of the cached (overlap-retaining) chunk for `index`.
    fn overlapped_frames(&self, index: u32) -> u64 {
        let (start, end) = self.chunk_bounds(index);
        end - start
    }

    /// Span of the chunk before context is added, in frames.
    fn chunk_bounds(&self, index: u32) -> (u64, u64) {
        let chunk = self.chunk_frames();
        let overlap = self.overlap_frames();
        let start = if index == 0 {
            0
        } else {
            index as u64 * chunk - overlap
        };
        let extra = if index > 0 { overlap } else { 0 };
        let end = (start + chunk + extra).min(self.total_frames);
        (start, end.max(start))
    }

    /// Render the overlap-retaining chunk, caching the result. This is the
    /// unit the crossfade assembly consumes; `render_chunk` extracts the
    /// non-overlapping region from it.
    fn render_overlapped(
        &mut self,
        index: u32,
    ) -> Result<(AudioBuffer, ChunkMetrics), SourceError> {
        let key = self.chunk_key(index);
        if let Some(cached) = self.cache.lock().get(&key) {
            tracing::info!("serving cached chunk {}/{}", index, self.total_chunks);
            return Ok((cached.audio, cached.metrics));
        }

        tracing::info!(
            "processing chunk {}/{} (preset {})",
            index,
            self.total_chunks,
            self.preset.name()
        );

        let (chunk_start, chunk_end) = self.chunk_bounds(index);
        let context = self.context_frames();
        let load_start = chunk_start.saturating_sub(context);
        let load_end = (chunk_end + context).min(self.total_frames);

        let loaded = self.source.read_range(load_start, load_end)?;
        let loaded = if loaded.is_empty() {
            tracing::warn!(
                "chunk {} loaded empty ({}..{} of {} frames), substituting 100ms of silence",
                index,
                load_start,
                load_end,
                self.total_frames
            );
            AudioBuffer::silence(self.sample_rate as usize / 10, SILENCE_CHANNELS)
        } else {
            loaded
        };

        self.log_boundary_continuity(index, &loaded);

        // Fast start disables tempo estimation for the first chunk only
        let fast = self.fast_start && index == 0;
        let previous_tempo = self.pipeline.tempo_enabled();
        if fast {
            self.pipeline.set_tempo_enabled(false);
            tracing::info!("fast-start: skipping tempo estimation for first chunk");
        }
        let (processed, mut metrics) = self.pipeline.master_chunk(&loaded);
        if fast {
            self.pipeline.set_tempo_enabled(previous_tempo);
        }

        // Trim the processing context back off
        let head_trim = (chunk_start - load_start) as usize;
        let tail_trim = (load_end.saturating_sub(chunk_end)) as usize;
        let frames = processed.frames();
        let mut chunk = if head_trim + tail_trim < frames {
            processed.slice_frames(head_trim, frames - tail_trim)
        } else {
            tracing::warn!(
                "chunk {} too short to trim context ({} frames)",
                index,
                frames
            );
            processed
        };

        // Intensity blending against the untouched source, aligned by
        // truncation to the shorter buffer
        if self.intensity < 1.0 {
            let original_frames = loaded.frames();
            let original = if head_trim + tail_trim < original_frames {
                loaded.slice_frames(head_trim, original_frames - tail_trim)
            } else {
                loaded
            };
            chunk = blend(&original, &chunk, self.intensity);
        }

        let smoothing_delta_db = self.smooth_level(&mut chunk, index);

        let post = Measurement::of(chunk.samples());
        metrics.post_peak_db = post.peak_db;
        metrics.post_rms_db = post.rms_db;
        metrics.post_crest_db = post.crest_db;
        metrics.smoothing_delta_db = smoothing_delta_db;

        let cached = CachedChunk {
            audio: chunk.clone(),
            metrics: metrics.clone(),
        };
        if let Err(error) = self.cache.lock().put(key, cached) {
            tracing::warn!("chunk cache put failed (audio still returned): {}", error);
        }

        Ok((chunk, metrics))
    }

    /// Limit the RMS step from the previous chunk to `MAX_LEVEL_CHANGE_DB`,
    /// recording history in the pipeline state. Returns the adjustment
    /// applied in dB.
    ///
    /// Smoothing runs on every chunk, including expansion chunks whose RMS
    /// drop is intentional; this matches observed behavior and is a
    /// candidate for future refinement.
    fn smooth_level(&mut self, chunk: &mut AudioBuffer, index: u32) -> f32 {
        // Measure the region that will actually be emitted, not the overlap
        // head that gets discarded or crossfaded away
        let current_rms_db =
            Measurement::of(self.extract_exact(index, chunk).samples()).rms_db;
        let state = &mut self.pipeline.state;

        if index == 0 || state.rms_history.is_empty() {
            state.rms_history.push(current_rms_db);
            state.gain_history.push(0.0);
            return 0.0;
        }

        let previous_rms_db = *state.rms_history.last().unwrap();
        let delta = current_rms_db - previous_rms_db;
        if delta.abs() <= MAX_LEVEL_CHANGE_DB {
            tracing::info!(
                "chunk {}: level transition ok (rms {:.1} dB, delta {:+.1} dB)",
                index,
                current_rms_db,
                delta
            );
            state.rms_history.push(current_rms_db);
            state.gain_history.push(0.0);
            return 0.0;
        }

        let target_delta = MAX_LEVEL_CHANGE_DB.copysign(delta);
        let adjustment_db = target_delta - delta;
        amplify_in_place(chunk.samples_mut(), adjustment_db);

        // An upward correction can push past the safety ceiling
        let peak = Measurement::of(chunk.samples()).peak;
        if peak > from_db(SAFETY_THRESHOLD_DB) {
            let clipped = soft_clip(chunk.samples(), SOFT_CLIP_THRESHOLD, SOFT_CLIP_CEILING);
            *chunk = chunk.with_samples(clipped);
        }

        let adjusted_rms_db =
            Measurement::of(self.extract_exact(index, chunk).samples()).rms_db;
        tracing::info!(
            "chunk {}: smoothed level transition (rms {:.1} -> {:.1} dB, delta {:+.1} -> {:+.1} dB)",
            index,
            current_rms_db,
            adjusted_rms_db,
            delta,
            target_delta
        );

        let state = &mut self.pipeline.state;
        state.rms_history.push(adjusted_rms_db);
        state.gain_history.push(adjustment_db);
        adjustment_db
    }

    /// Extract the non-overlapping region: chunk 0 keeps its first
    /// `CHUNK_DURATION`, the last chunk drops the overlap and keeps the
    /// rest, middle chunks drop the overlap and keep exactly
    /// `CHUNK_DURATION`. Pad or trim only as a safety net.
    fn extract_exact(&self, index: u32, full: &AudioBuffer) -> AudioBuffer {
        let chunk = self.chunk_frames() as usize;
        let overlap = self.overlap_frames() as usize;
        let is_last = index == self.total_chunks - 1;

        let (skip, expected) = if index == 0 && self.total_chunks == 1 {
            (0, self.total_frames as usize)
        } else if index == 0 {
            (0, chunk)
        } else if is_last {
            let expected = (self.total_frames - index as u64 * chunk as u64) as usize;
            (overlap, expected)
        } else {
            (overlap, chunk)
        };

        let mut out = full.slice_frames(skip, skip + expected);
        if out.frames() < expected {
            tracing::warn!(
                "chunk {} was {} frame(s) short, padding with silence",
                index,
                expected - out.frames()
            );
            out.pad_to_frames(expected);
        }
        out
    }

    fn log_boundary_continuity(&self, index: u32, loaded: &AudioBuffer) {
        if index == 0 {
            return;
        }
        if let Some(tail) = &self.pipeline.state.previous_tail {
            let head_frames = tail.frames().min(loaded.frames());
            let head = loaded.slice_frames(0, head_frames);
            tracing::debug!(
                "chunk {} boundary: previous tail rms {:.1} dB, incoming head rms {:.1} dB",
                index,
                Measurement::of(tail.samples()).rms_db,
                Measurement::of(head.samples()).rms_db
            );
        }
    }
}

/// Mix `processed` into `original` by the blend factor.
fn blend(original: &AudioBuffer, processed: &AudioBuffer, intensity: f32) -> AudioBuffer {
    let frames = original.frames().min(processed.frames());
    let count = frames * original.channels().min(processed.channels());
    let mixed: Vec<f32> = original.samples()[..count]
        .iter()
        .zip(processed.samples()[..count].iter())
        .map(|(dry, wet)| dry * (1.0 - intensity) + wet * intensity)
        .collect();
    processed.with_samples(mixed)
}

/// Concatenate two chunks with a linear crossfade over the overlap region.
/// No audio is lost: the result is `a` without its tail, the mixed overlap,
/// then `b` without its head.
pub(crate) fn crossfade_concat(a: AudioBuffer, b: &AudioBuffer, overlap_frames: usize) -> AudioBuffer {
    let actual_overlap = overlap_frames.min(a.frames()).min(b.frames());
    if actual_overlap == 0 {
        let mut samples = a.into_samples();
        samples.extend_from_slice(b.samples());
        return b.with_samples(samples);
    }

    let channels = a.channels();
    let a_keep = a.frames() - actual_overlap;
    let mut samples = Vec::with_capacity((a.frames() + b.frames() - actual_overlap) * channels);
    samples.extend_from_slice(&a.samples()[..a_keep * channels]);

    let a_tail = &a.samples()[a_keep * channels..];
    let b_head = &b.samples()[..actual_overlap * channels];
    for frame in 0..actual_overlap {
        let fade_in = frame as f32 / actual_overlap as f32;
        let fade_out = 1.0 - fade_in;
        for ch in 0..channels {
            let i = frame * channels + ch;
            samples.push(a_tail[i] * fade_out + b_head[i] * fade_in);
        }
    }

    samples.extend_from_slice(&b.samples()[actual_overlap * channels..]);
    b.with_samples(samples)
}
