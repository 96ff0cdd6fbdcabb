/// Mastering Pipeline
///
/// The stateful DSP graph: content analysis, spectrum-driven parameter
/// derivation, input gain, psychoacoustic EQ, dynamics, stereo width,
/// loudness normalization and safety clipping, in that order. One pipeline
/// owns one `ProcessingState`; envelope followers and gain trajectories in
/// that state persist across chunk boundaries, which is what makes chunked
/// rendering match whole-file rendering.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::analysis::{ContentAnalyzer, ContentProfile, TrackFingerprint};
use crate::buffer::AudioBuffer;
use crate::dynamics::{self, LevelDetector};
use crate::eq::{shape_curve, PsychoacousticEQ, NUM_BANDS};
use crate::error::ShapeError;
use crate::level::{amplify_in_place, to_db, Measurement};
use crate::loudness;
use crate::presets::Preset;
use crate::spectrum::{
    analyze_to_spectrum_position, calculate_processing_parameters, ProcessingParameters,
};
use crate::stereo::{self, SafetyMode};

/// Fixed internal sample rate of the pipeline.
pub const INTERNAL_SAMPLE_RATE: u32 = 44_100;

/// Fraction of the distance to the target the EQ band gains move per chunk.
const EQ_ADAPTATION: f32 = 0.6;

/// Floor applied to non-finite loudness values in telemetry records.
const METRICS_LUFS_FLOOR: f32 = -120.0;

/// Shared map of the most recent content profile per preset, for external
/// monitoring. Writes happen at end-of-chunk under a short-held lock.
pub type ProfileMap = Arc<Mutex<HashMap<Preset, ContentProfile>>>;

/// Long-lived state owned by one pipeline instance.
///
/// Sharing a state across threads requires external synchronization; the
/// processor factory hands out pipelines behind a mutex for this reason.
#[derive(Debug)]
pub struct ProcessingState {
    /// Smoothed per-band EQ gains currently in effect.
    pub(crate) eq_gains: Option<[f32; NUM_BANDS]>,
    /// Compressor envelope follower.
    pub(crate) detector: LevelDetector,
    /// Look-ahead ring for the safety stage's boundary peak estimate.
    pub(crate) edge_ring: VecDeque<f32>,
    /// RMS (dB) of previously emitted chunks, for inter-chunk smoothing.
    pub(crate) rms_history: Vec<f32>,
    /// Smoothing gain (dB) applied per chunk.
    pub(crate) gain_history: Vec<f32>,
    /// Final frames of the previous output chunk.
    pub(crate) previous_tail: Option<AudioBuffer>,
}

impl ProcessingState {
    pub fn new() -> Self {
        Self {
            eq_gains: None,
            detector: LevelDetector::new(),
            edge_ring: VecDeque::new(),
            rms_history: Vec::new(),
            gain_history: Vec::new(),
            previous_tail: None,
        }
    }

    /// RMS (dB) of each chunk emitted so far.
    pub fn rms_history(&self) -> &[f32] {
        &self.rms_history
    }

    /// Smoothing adjustment (dB) applied to each chunk emitted so far.
    pub fn smoothing_gains(&self) -> &[f32] {
        &self.gain_history
    }

    /// Clear all cross-chunk memory. Required between unrelated inputs;
    /// reusing state across distinct tracks leaks envelope artifacts.
    pub fn reset(&mut self) {
        self.eq_gains = None;
        self.detector.reset();
        self.edge_ring.clear();
        self.rms_history.clear();
        self.gain_history.clear();
        self.previous_tail = None;
    }
}

impl Default for ProcessingState {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-chunk telemetry emitted alongside the audio.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkMetrics {
    pub pre_peak_db: f32,
    pub pre_rms_db: f32,
    pub pre_crest_db: f32,
    pub post_peak_db: f32,
    pub post_rms_db: f32,
    pub post_crest_db: f32,
    pub lufs: f32,
    pub applied_gain_db: f32,
    pub smoothing_delta_db: f32,
    pub parameters: ProcessingParameters,
}

impl ChunkMetrics {
    /// Metrics record before anything has been processed.
    pub fn empty() -> Self {
        Self {
            pre_peak_db: to_db(0.0),
            pre_rms_db: to_db(0.0),
            pre_crest_db: 0.0,
            post_peak_db: to_db(0.0),
            post_rms_db: to_db(0.0),
            post_crest_db: 0.0,
            lufs: METRICS_LUFS_FLOOR,
            applied_gain_db: 0.0,
            smoothing_delta_db: 0.0,
            parameters: ProcessingParameters {
                input_gain_db: 0.0,
                compression_ratio: 1.0,
                compression_amount: 0.0,
                expansion_amount: 0.0,
                output_target_rms_db: -14.0,
                target_peak_db: Preset::Adaptive.profile().peak_target_db,
                target_stereo_width: 0.0,
            },
        }
    }
}

/// Adaptive mastering pipeline.
pub struct Pipeline {
    preset: Preset,
    intensity: f32,
    sample_rate: u32,
    analyzer: ContentAnalyzer,
    eq: PsychoacousticEQ,
    pub(crate) state: ProcessingState,
    fingerprint: Option<TrackFingerprint>,
    conservative_width: bool,
    profile_sink: Option<ProfileMap>,
    last_metrics: ChunkMetrics,
}

impl Pipeline {
    /// Create a pipeline at the internal sample rate.
    ///
    /// Panics if `intensity` is negative (programmer error).
    pub fn new(preset: &str, intensity: f32) -> Self {
        Self::with_rate(preset, intensity, INTERNAL_SAMPLE_RATE)
    }

    /// Create a pipeline for a specific source rate.
    pub fn with_rate(preset: &str, intensity: f32, sample_rate: u32) -> Self {
        assert!(intensity >= 0.0, "intensity must be non-negative");
        let preset = Preset::parse(preset);
        Self {
            preset,
            intensity: intensity.min(1.0),
            sample_rate,
            analyzer: ContentAnalyzer::new(sample_rate),
            eq: PsychoacousticEQ::new(sample_rate),
            state: ProcessingState::new(),
            fingerprint: None,
            conservative_width: false,
            profile_sink: None,
            last_metrics: ChunkMetrics::empty(),
        }
    }

    pub fn preset(&self) -> Preset {
        self.preset
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Supply a pre-extracted track fingerprint; its track-level features
    /// replace the per-chunk estimates.
    pub fn set_fingerprint(&mut self, fingerprint: Option<TrackFingerprint>) {
        self.fingerprint = fingerprint;
    }

    /// Toggle the analyzer's tempo estimation (fast-start disables it for
    /// the first chunk).
    pub fn set_tempo_enabled(&mut self, enabled: bool) {
        self.analyzer.set_tempo_enabled(enabled);
    }

    pub fn tempo_enabled(&self) -> bool {
        self.analyzer.tempo_enabled()
    }

    /// Use the conservative stereo safety rule (skip expansion on loud
    /// material instead of clamping it).
    pub fn set_conservative_width(&mut self, conservative: bool) {
        self.conservative_width = conservative;
    }

    /// Wire the pipeline to a shared profile map for monitoring.
    pub fn set_profile_sink(&mut self, sink: ProfileMap) {
        self.profile_sink = Some(sink);
    }

    /// Metrics of the most recently processed buffer.
    pub fn last_metrics(&self) -> ChunkMetrics {
        self.last_metrics.clone()
    }

    /// Reset all cross-chunk state.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Whole-buffer entry point over interleaved stereo frames. Generates
    /// its own processing state internally.
    pub fn process(&mut self, frames: &[f32]) -> Result<Vec<f32>, ShapeError> {
        let buffer = AudioBuffer::interleaved(frames.to_vec(), 2)?;
        self.state.reset();
        let (output, _) = self.master_chunk(&buffer);
        Ok(output.into_samples())
    }

    /// Master one buffer with the pipeline's persistent state.
    ///
    /// This is the chunk driver's entry point: calling it for consecutive
    /// chunks of the same track carries envelope and gain state across the
    /// boundaries.
    pub fn master_chunk(&mut self, buffer: &AudioBuffer) -> (AudioBuffer, ChunkMetrics) {
        if buffer.frames() < crate::analysis::MIN_ANALYSIS_FRAMES {
            // Too short to analyze; pass through untouched
            let m = Measurement::of(buffer.samples());
            let mut metrics = ChunkMetrics::empty();
            metrics.pre_peak_db = m.peak_db;
            metrics.pre_rms_db = m.rms_db;
            metrics.pre_crest_db = m.crest_db;
            metrics.post_peak_db = m.peak_db;
            metrics.post_rms_db = m.rms_db;
            metrics.post_crest_db = m.crest_db;
            self.last_metrics = metrics.clone();
            return (buffer.clone(), metrics);
        }

        let mut audio = buffer.clone();
        let repaired = audio.clamp_non_finite();
        if repaired > 0 {
            tracing::warn!("clamped {} non-finite input samples", repaired);
        }

        let pre = Measurement::of(audio.samples());

        // Stage 1: analysis and parameter derivation
        let profile = self
            .analyzer
            .analyze_with_fingerprint(&audio, self.fingerprint.as_ref());
        let position = analyze_to_spectrum_position(&profile);
        let params = calculate_processing_parameters(position, self.preset);

        tracing::debug!(
            "[spectrum] level {:.2} dynamics {:.2} balance {:.2} energy {:.2}",
            position.input_level,
            position.dynamic_range,
            position.spectral_balance,
            position.energy
        );
        tracing::debug!(
            "[params] compression {:.2}@{:.2} expansion {:.2} gain {:+.1} dB target rms {:.1} dB",
            params.compression_ratio,
            params.compression_amount,
            params.expansion_amount,
            params.input_gain_db,
            params.output_target_rms_db
        );

        // Stage 2: input gain
        if params.input_gain_db.abs() > 0.5 {
            amplify_in_place(audio.samples_mut(), params.input_gain_db);
        }

        // Stage 3: psychoacoustic EQ with smoothed band gains
        let target_curve = shape_curve(&self.preset.profile().eq_tilts, &profile, self.intensity);
        let applied_curve = self.smooth_eq_curve(target_curve);
        audio = self.eq.process_chunk(&audio, &applied_curve, &profile);

        // Stage 4: dynamics (compression or expansion, never both)
        audio = dynamics::apply(&audio, &params, &mut self.state.detector, self.sample_rate);

        // Stage 5: stereo width with safety rules
        if audio.channels() == 2 {
            let peak_db = Measurement::of(audio.samples()).peak_db;
            let current_width = stereo::measure_width(&audio);
            let mode = if self.conservative_width {
                SafetyMode::Conservative
            } else {
                SafetyMode::Adaptive
            };
            audio = stereo::adjust(
                &audio,
                current_width,
                params.target_stereo_width,
                peak_db,
                mode,
            );
        }

        // Stage 6: loudness normalization, peak ceiling, safety clip
        let outcome = loudness::process(&mut audio, &params, &mut self.state.edge_ring);

        let post = Measurement::of(audio.samples());
        let metrics = ChunkMetrics {
            pre_peak_db: pre.peak_db,
            pre_rms_db: pre.rms_db,
            pre_crest_db: pre.crest_db,
            post_peak_db: post.peak_db,
            post_rms_db: post.rms_db,
            post_crest_db: post.crest_db,
            lufs: profile.lufs.max(METRICS_LUFS_FLOOR),
            applied_gain_db: params.input_gain_db
                + outcome.rms_boost_db
                + outcome.normalize_gain_db,
            smoothing_delta_db: 0.0,
            parameters: params,
        };

        // Keep the last ~50 ms of output for boundary diagnostics
        let tail_frames = (self.sample_rate as usize / 20).max(1);
        let frames = audio.frames();
        self.state.previous_tail =
            Some(audio.slice_frames(frames.saturating_sub(tail_frames), frames));

        if let Some(sink) = &self.profile_sink {
            sink.lock().insert(self.preset, profile);
        }

        self.last_metrics = metrics.clone();
        (audio, metrics)
    }

    fn smooth_eq_curve(&mut self, target: [f32; NUM_BANDS]) -> [f32; NUM_BANDS] {
        let applied = match self.state.eq_gains {
            Some(previous) => {
                let mut curve = [0.0_f32; NUM_BANDS];
                for (band, value) in curve.iter_mut().enumerate() {
                    *value = previous[band] + (target[band] - previous[band]) * EQ_ADAPTATION;
                }
                curve
            }
            None => target,
        };
        self.state.eq_gains = Some(applied);
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::from_db;

    fn pink_like_noise(frames: usize, seed: u32) -> Vec<f32> {
        // Deterministic filtered noise: one-pole lowpass over LCG noise
        let mut state = seed;
        let mut previous = 0.0_f32;
        (0..frames)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                let white = (state as f32 / u32::MAX as f32) - 0.5;
                previous = 0.6 * previous + 0.4 * white;
                previous
            })
            .collect()
    }

    fn stereo_from_mono(mono: &[f32]) -> Vec<f32> {
        let mut interleaved = Vec::with_capacity(mono.len() * 2);
        for &sample in mono {
            interleaved.push(sample);
            interleaved.push(sample);
        }
        interleaved
    }

    fn normalize_to_peak(samples: &mut [f32], peak_db: f32) {
        let peak = samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max);
        if peak > 0.0 {
            let scale = from_db(peak_db) / peak;
            for sample in samples.iter_mut() {
                *sample *= scale;
            }
        }
    }

    /// Scenario: hypercompressed loud input gets de-mastered.
    #[test]
    fn test_hypercompressed_input_gets_expansion() {
        let sr = 44_100;
        // Dense program material with crest around 6.5 dB: a square-wave bed
        // near full scale plus sparse transients at the true peak
        let frames_count = 2 * sr as usize;
        let period = 367;
        let mut mono: Vec<f32> = (0..frames_count)
            .map(|i| if (i / (period / 2)) % 2 == 0 { 0.45 } else { -0.45 })
            .collect();
        let mut i = 250;
        while i + 1 < frames_count {
            mono[i] = 0.95;
            mono[i + 1] = -0.95;
            i += 499;
        }
        normalize_to_peak(&mut mono, -0.3);
        let frames = stereo_from_mono(&mono);

        let mut pipeline = Pipeline::new("adaptive", 1.0);
        let pre = Measurement::of(&frames);
        let output = pipeline.process(&frames).unwrap();
        let metrics = pipeline.last_metrics();

        assert!(
            metrics.parameters.expansion_amount > 0.3,
            "expansion was {}",
            metrics.parameters.expansion_amount
        );
        assert!(metrics.parameters.compression_amount < 0.1);

        let post = Measurement::of(&output);
        assert!(
            post.crest_db >= pre.crest_db + 2.0,
            "crest {} -> {}",
            pre.crest_db,
            post.crest_db
        );
        assert!(post.peak_db <= -0.5 && post.peak_db >= -1.5, "peak {}", post.peak_db);
    }

    /// Scenario: under-leveled dynamic input gets gain and lands at target.
    #[test]
    fn test_under_leveled_input_gets_gain() {
        let sr = 44_100;
        // Quiet noise bed with fixed-height sparse transients for a crest
        // around 14 dB
        let mut mono = pink_like_noise(2 * sr as usize, 7);
        for (i, sample) in mono.iter_mut().enumerate() {
            if i % 997 == 0 {
                *sample = 0.72_f32.copysign(*sample);
            }
        }
        // Scale to RMS -28 dBFS
        let m = Measurement::of(&mono);
        let scale = from_db(-28.0) / m.rms;
        for sample in mono.iter_mut() {
            *sample *= scale;
        }
        let frames = stereo_from_mono(&mono);

        let mut pipeline = Pipeline::new("adaptive", 1.0);
        let output = pipeline.process(&frames).unwrap();
        let metrics = pipeline.last_metrics();

        assert!(
            metrics.parameters.input_gain_db > 3.0,
            "gain was {}",
            metrics.parameters.input_gain_db
        );

        let post = Measurement::of(&output);
        assert!(
            post.rms_db >= -18.0 && post.rms_db <= -14.0,
            "post rms {}",
            post.rms_db
        );
        assert!(post.peak_db <= -0.5 && post.peak_db >= -1.5, "peak {}", post.peak_db);
    }

    #[test]
    fn test_single_sample_passes_through_unchanged() {
        let frames = vec![0.25_f32, 0.25];
        let mut pipeline = Pipeline::new("adaptive", 1.0);
        let output = pipeline.process(&frames).unwrap();
        assert_eq!(output, frames);
    }

    #[test]
    fn test_silent_input_stays_silent() {
        let frames = vec![0.0_f32; 44_100 * 2];
        let mut pipeline = Pipeline::new("adaptive", 1.0);
        let output = pipeline.process(&frames).unwrap();
        assert!(output.iter().all(|&s| s == 0.0));
        assert!(output.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_process_is_deterministic() {
        let sr = 44_100;
        let mono = pink_like_noise(sr as usize, 99);
        let frames = stereo_from_mono(&mono);

        let mut pipeline = Pipeline::new("warm", 1.0);
        let first = pipeline.process(&frames).unwrap();
        let second = pipeline.process(&frames).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_output_within_safety_envelope() {
        let sr = 44_100;
        for preset in ["adaptive", "gentle", "warm", "bright", "punchy"] {
            let mono = pink_like_noise(sr as usize, 3);
            let frames = stereo_from_mono(&mono);
            let mut pipeline = Pipeline::new(preset, 1.0);
            let output = pipeline.process(&frames).unwrap();
            let peak = output.iter().map(|s| s.abs()).fold(0.0_f32, f32::max);
            assert!(
                peak <= from_db(loudness::SAFETY_THRESHOLD_DB) + 1e-6,
                "{preset} peak {peak}"
            );
        }
    }

    #[test]
    fn test_odd_interleaved_length_is_shape_error() {
        let mut pipeline = Pipeline::new("adaptive", 1.0);
        assert!(pipeline.process(&[0.0_f32; 1001]).is_err());
    }

    #[test]
    #[should_panic(expected = "intensity")]
    fn test_negative_intensity_panics() {
        let _ = Pipeline::new("adaptive", -0.5);
    }

    #[test]
    fn test_profile_sink_receives_profile() {
        let sink: ProfileMap = Arc::new(Mutex::new(HashMap::new()));
        let mono = pink_like_noise(44_100, 5);
        let frames = stereo_from_mono(&mono);

        let mut pipeline = Pipeline::new("bright", 1.0);
        pipeline.set_profile_sink(sink.clone());
        pipeline.process(&frames).unwrap();

        let map = sink.lock();
        assert!(map.contains_key(&Preset::Bright));
    }

    #[test]
    fn test_metrics_serialize_to_flat_json() {
        let mono = pink_like_noise(44_100, 8);
        let frames = stereo_from_mono(&mono);
        let mut pipeline = Pipeline::new("adaptive", 1.0);
        pipeline.process(&frames).unwrap();

        let json = serde_json::to_value(pipeline.last_metrics()).unwrap();
        for field in [
            "pre_peak_db",
            "pre_rms_db",
            "pre_crest_db",
            "post_peak_db",
            "post_rms_db",
            "post_crest_db",
            "lufs",
            "applied_gain_db",
            "smoothing_delta_db",
        ] {
            assert!(json[field].is_number(), "{field} missing or non-numeric");
        }
        assert!(json["parameters"]["compression_ratio"].is_number());
        assert!(json["parameters"]["target_peak_db"].is_number());
    }

    #[test]
    fn test_non_finite_samples_are_repaired() {
        let mut frames = vec![0.1_f32; 44_100 * 2];
        frames[100] = f32::NAN;
        frames[200] = f32::INFINITY;
        let mut pipeline = Pipeline::new("adaptive", 1.0);
        let output = pipeline.process(&frames).unwrap();
        assert!(output.iter().all(|s| s.is_finite()));
    }
}
