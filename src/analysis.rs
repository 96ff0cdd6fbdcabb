/// Content Analyzer
///
/// Extracts per-window features from a frame buffer: peak, RMS, crest,
/// gated LUFS (ITU-R BS.1770), spectral centroid/rolloff/flatness, tempo
/// estimate, stereo width and a coarse genre hint. Spectral statistics are
/// accumulated on the fly across STFT frames; no frame storage.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

use crate::biquad::k_weighting;
use crate::buffer::AudioBuffer;
use crate::level::{to_db, Measurement};

const FFT_SIZE: usize = 2048;
const HOP_LENGTH: usize = 1024; // 50% overlap
const ROLLOFF_PCT: f32 = 0.85;

// Tempo estimation (onset-strength autocorrelation)
const TEMPO_FFT: usize = 1024;
const TEMPO_HOP: usize = 512;
const MIN_BPM: f32 = 40.0;
const MAX_BPM: f32 = 200.0;

/// Buffers shorter than this return the sentinel profile.
pub(crate) const MIN_ANALYSIS_FRAMES: usize = 64;

/// Coarse content class used to bias EQ shaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenreHint {
    Electronic,
    Classical,
    Rock,
    Pop,
    Unknown,
}

/// Integrated level summary of the input.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct InputLevelInfo {
    pub lufs_integrated: f32,
    pub true_peak_db: f32,
    pub headroom_db: f32,
}

/// Pre-extracted whole-track fingerprint supplied by an external analyzer.
///
/// When present, its track-level features stand in for the per-chunk
/// estimates (most importantly tempo, the slowest stage).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackFingerprint {
    pub tempo_bpm: f32,
    pub lufs: f32,
    pub crest_db: f32,
    pub stereo_width: f32,
}

/// Output of one analysis pass. Immutable after return.
#[derive(Debug, Clone, Serialize)]
pub struct ContentProfile {
    pub rms: f32,
    pub peak: f32,
    pub crest_db: f32,
    pub lufs: f32,
    pub spectral_centroid_hz: f32,
    pub spectral_rolloff_hz: f32,
    pub spectral_flatness: f32,
    pub dynamic_range_db: f32,
    pub tempo_bpm: Option<f32>,
    pub stereo_width: f32,
    pub phase_correlation: f32,
    pub genre_hint: GenreHint,
    pub input_level: InputLevelInfo,
}

impl ContentProfile {
    /// Profile returned for empty or degenerate input.
    pub fn sentinel() -> Self {
        Self {
            rms: 0.0,
            peak: 0.0,
            crest_db: 0.0,
            lufs: f32::NEG_INFINITY,
            spectral_centroid_hz: 0.0,
            spectral_rolloff_hz: 0.0,
            spectral_flatness: 0.0,
            dynamic_range_db: 0.0,
            tempo_bpm: None,
            stereo_width: 0.0,
            phase_correlation: 1.0,
            genre_hint: GenreHint::Unknown,
            input_level: InputLevelInfo {
                lufs_integrated: f32::NEG_INFINITY,
                true_peak_db: to_db(0.0),
                headroom_db: -to_db(0.0),
            },
        }
    }
}

/// Content analyzer over one analysis window. Never raises.
#[derive(Debug, Clone)]
pub struct ContentAnalyzer {
    sample_rate: u32,
    tempo_enabled: bool,
}

impl ContentAnalyzer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            tempo_enabled: true,
        }
    }

    /// Disable or re-enable tempo estimation (the slowest stage). Downstream
    /// code accepts profiles without a tempo as valid.
    pub fn set_tempo_enabled(&mut self, enabled: bool) {
        self.tempo_enabled = enabled;
    }

    pub fn tempo_enabled(&self) -> bool {
        self.tempo_enabled
    }

    pub fn analyze(&self, buffer: &AudioBuffer) -> ContentProfile {
        self.analyze_with_fingerprint(buffer, None)
    }

    /// Analyze a buffer, using a pre-extracted track fingerprint for the
    /// track-level features when one is available.
    pub fn analyze_with_fingerprint(
        &self,
        buffer: &AudioBuffer,
        fingerprint: Option<&TrackFingerprint>,
    ) -> ContentProfile {
        if buffer.frames() < MIN_ANALYSIS_FRAMES {
            return ContentProfile::sentinel();
        }

        let mono = buffer.downmix_mono();
        let m = Measurement::of(buffer.samples());

        let (freqs, psd) = average_spectrum(&mono, self.sample_rate);
        let centroid = spectral_centroid(&psd, &freqs);
        let rolloff = spectral_rolloff(&psd, &freqs, ROLLOFF_PCT);
        let flatness = spectral_flatness(&psd);

        let lufs = integrated_lufs(buffer, self.sample_rate);

        let tempo = match fingerprint {
            Some(fp) => Some(fp.tempo_bpm),
            None if self.tempo_enabled => estimate_tempo(&mono, self.sample_rate),
            None => None,
        };

        let (left, right) = buffer.split_channels();
        let stereo_width = if buffer.channels() == 2 {
            compute_stereo_width(&left, &right)
        } else {
            0.0
        };
        let phase_correlation = if buffer.channels() == 2 {
            compute_phase_correlation(&left, &right)
        } else {
            1.0
        };

        let true_peak = true_peak_linear(buffer.samples());
        let true_peak_db = to_db(true_peak);

        let genre_hint = classify_genre(m.rms, m.crest_db, centroid, flatness, tempo);

        tracing::debug!(
            "content analysis: rms {:.2} dB, crest {:.2} dB, lufs {:.1}, centroid {:.0} Hz",
            m.rms_db,
            m.crest_db,
            lufs,
            centroid,
        );

        ContentProfile {
            rms: m.rms,
            peak: m.peak,
            crest_db: m.crest_db,
            lufs,
            spectral_centroid_hz: centroid,
            spectral_rolloff_hz: rolloff,
            spectral_flatness: flatness,
            dynamic_range_db: m.crest_db,
            tempo_bpm: tempo,
            stereo_width,
            phase_correlation,
            genre_hint,
            input_level: InputLevelInfo {
                lufs_integrated: lufs,
                true_peak_db,
                headroom_db: -true_peak_db,
            },
        }
    }
}

/// Average power spectrum over Hann-windowed frames, accumulated in a single
/// pass. Returns (frequencies, psd) for the positive-frequency bins.
fn average_spectrum(samples: &[f32], sample_rate: u32) -> (Vec<f32>, Vec<f32>) {
    let freqs: Vec<f32> = (0..FFT_SIZE / 2)
        .map(|k| (k as f32 * sample_rate as f32) / FFT_SIZE as f32)
        .collect();

    let window = hann_window(FFT_SIZE);
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(FFT_SIZE);

    let mut avg_spectrum = vec![0.0_f32; FFT_SIZE / 2];
    let mut frame_count = 0u64;

    let mut start = 0;
    while start < samples.len() {
        let end = (start + FFT_SIZE).min(samples.len());
        if end - start < FFT_SIZE / 2 {
            break;
        }

        let mut input: Vec<Complex<f32>> = samples[start..end]
            .iter()
            .zip(window.iter())
            .map(|(s, w)| Complex { re: s * w, im: 0.0 })
            .collect();
        input.resize(FFT_SIZE, Complex { re: 0.0, im: 0.0 });

        fft.process(&mut input);

        for (acc, c) in avg_spectrum.iter_mut().zip(input.iter().take(FFT_SIZE / 2)) {
            *acc += (c.norm() / FFT_SIZE as f32).powi(2);
        }
        frame_count += 1;

        start += HOP_LENGTH;
    }

    if frame_count == 0 {
        return (freqs, vec![0.0; FFT_SIZE / 2]);
    }
    for value in avg_spectrum.iter_mut() {
        *value /= frame_count as f32;
    }

    (freqs, avg_spectrum)
}

/// Spectral centroid: magnitude-weighted mean frequency in Hz.
pub fn spectral_centroid(psd: &[f32], freqs: &[f32]) -> f32 {
    if psd.is_empty() || psd.len() != freqs.len() {
        return 0.0;
    }
    let total_power: f32 = psd.iter().sum();
    if total_power < 1e-10 {
        return 0.0;
    }
    let weighted_sum: f32 = psd
        .iter()
        .zip(freqs.iter())
        .map(|(power, freq)| power * freq)
        .sum();
    weighted_sum / total_power
}

/// Spectral rolloff: frequency below which `rolloff` of the energy lies.
pub fn spectral_rolloff(psd: &[f32], freqs: &[f32], rolloff: f32) -> f32 {
    if psd.is_empty() || psd.len() != freqs.len() {
        return 0.0;
    }
    let total_power: f32 = psd.iter().sum();
    if total_power < 1e-10 {
        return 0.0;
    }
    let threshold = rolloff * total_power;
    let mut cumulative = 0.0;
    for (power, freq) in psd.iter().zip(freqs.iter()) {
        cumulative += power;
        if cumulative >= threshold {
            return *freq;
        }
    }
    freqs[freqs.len() - 1]
}

/// Spectral flatness: geometric over arithmetic mean of the spectrum.
/// 0.0 = pure tone, 1.0 = white noise.
pub fn spectral_flatness(psd: &[f32]) -> f32 {
    if psd.is_empty() {
        return 0.0;
    }
    let nonzero: Vec<f32> = psd.iter().filter(|&&p| p > 1e-10).copied().collect();
    if nonzero.is_empty() {
        return 0.0;
    }

    let log_sum: f32 = nonzero.iter().map(|&p| p.ln()).sum();
    let geometric_mean = (log_sum / nonzero.len() as f32).exp();
    let arithmetic_mean: f32 = nonzero.iter().sum::<f32>() / nonzero.len() as f32;

    if arithmetic_mean < 1e-10 {
        return 0.0;
    }
    (geometric_mean / arithmetic_mean).clamp(0.0, 1.0)
}

/// Gated integrated loudness per ITU-R BS.1770: K-weighting, 400 ms blocks
/// with 75% overlap, -70 LUFS absolute gate, -10 LU relative gate.
pub fn integrated_lufs(buffer: &AudioBuffer, sample_rate: u32) -> f32 {
    if buffer.is_empty() {
        return f32::NEG_INFINITY;
    }

    let (shelf, highpass) = k_weighting(sample_rate as f64);
    let (left, right) = buffer.split_channels();

    let weight = |channel: &[f32]| -> Vec<f32> {
        let stage1 = shelf.process_channel(channel);
        highpass.process_channel(&stage1)
    };
    let wl = weight(&left);
    let wr = if buffer.channels() == 2 {
        weight(&right)
    } else {
        Vec::new()
    };

    let block = ((0.4 * sample_rate as f64) as usize).max(1);
    let hop = (block / 4).max(1);
    let frames = wl.len();

    let mean_square = |samples: &[f32], start: usize, end: usize| -> f64 {
        let slice = &samples[start..end];
        slice.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / slice.len() as f64
    };

    // Per-block channel-summed mean square energies
    let mut block_energies: Vec<f64> = Vec::new();
    if frames < block {
        let mut z = mean_square(&wl, 0, frames);
        if !wr.is_empty() {
            z += mean_square(&wr, 0, frames);
        }
        block_energies.push(z);
    } else {
        let mut start = 0;
        while start + block <= frames {
            let mut z = mean_square(&wl, start, start + block);
            if !wr.is_empty() {
                z += mean_square(&wr, start, start + block);
            }
            block_energies.push(z);
            start += hop;
        }
    }

    let loudness = |z: f64| -> f64 { -0.691 + 10.0 * z.max(1e-20).log10() };

    // Absolute gate at -70 LUFS
    let above_absolute: Vec<f64> = block_energies
        .iter()
        .copied()
        .filter(|&z| loudness(z) > -70.0)
        .collect();
    if above_absolute.is_empty() {
        return f32::NEG_INFINITY;
    }

    // Relative gate 10 LU below the ungated mean of the surviving blocks
    let mean_z = above_absolute.iter().sum::<f64>() / above_absolute.len() as f64;
    let relative_threshold = loudness(mean_z) - 10.0;
    let gated: Vec<f64> = above_absolute
        .iter()
        .copied()
        .filter(|&z| loudness(z) > relative_threshold)
        .collect();
    if gated.is_empty() {
        return f32::NEG_INFINITY;
    }

    let integrated = loudness(gated.iter().sum::<f64>() / gated.len() as f64);
    integrated as f32
}

/// Tempo estimate from onset-strength autocorrelation. Returns `None` on
/// short or silent input.
pub fn estimate_tempo(samples: &[f32], sample_rate: u32) -> Option<f32> {
    if samples.len() < TEMPO_FFT * 4 {
        return None;
    }

    let flux = onset_strength(samples);
    if flux.len() < 8 {
        return None;
    }

    let mean = flux.iter().sum::<f32>() / flux.len() as f32;
    if mean <= 1e-9 {
        return None;
    }
    let centered: Vec<f32> = flux.iter().map(|f| f - mean).collect();

    let frames_per_second = sample_rate as f32 / TEMPO_HOP as f32;
    let min_lag = ((60.0 / MAX_BPM) * frames_per_second).floor().max(1.0) as usize;
    let max_lag = (((60.0 / MIN_BPM) * frames_per_second).ceil() as usize).min(centered.len() - 1);
    if min_lag >= max_lag {
        return None;
    }

    let mut best_lag = 0;
    let mut best_corr = 0.0_f32;
    for lag in min_lag..=max_lag {
        let corr: f32 = centered[..centered.len() - lag]
            .iter()
            .zip(centered[lag..].iter())
            .map(|(a, b)| a * b)
            .sum::<f32>()
            / (centered.len() - lag) as f32;
        if corr > best_corr {
            best_corr = corr;
            best_lag = lag;
        }
    }
    if best_lag == 0 || best_corr <= 0.0 {
        return None;
    }

    let mut bpm = 60.0 * frames_per_second / best_lag as f32;
    // Fold into the perceptual sweet spot before clamping
    while bpm > 140.0 && bpm / 2.0 >= MIN_BPM {
        bpm /= 2.0;
    }
    while bpm < 70.0 && bpm * 2.0 <= MAX_BPM {
        bpm *= 2.0;
    }
    Some(bpm.clamp(MIN_BPM, MAX_BPM))
}

/// Rectified spectral flux envelope.
fn onset_strength(samples: &[f32]) -> Vec<f32> {
    let window = hann_window(TEMPO_FFT);
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(TEMPO_FFT);

    let mut flux = Vec::new();
    let mut prev: Vec<f32> = vec![0.0; TEMPO_FFT / 2 + 1];

    let mut start = 0;
    while start + TEMPO_FFT <= samples.len() {
        let mut frame: Vec<Complex<f32>> = samples[start..start + TEMPO_FFT]
            .iter()
            .zip(window.iter())
            .map(|(s, w)| Complex { re: s * w, im: 0.0 })
            .collect();
        fft.process(&mut frame);

        let magnitude: Vec<f32> = frame
            .iter()
            .take(TEMPO_FFT / 2 + 1)
            .map(|c| c.norm())
            .collect();

        let frame_flux: f32 = magnitude
            .iter()
            .zip(prev.iter())
            .map(|(curr, p)| (curr - p).max(0.0))
            .sum();
        flux.push(frame_flux);

        prev = magnitude;
        start += TEMPO_HOP;
    }

    // First frame's flux is the raw magnitude sum; drop it
    if !flux.is_empty() {
        flux.remove(0);
    }
    flux
}

/// Stereo width as mid/side energy ratio: 0.0 = mono, 1.0 = pure side.
pub fn compute_stereo_width(left: &[f32], right: &[f32]) -> f32 {
    if left.is_empty() || left.len() != right.len() {
        return 0.0;
    }

    let mut mid_sq = 0.0_f32;
    let mut side_sq = 0.0_f32;
    for (l, r) in left.iter().zip(right.iter()) {
        let mid = (l + r) * 0.5;
        let side = (l - r) * 0.5;
        mid_sq += mid * mid;
        side_sq += side * side;
    }
    let n = left.len() as f32;
    let mid_energy = (mid_sq / n).sqrt();
    let side_energy = (side_sq / n).sqrt();
    let total = mid_energy + side_energy;
    if total < 1e-10 {
        return 0.0;
    }
    (side_energy / total).clamp(0.0, 1.0)
}

/// Phase correlation between channels: -1.0 (inverted) to 1.0 (identical).
pub fn compute_phase_correlation(left: &[f32], right: &[f32]) -> f32 {
    if left.is_empty() || left.len() != right.len() {
        return 1.0;
    }

    let mean = |s: &[f32]| s.iter().sum::<f32>() / s.len() as f32;
    let ml = mean(left);
    let mr = mean(right);

    let mut sum_product = 0.0_f32;
    let mut sum_left2 = 0.0_f32;
    let mut sum_right2 = 0.0_f32;
    for (l, r) in left.iter().zip(right.iter()) {
        let dl = l - ml;
        let dr = r - mr;
        sum_product += dl * dr;
        sum_left2 += dl * dl;
        sum_right2 += dr * dr;
    }

    let denominator = (sum_left2 * sum_right2).sqrt();
    if denominator < 1e-10 {
        return 1.0;
    }
    (sum_product / denominator).clamp(-1.0, 1.0)
}

/// Sample peak including linearly interpolated inter-sample midpoints.
pub(crate) fn true_peak_linear(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max);
    }
    let sample_peak = samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max);
    let mut interp_peak = 0.0_f32;
    for pair in samples.windows(2) {
        let interpolated = (pair[0] + pair[1]) / 2.0;
        interp_peak = interp_peak.max(interpolated.abs());
    }
    sample_peak.max(interp_peak)
}

/// Coarse threshold classifier standing in for the external genre model.
fn classify_genre(
    rms: f32,
    crest_db: f32,
    centroid_hz: f32,
    flatness: f32,
    tempo: Option<f32>,
) -> GenreHint {
    if rms <= 1e-6 {
        return GenreHint::Unknown;
    }
    if flatness > 0.3 && tempo.map_or(false, |t| t >= 115.0) {
        return GenreHint::Electronic;
    }
    if crest_db > 14.0 && centroid_hz < 1500.0 {
        return GenreHint::Classical;
    }
    if centroid_hz > 2200.0 && crest_db < 12.0 {
        return GenreHint::Rock;
    }
    GenreHint::Pop
}

pub(crate) fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|n| {
            0.5 * (1.0
                - (2.0 * std::f32::consts::PI * n as f32 / (size as f32 - 1.0)).cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, seconds: f32, sample_rate: u32, amplitude: f32) -> Vec<f32> {
        let frames = (seconds * sample_rate as f32) as usize;
        (0..frames)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn test_empty_buffer_returns_sentinel() {
        let analyzer = ContentAnalyzer::new(44100);
        let profile = analyzer.analyze(&AudioBuffer::silence(0, 2));
        assert_eq!(profile.rms, 0.0);
        assert_eq!(profile.spectral_centroid_hz, 0.0);
        assert!(profile.lufs == f32::NEG_INFINITY);
        assert_eq!(profile.genre_hint, GenreHint::Unknown);
    }

    #[test]
    fn test_single_sample_returns_sentinel() {
        let analyzer = ContentAnalyzer::new(44100);
        let buffer = AudioBuffer::interleaved(vec![0.5, 0.5], 2).unwrap();
        let profile = analyzer.analyze(&buffer);
        assert_eq!(profile.rms, 0.0);
        assert!(profile.tempo_bpm.is_none());
    }

    #[test]
    fn test_silent_buffer_no_nan() {
        let analyzer = ContentAnalyzer::new(44100);
        let profile = analyzer.analyze(&AudioBuffer::silence(44100, 2));
        assert!(!profile.rms.is_nan());
        assert!(!profile.crest_db.is_nan());
        assert!(!profile.spectral_centroid_hz.is_nan());
        assert!(profile.lufs == f32::NEG_INFINITY);
        assert!(profile.tempo_bpm.is_none());
    }

    #[test]
    fn test_centroid_tracks_sine_frequency() {
        let sr = 44100;
        let mono = sine(440.0, 1.0, sr, 0.5);
        let buffer = AudioBuffer::interleaved(mono, 1).unwrap();
        let analyzer = ContentAnalyzer::new(sr);
        let profile = analyzer.analyze(&buffer);
        assert!(
            (profile.spectral_centroid_hz - 440.0).abs() < 100.0,
            "centroid was {}",
            profile.spectral_centroid_hz
        );
    }

    #[test]
    fn test_flatness_separates_tone_and_noise() {
        let sr = 44100;
        let tone = AudioBuffer::interleaved(sine(1000.0, 1.0, sr, 0.5), 1).unwrap();

        let mut seed = 1234_u32;
        let noise: Vec<f32> = (0..sr as usize)
            .map(|_| {
                seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
                (seed as f32 / u32::MAX as f32) - 0.5
            })
            .collect();
        let noise = AudioBuffer::interleaved(noise, 1).unwrap();

        let analyzer = ContentAnalyzer::new(sr);
        let tone_profile = analyzer.analyze(&tone);
        let noise_profile = analyzer.analyze(&noise);
        assert!(tone_profile.spectral_flatness < noise_profile.spectral_flatness);
    }

    #[test]
    fn test_lufs_scales_with_gain() {
        let sr = 44100;
        let quiet = AudioBuffer::interleaved(sine(1000.0, 1.0, sr, 0.05), 1).unwrap();
        let loud = AudioBuffer::interleaved(sine(1000.0, 1.0, sr, 0.5), 1).unwrap();
        let quiet_lufs = integrated_lufs(&quiet, sr);
        let loud_lufs = integrated_lufs(&loud, sr);
        // 20 dB amplitude difference should show up as roughly 20 LU
        assert!((loud_lufs - quiet_lufs - 20.0).abs() < 1.5);
    }

    #[test]
    fn test_tempo_of_click_train() {
        let sr = 44100;
        let seconds = 8;
        let bpm = 120.0;
        let interval = (60.0 / bpm * sr as f32) as usize;
        let mut samples = vec![0.0_f32; sr as usize * seconds];
        let mut i = 0;
        while i < samples.len() {
            for j in 0..64.min(samples.len() - i) {
                samples[i + j] = 0.9 * (1.0 - j as f32 / 64.0);
            }
            i += interval;
        }
        let tempo = estimate_tempo(&samples, sr).expect("tempo expected");
        assert!(
            (tempo - bpm).abs() < 6.0 || (tempo - bpm / 2.0).abs() < 3.0,
            "tempo was {}",
            tempo
        );
    }

    #[test]
    fn test_tempo_none_on_silence() {
        let samples = vec![0.0_f32; 44100 * 2];
        assert!(estimate_tempo(&samples, 44100).is_none());
    }

    #[test]
    fn test_stereo_width_mono_vs_wide() {
        let left = vec![0.5_f32; 1024];
        let same = compute_stereo_width(&left, &left);
        assert!(same < 0.01);

        let right: Vec<f32> = left.iter().map(|s| -s).collect();
        let wide = compute_stereo_width(&left, &right);
        assert!(wide > 0.9);
    }

    #[test]
    fn test_phase_correlation_extremes() {
        let left: Vec<f32> = (0..512).map(|i| (i as f32 * 0.1).sin()).collect();
        let inverted: Vec<f32> = left.iter().map(|s| -s).collect();
        assert!((compute_phase_correlation(&left, &left) - 1.0).abs() < 0.01);
        assert!((compute_phase_correlation(&left, &inverted) + 1.0).abs() < 0.01);
    }

    #[test]
    fn test_fingerprint_tempo_wins() {
        let sr = 44100;
        let buffer = AudioBuffer::interleaved(sine(440.0, 1.0, sr, 0.3), 1).unwrap();
        let fingerprint = TrackFingerprint {
            tempo_bpm: 98.0,
            lufs: -12.0,
            crest_db: 10.0,
            stereo_width: 0.3,
        };
        let analyzer = ContentAnalyzer::new(sr);
        let profile = analyzer.analyze_with_fingerprint(&buffer, Some(&fingerprint));
        assert_eq!(profile.tempo_bpm, Some(98.0));
    }

    #[test]
    fn test_tempo_disabled_profile_still_valid() {
        let sr = 44100;
        let buffer = AudioBuffer::interleaved(sine(440.0, 1.0, sr, 0.3), 1).unwrap();
        let mut analyzer = ContentAnalyzer::new(sr);
        analyzer.set_tempo_enabled(false);
        let profile = analyzer.analyze(&buffer);
        assert!(profile.tempo_bpm.is_none());
        assert!(profile.rms > 0.0);
    }
}
