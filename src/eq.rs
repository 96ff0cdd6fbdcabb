/// Psychoacoustic EQ
///
/// Applies a 26-band gain curve over critical-band (Bark-style) frequency
/// ranges via overlapped FFT processing: Hann-windowed frames of 2048
/// samples at 50% overlap, per-bin gains, weighted overlap-add synthesis.
/// If the transform produces a non-finite sample the stage falls back to a
/// time-domain shelving approximation that applies only bass and treble.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::analysis::{hann_window, ContentProfile, GenreHint};
use crate::biquad::BiquadCoeffs;
use crate::buffer::AudioBuffer;
use crate::level::from_db;
use crate::presets::EqTilts;

pub const NUM_BANDS: usize = 26;
pub const EQ_FFT_SIZE: usize = 2048;
const EQ_HOP: usize = EQ_FFT_SIZE / 2;

/// Critical band edges in Hz. Band `i` covers `BAND_EDGES_HZ[i]` to
/// `BAND_EDGES_HZ[i + 1]`; the parameter groups map as
/// 0-3 bass, 4-7 low-mid, 8-15 mid, 16-19 high-mid, 20-25 treble.
static BAND_EDGES_HZ: [f32; NUM_BANDS + 1] = [
    20.0, 60.0, 120.0, 180.0, 250.0, // bass
    310.0, 370.0, 435.0, 500.0, // low-mid
    630.0, 770.0, 920.0, 1080.0, 1270.0, 1480.0, 1720.0, 2000.0, // mid
    2320.0, 2700.0, 3150.0, 4000.0, // high-mid
    5300.0, 6400.0, 7700.0, 9500.0, 12000.0, 22050.0, // treble
];

/// Build the 26-band target curve (in dB) from preset tilts, shaped by the
/// content profile and scaled by the global intensity multiplier.
pub fn shape_curve(tilts: &EqTilts, profile: &ContentProfile, intensity: f32) -> [f32; NUM_BANDS] {
    let mut bass = tilts.bass;
    let mut low_mid = tilts.low_mid;
    let mut mid = tilts.mid;
    let mut high_mid = tilts.high_mid;
    let mut treble = tilts.treble;

    match profile.genre_hint {
        GenreHint::Electronic => {
            bass *= 1.2;
            treble *= 1.1;
        }
        GenreHint::Classical => {
            bass *= 0.8;
            mid *= 1.2;
        }
        GenreHint::Rock => {
            mid *= 1.3;
            high_mid *= 1.2;
        }
        GenreHint::Pop | GenreHint::Unknown => {}
    }

    if profile.spectral_centroid_hz > 3500.0 {
        treble *= 0.7;
        high_mid *= 0.8;
    } else if profile.spectral_centroid_hz > 0.0 && profile.spectral_centroid_hz < 1000.0 {
        treble *= 1.3;
        mid *= 1.2;
    }

    // Gentler on highly dynamic material, more assertive on flat material
    let range_scale = if profile.dynamic_range_db > 25.0 {
        0.8
    } else if profile.dynamic_range_db < 10.0 {
        1.2
    } else {
        1.0
    };

    let scale = range_scale * intensity.clamp(0.0, 1.0);
    let mut curve = [0.0_f32; NUM_BANDS];
    for (band, value) in curve.iter_mut().enumerate() {
        let gain = match band {
            0..=3 => bass,
            4..=7 => low_mid,
            8..=15 => mid,
            16..=19 => high_mid,
            _ => treble,
        };
        *value = gain * scale;
    }
    curve
}

pub struct PsychoacousticEQ {
    sample_rate: u32,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl PsychoacousticEQ {
    pub fn new(sample_rate: u32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(EQ_FFT_SIZE);
        let ifft = planner.plan_fft_inverse(EQ_FFT_SIZE);
        Self {
            sample_rate,
            fft,
            ifft,
            window: hann_window(EQ_FFT_SIZE),
        }
    }

    /// Apply the band curve to a buffer, returning a new buffer of the same
    /// shape.
    pub fn process_chunk(
        &self,
        buffer: &AudioBuffer,
        curve: &[f32; NUM_BANDS],
        profile: &ContentProfile,
    ) -> AudioBuffer {
        if buffer.is_empty() {
            return buffer.clone();
        }

        let bin_gains = self.bin_gains(curve);

        let processed: Vec<Vec<f32>> = if buffer.channels() == 1 {
            vec![self.process_channel(buffer.samples(), &bin_gains)]
        } else {
            let (left, right) = buffer.split_channels();
            vec![
                self.process_channel(&left, &bin_gains),
                self.process_channel(&right, &bin_gains),
            ]
        };

        if processed
            .iter()
            .any(|channel| channel.iter().any(|s| !s.is_finite()))
        {
            tracing::debug!(
                "fft eq produced non-finite output (centroid {:.0} Hz), using shelving fallback",
                profile.spectral_centroid_hz
            );
            return self.shelving_fallback(buffer, curve);
        }

        if buffer.channels() == 1 {
            buffer.with_samples(processed.into_iter().next().unwrap())
        } else {
            let mut channels = processed.into_iter();
            let left = channels.next().unwrap();
            let right = channels.next().unwrap();
            AudioBuffer::from_channels(&left, &right)
        }
    }

    /// Linear gain per positive-frequency bin.
    fn bin_gains(&self, curve: &[f32; NUM_BANDS]) -> Vec<f32> {
        let bins = EQ_FFT_SIZE / 2 + 1;
        let mut gains = vec![1.0_f32; bins];
        for (k, gain) in gains.iter_mut().enumerate() {
            let freq = k as f32 * self.sample_rate as f32 / EQ_FFT_SIZE as f32;
            *gain = from_db(curve[band_for_frequency(freq)]);
        }
        gains
    }

    /// Weighted overlap-add over one channel.
    fn process_channel(&self, samples: &[f32], bin_gains: &[f32]) -> Vec<f32> {
        let n = samples.len();
        let mut out = vec![0.0_f32; n];
        let mut window_sum = vec![0.0_f32; n];

        let mut pos = 0;
        loop {
            let mut frame: Vec<Complex<f32>> = (0..EQ_FFT_SIZE)
                .map(|i| {
                    let sample = if pos + i < n { samples[pos + i] } else { 0.0 };
                    Complex {
                        re: sample * self.window[i],
                        im: 0.0,
                    }
                })
                .collect();

            self.fft.process(&mut frame);

            for (k, value) in frame.iter_mut().enumerate() {
                let bin = if k <= EQ_FFT_SIZE / 2 {
                    k
                } else {
                    EQ_FFT_SIZE - k
                };
                *value *= bin_gains[bin];
            }

            self.ifft.process(&mut frame);

            let scale = 1.0 / EQ_FFT_SIZE as f32;
            for i in 0..EQ_FFT_SIZE {
                if pos + i < n {
                    out[pos + i] += frame[i].re * scale * self.window[i];
                    window_sum[pos + i] += self.window[i] * self.window[i];
                }
            }

            pos += EQ_HOP;
            if pos >= n {
                break;
            }
        }

        for (sample, wsum) in out.iter_mut().zip(window_sum.iter()) {
            if *wsum > 1e-6 {
                *sample /= *wsum;
            }
        }
        out
    }

    /// Time-domain approximation applying only bass and treble gain.
    fn shelving_fallback(&self, buffer: &AudioBuffer, curve: &[f32; NUM_BANDS]) -> AudioBuffer {
        let bass_gain_db = (curve[0..4].iter().sum::<f32>() / 4.0).clamp(-6.0, 6.0);
        let treble_gain_db = (curve[20..26].iter().sum::<f32>() / 6.0).clamp(-6.0, 6.0);

        let low = BiquadCoeffs::low_shelf(self.sample_rate as f64, 250.0, 0.707, bass_gain_db as f64);
        let high =
            BiquadCoeffs::high_shelf(self.sample_rate as f64, 4000.0, 0.707, treble_gain_db as f64);

        let filter = |channel: &[f32]| -> Vec<f32> {
            let stage1 = low.process_channel(channel);
            high.process_channel(&stage1)
        };

        if buffer.channels() == 1 {
            buffer.with_samples(filter(buffer.samples()))
        } else {
            let (left, right) = buffer.split_channels();
            AudioBuffer::from_channels(&filter(&left), &filter(&right))
        }
    }
}

/// Index of the critical band containing `freq`.
fn band_for_frequency(freq: f32) -> usize {
    for (band, edge) in BAND_EDGES_HZ[1..].iter().enumerate() {
        if freq < *edge {
            return band;
        }
    }
    NUM_BANDS - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ContentAnalyzer;
    use crate::level::Measurement;

    fn sine_buffer(freq: f32, seconds: f32, sample_rate: u32) -> AudioBuffer {
        let frames = (seconds * sample_rate as f32) as usize;
        let samples: Vec<f32> = (0..frames)
            .map(|i| {
                0.25 * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect();
        AudioBuffer::interleaved(samples, 1).unwrap()
    }

    #[test]
    fn test_band_mapping_matches_parameter_groups() {
        assert!(band_for_frequency(50.0) <= 3);
        assert!((4..=7).contains(&band_for_frequency(300.0)));
        assert!((8..=15).contains(&band_for_frequency(1000.0)));
        assert!((16..=19).contains(&band_for_frequency(3000.0)));
        assert!(band_for_frequency(10_000.0) >= 20);
        assert_eq!(band_for_frequency(30_000.0), NUM_BANDS - 1);
    }

    #[test]
    fn test_flat_curve_is_near_identity() {
        let sr = 44100;
        let buffer = sine_buffer(440.0, 0.5, sr);
        let eq = PsychoacousticEQ::new(sr);
        let profile = ContentAnalyzer::new(sr).analyze(&buffer);

        let curve = [0.0_f32; NUM_BANDS];
        let output = eq.process_chunk(&buffer, &curve, &profile);

        assert_eq!(output.frames(), buffer.frames());
        let in_rms = Measurement::of(buffer.samples()).rms;
        let out_rms = Measurement::of(output.samples()).rms;
        assert!(
            (out_rms / in_rms - 1.0).abs() < 0.05,
            "rms ratio {}",
            out_rms / in_rms
        );
    }

    #[test]
    fn test_bass_boost_raises_low_frequency_level() {
        let sr = 44100;
        let buffer = sine_buffer(100.0, 0.5, sr);
        let eq = PsychoacousticEQ::new(sr);
        let profile = ContentAnalyzer::new(sr).analyze(&buffer);

        let mut curve = [0.0_f32; NUM_BANDS];
        for value in curve.iter_mut().take(4) {
            *value = 6.0;
        }
        let output = eq.process_chunk(&buffer, &curve, &profile);

        let in_rms = Measurement::of(buffer.samples()).rms;
        let out_rms = Measurement::of(output.samples()).rms;
        let gain_db = 20.0 * (out_rms / in_rms).log10();
        assert!((gain_db - 6.0).abs() < 1.0, "band gain was {gain_db} dB");
    }

    #[test]
    fn test_treble_cut_leaves_bass_untouched() {
        let sr = 44100;
        let buffer = sine_buffer(100.0, 0.5, sr);
        let eq = PsychoacousticEQ::new(sr);
        let profile = ContentAnalyzer::new(sr).analyze(&buffer);

        let mut curve = [0.0_f32; NUM_BANDS];
        for value in curve.iter_mut().skip(20) {
            *value = -12.0;
        }
        let output = eq.process_chunk(&buffer, &curve, &profile);

        let in_rms = Measurement::of(buffer.samples()).rms;
        let out_rms = Measurement::of(output.samples()).rms;
        assert!((out_rms / in_rms - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_curve_shaping_dampens_bright_content() {
        let sr = 44100;
        let buffer = sine_buffer(440.0, 0.25, sr);
        let mut profile = ContentAnalyzer::new(sr).analyze(&buffer);
        profile.spectral_centroid_hz = 5000.0;
        profile.dynamic_range_db = 15.0;

        let tilts = EqTilts {
            bass: 1.0,
            low_mid: 0.5,
            mid: 0.5,
            high_mid: 1.0,
            treble: 2.0,
        };
        let curve = shape_curve(&tilts, &profile, 1.0);
        assert!((curve[25] - 2.0 * 0.7).abs() < 1e-4);
        assert!((curve[16] - 1.0 * 0.8).abs() < 1e-4);
    }

    #[test]
    fn test_curve_intensity_scaling() {
        let sr = 44100;
        let buffer = sine_buffer(440.0, 0.25, sr);
        let mut profile = ContentAnalyzer::new(sr).analyze(&buffer);
        profile.spectral_centroid_hz = 2000.0;
        profile.dynamic_range_db = 15.0;

        let tilts = EqTilts {
            bass: 2.0,
            low_mid: 0.0,
            mid: 0.0,
            high_mid: 0.0,
            treble: 0.0,
        };
        let half = shape_curve(&tilts, &profile, 0.5);
        let full = shape_curve(&tilts, &profile, 1.0);
        assert!((half[0] * 2.0 - full[0]).abs() < 1e-4);
    }

    #[test]
    fn test_stereo_shape_preserved() {
        let sr = 44100;
        let frames = 8192;
        let left: Vec<f32> = (0..frames)
            .map(|i| 0.2 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / sr as f32).sin())
            .collect();
        let right: Vec<f32> = (0..frames)
            .map(|i| 0.2 * (2.0 * std::f32::consts::PI * 330.0 * i as f32 / sr as f32).sin())
            .collect();
        let buffer = AudioBuffer::from_channels(&left, &right);
        let eq = PsychoacousticEQ::new(sr);
        let profile = ContentAnalyzer::new(sr).analyze(&buffer);

        let curve = [1.0_f32; NUM_BANDS];
        let output = eq.process_chunk(&buffer, &curve, &profile);
        assert_eq!(output.channels(), 2);
        assert_eq!(output.frames(), buffer.frames());
        assert!(output.samples().iter().all(|s| s.is_finite()));
    }
}
