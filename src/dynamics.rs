/// Dynamics Engine
///
/// Two cooperating effects selected by the processing parameters: a
/// soft-knee compressor that reduces crest factor by attenuating samples
/// above a statistical threshold, and a peak-enhancing expander that
/// restores transients to hypercompressed material. Exactly one of the two
/// runs per buffer; with neither engaged the buffer passes through.
///
/// Neither routine writes into the caller's buffer: both operate on a copy.
/// The chunk driver reuses input slices across successive stage calls, so
/// in-place mutation here corrupts later stages.

use crate::buffer::AudioBuffer;
use crate::level::{from_db, to_db, Measurement};
use crate::spectrum::ProcessingParameters;

/// Dynamics amounts at or below this are treated as disengaged.
pub const ENGAGE_THRESHOLD: f32 = 0.1;

/// Crest reduction per unit of compression amount, in dB.
const CREST_REDUCTION_PER_AMOUNT_DB: f32 = 4.5;
/// Crest increase per unit of expansion amount, in dB.
const CREST_INCREASE_PER_AMOUNT_DB: f32 = 6.0;
/// Expansion engages this far above the detector level.
const EXPANSION_THRESHOLD_OFFSET_DB: f32 = 3.0;

/// Attack/release-smoothed level detector.
///
/// Fed once per buffer with the buffer RMS; the time constants are expressed
/// in seconds of audio, so a long offline buffer converges to its own RMS
/// while small streaming buffers inherit the trajectory of their
/// predecessors. The envelope value is the state that must persist across
/// chunk boundaries.
#[derive(Debug, Clone)]
pub struct LevelDetector {
    attack_secs: f32,
    release_secs: f32,
    envelope: f32,
    primed: bool,
}

impl LevelDetector {
    pub fn new() -> Self {
        Self {
            attack_secs: 0.2,
            release_secs: 1.0,
            envelope: 0.0,
            primed: false,
        }
    }

    /// Smooth a measured level over `duration_secs` of audio.
    pub fn process(&mut self, level: f32, duration_secs: f32) -> f32 {
        if !self.primed {
            self.envelope = level;
            self.primed = true;
            return self.envelope;
        }
        let tau = if level > self.envelope {
            self.attack_secs
        } else {
            self.release_secs
        };
        let coeff = (-duration_secs.max(0.0) / tau).exp();
        self.envelope = level + (self.envelope - level) * coeff;
        self.envelope
    }

    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
        self.primed = false;
    }
}

impl Default for LevelDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply the selected dynamics effect, returning a new buffer.
///
/// `detector` is the envelope state owned by the pipeline; it is advanced by
/// the buffer's RMS regardless of which mode runs so chunk boundaries see a
/// continuous level trajectory.
pub fn apply(
    buffer: &AudioBuffer,
    params: &ProcessingParameters,
    detector: &mut LevelDetector,
    sample_rate: u32,
) -> AudioBuffer {
    let mut audio = buffer.clone();
    audio.clamp_non_finite();

    let m = Measurement::of(audio.samples());
    let duration_secs = audio.frames() as f32 / sample_rate as f32;
    let detector_rms = detector.process(m.rms, duration_secs);
    let detector_rms_db = to_db(detector_rms);

    if params.compression_amount > ENGAGE_THRESHOLD {
        let output = compress(
            audio.samples(),
            params.compression_amount,
            detector_rms_db,
            m.peak_db,
        );
        let result = audio.with_samples(output);
        log_dynamics("compressor", &m, &result);
        result
    } else if params.expansion_amount > ENGAGE_THRESHOLD {
        let output = expand(audio.samples(), params.expansion_amount, detector_rms_db);
        let result = audio.with_samples(output);
        log_dynamics("expander", &m, &result);
        result
    } else {
        tracing::debug!(
            "[dynamics] skipped, compression={:.2} expansion={:.2}",
            params.compression_amount,
            params.expansion_amount
        );
        audio
    }
}

/// Soft-knee compression: attenuate samples above a threshold placed so the
/// target crest reduction (`amount * 4.5 dB`) governs where compression
/// begins. Ratio runs 3:1 to 7:1 with amount. Sign is preserved; smoothing
/// comes from the threshold sitting at a statistical level rather than an
/// instantaneous peak.
fn compress(samples: &[f32], amount: f32, rms_db: f32, peak_db: f32) -> Vec<f32> {
    let crest_db = peak_db - rms_db;
    let target_crest_db = crest_db - amount * CREST_REDUCTION_PER_AMOUNT_DB;
    let threshold = from_db(rms_db + target_crest_db);
    let ratio = 3.0 + amount * 4.0;

    samples
        .iter()
        .map(|&sample| {
            let magnitude = sample.abs();
            if magnitude > threshold {
                let excess = magnitude - threshold;
                sample.signum() * (threshold + excess / ratio)
            } else {
                sample
            }
        })
        .collect()
}

/// Peak-enhancing expansion: scale samples above `rms + 3 dB` upward with a
/// log-domain ratio of `1 + amount`, restoring transient contrast to
/// hypercompressed material. Sign is preserved.
fn expand(samples: &[f32], amount: f32, rms_db: f32) -> Vec<f32> {
    let threshold = from_db(rms_db + EXPANSION_THRESHOLD_OFFSET_DB);
    let ratio = 1.0 + amount;

    samples
        .iter()
        .map(|&sample| {
            let magnitude = sample.abs();
            if magnitude > threshold {
                let excess = magnitude - threshold;
                let excess_db = 20.0 * (excess / threshold + 1.0).log10();
                let expanded_db = excess_db * ratio;
                let expanded = (10.0_f32.powf(expanded_db / 20.0) - 1.0) * threshold;
                sample.signum() * (threshold + expanded)
            } else {
                sample
            }
        })
        .collect()
}

fn log_dynamics(mode: &str, before: &Measurement, result: &AudioBuffer) {
    let after = Measurement::of(result.samples());
    crate::level::log_stage(mode, before, &after);
}
