/// Loudness Stage
///
/// Three sequential sub-stages close the pipeline: a conditional RMS boost
/// for under-leveled material, unconditional peak normalization to the
/// preset ceiling, and a tanh-based safety soft clip for anything still
/// above the safety threshold. Each sub-stage measures, decides, applies
/// and logs a one-line record.
///
/// RMS boost runs before peak normalization; on very quiet input the peak
/// target is the binding constraint and the loudness target is missed.

use std::collections::VecDeque;

use crate::buffer::AudioBuffer;
use crate::level::{amplify_in_place, from_db, to_db, Measurement};
use crate::spectrum::ProcessingParameters;

/// Peak level that triggers the safety clipper, in dBFS.
pub const SAFETY_THRESHOLD_DB: f32 = 1.0;
/// Linear level where soft-clip saturation begins.
pub const SOFT_CLIP_THRESHOLD: f32 = 0.89;
/// Maximum soft-clip output level.
pub const SOFT_CLIP_CEILING: f32 = 0.99;

/// RMS boost preconditions
const BOOST_MIN_DEFICIT_DB: f32 = 0.5;
const BOOST_QUIET_RMS_DB: f32 = -15.0;
const BOOST_MAX_DB: f32 = 12.0;

/// Frames of the previous buffer kept for the boundary inter-sample peak
/// estimate.
pub(crate) const EDGE_RING_FRAMES: usize = 4;

/// Gains applied by the stage, reported into `ChunkMetrics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoudnessOutcome {
    pub rms_boost_db: f32,
    pub normalize_gain_db: f32,
    pub soft_clip_engaged: bool,
}

/// Run the full loudness stage in place.
///
/// `edge_ring` carries the final samples of the previous output buffer so
/// the inter-sample peak estimate spans chunk boundaries.
pub fn process(
    buffer: &mut AudioBuffer,
    params: &ProcessingParameters,
    edge_ring: &mut VecDeque<f32>,
) -> LoudnessOutcome {
    let mut outcome = LoudnessOutcome::default();

    outcome.rms_boost_db = rms_boost(buffer, params);
    outcome.normalize_gain_db = peak_normalize(buffer, params.target_peak_db);
    outcome.soft_clip_engaged = safety_soft_clip(buffer, edge_ring);

    outcome
}

/// Boost RMS toward the target, only when the material is genuinely quiet
/// and dynamics are not being expanded. Returns the gain applied in dB.
fn rms_boost(buffer: &mut AudioBuffer, params: &ProcessingParameters) -> f32 {
    let before = Measurement::of(buffer.samples());
    let deficit_db = params.output_target_rms_db - before.rms_db;

    let should_boost = deficit_db > BOOST_MIN_DEFICIT_DB
        && before.rms_db < BOOST_QUIET_RMS_DB
        && params.expansion_amount < 0.1;

    if !should_boost {
        if deficit_db > BOOST_MIN_DEFICIT_DB {
            tracing::debug!(
                "[rms boost] skipped, rms {:.2} dB target {:.2} dB",
                before.rms_db,
                params.output_target_rms_db
            );
        }
        return 0.0;
    }

    let boost_db = deficit_db.clamp(0.0, BOOST_MAX_DB);
    amplify_in_place(buffer.samples_mut(), boost_db);

    let after = Measurement::of(buffer.samples());
    crate::level::log_stage("rms boost", &before, &after);
    boost_db
}

/// Scale so the sample peak lands exactly on the target ceiling. Returns the
/// gain applied in dB; near-silent buffers are left untouched.
fn peak_normalize(buffer: &mut AudioBuffer, target_peak_db: f32) -> f32 {
    let before = Measurement::of(buffer.samples());
    if before.peak <= 1e-3 {
        return 0.0;
    }

    let target_peak = from_db(target_peak_db);
    let scale = target_peak / before.peak;
    for sample in buffer.samples_mut() {
        *sample *= scale;
    }

    let after = Measurement::of(buffer.samples());
    crate::level::log_stage("peak normalize", &before, &after);
    target_peak_db - before.peak_db
}

/// Apply the tanh soft clipper when the (inter-sample) peak exceeds the
/// safety threshold. Returns whether clipping engaged.
fn safety_soft_clip(buffer: &mut AudioBuffer, edge_ring: &mut VecDeque<f32>) -> bool {
    let true_peak = boundary_true_peak(buffer.samples(), edge_ring);
    let true_peak_db = to_db(true_peak);

    let engaged = if true_peak_db > SAFETY_THRESHOLD_DB {
        tracing::debug!(
            "[safety clip] peak {:.2} dB exceeds threshold {:.2} dB",
            true_peak_db,
            SAFETY_THRESHOLD_DB
        );
        let clipped = soft_clip(buffer.samples(), SOFT_CLIP_THRESHOLD, SOFT_CLIP_CEILING);
        *buffer = buffer.with_samples(clipped);
        true
    } else {
        false
    };

    // Remember the tail for the next buffer's boundary estimate
    let samples = buffer.samples();
    let keep = (EDGE_RING_FRAMES * buffer.channels()).min(samples.len());
    edge_ring.clear();
    edge_ring.extend(samples[samples.len() - keep..].iter().copied());

    engaged
}

/// Gentle saturation-based peak limiting via hyperbolic tangent.
///
/// Below `threshold` the signal passes linearly; above it, the excess is
/// compressed through `tanh(excess / (headroom * 1.5)) * headroom`, where
/// `headroom = ceiling - threshold`. Sign is preserved.
pub fn soft_clip(samples: &[f32], threshold: f32, ceiling: f32) -> Vec<f32> {
    let threshold = threshold.min(ceiling * 0.99);
    let headroom = ceiling - threshold;
    let scale = headroom * 1.5;

    samples
        .iter()
        .map(|&sample| {
            let magnitude = sample.abs();
            if magnitude <= threshold {
                sample
            } else {
                let excess = magnitude - threshold;
                let compressed = headroom * (excess / scale).tanh();
                sample.signum() * (threshold + compressed)
            }
        })
        .collect()
}

/// Peak estimate including linear inter-sample interpolation across the
/// previous buffer's tail.
fn boundary_true_peak(samples: &[f32], edge_ring: &VecDeque<f32>) -> f32 {
    let mut peak = crate::analysis::true_peak_linear(samples);
    if let (Some(&last_prev), Some(&first)) = (edge_ring.back(), samples.first()) {
        peak = peak.max(((last_prev + first) / 2.0).abs());
    }
    peak
}
