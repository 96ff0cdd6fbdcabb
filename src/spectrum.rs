/// Spectrum Mapper
///
/// Translates a content profile into a position on the processing spectrum
/// (four normalized scalars) and derives the per-chunk processing decision
/// record from it. Both functions are pure: same profile in, same
/// parameters out.

use serde::Serialize;

use crate::analysis::ContentProfile;
use crate::level::to_db;
use crate::presets::Preset;

/// Reference RMS used when recommending input gain for quiet material.
const GAIN_REFERENCE_RMS_DB: f32 = -18.0;
const MAX_INPUT_GAIN_DB: f32 = 6.0;

/// Position on the processing spectrum. Every field is in [0, 1].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SpectrumPosition {
    /// 0 = very quiet, 1 = near full scale
    pub input_level: f32,
    /// 0 = hypercompressed, 1 = highly dynamic
    pub dynamic_range: f32,
    /// 0 = dark, 0.5 = neutral, 1 = bright
    pub spectral_balance: f32,
    /// Perceived intensity
    pub energy: f32,
}

/// Per-chunk processing decision record.
///
/// `compression_amount` and `expansion_amount` are mutually exclusive:
/// whichever is engaged, the other is zero.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingParameters {
    pub input_gain_db: f32,
    pub compression_ratio: f32,
    pub compression_amount: f32,
    pub expansion_amount: f32,
    pub output_target_rms_db: f32,
    pub target_peak_db: f32,
    pub target_stereo_width: f32,
}

fn clamp01(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

fn map_range(value: f32, from_low: f32, from_high: f32) -> f32 {
    (value - from_low) / (from_high - from_low)
}

/// Map a content profile to its spectrum position.
pub fn analyze_to_spectrum_position(profile: &ContentProfile) -> SpectrumPosition {
    let rms_db = to_db(profile.rms);
    let input_level = clamp01(map_range(rms_db, -40.0, -6.0));
    let dynamic_range = clamp01(map_range(profile.crest_db, 6.0, 20.0));

    let spectral_balance = if profile.spectral_centroid_hz > 0.0 {
        clamp01(map_range(
            (profile.spectral_centroid_hz / 1000.0).log2(),
            -2.0,
            2.0,
        ))
    } else {
        0.5
    };

    // Perceived intensity: level carries most of the weight, tempo and
    // noisiness fill in the rest. Unknown tempo sits at the midpoint.
    let tempo_norm = profile
        .tempo_bpm
        .map(|bpm| clamp01(map_range(bpm, 60.0, 180.0)))
        .unwrap_or(0.5);
    let energy = clamp01(
        0.5 * input_level + 0.3 * tempo_norm + 0.2 * profile.spectral_flatness,
    );

    SpectrumPosition {
        input_level,
        dynamic_range,
        spectral_balance,
        energy,
    }
}

/// Derive processing parameters from a spectrum position and preset hint.
///
/// The decision table works in quadrants; the preset hint biases the
/// dynamics amounts and supplies the final peak ceiling, but never overrides
/// the quadrant decision.
pub fn calculate_processing_parameters(
    position: SpectrumPosition,
    preset: Preset,
) -> ProcessingParameters {
    let profile = preset.profile();

    let mut compression_amount = 0.0_f32;
    let mut expansion_amount = 0.0_f32;

    if position.input_level < 0.3 && position.dynamic_range > 0.6 {
        // Under-leveled, dynamic: lift level, tame the widest peaks
        compression_amount = 0.3 + (position.dynamic_range - 0.6) * 0.5;
    } else if position.input_level > 0.7 && position.dynamic_range < 0.3 {
        // Loud, hypercompressed: de-master
        expansion_amount = 0.4 + (0.3 - position.dynamic_range) / 0.3 * 0.4;
    } else if position.input_level > 0.6 && position.dynamic_range > 0.5 {
        // Loud, dynamic: tame peaks while preserving level
        compression_amount = 0.6 + (position.dynamic_range - 0.5) * 0.6;
    }
    // Otherwise natural and balanced: mostly EQ + normalization.

    // Preset bias nudges the engaged dynamics amount without flipping modes
    if expansion_amount <= 0.1 {
        compression_amount = (compression_amount + profile.dynamics_bias * 0.2).clamp(0.0, 1.0);
        if compression_amount > 0.1 {
            expansion_amount = 0.0;
        }
    } else {
        compression_amount = 0.0;
        expansion_amount =
            (expansion_amount - profile.dynamics_bias.max(0.0) * 0.2).clamp(0.0, 1.0);
    }

    // Positive input gain for under-leveled material only; expansion chunks
    // keep their level untouched.
    let rms_db = -40.0 + position.input_level * 34.0;
    let input_gain_db = if expansion_amount > 0.1 {
        0.0
    } else {
        (GAIN_REFERENCE_RMS_DB - rms_db).clamp(0.0, MAX_INPUT_GAIN_DB)
    };

    let compression_ratio = if compression_amount > 0.1 {
        3.0 + compression_amount * 4.0
    } else {
        1.0
    };

    let output_target_rms_db =
        (-14.0 + (position.energy - 0.5) * 4.0 + profile.dynamics_bias * 2.0).clamp(-20.0, -8.0);

    let target_stereo_width =
        (0.3 + 0.2 * position.energy + profile.stereo_bias).clamp(0.0, 1.2);

    ProcessingParameters {
        input_gain_db,
        compression_ratio,
        compression_amount,
        expansion_amount,
        output_target_rms_db,
        target_peak_db: profile.peak_target_db,
        target_stereo_width,
    }
}
