/// Stereo Width Adjuster
///
/// Adjusts the mid/side balance toward a target width with safety rules
/// that limit expansion on already-loud material. Widening adds correlated
/// peaks and can undo the work of the compressor, so expansion is clamped
/// or skipped when the signal is hot.

use crate::analysis::compute_stereo_width;
use crate::buffer::AudioBuffer;

/// Width changes smaller than this are skipped to avoid numeric churn.
pub const MIN_WIDTH_CHANGE: f32 = 0.1;
/// Peak level above which expansion is restricted.
const LOUD_PEAK_DB: f32 = 3.0;
/// Maximum expansion allowed on loud material in adaptive mode.
const MAX_LOUD_WIDTH_INCREASE: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyMode {
    /// Limit expansion for loud material.
    Adaptive,
    /// Skip expansion entirely when the peak is hot.
    Conservative,
}

/// Measure the stereo width of a buffer (0 = mono, 1 = fully decorrelated).
pub fn measure_width(buffer: &AudioBuffer) -> f32 {
    if buffer.channels() != 2 {
        return 0.0;
    }
    let (left, right) = buffer.split_channels();
    compute_stereo_width(&left, &right)
}

/// Adjust stereo width toward `target_width`, returning a new buffer.
/// Mono input is returned unchanged.
pub fn adjust(
    buffer: &AudioBuffer,
    current_width: f32,
    target_width: f32,
    peak_db: f32,
    mode: SafetyMode,
) -> AudioBuffer {
    if buffer.channels() != 2 || buffer.is_empty() {
        return buffer.clone();
    }

    let mut target = target_width;

    match mode {
        SafetyMode::Adaptive => {
            if peak_db > LOUD_PEAK_DB && target > current_width {
                target = target.min(current_width + MAX_LOUD_WIDTH_INCREASE);
                tracing::debug!(
                    "[stereo width] limited expansion for loud material, target {:.2}",
                    target
                );
            }
        }
        SafetyMode::Conservative => {
            if peak_db > LOUD_PEAK_DB && target > current_width {
                tracing::debug!(
                    "[stereo width] skipped expansion, peak {:.2} dB too high",
                    peak_db
                );
                return buffer.clone();
            }
        }
    }

    if (current_width - target).abs() <= MIN_WIDTH_CHANGE {
        return buffer.clone();
    }

    apply_width(buffer, target)
}

/// Rescale the side signal so the buffer's width ratio hits `target`.
fn apply_width(buffer: &AudioBuffer, target: f32) -> AudioBuffer {
    let (left, right) = buffer.split_channels();

    let mut mid = Vec::with_capacity(left.len());
    let mut side = Vec::with_capacity(left.len());
    for (l, r) in left.iter().zip(right.iter()) {
        mid.push((l + r) * 0.5);
        side.push((l - r) * 0.5);
    }

    let energy = |signal: &[f32]| -> f32 {
        (signal.iter().map(|s| s * s).sum::<f32>() / signal.len() as f32).sqrt()
    };
    let mid_energy = energy(&mid);
    let side_energy = energy(&side);

    // Width metric is side / (mid + side); solve for the side scale that
    // hits the target ratio. A fully-side target is unreachable, cap below 1.
    let target = target.clamp(0.0, 0.98);
    if side_energy < 1e-10 || mid_energy < 1e-10 {
        return buffer.clone();
    }
    let scale = (target / (1.0 - target)) * (mid_energy / side_energy);

    let mut out_left = Vec::with_capacity(left.len());
    let mut out_right = Vec::with_capacity(right.len());
    for (m, s) in mid.iter().zip(side.iter()) {
        let scaled_side = s * scale;
        out_left.push(m + scaled_side);
        out_right.push(m - scaled_side);
    }

    AudioBuffer::from_channels(&out_left, &out_right)
}
