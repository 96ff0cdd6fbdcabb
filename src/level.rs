/// Level measurement and gain utilities
///
/// Shared peak/RMS/crest measurement and dB conversion used by every
/// processing stage. All conversions floor at 1e-10 linear so silent audio
/// yields a finite (-200 dB) value instead of -inf.

/// Linear floor for dB conversion (avoids log(0)).
pub const DB_FLOOR: f32 = 1e-10;

/// Convert linear amplitude to dBFS.
pub fn to_db(linear: f32) -> f32 {
    20.0 * linear.max(DB_FLOOR).log10()
}

/// Convert dBFS to linear amplitude.
pub fn from_db(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Peak/RMS/crest snapshot of an audio slice.
#[derive(Debug, Clone, Copy)]
pub struct Measurement {
    pub peak: f32,
    pub rms: f32,
    pub peak_db: f32,
    pub rms_db: f32,
    pub crest_db: f32,
}

impl Measurement {
    /// Measure peak, RMS and crest factor of a sample slice.
    pub fn of(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self {
                peak: 0.0,
                rms: 0.0,
                peak_db: to_db(0.0),
                rms_db: to_db(0.0),
                crest_db: 0.0,
            };
        }

        let peak = samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max);
        let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
        let peak_db = to_db(peak);
        let rms_db = to_db(rms);
        let crest_db = if rms > 0.0 { peak_db - rms_db } else { 0.0 };

        Self {
            peak,
            rms,
            peak_db,
            rms_db,
            crest_db,
        }
    }
}

/// Apply a broadband gain in dB, returning a new sample vector.
pub fn amplify(samples: &[f32], gain_db: f32) -> Vec<f32> {
    let gain = from_db(gain_db);
    samples.iter().map(|s| s * gain).collect()
}

/// Apply a broadband gain in dB in place.
pub fn amplify_in_place(samples: &mut [f32], gain_db: f32) {
    let gain = from_db(gain_db);
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
}

/// Emit the before/after record every processing stage logs.
pub(crate) fn log_stage(step: &str, before: &Measurement, after: &Measurement) {
    tracing::debug!(
        "[{}] peak {:.2} -> {:.2} dB, rms {:.2} -> {:.2} dB, crest {:.2} -> {:.2} dB",
        step,
        before.peak_db,
        after.peak_db,
        before.rms_db,
        after.rms_db,
        before.crest_db,
        after.crest_db,
    );
}
