// Biquad Filters
// Second-order sections used by the K-weighting prefilter and the
// shelving EQ fallback.

/// Biquad filter coefficients (Direct Form II Transposed)
#[derive(Debug, Clone, Copy)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

/// Biquad filter state (per channel)
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadState {
    z1: f64,
    z2: f64,
}

impl BiquadCoeffs {
    /// Create high-pass filter coefficients
    pub fn highpass(sample_rate: f64, cutoff_hz: f64, q: f64) -> Self {
        let w0 = 2.0 * std::f64::consts::PI * cutoff_hz / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        let b0 = (1.0 + cos_w0) / 2.0;
        let b1 = -(1.0 + cos_w0);
        let b2 = (1.0 + cos_w0) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Create high-shelf filter coefficients
    pub fn high_shelf(sample_rate: f64, cutoff_hz: f64, q: f64, gain_db: f64) -> Self {
        let a_gain = 10.0_f64.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f64::consts::PI * cutoff_hz / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);
        let two_sqrt_a_alpha = 2.0 * a_gain.sqrt() * alpha;

        let b0 = a_gain * ((a_gain + 1.0) + (a_gain - 1.0) * cos_w0 + two_sqrt_a_alpha);
        let b1 = -2.0 * a_gain * ((a_gain - 1.0) + (a_gain + 1.0) * cos_w0);
        let b2 = a_gain * ((a_gain + 1.0) + (a_gain - 1.0) * cos_w0 - two_sqrt_a_alpha);
        let a0 = (a_gain + 1.0) - (a_gain - 1.0) * cos_w0 + two_sqrt_a_alpha;
        let a1 = 2.0 * ((a_gain - 1.0) - (a_gain + 1.0) * cos_w0);
        let a2 = (a_gain + 1.0) - (a_gain - 1.0) * cos_w0 - two_sqrt_a_alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Create low-shelf filter coefficients
    pub fn low_shelf(sample_rate: f64, cutoff_hz: f64, q: f64, gain_db: f64) -> Self {
        let a_gain = 10.0_f64.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f64::consts::PI * cutoff_hz / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);
        let two_sqrt_a_alpha = 2.0 * a_gain.sqrt() * alpha;

        let b0 = a_gain * ((a_gain + 1.0) - (a_gain - 1.0) * cos_w0 + two_sqrt_a_alpha);
        let b1 = 2.0 * a_gain * ((a_gain - 1.0) - (a_gain + 1.0) * cos_w0);
        let b2 = a_gain * ((a_gain + 1.0) - (a_gain - 1.0) * cos_w0 - two_sqrt_a_alpha);
        let a0 = (a_gain + 1.0) + (a_gain - 1.0) * cos_w0 + two_sqrt_a_alpha;
        let a1 = -2.0 * ((a_gain - 1.0) + (a_gain + 1.0) * cos_w0);
        let a2 = (a_gain + 1.0) + (a_gain - 1.0) * cos_w0 - two_sqrt_a_alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Process single sample (Direct Form II Transposed)
    #[inline]
    pub fn process_sample(&self, input: f64, state: &mut BiquadState) -> f64 {
        let output = self.b0 * input + state.z1;
        state.z1 = self.b1 * input - self.a1 * output + state.z2;
        state.z2 = self.b2 * input - self.a2 * output;
        output
    }

    /// Process a whole channel with fresh state, returning a new vector.
    pub fn process_channel(&self, samples: &[f32]) -> Vec<f32> {
        let mut state = BiquadState::default();
        samples
            .iter()
            .map(|&s| self.process_sample(s as f64, &mut state) as f32)
            .collect()
    }
}

/// ITU-R BS.1770 K-weighting prefilter: high-shelf stage followed by a
/// high-pass stage.
pub fn k_weighting(sample_rate: f64) -> (BiquadCoeffs, BiquadCoeffs) {
    let shelf = BiquadCoeffs::high_shelf(sample_rate, 1681.97, 0.7071, 3.999);
    let highpass = BiquadCoeffs::highpass(sample_rate, 38.135, 0.5003);
    (shelf, highpass)
}
