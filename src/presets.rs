/// Mastering Presets
///
/// Immutable table mapping preset name to target curves. Lookup is
/// case-insensitive at the boundary; internally presets are a closed enum
/// indexing into a static table. Unknown names resolve to `Adaptive`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Preset {
    Adaptive,
    Gentle,
    Warm,
    Bright,
    Punchy,
}

impl Preset {
    /// Parse a preset name, case-insensitively. Unknown names fall back to
    /// `Adaptive` rather than erroring.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "gentle" => Preset::Gentle,
            "warm" => Preset::Warm,
            "bright" => Preset::Bright,
            "punchy" => Preset::Punchy,
            _ => Preset::Adaptive,
        }
    }

    pub fn name(self) -> &'static str {
        self.profile().name
    }

    pub fn profile(self) -> &'static PresetProfile {
        &PRESET_TABLE[self as usize]
    }
}

/// Per-band EQ tilts in dB.
#[derive(Debug, Clone, Copy)]
pub struct EqTilts {
    pub bass: f32,
    pub low_mid: f32,
    pub mid: f32,
    pub high_mid: f32,
    pub treble: f32,
}

/// One row of the preset table.
#[derive(Debug, Clone, Copy)]
pub struct PresetProfile {
    pub name: &'static str,
    pub peak_target_db: f32,
    pub eq_tilts: EqTilts,
    pub stereo_bias: f32,
    pub dynamics_bias: f32,
}

static PRESET_TABLE: [PresetProfile; 5] = [
    PresetProfile {
        name: "adaptive",
        peak_target_db: -1.0,
        eq_tilts: EqTilts {
            bass: 0.5,
            low_mid: 0.0,
            mid: 0.5,
            high_mid: 0.5,
            treble: 0.5,
        },
        stereo_bias: 0.0,
        dynamics_bias: 0.0,
    },
    PresetProfile {
        name: "gentle",
        peak_target_db: -1.5,
        eq_tilts: EqTilts {
            bass: 0.3,
            low_mid: 0.2,
            mid: 0.2,
            high_mid: 0.1,
            treble: 0.2,
        },
        stereo_bias: 0.0,
        dynamics_bias: -0.2,
    },
    PresetProfile {
        name: "warm",
        peak_target_db: -1.2,
        eq_tilts: EqTilts {
            bass: 1.5,
            low_mid: 0.8,
            mid: 0.2,
            high_mid: -0.5,
            treble: -1.0,
        },
        stereo_bias: -0.05,
        dynamics_bias: -0.1,
    },
    PresetProfile {
        name: "bright",
        peak_target_db: -0.8,
        eq_tilts: EqTilts {
            bass: -0.5,
            low_mid: -0.2,
            mid: 0.3,
            high_mid: 1.0,
            treble: 1.8,
        },
        stereo_bias: 0.1,
        dynamics_bias: 0.0,
    },
    PresetProfile {
        name: "punchy",
        peak_target_db: -0.5,
        eq_tilts: EqTilts {
            bass: 1.2,
            low_mid: 0.3,
            mid: 0.8,
            high_mid: 1.0,
            treble: 0.6,
        },
        stereo_bias: 0.05,
        dynamics_bias: 0.3,
    },
];

/// Look up a preset profile by name.
pub fn get(name: &str) -> &'static PresetProfile {
    Preset::parse(name).profile()
}
