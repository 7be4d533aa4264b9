//! Parameter kinds, ranges and candidate records

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

pub const NUM_GENERATORS: usize = 4;
pub const MAX_CANDIDATES: usize = 6;
/// Largest tempo sync division exponent (2^4 = 16 bars)
pub const SYNC_DIV_MAX: f32 = 4.0;

/// How a parameter's stored float is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Float,
    Int,
    Bool,
}

/// Parameters shared by the global, note and generator levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Gain,
    GrainShape,
    GrainTilt,
    GrainRate,
    GrainDuration,
    GrainSync,
    PitchAdjust,
    PitchSpray,
    PosAdjust,
    PosSpray,
    PanAdjust,
    PanSpray,
    Reverse,
    OctaveAdjust,
    Attack,
    Decay,
    Sustain,
    Release,
    /// Index into [`crate::filter::FilterType`]
    FilterType,
    /// Hz
    FilterCutoff,
    /// Filter Q
    FilterResonance,
}

impl ParamType {
    pub const COUNT: usize = 21;

    pub const ALL: [ParamType; ParamType::COUNT] = [
        ParamType::Gain,
        ParamType::GrainShape,
        ParamType::GrainTilt,
        ParamType::GrainRate,
        ParamType::GrainDuration,
        ParamType::GrainSync,
        ParamType::PitchAdjust,
        ParamType::PitchSpray,
        ParamType::PosAdjust,
        ParamType::PosSpray,
        ParamType::PanAdjust,
        ParamType::PanSpray,
        ParamType::Reverse,
        ParamType::OctaveAdjust,
        ParamType::Attack,
        ParamType::Decay,
        ParamType::Sustain,
        ParamType::Release,
        ParamType::FilterType,
        ParamType::FilterCutoff,
        ParamType::FilterResonance,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ParamType::Gain => "gain",
            ParamType::GrainShape => "grain_shape",
            ParamType::GrainTilt => "grain_tilt",
            ParamType::GrainRate => "grain_rate",
            ParamType::GrainDuration => "grain_duration",
            ParamType::GrainSync => "grain_sync",
            ParamType::PitchAdjust => "pitch_adjust",
            ParamType::PitchSpray => "pitch_spray",
            ParamType::PosAdjust => "pos_adjust",
            ParamType::PosSpray => "pos_spray",
            ParamType::PanAdjust => "pan_adjust",
            ParamType::PanSpray => "pan_spray",
            ParamType::Reverse => "reverse",
            ParamType::OctaveAdjust => "octave_adjust",
            ParamType::Attack => "attack",
            ParamType::Decay => "decay",
            ParamType::Sustain => "sustain",
            ParamType::Release => "release",
            ParamType::FilterType => "filter_type",
            ParamType::FilterCutoff => "filter_cutoff",
            ParamType::FilterResonance => "filter_resonance",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|ty| ty.name() == name)
    }

    pub fn kind(self) -> ParamKind {
        match self {
            ParamType::GrainSync | ParamType::Reverse => ParamKind::Bool,
            ParamType::OctaveAdjust | ParamType::FilterType => ParamKind::Int,
            _ => ParamKind::Float,
        }
    }

    /// Inclusive value range
    pub fn range(self) -> (f32, f32) {
        match self {
            ParamType::Gain => (0.0, 1.0),
            ParamType::GrainShape => (0.0, 1.0),
            ParamType::GrainTilt => (0.0, 1.0),
            ParamType::GrainRate => (0.25, 1.0),
            ParamType::GrainDuration => (0.06, 0.3),
            ParamType::GrainSync => (0.0, 1.0),
            ParamType::PitchAdjust => (-0.25, 0.25),
            ParamType::PitchSpray => (0.0, 0.1),
            ParamType::PosAdjust => (-0.5, 0.5),
            ParamType::PosSpray => (0.0, 0.3),
            ParamType::PanAdjust => (-1.0, 1.0),
            ParamType::PanSpray => (0.0, 1.0),
            ParamType::Reverse => (0.0, 1.0),
            ParamType::OctaveAdjust => (-2.0, 2.0),
            ParamType::Attack => (0.01, 2.0),
            ParamType::Decay => (0.01, 2.0),
            ParamType::Sustain => (0.0, 1.0),
            ParamType::Release => (0.01, 2.0),
            ParamType::FilterType => (0.0, 3.0),
            ParamType::FilterCutoff => (20.0, 20000.0),
            ParamType::FilterResonance => (0.1, 5.0),
        }
    }

    pub fn default_value(self) -> f32 {
        match self {
            ParamType::Gain => 0.8,
            ParamType::GrainShape => 0.5,
            ParamType::GrainTilt => 0.5,
            ParamType::GrainRate => 0.5,
            ParamType::GrainDuration => 0.1,
            ParamType::Attack => 0.2,
            ParamType::Decay => 0.2,
            ParamType::Sustain => 0.8,
            ParamType::Release => 0.2,
            ParamType::FilterCutoff => 1000.0,
            ParamType::FilterResonance => std::f32::consts::FRAC_1_SQRT_2,
            _ => 0.0,
        }
    }

    /// Clamp into range, snapping ints and bools
    pub fn sanitize(self, value: f32) -> f32 {
        let (lo, hi) = self.range();
        let v = value.clamp(lo, hi);
        match self.kind() {
            ParamKind::Float => v,
            ParamKind::Int => v.round(),
            ParamKind::Bool => {
                if v >= 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn normalize(self, value: f32) -> f32 {
        let (lo, hi) = self.range();
        ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
    }

    pub fn denormalize(self, value_0to1: f32) -> f32 {
        let (lo, hi) = self.range();
        lo + value_0to1.clamp(0.0, 1.0) * (hi - lo)
    }
}

/// Lock-free f32 cell
///
/// Writers and readers may race; a reader sees either the old or the new
/// value, never a torn one.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// A precomputed playback location for one pitch class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamCandidate {
    /// Start position as a ratio of the sample length
    pub pos_ratio: f32,
    /// Octave shift relative to the detected pitch
    pub octave: i32,
    /// Playback rate that lands the detected pitch on the played note
    pub pb_rate: f32,
    /// Segment length as a ratio of the sample length
    pub duration: f32,
    pub salience: f32,
}

impl ParamCandidate {
    pub fn new(pos_ratio: f32, octave: i32, pb_rate: f32, duration: f32, salience: f32) -> Self {
        Self {
            pos_ratio,
            octave,
            pb_rate,
            duration,
            salience,
        }
    }

    /// Structural check used by the strict setters
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.pos_ratio) {
            return Err(format!("position ratio {} outside [0, 1]", self.pos_ratio));
        }
        if !(self.duration > 0.0 && self.duration <= 1.0) {
            return Err(format!("duration {} outside (0, 1]", self.duration));
        }
        if !(self.pb_rate.is_finite() && self.pb_rate > 0.0) {
            return Err(format!("playback rate {} must be positive", self.pb_rate));
        }
        if !self.salience.is_finite() {
            return Err(format!("salience {} is not finite", self.salience));
        }
        Ok(())
    }
}
