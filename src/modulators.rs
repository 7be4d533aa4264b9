//! Modulation sources: LFOs, envelopes and macros
//!
//! Every source is ticked once per audio block with
//! [`ModSource::process_block`] and holds that block's output until the
//! next tick. LFO outputs are bipolar (`-0.5..0.5`) or unipolar (`0..1`);
//! envelopes and macros are always unipolar.

use crate::envelope::EnvelopeAdsr;
use crate::parameters::SYNC_DIV_MAX;
use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI, TAU};

pub const NUM_LFOS: usize = 3;
pub const NUM_ENVS: usize = 3;
pub const NUM_MACROS: usize = 4;

pub const LFO_RATE_MIN: f32 = 0.1;
pub const LFO_RATE_MAX: f32 = 10.0;

/// A per-block modulation signal
pub trait ModSource: Send {
    /// Compute this block's output and advance internal state
    fn process_block(&mut self);

    /// Output of the most recent block
    fn output(&self) -> f32;

    /// Range the output can take
    fn range(&self) -> (f32, f32);

    /// Progress indicator for displays (LFO phase in radians, envelope stage)
    fn phase(&self) -> f32 {
        0.0
    }

    /// Adapt to a new host block size and sample rate
    fn prepare(&mut self, block_size: usize, sample_rate: f32);
}

/// LFO waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LfoShape {
    Sine,
    Triangle,
    Square,
    Saw,
}

impl LfoShape {
    pub const ALL: [LfoShape; 4] = [LfoShape::Sine, LfoShape::Triangle, LfoShape::Square, LfoShape::Saw];

    /// Bipolar (-1..1) value at phase `x` radians
    pub fn calc(self, x: f32) -> f32 {
        match self {
            LfoShape::Sine => x.sin(),
            LfoShape::Triangle => (2.0 / PI) * ((x - FRAC_PI_2 + TAU).rem_euclid(TAU) - PI).abs() - 1.0,
            LfoShape::Square => {
                if x.rem_euclid(TAU) < PI {
                    1.0
                } else {
                    -1.0
                }
            }
            LfoShape::Saw => {
                let scaled = (x - PI) / TAU;
                2.0 * (scaled - (0.5 + scaled).floor())
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LfoShape::Sine => "sine",
            LfoShape::Triangle => "tri",
            LfoShape::Square => "square",
            LfoShape::Saw => "saw",
        }
    }
}

/// Low frequency oscillator
#[derive(Debug, Clone)]
pub struct Lfo {
    pub shape: LfoShape,
    /// Hz, or a bar division when `sync` is set
    pub rate: f32,
    /// Phase restored on retrigger, radians
    pub phase_offset: f32,
    pub sync: bool,
    pub bipolar: bool,
    pub retrigger: bool,
    rad_per_block: f32,
    bars_per_sec: f32,
    cur_phase: f32,
    output: f32,
}

impl Default for Lfo {
    fn default() -> Self {
        Self {
            shape: LfoShape::Sine,
            rate: 1.0,
            phase_offset: 0.0,
            sync: false,
            bipolar: true,
            retrigger: false,
            rad_per_block: TAU * 512.0 / 48000.0,
            bars_per_sec: 1.0,
            cur_phase: 0.0,
            output: 0.0,
        }
    }
}

impl Lfo {
    pub fn new(shape: LfoShape, rate: f32) -> Self {
        Self {
            shape,
            rate: rate.clamp(LFO_RATE_MIN, LFO_RATE_MAX),
            ..Self::default()
        }
    }

    /// Host tempo in bars per second, used when synced
    pub fn set_sync_rate(&mut self, bars_per_sec: f32) {
        if bars_per_sec > 0.0 {
            self.bars_per_sec = bars_per_sec;
        }
    }

    /// Restart from the phase offset if retriggering is enabled
    pub fn check_retrigger(&mut self) {
        if self.retrigger {
            self.cur_phase = self.phase_offset.rem_euclid(TAU);
        }
    }

    fn rate_0to1(&self) -> f32 {
        ((self.rate - LFO_RATE_MIN) / (LFO_RATE_MAX - LFO_RATE_MIN)).clamp(0.0, 1.0)
    }
}

impl ModSource for Lfo {
    fn process_block(&mut self) {
        let value = self.shape.calc(self.cur_phase) / 2.0;
        self.output = if self.bipolar { value } else { value + 0.5 };

        if self.sync {
            // One cycle every `div_in_bars` bars
            let div_in_bars = 2f32.powi((SYNC_DIV_MAX * self.rate_0to1()).round() as i32);
            self.cur_phase += self.rad_per_block * self.bars_per_sec / div_in_bars;
        } else {
            self.cur_phase += self.rad_per_block * self.rate;
        }
        self.cur_phase = self.cur_phase.rem_euclid(TAU);
    }

    fn output(&self) -> f32 {
        self.output
    }

    fn range(&self) -> (f32, f32) {
        if self.bipolar {
            (-0.5, 0.5)
        } else {
            (0.0, 1.0)
        }
    }

    fn phase(&self) -> f32 {
        self.cur_phase
    }

    fn prepare(&mut self, block_size: usize, sample_rate: f32) {
        if sample_rate > 0.0 {
            self.rad_per_block = TAU * block_size as f32 / sample_rate;
        }
    }
}

/// ADSR envelope source, stage lengths in seconds
#[derive(Debug, Clone)]
pub struct ModEnvelope {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
    env: EnvelopeAdsr,
    cur_ts: i64,
    block_size: usize,
    sample_rate: f32,
    output: f32,
}

impl Default for ModEnvelope {
    fn default() -> Self {
        Self {
            attack: 0.2,
            decay: 0.2,
            sustain: 0.8,
            release: 0.2,
            env: EnvelopeAdsr::new(),
            cur_ts: 0,
            block_size: 512,
            sample_rate: 48000.0,
            output: 0.0,
        }
    }
}

impl ModEnvelope {
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self {
            attack,
            decay,
            sustain,
            release,
            ..Self::default()
        }
    }

    pub fn note_on(&mut self, ts: i64) {
        self.env.note_on(ts);
        self.cur_ts = ts;
    }

    pub fn note_off(&mut self, ts: i64) {
        self.env.note_off(ts);
        self.cur_ts = ts;
    }
}

impl ModSource for ModEnvelope {
    fn process_block(&mut self) {
        let sr = self.sample_rate;
        self.output = self.env.amplitude(
            self.cur_ts,
            self.attack * sr,
            self.decay * sr,
            self.sustain,
            self.release * sr,
        );
        self.cur_ts += self.block_size as i64;
    }

    fn output(&self) -> f32 {
        self.output
    }

    fn range(&self) -> (f32, f32) {
        (0.0, 1.0)
    }

    fn phase(&self) -> f32 {
        self.env.state() as u8 as f32
    }

    fn prepare(&mut self, block_size: usize, sample_rate: f32) {
        self.block_size = block_size;
        self.sample_rate = sample_rate;
    }
}

/// Directly set value
#[derive(Debug, Clone, Default)]
pub struct Macro {
    pub value: f32,
    output: f32,
}

impl Macro {
    pub fn new(value: f32) -> Self {
        Self {
            value: value.clamp(0.0, 1.0),
            output: 0.0,
        }
    }
}

impl ModSource for Macro {
    fn process_block(&mut self) {
        self.output = self.value.clamp(0.0, 1.0);
    }

    fn output(&self) -> f32 {
        self.output
    }

    fn range(&self) -> (f32, f32) {
        (0.0, 1.0)
    }

    fn prepare(&mut self, _block_size: usize, _sample_rate: f32) {}
}
